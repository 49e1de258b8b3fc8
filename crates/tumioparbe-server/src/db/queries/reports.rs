//! Aggregate queries backing the admin reports.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::FromRow;

use crate::db::DbPool;
use crate::error::AppResult;

/// Invoice totals for one month, or across all months.
#[derive(Debug, Clone, Default, FromRow)]
pub struct InvoiceTotals {
    pub paid_amount: Decimal,
    pub unpaid_amount: Decimal,
    pub invoice_count: i64,
    pub paid_count: i64,
}

/// Delivery counts summed over SMS logs.
#[derive(Debug, Clone, Default, FromRow)]
pub struct SmsTotals {
    pub total_sent: i64,
    pub successful: i64,
    pub failed: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct CourseEnrollmentRow {
    pub course_id: i64,
    pub course_name: String,
    pub enrollment_count: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct BatchEnrollmentRow {
    pub course_id: i64,
    pub batch_id: i64,
    pub batch_name: String,
    pub enrollment_count: i64,
}

/// Totals over real (non-temporary) invoices, restricted to `month` if given.
pub async fn invoice_totals(pool: &DbPool, month: Option<NaiveDate>) -> AppResult<InvoiceTotals> {
    let totals = sqlx::query_as::<_, InvoiceTotals>(
        r#"
        SELECT COALESCE(SUM(amount) FILTER (WHERE is_paid), 0) AS paid_amount,
               COALESCE(SUM(amount) FILTER (WHERE NOT is_paid), 0) AS unpaid_amount,
               COUNT(*) AS invoice_count,
               COUNT(*) FILTER (WHERE is_paid) AS paid_count
        FROM invoices
        WHERE NOT temp_invoice
          AND ($1::DATE IS NULL OR date_trunc('month', month) = date_trunc('month', $1::DATE))
        "#,
    )
    .bind(month)
    .fetch_one(pool)
    .await?;

    Ok(totals)
}

/// Returns (students, active enrollments, active courses, visible batches).
pub async fn headline_counts(pool: &DbPool) -> AppResult<(i64, i64, i64, i64)> {
    let counts: (i64, i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT (SELECT COUNT(*) FROM students),
               (SELECT COUNT(*) FROM enrollments WHERE is_active),
               (SELECT COUNT(*) FROM courses WHERE is_active),
               (SELECT COUNT(*) FROM batches WHERE is_visible)
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(counts)
}

pub async fn course_enrollment_counts(pool: &DbPool) -> AppResult<Vec<CourseEnrollmentRow>> {
    let rows = sqlx::query_as::<_, CourseEnrollmentRow>(
        r#"
        SELECT c.id AS course_id, c.name AS course_name,
               COUNT(e.id) FILTER (WHERE e.is_active) AS enrollment_count
        FROM courses c
        LEFT JOIN batches b ON b.course_id = c.id
        LEFT JOIN enrollments e ON e.batch_id = b.id
        WHERE c.is_active
        GROUP BY c.id, c.name
        ORDER BY c.id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Visible batches of active courses with their active enrollment counts.
pub async fn batch_enrollment_counts(pool: &DbPool) -> AppResult<Vec<BatchEnrollmentRow>> {
    let rows = sqlx::query_as::<_, BatchEnrollmentRow>(
        r#"
        SELECT b.course_id, b.id AS batch_id, b.name AS batch_name,
               COUNT(e.id) FILTER (WHERE e.is_active) AS enrollment_count
        FROM batches b
        JOIN courses c ON c.id = b.course_id
        LEFT JOIN enrollments e ON e.batch_id = b.id
        WHERE b.is_visible AND c.is_active
        GROUP BY b.course_id, b.id, b.name
        ORDER BY b.id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Enrollments whose start month falls in `[from, until)`.
pub async fn count_enrollments_starting(
    pool: &DbPool,
    from: NaiveDate,
    until: NaiveDate,
) -> AppResult<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM enrollments WHERE start_month >= $1 AND start_month < $2",
    )
    .bind(from)
    .bind(until)
    .fetch_one(pool)
    .await?;

    Ok(count)
}

/// Delivery totals for one message type (or all), created in `[from, until)`
/// when bounds are given.
pub async fn sms_totals(
    pool: &DbPool,
    message_type: Option<&str>,
    from: Option<NaiveDate>,
    until: Option<NaiveDate>,
) -> AppResult<SmsTotals> {
    let totals = sqlx::query_as::<_, SmsTotals>(
        r#"
        SELECT COALESCE(SUM(recipient_count), 0)::BIGINT AS total_sent,
               COALESCE(SUM(successful_count), 0)::BIGINT AS successful,
               COALESCE(SUM(failed_count), 0)::BIGINT AS failed
        FROM sms_logs
        WHERE ($1::TEXT IS NULL OR message_type = $1)
          AND ($2::DATE IS NULL OR created_at >= $2::DATE)
          AND ($3::DATE IS NULL OR created_at < $3::DATE)
        "#,
    )
    .bind(message_type)
    .bind(from)
    .bind(until)
    .fetch_one(pool)
    .await?;

    Ok(totals)
}
