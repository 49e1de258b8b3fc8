//! Enrollment and coupon queries.
//!
//! Functions that take part in multi-step writes accept any executor so they
//! can run inside a transaction.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{FromRow, PgExecutor};

use crate::db::models::{Coupon, Enrollment};
use crate::db::DbPool;
use crate::error::AppResult;

const ENROLLMENT_COLUMNS: &str =
    "id, student_id, batch_id, start_month, tuition_fee, is_active, created_at, updated_at";

const COUPON_COLUMNS: &str = "id, code, name, discount_types, discount_value, expires_at, \
     is_active, created_at, updated_at";

/// An active enrollment due for a monthly invoice, with its resolved fee.
#[derive(Debug, Clone, FromRow)]
pub struct BillableEnrollment {
    pub id: i64,
    pub student_name: String,
    /// enrollment fee, else batch fee, else course monthly fee
    pub fee: Decimal,
}

/// List enrollments, optionally restricted to one parent's children.
pub async fn list_enrollments(pool: &DbPool, parent_id: Option<i64>) -> AppResult<Vec<Enrollment>> {
    let enrollments = sqlx::query_as::<_, Enrollment>(
        r#"
        SELECT e.id, e.student_id, e.batch_id, e.start_month, e.tuition_fee, e.is_active,
               e.created_at, e.updated_at
        FROM enrollments e
        JOIN students s ON s.id = e.student_id
        WHERE ($1::BIGINT IS NULL OR s.parent_id = $1)
        ORDER BY e.id
        "#,
    )
    .bind(parent_id)
    .fetch_all(pool)
    .await?;

    Ok(enrollments)
}

pub async fn get_enrollment<'e, E>(executor: E, id: i64) -> AppResult<Option<Enrollment>>
where
    E: PgExecutor<'e>,
{
    let enrollment = sqlx::query_as::<_, Enrollment>(&format!(
        "SELECT {} FROM enrollments WHERE id = $1",
        ENROLLMENT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?;

    Ok(enrollment)
}

pub async fn active_enrollment_exists<'e, E>(
    executor: E,
    student_id: i64,
    batch_id: i64,
) -> AppResult<bool>
where
    E: PgExecutor<'e>,
{
    let (exists,): (bool,) = sqlx::query_as(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM enrollments
            WHERE student_id = $1 AND batch_id = $2 AND is_active
        )
        "#,
    )
    .bind(student_id)
    .bind(batch_id)
    .fetch_one(executor)
    .await?;

    Ok(exists)
}

pub async fn insert_enrollment<'e, E>(
    executor: E,
    student_id: i64,
    batch_id: i64,
    start_month: NaiveDate,
    tuition_fee: Option<Decimal>,
) -> AppResult<Enrollment>
where
    E: PgExecutor<'e>,
{
    let enrollment = sqlx::query_as::<_, Enrollment>(&format!(
        r#"
        INSERT INTO enrollments (student_id, batch_id, start_month, tuition_fee)
        VALUES ($1, $2, $3, $4)
        RETURNING {}
        "#,
        ENROLLMENT_COLUMNS
    ))
    .bind(student_id)
    .bind(batch_id)
    .bind(start_month)
    .bind(tuition_fee)
    .fetch_one(executor)
    .await?;

    Ok(enrollment)
}

pub async fn update_enrollment(
    pool: &DbPool,
    id: i64,
    start_month: Option<NaiveDate>,
    tuition_fee: Option<Decimal>,
    is_active: Option<bool>,
) -> AppResult<Enrollment> {
    let enrollment = sqlx::query_as::<_, Enrollment>(&format!(
        r#"
        UPDATE enrollments SET
            start_month = COALESCE($2, start_month),
            tuition_fee = COALESCE($3, tuition_fee),
            is_active = COALESCE($4, is_active),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        ENROLLMENT_COLUMNS
    ))
    .bind(id)
    .bind(start_month)
    .bind(tuition_fee)
    .bind(is_active)
    .fetch_one(pool)
    .await?;

    Ok(enrollment)
}

pub async fn delete_enrollment(pool: &DbPool, id: i64) -> AppResult<bool> {
    let result = sqlx::query("DELETE FROM enrollments WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Active enrollments in `batch_id` for the given students.
pub async fn list_active_in_batch_for_students(
    pool: &DbPool,
    batch_id: i64,
    student_ids: &[i64],
) -> AppResult<Vec<Enrollment>> {
    let enrollments = sqlx::query_as::<_, Enrollment>(&format!(
        r#"
        SELECT {} FROM enrollments
        WHERE batch_id = $1 AND student_id = ANY($2) AND is_active
        ORDER BY id
        "#,
        ENROLLMENT_COLUMNS
    ))
    .bind(batch_id)
    .bind(student_ids)
    .fetch_all(pool)
    .await?;

    Ok(enrollments)
}

pub async fn move_enrollment(pool: &DbPool, id: i64, batch_id: i64) -> AppResult<()> {
    sqlx::query("UPDATE enrollments SET batch_id = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(batch_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Whether `parent_id` has a child actively enrolled in `batch_id`.
pub async fn parent_has_child_in_batch(
    pool: &DbPool,
    batch_id: i64,
    parent_id: i64,
) -> AppResult<bool> {
    let (exists,): (bool,) = sqlx::query_as(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM enrollments e
            JOIN students s ON s.id = e.student_id
            WHERE e.batch_id = $1 AND s.parent_id = $2 AND e.is_active
        )
        "#,
    )
    .bind(batch_id)
    .bind(parent_id)
    .fetch_one(pool)
    .await?;

    Ok(exists)
}

/// Active enrollments that started before `before` and have no invoice for
/// that month yet.
pub async fn list_billable_enrollments(
    pool: &DbPool,
    before: NaiveDate,
) -> AppResult<Vec<BillableEnrollment>> {
    let rows = sqlx::query_as::<_, BillableEnrollment>(
        r#"
        SELECT e.id, s.name AS student_name,
               COALESCE(e.tuition_fee, b.tuition_fee, c.monthly_fee) AS fee
        FROM enrollments e
        JOIN students s ON s.id = e.student_id
        JOIN batches b ON b.id = e.batch_id
        JOIN courses c ON c.id = b.course_id
        WHERE e.is_active
          AND e.start_month < $1
          AND NOT EXISTS (
              SELECT 1 FROM invoices i WHERE i.enrollment_id = e.id AND i.month = $1
          )
        ORDER BY e.id
        "#,
    )
    .bind(before)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

pub async fn list_coupons(pool: &DbPool) -> AppResult<Vec<Coupon>> {
    let coupons = sqlx::query_as::<_, Coupon>(&format!(
        "SELECT {} FROM coupons ORDER BY id",
        COUPON_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    Ok(coupons)
}

pub async fn get_coupon<'e, E>(executor: E, id: i64) -> AppResult<Option<Coupon>>
where
    E: PgExecutor<'e>,
{
    let coupon = sqlx::query_as::<_, Coupon>(&format!(
        "SELECT {} FROM coupons WHERE id = $1",
        COUPON_COLUMNS
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?;

    Ok(coupon)
}

pub async fn get_coupon_by_code<'e, E>(executor: E, code: &str) -> AppResult<Option<Coupon>>
where
    E: PgExecutor<'e>,
{
    let coupon = sqlx::query_as::<_, Coupon>(&format!(
        "SELECT {} FROM coupons WHERE code = $1",
        COUPON_COLUMNS
    ))
    .bind(code)
    .fetch_optional(executor)
    .await?;

    Ok(coupon)
}

pub async fn coupon_code_taken(pool: &DbPool, code: &str, except_id: Option<i64>) -> AppResult<bool> {
    let (exists,): (bool,) = sqlx::query_as(
        "SELECT EXISTS(SELECT 1 FROM coupons WHERE code = $1 AND ($2::BIGINT IS NULL OR id <> $2))",
    )
    .bind(code)
    .bind(except_id)
    .fetch_one(pool)
    .await?;

    Ok(exists)
}

pub async fn insert_coupon(
    pool: &DbPool,
    code: &str,
    name: &str,
    discount_types: &[String],
    discount_value: Option<Decimal>,
    expires_at: DateTime<Utc>,
    is_active: bool,
) -> AppResult<Coupon> {
    let coupon = sqlx::query_as::<_, Coupon>(&format!(
        r#"
        INSERT INTO coupons (code, name, discount_types, discount_value, expires_at, is_active)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {}
        "#,
        COUPON_COLUMNS
    ))
    .bind(code)
    .bind(name)
    .bind(Json(discount_types))
    .bind(discount_value)
    .bind(expires_at)
    .bind(is_active)
    .fetch_one(pool)
    .await?;

    Ok(coupon)
}

/// Replace a coupon's fields. Callers merge partial input beforehand.
#[allow(clippy::too_many_arguments)]
pub async fn update_coupon(
    pool: &DbPool,
    id: i64,
    code: &str,
    name: &str,
    discount_types: &[String],
    discount_value: Option<Decimal>,
    expires_at: DateTime<Utc>,
    is_active: bool,
) -> AppResult<Coupon> {
    let coupon = sqlx::query_as::<_, Coupon>(&format!(
        r#"
        UPDATE coupons SET
            code = $2, name = $3, discount_types = $4, discount_value = $5,
            expires_at = $6, is_active = $7, updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        COUPON_COLUMNS
    ))
    .bind(id)
    .bind(code)
    .bind(name)
    .bind(Json(discount_types))
    .bind(discount_value)
    .bind(expires_at)
    .bind(is_active)
    .fetch_one(pool)
    .await?;

    Ok(coupon)
}

pub async fn delete_coupon(pool: &DbPool, id: i64) -> AppResult<bool> {
    let result = sqlx::query("DELETE FROM coupons WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
