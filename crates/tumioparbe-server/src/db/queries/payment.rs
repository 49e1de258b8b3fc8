//! Invoice and payment queries.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgExecutor};

use crate::db::models::{
    Invoice, NewPayment, Payment, PaymentFilter, PaymentHistoryRow, PaymentStatus,
    PendingInvoiceRow,
};
use crate::db::DbPool;
use crate::error::AppResult;

const INVOICE_COLUMNS: &str = "id, enrollment_id, month, amount, is_paid, coupon_id, \
     temp_invoice, temp_invoice_data, created_at, updated_at";

const PAYMENT_COLUMNS: &str = "id, invoice_id, transaction_id, amount, payment_method, status, \
     payment_id, payer_reference, payment_create_time, payment_execute_time, created_at, updated_at";

/// Fields for a new invoice row.
#[derive(Debug, Clone)]
pub struct NewInvoice<'a> {
    pub enrollment_id: Option<i64>,
    pub month: NaiveDate,
    pub amount: Decimal,
    pub is_paid: bool,
    pub coupon_id: Option<i64>,
    pub temp_invoice_data: Option<&'a serde_json::Value>,
}

/// Unpaid invoice with the parent contact details needed for a reminder.
#[derive(Debug, Clone, FromRow)]
pub struct ReminderRow {
    pub invoice_id: i64,
    pub month: NaiveDate,
    pub amount: Decimal,
    pub parent_id: i64,
    pub parent_phone: String,
    pub student_id: i64,
    pub student_name: String,
    pub course_name: String,
    pub batch_name: String,
}

pub async fn get_invoice<'e, E>(executor: E, id: i64) -> AppResult<Option<Invoice>>
where
    E: PgExecutor<'e>,
{
    let invoice = sqlx::query_as::<_, Invoice>(&format!(
        "SELECT {} FROM invoices WHERE id = $1",
        INVOICE_COLUMNS
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?;

    Ok(invoice)
}

pub async fn get_invoices_by_ids(pool: &DbPool, ids: &[i64]) -> AppResult<Vec<Invoice>> {
    let invoices = sqlx::query_as::<_, Invoice>(&format!(
        "SELECT {} FROM invoices WHERE id = ANY($1) ORDER BY id",
        INVOICE_COLUMNS
    ))
    .bind(ids)
    .fetch_all(pool)
    .await?;

    Ok(invoices)
}

/// Parent account owning an invoice, through its enrollment.
pub async fn get_invoice_owner(pool: &DbPool, invoice_id: i64) -> AppResult<Option<i64>> {
    let owner: Option<(i64,)> = sqlx::query_as(
        r#"
        SELECT s.parent_id
        FROM invoices i
        JOIN enrollments e ON e.id = i.enrollment_id
        JOIN students s ON s.id = e.student_id
        WHERE i.id = $1
        "#,
    )
    .bind(invoice_id)
    .fetch_optional(pool)
    .await?;

    Ok(owner.map(|(id,)| id))
}

/// Ids among `ids` that do not belong to `parent_id`'s children.
pub async fn invoices_not_owned_by(
    pool: &DbPool,
    ids: &[i64],
    parent_id: i64,
) -> AppResult<Vec<i64>> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        r#"
        SELECT i.id
        FROM invoices i
        LEFT JOIN enrollments e ON e.id = i.enrollment_id
        LEFT JOIN students s ON s.id = e.student_id
        WHERE i.id = ANY($1) AND (s.parent_id IS NULL OR s.parent_id <> $2)
        ORDER BY i.id
        "#,
    )
    .bind(ids)
    .bind(parent_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub async fn insert_invoice<'e, E>(executor: E, invoice: &NewInvoice<'_>) -> AppResult<Invoice>
where
    E: PgExecutor<'e>,
{
    let created = sqlx::query_as::<_, Invoice>(&format!(
        r#"
        INSERT INTO invoices (enrollment_id, month, amount, is_paid, coupon_id,
                              temp_invoice, temp_invoice_data)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {}
        "#,
        INVOICE_COLUMNS
    ))
    .bind(invoice.enrollment_id)
    .bind(invoice.month)
    .bind(invoice.amount)
    .bind(invoice.is_paid)
    .bind(invoice.coupon_id)
    .bind(invoice.temp_invoice_data.is_some())
    .bind(invoice.temp_invoice_data)
    .fetch_one(executor)
    .await?;

    Ok(created)
}

/// Insert an unpaid monthly invoice unless one already exists for the
/// enrollment and month. Returns the new id, or `None` when skipped.
pub async fn insert_monthly_invoice(
    pool: &DbPool,
    enrollment_id: i64,
    month: NaiveDate,
    amount: Decimal,
) -> AppResult<Option<i64>> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        INSERT INTO invoices (enrollment_id, month, amount, is_paid)
        VALUES ($1, $2, $3, FALSE)
        ON CONFLICT (enrollment_id, month) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(enrollment_id)
    .bind(month)
    .bind(amount)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(id,)| id))
}

pub async fn invoice_exists_for_month(
    pool: &DbPool,
    enrollment_id: i64,
    month: NaiveDate,
) -> AppResult<bool> {
    let (exists,): (bool,) = sqlx::query_as(
        "SELECT EXISTS(SELECT 1 FROM invoices WHERE enrollment_id = $1 AND month = $2)",
    )
    .bind(enrollment_id)
    .bind(month)
    .fetch_one(pool)
    .await?;

    Ok(exists)
}

pub async fn mark_invoice_paid<'e, E>(executor: E, id: i64) -> AppResult<bool>
where
    E: PgExecutor<'e>,
{
    let result =
        sqlx::query("UPDATE invoices SET is_paid = TRUE, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn delete_invoice<'e, E>(executor: E, id: i64) -> AppResult<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query("DELETE FROM invoices WHERE id = $1")
        .bind(id)
        .execute(executor)
        .await?;

    Ok(())
}

/// Unpaid, non-temporary invoices, optionally limited to one parent.
pub async fn list_pending_invoices(
    pool: &DbPool,
    parent_id: Option<i64>,
) -> AppResult<Vec<PendingInvoiceRow>> {
    let rows = sqlx::query_as::<_, PendingInvoiceRow>(
        r#"
        SELECT i.id, i.enrollment_id, i.month, i.amount, i.is_paid, i.coupon_id,
               i.temp_invoice, i.temp_invoice_data, i.created_at, i.updated_at,
               s.name AS student_name, c.name AS course_name, b.name AS batch_name
        FROM invoices i
        JOIN enrollments e ON e.id = i.enrollment_id
        JOIN students s ON s.id = e.student_id
        JOIN batches b ON b.id = e.batch_id
        JOIN courses c ON c.id = b.course_id
        WHERE NOT i.is_paid AND ($1::BIGINT IS NULL OR s.parent_id = $1)
        ORDER BY i.month, i.id
        "#,
    )
    .bind(parent_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Unpaid invoices for months up to and including `through`.
pub async fn list_due_for_reminder(pool: &DbPool, through: NaiveDate) -> AppResult<Vec<ReminderRow>> {
    let rows = sqlx::query_as::<_, ReminderRow>(
        r#"
        SELECT i.id AS invoice_id, i.month, i.amount,
               u.id AS parent_id, u.phone AS parent_phone,
               s.id AS student_id, s.name AS student_name,
               c.name AS course_name, b.name AS batch_name
        FROM invoices i
        JOIN enrollments e ON e.id = i.enrollment_id
        JOIN students s ON s.id = e.student_id
        JOIN users u ON u.id = s.parent_id
        JOIN batches b ON b.id = e.batch_id
        JOIN courses c ON c.id = b.course_id
        WHERE NOT i.is_paid AND i.month <= $1
        ORDER BY i.id
        "#,
    )
    .bind(through)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

pub async fn insert_payment<'e, E>(executor: E, payment: &NewPayment<'_>) -> AppResult<Payment>
where
    E: PgExecutor<'e>,
{
    let created = sqlx::query_as::<_, Payment>(&format!(
        r#"
        INSERT INTO payments (invoice_id, transaction_id, amount, payment_method, status,
                              payment_id, payer_reference, payment_create_time,
                              payment_execute_time)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING {}
        "#,
        PAYMENT_COLUMNS
    ))
    .bind(payment.invoice_id)
    .bind(payment.transaction_id)
    .bind(payment.amount)
    .bind(payment.method.as_str())
    .bind(payment.status.as_str())
    .bind(payment.payment_id)
    .bind(payment.payer_reference)
    .bind(payment.payment_create_time)
    .bind(payment.payment_execute_time)
    .fetch_one(executor)
    .await?;

    Ok(created)
}

/// A payment by id, optionally restricted to one parent.
pub async fn get_payment(
    pool: &DbPool,
    id: i64,
    parent_id: Option<i64>,
) -> AppResult<Option<Payment>> {
    let payment = sqlx::query_as::<_, Payment>(
        r#"
        SELECT p.id, p.invoice_id, p.transaction_id, p.amount, p.payment_method, p.status,
               p.payment_id, p.payer_reference, p.payment_create_time, p.payment_execute_time,
               p.created_at, p.updated_at
        FROM payments p
        LEFT JOIN invoices i ON i.id = p.invoice_id
        LEFT JOIN enrollments e ON e.id = i.enrollment_id
        LEFT JOIN students s ON s.id = e.student_id
        WHERE p.id = $1 AND ($2::BIGINT IS NULL OR s.parent_id = $2)
        "#,
    )
    .bind(id)
    .bind(parent_id)
    .fetch_optional(pool)
    .await?;

    Ok(payment)
}

/// The payment record created for a bKash payment id.
///
/// Bulk settlements create several rows sharing one bKash id; the oldest is
/// the original checkout.
pub async fn get_payment_by_bkash_id<'e, E>(
    executor: E,
    payment_id: &str,
) -> AppResult<Option<Payment>>
where
    E: PgExecutor<'e>,
{
    let payment = sqlx::query_as::<_, Payment>(&format!(
        "SELECT {} FROM payments WHERE payment_id = $1 ORDER BY id LIMIT 1",
        PAYMENT_COLUMNS
    ))
    .bind(payment_id)
    .fetch_optional(executor)
    .await?;

    Ok(payment)
}

pub async fn list_payments(
    pool: &DbPool,
    parent_id: Option<i64>,
    filter: &PaymentFilter,
) -> AppResult<Vec<Payment>> {
    let payments = sqlx::query_as::<_, Payment>(
        r#"
        SELECT p.id, p.invoice_id, p.transaction_id, p.amount, p.payment_method, p.status,
               p.payment_id, p.payer_reference, p.payment_create_time, p.payment_execute_time,
               p.created_at, p.updated_at
        FROM payments p
        LEFT JOIN invoices i ON i.id = p.invoice_id
        LEFT JOIN enrollments e ON e.id = i.enrollment_id
        LEFT JOIN students s ON s.id = e.student_id
        WHERE ($1::BIGINT IS NULL OR s.parent_id = $1)
          AND ($2::TEXT IS NULL OR p.status = $2)
          AND ($3::BIGINT IS NULL OR p.invoice_id = $3)
        ORDER BY p.created_at DESC, p.id DESC
        "#,
    )
    .bind(parent_id)
    .bind(filter.status.as_deref())
    .bind(filter.invoice)
    .fetch_all(pool)
    .await?;

    Ok(payments)
}

pub async fn payment_history(
    pool: &DbPool,
    parent_id: Option<i64>,
) -> AppResult<Vec<PaymentHistoryRow>> {
    let rows = sqlx::query_as::<_, PaymentHistoryRow>(
        r#"
        SELECT p.id, p.invoice_id, p.transaction_id, p.amount, p.payment_method, p.status,
               p.payment_id, p.payer_reference, p.payment_create_time, p.payment_execute_time,
               p.created_at, p.updated_at,
               i.month AS invoice_month,
               s.name AS student_name, c.name AS course_name, b.name AS batch_name
        FROM payments p
        JOIN invoices i ON i.id = p.invoice_id
        LEFT JOIN enrollments e ON e.id = i.enrollment_id
        LEFT JOIN students s ON s.id = e.student_id
        LEFT JOIN batches b ON b.id = e.batch_id
        LEFT JOIN courses c ON c.id = b.course_id
        WHERE ($1::BIGINT IS NULL OR s.parent_id = $1)
        ORDER BY p.created_at DESC, p.id DESC
        "#,
    )
    .bind(parent_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

pub async fn set_payment_status<'e, E>(executor: E, id: i64, status: PaymentStatus) -> AppResult<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query("UPDATE payments SET status = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(status.as_str())
        .execute(executor)
        .await?;

    Ok(())
}

/// Mark a payment completed, recording the gateway transaction id.
pub async fn complete_payment<'e, E>(
    executor: E,
    id: i64,
    transaction_id: &str,
    executed_at: DateTime<Utc>,
) -> AppResult<Payment>
where
    E: PgExecutor<'e>,
{
    let payment = sqlx::query_as::<_, Payment>(&format!(
        r#"
        UPDATE payments SET
            status = 'Completed', transaction_id = $2, payment_execute_time = $3,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        PAYMENT_COLUMNS
    ))
    .bind(id)
    .bind(transaction_id)
    .bind(executed_at)
    .fetch_one(executor)
    .await?;

    Ok(payment)
}

pub async fn reassign_payment<'e, E>(executor: E, id: i64, invoice_id: i64) -> AppResult<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query("UPDATE payments SET invoice_id = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(invoice_id)
        .execute(executor)
        .await?;

    Ok(())
}

pub async fn delete_payment<'e, E>(executor: E, id: i64) -> AppResult<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query("DELETE FROM payments WHERE id = $1")
        .bind(id)
        .execute(executor)
        .await?;

    Ok(())
}
