//! Activity log, SMS log, and system settings queries.

use sqlx::PgExecutor;

use crate::db::models::{ActionType, ActivityLog, NewSmsLog, SmsLog, SmsLogFilter, SystemSettings};
use crate::db::DbPool;
use crate::error::AppResult;

const SETTINGS_COLUMNS: &str = "id, payment_reminder_days, invoice_generation_days, \
     auto_generate_invoices, auto_send_reminders, created_by, updated_by, created_at, updated_at";

const SMS_LOG_SELECT: &str = r#"
    SELECT l.id, l.phone_number, l.message, l.message_type, l.status, l.sent_by,
           u.name AS sent_by_name, l.recipient_count, l.successful_count, l.failed_count,
           l.provider_response, l.created_at, l.updated_at
    FROM sms_logs l
    LEFT JOIN users u ON u.id = l.sent_by
"#;

pub async fn insert_activity<'e, E>(
    executor: E,
    user_id: i64,
    action: ActionType,
    metadata: &serde_json::Value,
) -> AppResult<ActivityLog>
where
    E: PgExecutor<'e>,
{
    let entry = sqlx::query_as::<_, ActivityLog>(
        r#"
        INSERT INTO activity_logs (user_id, action_type, metadata)
        VALUES ($1, $2, $3)
        RETURNING id, user_id, action_type, metadata, created_at
        "#,
    )
    .bind(user_id)
    .bind(action.as_str())
    .bind(metadata)
    .fetch_one(executor)
    .await?;

    tracing::debug!(activity_id = entry.id, action = %action, user_id, "Activity recorded");
    Ok(entry)
}

pub async fn insert_sms_log(pool: &DbPool, log: &NewSmsLog<'_>) -> AppResult<i64> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO sms_logs (phone_number, message, message_type, status, sent_by,
                              recipient_count, successful_count, failed_count,
                              provider_response)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING id
        "#,
    )
    .bind(log.phone_number)
    .bind(log.message)
    .bind(log.message_type.as_str())
    .bind(log.status.as_str())
    .bind(log.sent_by)
    .bind(log.recipient_count)
    .bind(log.successful_count)
    .bind(log.failed_count)
    .bind(log.provider_response)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// SMS logs matching `filter`, newest first. Dates are inclusive.
pub async fn list_sms_logs(pool: &DbPool, filter: &SmsLogFilter) -> AppResult<Vec<SmsLog>> {
    let search = filter
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{}%", s));

    let logs = sqlx::query_as::<_, SmsLog>(&format!(
        r#"
        {}
        WHERE ($1::TEXT IS NULL OR l.message_type = $1)
          AND ($2::TEXT IS NULL OR l.status = $2)
          AND ($3::DATE IS NULL OR l.created_at >= $3::DATE)
          AND ($4::DATE IS NULL OR l.created_at < $4::DATE + 1)
          AND ($5::TEXT IS NULL OR l.phone_number ILIKE $5 OR l.message ILIKE $5)
        ORDER BY l.created_at DESC, l.id DESC
        "#,
        SMS_LOG_SELECT
    ))
    .bind(filter.message_type.as_deref())
    .bind(filter.status.as_deref())
    .bind(filter.start_date)
    .bind(filter.end_date)
    .bind(search)
    .fetch_all(pool)
    .await?;

    Ok(logs)
}

pub async fn get_sms_log(pool: &DbPool, id: i64) -> AppResult<Option<SmsLog>> {
    let log = sqlx::query_as::<_, SmsLog>(&format!("{} WHERE l.id = $1", SMS_LOG_SELECT))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(log)
}

/// Row counts grouped by a column of `sms_logs`.
pub async fn count_sms_logs_by(pool: &DbPool, column: SmsLogColumn) -> AppResult<Vec<(String, i64)>> {
    let rows: Vec<(String, i64)> = sqlx::query_as(&format!(
        "SELECT {col}, COUNT(*) FROM sms_logs GROUP BY {col}",
        col = column.as_str()
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Groupable `sms_logs` columns.
#[derive(Debug, Clone, Copy)]
pub enum SmsLogColumn {
    MessageType,
    Status,
}

impl SmsLogColumn {
    fn as_str(&self) -> &'static str {
        match self {
            SmsLogColumn::MessageType => "message_type",
            SmsLogColumn::Status => "status",
        }
    }
}

/// Load the settings row, creating it with defaults on first use.
pub async fn get_or_create_settings(pool: &DbPool) -> AppResult<SystemSettings> {
    sqlx::query("INSERT INTO system_settings (id) VALUES (1) ON CONFLICT (id) DO NOTHING")
        .execute(pool)
        .await?;

    let settings = sqlx::query_as::<_, SystemSettings>(&format!(
        "SELECT {} FROM system_settings WHERE id = 1",
        SETTINGS_COLUMNS
    ))
    .fetch_one(pool)
    .await?;

    Ok(settings)
}

pub async fn update_settings(
    pool: &DbPool,
    payment_reminder_days: Option<&str>,
    invoice_generation_days: Option<i32>,
    auto_generate_invoices: Option<bool>,
    auto_send_reminders: Option<bool>,
    updated_by: i64,
) -> AppResult<SystemSettings> {
    get_or_create_settings(pool).await?;

    let settings = sqlx::query_as::<_, SystemSettings>(&format!(
        r#"
        UPDATE system_settings SET
            payment_reminder_days = COALESCE($1, payment_reminder_days),
            invoice_generation_days = COALESCE($2, invoice_generation_days),
            auto_generate_invoices = COALESCE($3, auto_generate_invoices),
            auto_send_reminders = COALESCE($4, auto_send_reminders),
            created_by = COALESCE(created_by, $5),
            updated_by = $5,
            updated_at = NOW()
        WHERE id = 1
        RETURNING {}
        "#,
        SETTINGS_COLUMNS
    ))
    .bind(payment_reminder_days)
    .bind(invoice_generation_days)
    .bind(auto_generate_invoices)
    .bind(auto_send_reminders)
    .bind(updated_by)
    .fetch_one(pool)
    .await?;

    Ok(settings)
}
