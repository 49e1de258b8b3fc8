//! Payment reminder SMS.

use chrono::{Datelike, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use serde_json::json;

use crate::db::models::ActionType;
use crate::db::queries::{common, payment};
use crate::db::DbPool;
use crate::error::AppResult;
use crate::services::SmsService;

#[derive(Debug, Clone, Serialize)]
pub struct ReminderError {
    pub invoice_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_phone: Option<String>,
    pub error: String,
}

/// Outcome of one reminder run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ReminderRun {
    Skipped {
        reason: String,
        date: NaiveDate,
    },
    Completed {
        reminders_sent: usize,
        errors: usize,
        error_details: Option<Vec<ReminderError>>,
        date: NaiveDate,
    },
}

/// Text each unpaid invoice's parent on a configured reminder day.
pub async fn send_payment_reminders(
    pool: &DbPool,
    sms: &SmsService,
    today: NaiveDate,
    force: bool,
) -> AppResult<ReminderRun> {
    let settings = common::get_or_create_settings(pool).await?;
    let reminder_days = settings.reminder_days();
    let day = today.day();

    if !force {
        if !settings.auto_send_reminders {
            tracing::info!(%today, "Automatic payment reminders are disabled, skipping");
            return Ok(ReminderRun::Skipped {
                reason: "Auto-reminders disabled".to_string(),
                date: today,
            });
        }
        if !reminder_days.contains(&day) {
            tracing::info!(%today, "Not a configured reminder day, skipping");
            return Ok(ReminderRun::Skipped {
                reason: format!("Day {} not in reminder days {:?}", day, reminder_days),
                date: today,
            });
        }
    }

    tracing::info!(%today, day, "Starting payment reminders");

    let due = payment::list_due_for_reminder(pool, today).await?;
    let mut sent = 0;
    let mut failures = Vec::new();

    for row in due {
        let month = row.month.format("%B %Y").to_string();
        let outcome = sms
            .send_payment_reminder(&row.parent_phone, &row.student_name, &row.course_name, &month, row.amount)
            .await;

        match outcome {
            Ok(outcome) if outcome.is_success() => {
                let metadata = json!({
                    "invoice_id": row.invoice_id,
                    "student_name": row.student_name,
                    "course_name": row.course_name,
                    "batch_name": row.batch_name,
                    "month": month,
                    "amount": row.amount.to_f64(),
                    "reminder_day": day,
                });
                if let Err(e) =
                    common::insert_activity(pool, row.parent_id, ActionType::ReminderSent, &metadata).await
                {
                    tracing::error!(invoice_id = row.invoice_id, error = %e, "Failed to record payment reminder");
                    failures.push(ReminderError {
                        invoice_id: row.invoice_id,
                        student_name: Some(row.student_name),
                        parent_phone: Some(row.parent_phone),
                        error: e.to_string(),
                    });
                    continue;
                }
                tracing::info!(invoice_id = row.invoice_id, phone = %row.parent_phone, "Payment reminder sent");
                sent += 1;
            }
            Ok(outcome) => {
                let error = format!("SMS delivery {}", outcome.result.status.as_str());
                tracing::error!(invoice_id = row.invoice_id, %error, "Payment reminder failed");
                failures.push(ReminderError {
                    invoice_id: row.invoice_id,
                    student_name: Some(row.student_name),
                    parent_phone: Some(row.parent_phone),
                    error,
                });
            }
            Err(e) => {
                tracing::error!(invoice_id = row.invoice_id, error = %e, "Error sending payment reminder");
                failures.push(ReminderError {
                    invoice_id: row.invoice_id,
                    student_name: None,
                    parent_phone: None,
                    error: e.to_string(),
                });
            }
        }
    }

    tracing::info!(sent, errors = failures.len(), "Payment reminders completed");
    Ok(ReminderRun::Completed {
        reminders_sent: sent,
        errors: failures.len(),
        error_details: (!failures.is_empty()).then_some(failures),
        date: today,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    use crate::clients::SmsClient;
    use crate::config::SmsConfig;
    use crate::db::test_support::{self as fixture, date};

    /// Two overdue invoices and one for next month.
    async fn overdue(pool: &DbPool) -> (i64, i64) {
        let parent = fixture::user(pool, "01755555551", false).await;
        let rafi = fixture::student(pool, parent.id(), "Rafi").await;
        let nila = fixture::student(pool, parent.id(), "Nila").await;
        let course = fixture::course(pool, dec!(1500)).await;
        let batch = fixture::batch(pool, course, "Morning", None).await;
        let first = fixture::enrollment(pool, rafi, batch, date(2025, 5, 1), None).await;
        let second = fixture::enrollment(pool, nila, batch, date(2025, 5, 1), None).await;

        let a = fixture::invoice(pool, Some(first), date(2025, 6, 1), dec!(1500), None).await;
        let b = fixture::invoice(pool, Some(second), date(2025, 6, 1), dec!(1500), None).await;
        fixture::invoice(pool, Some(first), date(2025, 7, 1), dec!(1500), None).await;
        (a.id, b.id)
    }

    fn sms(pool: &DbPool) -> SmsService {
        SmsService::new(pool.clone(), SmsClient::new(SmsConfig::default())).unwrap()
    }

    #[test]
    fn test_skipped_shape() {
        let run = ReminderRun::Skipped {
            reason: format!("Day {} not in reminder days {:?}", 5, vec![3u32, 7]),
            date: NaiveDate::from_ymd_opt(2025, 3, 5).unwrap(),
        };
        let value = serde_json::to_value(&run).unwrap();
        assert_eq!(value["status"], "skipped");
        assert_eq!(value["reason"], "Day 5 not in reminder days [3, 7]");
    }

    #[test]
    fn test_error_omits_unknown_fields() {
        let error = ReminderError {
            invoice_id: 9,
            student_name: None,
            parent_phone: None,
            error: "boom".to_string(),
        };
        let value = serde_json::to_value(&error).unwrap();
        assert_eq!(value, json!({"invoice_id": 9, "error": "boom"}));
    }

    #[tokio::test]
    async fn test_reminds_overdue_invoices() {
        let Some(pool) = fixture::test_pool().await else { return };
        overdue(&pool).await;

        let run = send_payment_reminders(&pool, &sms(&pool), date(2025, 6, 7), true).await.unwrap();
        assert!(matches!(run, ReminderRun::Completed { reminders_sent: 2, errors: 0, .. }));
        let logged = fixture::count(
            &pool,
            "SELECT COUNT(*) FROM activity_logs WHERE action_type = 'REMINDER_SENT'",
        )
        .await;
        assert_eq!(logged, 2);
    }

    #[tokio::test]
    async fn test_activity_failure_does_not_stop_the_run() {
        let Some(pool) = fixture::test_pool().await else { return };
        let (broken, fine) = overdue(&pool).await;

        sqlx::query(&format!(
            r#"
            CREATE FUNCTION refuse_reminder_log() RETURNS trigger AS $$
            BEGIN
                IF NEW.metadata->>'invoice_id' = '{}' THEN
                    RAISE EXCEPTION 'activity log unavailable';
                END IF;
                RETURN NEW;
            END
            $$ LANGUAGE plpgsql
            "#,
            broken
        ))
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "CREATE TRIGGER refuse_reminder_log BEFORE INSERT ON activity_logs \
             FOR EACH ROW EXECUTE FUNCTION refuse_reminder_log()",
        )
        .execute(&pool)
        .await
        .unwrap();

        let run = send_payment_reminders(&pool, &sms(&pool), date(2025, 6, 7), true).await.unwrap();
        let ReminderRun::Completed { reminders_sent, errors, error_details, .. } = run else {
            panic!("run was skipped");
        };
        assert_eq!(reminders_sent, 1);
        assert_eq!(errors, 1);
        let details = error_details.unwrap();
        assert_eq!(details[0].invoice_id, broken);
        assert_eq!(details[0].student_name.as_deref(), Some("Rafi"));
        assert!(details[0].error.contains("activity log unavailable"));

        let recorded: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM activity_logs WHERE metadata->>'invoice_id' = $1",
        )
        .bind(fine.to_string())
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(recorded, 1);
    }
}
