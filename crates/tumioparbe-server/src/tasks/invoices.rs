//! Monthly invoice generation.

use chrono::NaiveDate;
use serde::Serialize;

use crate::billing::{days_until_month_end, next_month};
use crate::db::queries::{common, enrollment, payment};
use crate::db::DbPool;
use crate::error::AppResult;

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceError {
    pub enrollment_id: i64,
    pub student_name: String,
    pub error: String,
}

/// Outcome of one generation run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum InvoiceRun {
    Skipped {
        reason: String,
        date: NaiveDate,
    },
    Completed {
        invoices_generated: usize,
        errors: usize,
        error_details: Option<Vec<InvoiceError>>,
        date: NaiveDate,
    },
}

/// Create next month's invoices for every active enrollment that lacks one.
///
/// Runs only inside the generation window before month end unless `force`.
pub async fn generate_monthly_invoices(pool: &DbPool, today: NaiveDate, force: bool) -> AppResult<InvoiceRun> {
    let settings = common::get_or_create_settings(pool).await?;

    if !force {
        if !settings.auto_generate_invoices {
            tracing::info!(%today, "Automatic invoice generation is disabled, skipping");
            return Ok(InvoiceRun::Skipped {
                reason: "Auto-generation disabled".to_string(),
                date: today,
            });
        }
        if let Some(reason) = outside_window(today, settings.invoice_generation_days) {
            tracing::info!(%today, "{}, skipping invoice generation", reason);
            return Ok(InvoiceRun::Skipped { reason, date: today });
        }
    }

    let month = next_month(today);
    tracing::info!(%today, month = %month.format("%B %Y"), "Starting invoice generation");

    let billable = enrollment::list_billable_enrollments(pool, month).await?;
    let mut generated = 0;
    let mut failures = Vec::new();

    for item in billable {
        match payment::insert_monthly_invoice(pool, item.id, month, item.fee).await {
            Ok(Some(invoice_id)) => {
                tracing::info!(
                    invoice_id,
                    enrollment_id = item.id,
                    student = %item.student_name,
                    amount = %item.fee,
                    "Invoice created"
                );
                generated += 1;
            }
            Ok(None) => {
                tracing::debug!(enrollment_id = item.id, "Invoice already exists");
            }
            Err(e) => {
                tracing::error!(enrollment_id = item.id, error = %e, "Failed to create invoice");
                failures.push(InvoiceError {
                    enrollment_id: item.id,
                    student_name: item.student_name,
                    error: e.to_string(),
                });
            }
        }
    }

    tracing::info!(generated, errors = failures.len(), "Invoice generation completed");
    Ok(InvoiceRun::Completed {
        invoices_generated: generated,
        errors: failures.len(),
        error_details: (!failures.is_empty()).then_some(failures),
        date: today,
    })
}

/// Reason to skip when `today` is further than `days` from month end.
fn outside_window(today: NaiveDate, days: i32) -> Option<String> {
    (days_until_month_end(today) > i64::from(days))
        .then(|| format!("Not within {} days of month end", days))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_generation_window() {
        // 31 - 24 = 7 days left
        assert_eq!(outside_window(date(2025, 1, 24), 7), None);
        assert_eq!(
            outside_window(date(2025, 1, 23), 7).as_deref(),
            Some("Not within 7 days of month end")
        );
        assert_eq!(outside_window(date(2024, 2, 29), 1), None);
    }

    #[test]
    fn test_run_serialization() {
        let run = InvoiceRun::Completed {
            invoices_generated: 2,
            errors: 0,
            error_details: None,
            date: date(2025, 1, 28),
        };
        let value = serde_json::to_value(&run).unwrap();
        assert_eq!(value["status"], "completed");
        assert_eq!(value["invoices_generated"], 2);
        assert_eq!(value["date"], "2025-01-28");
        assert!(value["error_details"].is_null());
    }

    #[tokio::test]
    async fn test_generates_next_month_once() {
        use crate::db::test_support as fixture;
        use rust_decimal_macros::dec;

        let Some(pool) = fixture::test_pool().await else { return };
        let parent = fixture::user(&pool, "01744444441", false).await;
        let rafi = fixture::student(&pool, parent.id(), "Rafi").await;
        let nila = fixture::student(&pool, parent.id(), "Nila").await;
        let course = fixture::course(&pool, dec!(1500)).await;
        let plain = fixture::batch(&pool, course, "Morning", None).await;
        let priced = fixture::batch(&pool, course, "Evening", Some(dec!(1200))).await;

        let at_course_fee = fixture::enrollment(&pool, rafi, plain, date(2025, 5, 1), None).await;
        let locked = fixture::enrollment(&pool, nila, priced, date(2025, 6, 1), Some(dec!(1000))).await;
        let at_batch_fee = fixture::enrollment(&pool, rafi, priced, date(2025, 6, 1), None).await;
        // Starts in the generated month, so its first invoice is created at enrollment
        fixture::enrollment(&pool, nila, plain, date(2025, 7, 1), None).await;

        let run = generate_monthly_invoices(&pool, date(2025, 6, 28), true).await.unwrap();
        assert!(matches!(run, InvoiceRun::Completed { invoices_generated: 3, errors: 0, .. }));

        let expected = [
            (at_course_fee, dec!(1500)),
            (locked, dec!(1000)),
            (at_batch_fee, dec!(1200)),
        ];
        for (enrollment_id, amount) in expected {
            let billed: rust_decimal::Decimal = sqlx::query_scalar(
                "SELECT amount FROM invoices WHERE enrollment_id = $1 AND month = '2025-07-01' AND NOT is_paid",
            )
            .bind(enrollment_id)
            .fetch_one(&pool)
            .await
            .unwrap();
            assert_eq!(billed, amount);
        }

        let again = generate_monthly_invoices(&pool, date(2025, 6, 29), true).await.unwrap();
        assert!(matches!(again, InvoiceRun::Completed { invoices_generated: 0, errors: 0, .. }));
        assert_eq!(fixture::count(&pool, "SELECT COUNT(*) FROM invoices").await, 3);
    }
}
