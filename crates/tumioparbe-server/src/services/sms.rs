//! SMS sending with delivery logging.

use std::collections::BTreeMap;
use std::sync::Arc;

use minijinja::{context, Environment};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::auth::phone::is_sms_recipient;
use crate::clients::{SmsClient, SmsSendResult};
use crate::db::models::{NewSmsLog, SmsLog, SmsLogFilter, SmsMessageType, SmsStatus};
use crate::db::queries::common::{self as queries, SmsLogColumn};
use crate::db::DbPool;
use crate::error::{AppError, AppResult};

/// Most recipients accepted by one bulk send.
pub const MAX_BULK_RECIPIENTS: usize = 100;

const OTP_TEMPLATE: &str = "Your TumioParbe OTP is {{ otp }}. Valid for 5 minutes.";

const REMINDER_TEMPLATE: &str = "Payment reminder for {{ student_name }}'s {{ course_name }} course. \
Amount {{ amount }} Tk for {{ month }} is due. Please pay to avoid interruption.";

/// A send attempt and the log row recording it.
#[derive(Debug, Clone)]
pub struct SmsOutcome {
    pub result: SmsSendResult,
    pub log_id: i64,
}

impl SmsOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_success()
    }
}

/// Counts over the local SMS log, keyed for the admin dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct SmsDashboard {
    pub success: bool,
    pub total_sms_sent: i64,
    pub success_rate: f64,
    pub by_type: BTreeMap<String, i64>,
    pub by_status: BTreeMap<String, i64>,
}

/// Service for outgoing SMS.
#[derive(Clone)]
pub struct SmsService {
    pool: DbPool,
    client: SmsClient,
    templates: Arc<Environment<'static>>,
}

impl SmsService {
    pub fn new(pool: DbPool, client: SmsClient) -> AppResult<Self> {
        let mut env = Environment::new();
        env.add_template("otp", OTP_TEMPLATE)?;
        env.add_template("payment_reminder", REMINDER_TEMPLATE)?;

        if !client.is_enabled() {
            tracing::warn!("SMS sending is disabled; messages will only be logged");
        }

        Ok(Self {
            pool,
            client,
            templates: Arc::new(env),
        })
    }

    pub fn render_otp(&self, otp: &str) -> AppResult<String> {
        Ok(self.templates.get_template("otp")?.render(context! { otp })?)
    }

    pub fn render_reminder(
        &self,
        student_name: &str,
        course_name: &str,
        month: &str,
        amount: Decimal,
    ) -> AppResult<String> {
        let rendered = self.templates.get_template("payment_reminder")?.render(context! {
            student_name,
            course_name,
            month,
            amount => amount.to_string(),
        })?;
        Ok(rendered)
    }

    /// Send and record the attempt in the SMS log.
    async fn deliver(
        &self,
        recipients: &[String],
        message: &str,
        message_type: SmsMessageType,
        sent_by: Option<i64>,
    ) -> AppResult<SmsOutcome> {
        let result = self.client.send(recipients, message).await;
        let phone_number = recipients.join(",");

        let log_id = queries::insert_sms_log(
            &self.pool,
            &NewSmsLog {
                phone_number: &phone_number,
                message,
                message_type,
                status: result.status,
                sent_by,
                recipient_count: recipients.len() as i32,
                successful_count: result.successful as i32,
                failed_count: result.failed as i32,
                provider_response: Some(&result.provider_response),
            },
        )
        .await?;

        tracing::info!(
            log_id,
            message_type = message_type.as_str(),
            status = result.status.as_str(),
            "SMS logged"
        );
        Ok(SmsOutcome { result, log_id })
    }

    pub async fn send_otp(&self, phone: &str, otp: &str) -> AppResult<SmsOutcome> {
        let message = self.render_otp(otp)?;
        self.deliver(&[phone.to_string()], &message, SmsMessageType::Otp, None)
            .await
    }

    pub async fn send_payment_reminder(
        &self,
        phone: &str,
        student_name: &str,
        course_name: &str,
        month: &str,
        amount: Decimal,
    ) -> AppResult<SmsOutcome> {
        let message = self.render_reminder(student_name, course_name, month, amount)?;
        self.deliver(
            &[phone.to_string()],
            &message,
            SmsMessageType::PaymentReminder,
            None,
        )
        .await
    }

    pub async fn send_custom(
        &self,
        phone: &str,
        message: &str,
        sent_by: Option<i64>,
    ) -> AppResult<SmsOutcome> {
        self.deliver(&[phone.to_string()], message, SmsMessageType::Custom, sent_by)
            .await
    }

    pub async fn send_bulk(
        &self,
        phones: &[String],
        message: &str,
        sent_by: Option<i64>,
    ) -> AppResult<SmsOutcome> {
        validate_bulk_recipients(phones)?;
        self.deliver(phones, message, SmsMessageType::Bulk, sent_by)
            .await
    }

    pub async fn check_balance(&self) -> AppResult<String> {
        self.client.check_balance().await
    }

    pub async fn provider_stats(&self) -> AppResult<serde_json::Value> {
        self.client.get_stats().await
    }

    pub async fn list_logs(&self, filter: &SmsLogFilter) -> AppResult<Vec<SmsLog>> {
        queries::list_sms_logs(&self.pool, filter).await
    }

    pub async fn get_log(&self, id: i64) -> AppResult<SmsLog> {
        queries::get_sms_log(&self.pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("SMS log {} not found", id)))
    }

    pub async fn dashboard(&self) -> AppResult<SmsDashboard> {
        let by_type_rows = queries::count_sms_logs_by(&self.pool, SmsLogColumn::MessageType).await?;
        let by_status_rows = queries::count_sms_logs_by(&self.pool, SmsLogColumn::Status).await?;

        let by_type: BTreeMap<String, i64> = SmsMessageType::ALL
            .iter()
            .map(|t| (t.as_str().to_ascii_lowercase(), count_for(&by_type_rows, t.as_str())))
            .collect();
        let by_status: BTreeMap<String, i64> = SmsStatus::ALL
            .iter()
            .map(|s| (s.as_str().to_ascii_lowercase(), count_for(&by_status_rows, s.as_str())))
            .collect();

        let total: i64 = by_type_rows.iter().map(|(_, c)| c).sum();
        let success = count_for(&by_status_rows, SmsStatus::Success.as_str());

        Ok(SmsDashboard {
            success: true,
            total_sms_sent: total,
            success_rate: percentage(success, total, 2),
            by_type,
            by_status,
        })
    }
}

fn count_for(rows: &[(String, i64)], key: &str) -> i64 {
    rows.iter()
        .find(|(k, _)| k == key)
        .map(|(_, c)| *c)
        .unwrap_or(0)
}

/// `part / whole` as a percentage rounded to `places`; zero when `whole` is.
pub fn percentage(part: i64, whole: i64, places: i32) -> f64 {
    if whole <= 0 {
        return 0.0;
    }
    let factor = 10f64.powi(places);
    (part as f64 / whole as f64 * 100.0 * factor).round() / factor
}

/// Recipient list checks for bulk sends.
pub fn validate_bulk_recipients(phones: &[String]) -> AppResult<()> {
    if phones.is_empty() {
        return Err(AppError::field(
            "phone_numbers",
            "Ensure this field has at least 1 elements.",
        ));
    }

    let invalid: Vec<&str> = phones
        .iter()
        .map(String::as_str)
        .filter(|p| !is_sms_recipient(p))
        .collect();
    if !invalid.is_empty() {
        return Err(AppError::field(
            "phone_numbers",
            format!(
                "Invalid phone number format for: {}. Numbers should be in Bangladesh format \
                 (e.g., 01712345678) or international format with + prefix.",
                invalid.join(", ")
            ),
        ));
    }

    if phones.len() > MAX_BULK_RECIPIENTS {
        return Err(AppError::field(
            "phone_numbers",
            "Cannot send to more than 100 recipients in a single request.",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SmsConfig;
    use crate::db::pool::create_lazy_pool;
    use rust_decimal_macros::dec;

    fn service() -> SmsService {
        let pool = create_lazy_pool(&Default::default()).unwrap();
        SmsService::new(pool, SmsClient::new(SmsConfig::default())).unwrap()
    }

    #[tokio::test]
    async fn test_templates_render() {
        let sms = service();
        assert_eq!(
            sms.render_otp("123456").unwrap(),
            "Your TumioParbe OTP is 123456. Valid for 5 minutes."
        );
        assert_eq!(
            sms.render_reminder("Rafi", "Math", "March 2025", dec!(1500.00)).unwrap(),
            "Payment reminder for Rafi's Math course. Amount 1500.00 Tk for March 2025 is due. \
             Please pay to avoid interruption."
        );
    }

    #[test]
    fn test_bulk_recipient_validation() {
        assert!(validate_bulk_recipients(&["01712345678".into(), "+8801812345678".into()]).is_ok());
        assert!(validate_bulk_recipients(&[]).is_err());

        match validate_bulk_recipients(&["12345".into()]) {
            Err(AppError::Fields(map)) => {
                assert!(map["phone_numbers"][0].starts_with("Invalid phone number format for: 12345."));
            }
            other => panic!("unexpected: {other:?}"),
        }

        let many: Vec<String> = (0..101).map(|_| "01712345678".to_string()).collect();
        assert!(validate_bulk_recipients(&many).is_err());
    }

    #[test]
    fn test_percentage() {
        assert_eq!(percentage(0, 0, 2), 0.0);
        assert_eq!(percentage(2, 3, 2), 66.67);
        assert_eq!(percentage(1, 3, 1), 33.3);
    }

    #[test]
    fn test_count_for() {
        let rows = vec![("OTP".to_string(), 4), ("BULK".to_string(), 1)];
        assert_eq!(count_for(&rows, "OTP"), 4);
        assert_eq!(count_for(&rows, "CUSTOM"), 0);
    }
}
