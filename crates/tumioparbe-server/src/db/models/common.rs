//! Activity log, SMS log, and system settings models.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Auditable actions recorded in the activity log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    AccountCreation,
    Enrollment,
    Payment,
    CourseModification,
    BatchModification,
    FeeModification,
    BatchTransfer,
    ReminderSent,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::AccountCreation => "ACCOUNT_CREATION",
            ActionType::Enrollment => "ENROLLMENT",
            ActionType::Payment => "PAYMENT",
            ActionType::CourseModification => "COURSE_MODIFICATION",
            ActionType::BatchModification => "BATCH_MODIFICATION",
            ActionType::FeeModification => "FEE_MODIFICATION",
            ActionType::BatchTransfer => "BATCH_TRANSFER",
            ActionType::ReminderSent => "REMINDER_SENT",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ActivityLog {
    pub id: i64,
    pub user_id: i64,
    pub action_type: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Kinds of outgoing SMS.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SmsMessageType {
    Otp,
    PaymentReminder,
    Custom,
    Bulk,
}

impl SmsMessageType {
    pub const ALL: [SmsMessageType; 4] = [
        SmsMessageType::Otp,
        SmsMessageType::PaymentReminder,
        SmsMessageType::Custom,
        SmsMessageType::Bulk,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SmsMessageType::Otp => "OTP",
            SmsMessageType::PaymentReminder => "PAYMENT_REMINDER",
            SmsMessageType::Custom => "CUSTOM",
            SmsMessageType::Bulk => "BULK",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SmsMessageType::Otp => "OTP Verification",
            SmsMessageType::PaymentReminder => "Payment Reminder",
            SmsMessageType::Custom => "Custom Message",
            SmsMessageType::Bulk => "Bulk Message",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }
}

/// Delivery outcome of an SMS log entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SmsStatus {
    Success,
    Failed,
    Partial,
    Pending,
    Disabled,
}

impl SmsStatus {
    pub const ALL: [SmsStatus; 5] = [
        SmsStatus::Success,
        SmsStatus::Failed,
        SmsStatus::Partial,
        SmsStatus::Pending,
        SmsStatus::Disabled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SmsStatus::Success => "SUCCESS",
            SmsStatus::Failed => "FAILED",
            SmsStatus::Partial => "PARTIAL",
            SmsStatus::Pending => "PENDING",
            SmsStatus::Disabled => "DISABLED",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SmsStatus::Success => "Success",
            SmsStatus::Failed => "Failed",
            SmsStatus::Partial => "Partial Success",
            SmsStatus::Pending => "Pending",
            SmsStatus::Disabled => "SMS Disabled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SmsLog {
    pub id: i64,
    /// Recipient, or comma-joined recipients for bulk sends
    pub phone_number: String,
    pub message: String,
    pub message_type: String,
    pub status: String,
    pub sent_by: Option<i64>,
    pub sent_by_name: Option<String>,
    pub recipient_count: i32,
    pub successful_count: i32,
    pub failed_count: i32,
    #[serde(skip_serializing)]
    pub provider_response: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for a new SMS log row.
#[derive(Debug, Clone)]
pub struct NewSmsLog<'a> {
    pub phone_number: &'a str,
    pub message: &'a str,
    pub message_type: SmsMessageType,
    pub status: SmsStatus,
    pub sent_by: Option<i64>,
    pub recipient_count: i32,
    pub successful_count: i32,
    pub failed_count: i32,
    pub provider_response: Option<&'a serde_json::Value>,
}

/// SMS log listing filters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SmsLogFilter {
    #[serde(default)]
    pub message_type: Option<String>,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub start_date: Option<NaiveDate>,

    #[serde(default)]
    pub end_date: Option<NaiveDate>,

    /// Substring match on phone number or message
    #[serde(default)]
    pub search: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SingleSmsRequest {
    #[serde(default)]
    pub phone_number: Option<String>,

    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkSmsRequest {
    #[serde(default)]
    pub phone_numbers: Vec<String>,

    #[serde(default)]
    pub message: Option<String>,
}

/// Singleton automation settings.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SystemSettings {
    #[serde(skip_serializing)]
    pub id: i64,
    /// Comma-separated days of month, e.g. `"3,7"`
    pub payment_reminder_days: String,
    /// Days before month end at which next month's invoices are generated
    pub invoice_generation_days: i32,
    pub auto_generate_invoices: bool,
    pub auto_send_reminders: bool,
    #[serde(skip_serializing)]
    pub created_by: Option<i64>,
    #[serde(skip_serializing)]
    pub updated_by: Option<i64>,
    #[serde(skip_serializing)]
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub updated_at: DateTime<Utc>,
}

impl SystemSettings {
    /// Reminder days parsed from the comma list. Invalid entries are skipped.
    pub fn reminder_days(&self) -> Vec<u32> {
        self.payment_reminder_days
            .split(',')
            .filter_map(|d| d.trim().parse::<u32>().ok())
            .filter(|d| (1..=31).contains(d))
            .collect()
    }
}

/// Partial settings update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    #[serde(default)]
    pub payment_reminder_days: Option<String>,

    #[serde(default)]
    pub invoice_generation_days: Option<i32>,

    #[serde(default)]
    pub auto_generate_invoices: Option<bool>,

    #[serde(default)]
    pub auto_send_reminders: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reminder_days_parsing() {
        let settings = SystemSettings {
            id: 1,
            payment_reminder_days: "3, 7,x,40,15".to_string(),
            invoice_generation_days: 7,
            auto_generate_invoices: true,
            auto_send_reminders: true,
            created_by: None,
            updated_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(settings.reminder_days(), vec![3, 7, 15]);
    }

    #[test]
    fn test_enum_spellings() {
        assert_eq!(ActionType::ReminderSent.as_str(), "REMINDER_SENT");
        assert_eq!(
            serde_json::to_value(ActionType::BatchTransfer).unwrap(),
            "BATCH_TRANSFER"
        );
        assert_eq!(SmsMessageType::parse("PAYMENT_REMINDER"), Some(SmsMessageType::PaymentReminder));
        assert_eq!(SmsStatus::parse("DISABLED"), Some(SmsStatus::Disabled));
        assert_eq!(SmsStatus::parse("nope"), None);
    }
}
