//! Enrollment and coupon models.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

use super::{BatchView, Student};

/// A student's membership in a batch.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Enrollment {
    pub id: i64,
    #[serde(rename = "student")]
    pub student_id: i64,
    #[serde(rename = "batch")]
    pub batch_id: i64,
    /// First day of the first billed month
    pub start_month: NaiveDate,
    /// Monthly fee locked in at enrollment time
    pub tuition_fee: Option<Decimal>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Enrollment with nested student and batch details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentView {
    #[serde(flatten)]
    pub enrollment: Enrollment,
    pub student_details: Student,
    pub batch_details: BatchView,
}

/// Enrollment create/update payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnrollmentInput {
    #[serde(default)]
    pub student: Option<i64>,

    #[serde(default)]
    pub batch: Option<i64>,

    #[serde(default)]
    pub start_month: Option<NaiveDate>,

    #[serde(default)]
    pub tuition_fee: Option<Decimal>,

    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Fee quote request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnrollmentQuoteRequest {
    #[serde(default)]
    pub student: Option<i64>,

    #[serde(default)]
    pub batch: Option<i64>,

    #[serde(default)]
    pub start_month: Option<NaiveDate>,

    #[serde(default)]
    pub coupon_code: Option<String>,
}

/// Everything needed to create an enrollment once it is paid for.
///
/// Returned by the fee quote, echoed back by the client, and stored on the
/// temporary invoice while a bKash payment is pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentData {
    pub student: i64,
    pub batch: i64,
    pub start_month: NaiveDate,
    #[serde(default)]
    pub tuition_fee: Option<Decimal>,
    #[serde(default)]
    pub coupon_code: Option<String>,
}

/// Fee quote for a prospective enrollment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentQuote {
    pub student_id: i64,
    pub student_name: String,
    pub batch_id: i64,
    pub batch_name: String,
    pub course_name: String,
    pub start_month: NaiveDate,
    pub admission_fee: Decimal,
    pub tuition_fee: Decimal,
    pub total_amount: Decimal,
    pub coupon_applied: bool,
    pub payment_required: bool,
    pub enrollment_data: EnrollmentData,
}

/// `complete` payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompleteEnrollmentRequest {
    #[serde(default)]
    pub enrollment_data: Option<EnrollmentData>,
}

/// `initiate_payment` payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnrollmentPaymentRequest {
    #[serde(default)]
    pub enrollment_data: Option<EnrollmentData>,

    #[serde(default)]
    pub callback_url: Option<String>,

    #[serde(default)]
    pub customer_phone: Option<String>,
}

/// `complete_with_payment` payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompleteWithPaymentRequest {
    #[serde(default)]
    pub enrollment_data: Option<EnrollmentData>,

    #[serde(default)]
    pub bkash_payment_id: Option<String>,

    #[serde(default)]
    pub temp_invoice_id: Option<i64>,
}

/// Result of materializing an enrollment with its first two invoices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedEnrollment {
    pub enrollment: Enrollment,
    pub first_month_invoice_id: i64,
    pub next_month_invoice_id: i64,
}

/// A discount code.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Coupon {
    pub id: i64,
    pub code: String,
    pub name: String,
    /// Any of `TUITION`, `ADMISSION`, `FIRST_MONTH`
    pub discount_types: Json<Vec<String>>,
    /// Tuition discount percentage
    pub discount_value: Option<Decimal>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Coupon {
    pub fn has_type(&self, discount_type: &str) -> bool {
        self.discount_types.0.iter().any(|t| t == discount_type)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Coupon with display helpers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouponView {
    #[serde(flatten)]
    pub coupon: Coupon,
    pub discount_types_display: Vec<String>,
    pub is_expired: bool,
}

/// Coupon create/update payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CouponInput {
    #[serde(default)]
    pub code: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub discount_types: Option<Vec<String>>,

    #[serde(default)]
    pub discount_value: Option<Decimal>,

    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub is_active: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_enrollment_data_accepts_missing_optionals() {
        let data: EnrollmentData =
            serde_json::from_str(r#"{"student": 1, "batch": 2, "start_month": "2025-03-01"}"#)
                .unwrap();
        assert_eq!(data.tuition_fee, None);
        assert_eq!(data.coupon_code, None);
        assert_eq!(data.start_month, NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
    }

    #[test]
    fn test_coupon_types_and_expiry() {
        let now = Utc::now();
        let coupon = Coupon {
            id: 1,
            code: "WELCOME".to_string(),
            name: "Welcome".to_string(),
            discount_types: Json(vec!["ADMISSION".to_string(), "TUITION".to_string()]),
            discount_value: Some(dec!(10)),
            expires_at: now - chrono::Duration::days(1),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        assert!(coupon.has_type("ADMISSION"));
        assert!(!coupon.has_type("FIRST_MONTH"));
        assert!(coupon.is_expired_at(now));

        let value = serde_json::to_value(&coupon).unwrap();
        assert_eq!(value["discount_types"][1], "TUITION");
    }
}
