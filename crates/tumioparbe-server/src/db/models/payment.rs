//! Invoice and payment models.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Payment lifecycle states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaymentStatus {
    Initiated,
    Completed,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Initiated => "Initiated",
            PaymentStatus::Completed => "Completed",
            PaymentStatus::Failed => "Failed",
            PaymentStatus::Cancelled => "Cancelled",
        }
    }

    /// Map a bKash `transactionStatus` onto a local status.
    pub fn from_transaction_status(status: &str) -> Self {
        match status {
            "Completed" => PaymentStatus::Completed,
            "Initiated" => PaymentStatus::Initiated,
            _ => PaymentStatus::Failed,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a payment was collected.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaymentMethod {
    #[serde(rename = "bKash")]
    Bkash,
    Manual,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Bkash => "bKash",
            PaymentMethod::Manual => "Manual",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `temp_invoice_data.type` marker for a multi-invoice payment.
pub const MULTI_INVOICE_PAYMENT: &str = "multi_invoice_payment";

/// A monthly (or ad-hoc) charge.
///
/// Temporary invoices have no enrollment and carry either the enrollment to
/// create or the list of invoices a bulk payment covers.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub id: i64,
    #[serde(rename = "enrollment")]
    pub enrollment_id: Option<i64>,
    pub month: NaiveDate,
    pub amount: Decimal,
    pub is_paid: bool,
    #[serde(rename = "coupon")]
    pub coupon_id: Option<i64>,
    #[serde(skip_serializing)]
    pub temp_invoice: bool,
    #[serde(skip_serializing)]
    pub temp_invoice_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Invoice ids covered by a bulk payment, if this is a bulk parent.
    pub fn bulk_invoice_ids(&self) -> Option<Vec<i64>> {
        let data = self.temp_invoice_data.as_ref()?;
        if data.get("type").and_then(|t| t.as_str()) != Some(MULTI_INVOICE_PAYMENT) {
            return None;
        }
        let ids = data.get("invoice_ids")?.as_array()?;
        Some(ids.iter().filter_map(|v| v.as_i64()).collect())
    }
}

/// A payment attempt against an invoice.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: i64,
    #[serde(rename = "invoice")]
    pub invoice_id: i64,
    pub transaction_id: String,
    pub amount: Decimal,
    pub payment_method: String,
    pub status: String,
    /// bKash payment id
    pub payment_id: Option<String>,
    pub payer_reference: Option<String>,
    #[serde(skip_serializing)]
    pub payment_create_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub payment_execute_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub updated_at: DateTime<Utc>,
}

/// Fields for a new payment row.
#[derive(Debug, Clone)]
pub struct NewPayment<'a> {
    pub invoice_id: i64,
    pub transaction_id: &'a str,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub payment_id: Option<&'a str>,
    pub payer_reference: Option<&'a str>,
    pub payment_create_time: Option<DateTime<Utc>>,
    pub payment_execute_time: Option<DateTime<Utc>>,
}

/// Unpaid invoice joined with the names a parent recognizes.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PendingInvoiceRow {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub invoice: Invoice,
    pub student_name: String,
    pub course_name: String,
    pub batch_name: String,
}

/// Payment joined with invoice context for the history listing.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentHistoryRow {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub payment: Payment,
    pub invoice_month: NaiveDate,
    pub student_name: Option<String>,
    pub course_name: Option<String>,
    pub batch_name: Option<String>,
}

/// Single-invoice bKash checkout request (`initiate_bkash`, `pay_invoice`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvoicePaymentRequest {
    #[serde(default)]
    pub invoice_id: Option<i64>,

    #[serde(default)]
    pub callback_url: Option<String>,

    #[serde(default)]
    pub customer_phone: Option<String>,
}

/// Multi-invoice bKash checkout request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkPaymentRequest {
    #[serde(default)]
    pub invoice_ids: Vec<i64>,

    #[serde(default)]
    pub callback_url: Option<String>,

    #[serde(default)]
    pub customer_phone: Option<String>,
}

/// Request naming a bKash payment id.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BkashPaymentRef {
    #[serde(default, rename = "paymentID")]
    pub payment_id: Option<String>,
}

/// Staff-created invoice.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManualInvoiceRequest {
    #[serde(default)]
    pub enrollment: Option<i64>,

    #[serde(default)]
    pub month: Option<NaiveDate>,

    #[serde(default)]
    pub amount: Option<Decimal>,

    #[serde(default)]
    pub is_paid: bool,

    #[serde(default)]
    pub coupon: Option<i64>,

    #[serde(default)]
    pub description: Option<String>,
}

/// Query filter for payment listings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentFilter {
    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub invoice: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn invoice(data: Option<serde_json::Value>) -> Invoice {
        Invoice {
            id: 10,
            enrollment_id: None,
            month: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            amount: dec!(1500.00),
            is_paid: false,
            coupon_id: None,
            temp_invoice: true,
            temp_invoice_data: data,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_bulk_invoice_ids() {
        let bulk = invoice(Some(json!({
            "type": "multi_invoice_payment",
            "invoice_ids": [3, 4, 5]
        })));
        assert_eq!(bulk.bulk_invoice_ids(), Some(vec![3, 4, 5]));

        let enrollment = invoice(Some(json!({"student": 1, "batch": 2})));
        assert_eq!(enrollment.bulk_invoice_ids(), None);
        assert_eq!(invoice(None).bulk_invoice_ids(), None);
    }

    #[test]
    fn test_transaction_status_mapping() {
        assert_eq!(
            PaymentStatus::from_transaction_status("Completed"),
            PaymentStatus::Completed
        );
        assert_eq!(
            PaymentStatus::from_transaction_status("Initiated"),
            PaymentStatus::Initiated
        );
        assert_eq!(
            PaymentStatus::from_transaction_status("Expired"),
            PaymentStatus::Failed
        );
    }

    #[test]
    fn test_method_serializes_with_brand_spelling() {
        assert_eq!(serde_json::to_value(PaymentMethod::Bkash).unwrap(), "bKash");
        assert_eq!(PaymentMethod::Manual.to_string(), "Manual");
    }
}
