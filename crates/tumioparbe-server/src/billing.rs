//! Fee, coupon and calendar arithmetic.
//!
//! Everything here is pure so the enrollment and invoicing flows can share it
//! and it can be tested without a database.

use chrono::{Datelike, Months, NaiveDate, NaiveDateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::Decimal;

use crate::db::models::Coupon;

pub const DISCOUNT_TUITION: &str = "TUITION";
pub const DISCOUNT_ADMISSION: &str = "ADMISSION";
pub const DISCOUNT_FIRST_MONTH: &str = "FIRST_MONTH";

/// Recognised coupon discount types with their display names.
pub const DISCOUNT_TYPES: [(&str, &str); 3] = [
    (DISCOUNT_TUITION, "Tuition Discount"),
    (DISCOUNT_ADMISSION, "Admission Fee Waiver"),
    (DISCOUNT_FIRST_MONTH, "First Month Waiver"),
];

pub fn discount_type_display(code: &str) -> Option<&'static str> {
    DISCOUNT_TYPES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

/// Fees due at enrollment time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeQuote {
    pub admission_fee: Decimal,
    pub tuition_fee: Decimal,
    pub total_amount: Decimal,
    pub first_month_waived: bool,
}

/// Monthly fee of a batch: its own override, else the course fee.
pub fn batch_monthly_fee(batch_fee: Option<Decimal>, course_monthly_fee: Decimal) -> Decimal {
    match batch_fee {
        Some(fee) if !fee.is_zero() => fee,
        _ => course_monthly_fee,
    }
}

/// Apply an (already validated) coupon to the enrollment fees.
///
/// `ADMISSION` waives the admission fee and `FIRST_MONTH` the first month's
/// tuition. `TUITION` takes its percentage off the tuition unless the first
/// month is already free.
pub fn quote_fees(admission_fee: Decimal, monthly_fee: Decimal, coupon: Option<&Coupon>) -> FeeQuote {
    let mut admission = admission_fee;
    let mut tuition = monthly_fee;
    let mut first_month_waived = false;

    if let Some(coupon) = coupon {
        if coupon.has_type(DISCOUNT_ADMISSION) {
            admission = Decimal::ZERO;
        }
        if coupon.has_type(DISCOUNT_FIRST_MONTH) {
            tuition = Decimal::ZERO;
            first_month_waived = true;
        }
        if coupon.has_type(DISCOUNT_TUITION) && !first_month_waived {
            if let Some(percent) = coupon.discount_value.filter(|v| !v.is_zero()) {
                tuition -= (tuition * percent / Decimal::ONE_HUNDRED).round_dp(2);
            }
        }
    }

    FeeQuote {
        admission_fee: admission,
        tuition_fee: tuition,
        total_amount: admission + tuition,
        first_month_waived,
    }
}

/// Monthly fee to lock onto the enrollment: the quoted tuition, or the
/// undiscounted fee when the first month came out free.
pub fn locked_tuition_fee(quoted_tuition: Decimal, undiscounted: Decimal) -> Decimal {
    if quoted_tuition > Decimal::ZERO {
        quoted_tuition
    } else {
        undiscounted
    }
}

/// Asia/Dhaka is UTC+6 all year.
pub const DHAKA_UTC_OFFSET_HOURS: i64 = 6;

/// Wall-clock time in Dhaka.
pub fn dhaka_now() -> NaiveDateTime {
    Utc::now().naive_utc() + chrono::Duration::hours(DHAKA_UTC_OFFSET_HOURS)
}

/// Today's date in Dhaka.
pub fn today() -> NaiveDate {
    dhaka_now().date()
}

/// First day of the month containing `date`.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// First day of the month after the one containing `date`.
pub fn next_month(date: NaiveDate) -> NaiveDate {
    add_months(month_start(date), 1)
}

/// Shift a month start by `months` (negative goes back).
pub fn add_months(month: NaiveDate, months: i32) -> NaiveDate {
    let shifted = if months >= 0 {
        month.checked_add_months(Months::new(months.unsigned_abs()))
    } else {
        month.checked_sub_months(Months::new(months.unsigned_abs()))
    };
    shifted.unwrap_or(month)
}

/// Last calendar day of the month containing `date`.
pub fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    next_month(date).pred_opt().unwrap_or(date)
}

/// Whole days from `date` to the last day of its month.
pub fn days_until_month_end(date: NaiveDate) -> i64 {
    (last_day_of_month(date) - date).num_days()
}

/// Six uppercase alphanumerics used to make merchant references unique.
pub fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect()
}

pub fn enrollment_merchant_invoice(student_id: i64, batch_id: i64) -> String {
    format!("ENR-{}-{}-{}", student_id, batch_id, random_suffix())
}

pub fn invoice_merchant_invoice(invoice_id: i64) -> String {
    format!("INV-{}-{}", invoice_id, random_suffix())
}

/// Longest merchant reference stored in `payments.transaction_id`.
pub const MERCHANT_INVOICE_MAX_LEN: usize = 64;

/// `MULTI-{ids}-{RAND6}`; long id lists collapse to
/// `MULTI-{first}-{last}-N{count}-{RAND6}`.
pub fn bulk_merchant_invoice(invoice_ids: &[i64]) -> String {
    let suffix = random_suffix();
    let ids: Vec<String> = invoice_ids.iter().map(|id| id.to_string()).collect();
    let full = format!("MULTI-{}-{}", ids.join("-"), suffix);
    if full.len() <= MERCHANT_INVOICE_MAX_LEN {
        return full;
    }
    match (invoice_ids.first(), invoice_ids.last()) {
        (Some(first), Some(last)) => format!(
            "MULTI-{}-{}-N{}-{}",
            first,
            last,
            invoice_ids.len(),
            suffix
        ),
        _ => full,
    }
}

pub fn manual_transaction_id(today: NaiveDate) -> String {
    format!("MANUAL-{}-{}", today.format("%Y%m%d"), random_suffix())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use sqlx::types::Json;

    fn coupon(types: &[&str], value: Option<Decimal>) -> Coupon {
        let now = Utc::now();
        Coupon {
            id: 1,
            code: "TEST".to_string(),
            name: "Test".to_string(),
            discount_types: Json(types.iter().map(|t| t.to_string()).collect()),
            discount_value: value,
            expires_at: now + chrono::Duration::days(30),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_quote_without_coupon() {
        let quote = quote_fees(dec!(500), dec!(1500), None);
        assert_eq!(quote.total_amount, dec!(2000));
        assert!(!quote.first_month_waived);
    }

    #[test]
    fn test_admission_and_tuition_discount() {
        let c = coupon(&["ADMISSION", "TUITION"], Some(dec!(20)));
        let quote = quote_fees(dec!(500), dec!(1500), Some(&c));
        assert_eq!(quote.admission_fee, dec!(0));
        assert_eq!(quote.tuition_fee, dec!(1200));
        assert_eq!(quote.total_amount, dec!(1200));
    }

    #[test]
    fn test_first_month_waiver_overrides_tuition_discount() {
        let c = coupon(&["FIRST_MONTH", "TUITION"], Some(dec!(50)));
        let quote = quote_fees(dec!(500), dec!(1500), Some(&c));
        assert_eq!(quote.tuition_fee, dec!(0));
        assert_eq!(quote.total_amount, dec!(500));
        assert!(quote.first_month_waived);
        assert_eq!(locked_tuition_fee(quote.tuition_fee, dec!(1500)), dec!(1500));
    }

    #[test]
    fn test_full_waiver_needs_no_payment() {
        let c = coupon(&["FIRST_MONTH", "ADMISSION"], None);
        let quote = quote_fees(dec!(500), dec!(1500), Some(&c));
        assert_eq!(quote.total_amount, dec!(0));
    }

    #[test]
    fn test_batch_monthly_fee() {
        assert_eq!(batch_monthly_fee(Some(dec!(1800)), dec!(1500)), dec!(1800));
        assert_eq!(batch_monthly_fee(None, dec!(1500)), dec!(1500));
        assert_eq!(batch_monthly_fee(Some(dec!(0)), dec!(1500)), dec!(1500));
    }

    #[test]
    fn test_month_arithmetic() {
        assert_eq!(month_start(date(2025, 2, 17)), date(2025, 2, 1));
        assert_eq!(next_month(date(2025, 12, 31)), date(2026, 1, 1));
        assert_eq!(add_months(date(2025, 1, 1), -2), date(2024, 11, 1));
        assert_eq!(last_day_of_month(date(2024, 2, 10)), date(2024, 2, 29));
        assert_eq!(days_until_month_end(date(2025, 1, 24)), 7);
        assert_eq!(days_until_month_end(date(2025, 1, 31)), 0);
    }

    #[test]
    fn test_merchant_references() {
        let suffix = random_suffix();
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));

        assert!(enrollment_merchant_invoice(3, 9).starts_with("ENR-3-9-"));
        assert!(bulk_merchant_invoice(&[4, 5]).starts_with("MULTI-4-5-"));

        let many: Vec<i64> = (1_000_000..1_000_200).collect();
        let reference = bulk_merchant_invoice(&many);
        assert!(reference.len() <= MERCHANT_INVOICE_MAX_LEN);
        assert!(reference.starts_with("MULTI-1000000-1000199-N200-"));
        assert!(manual_transaction_id(date(2025, 3, 7)).starts_with("MANUAL-20250307-"));
    }

    #[test]
    fn test_discount_display() {
        assert_eq!(discount_type_display("FIRST_MONTH"), Some("First Month Waiver"));
        assert_eq!(discount_type_display("BOGUS"), None);
    }
}
