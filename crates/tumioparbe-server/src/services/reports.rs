//! Admin dashboard reports.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::auth::CurrentUser;
use crate::billing::{self, add_months, month_start, next_month};
use crate::db::models::SmsMessageType;
use crate::db::queries::reports::{self as queries, SmsTotals};
use crate::db::DbPool;
use crate::error::AppResult;
use crate::services::sms::percentage;

const FINANCIAL_TREND_MONTHS: i32 = 6;
const ENROLLMENT_TREND_MONTHS: i32 = 6;
const SMS_TREND_MONTHS: i32 = 3;

#[derive(Debug, Clone, Serialize)]
pub struct MonthlyEarnings {
    pub month: String,
    pub earnings: f64,
    pub collection_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinancialSummary {
    pub total_dues: f64,
    pub current_month_dues: f64,
    pub total_earnings: f64,
    pub current_month_earnings: f64,
    pub monthly_trends: Vec<MonthlyEarnings>,
    pub as_of_date: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchEnrollment {
    pub batch_id: i64,
    pub batch_name: String,
    pub enrollment_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseEnrollment {
    pub course_id: i64,
    pub course_name: String,
    pub enrollment_count: i64,
    pub batches: Vec<BatchEnrollment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrollmentTrend {
    pub month: String,
    pub new_enrollments: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrollmentStatistics {
    pub total_students: i64,
    pub active_enrollments: i64,
    pub total_courses: i64,
    pub total_batches: i64,
    pub course_enrollment_data: Vec<CourseEnrollment>,
    pub enrollment_trends: Vec<EnrollmentTrend>,
    pub as_of_date: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SmsDelivery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_name: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month: Option<String>,
    pub total_sent: i64,
    pub successful: i64,
    pub failed: i64,
    pub success_rate: f64,
}

impl SmsDelivery {
    fn from_totals(totals: SmsTotals) -> Self {
        Self {
            type_name: None,
            month: None,
            success_rate: percentage(totals.successful, totals.total_sent, 1),
            total_sent: totals.total_sent,
            successful: totals.successful,
            failed: totals.failed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SmsStatistics {
    pub by_type: BTreeMap<&'static str, SmsDelivery>,
    pub overall: SmsDelivery,
    pub monthly_breakdown: Vec<SmsDelivery>,
    pub as_of_date: String,
}

/// Service for admin reports. Every report is staff-only.
#[derive(Clone)]
pub struct ReportService {
    pool: DbPool,
}

impl ReportService {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn financial_summary(&self, user: &CurrentUser) -> AppResult<FinancialSummary> {
        user.require_staff()?;
        let today = billing::today();
        let current = month_start(today);

        let all = queries::invoice_totals(&self.pool, None).await?;
        let this_month = queries::invoice_totals(&self.pool, Some(current)).await?;

        let mut monthly_trends = Vec::new();
        for month in trailing_months(current, FINANCIAL_TREND_MONTHS) {
            let totals = queries::invoice_totals(&self.pool, Some(month)).await?;
            monthly_trends.push(MonthlyEarnings {
                month: short_month(month),
                earnings: to_f64(totals.paid_amount),
                collection_rate: percentage(totals.paid_count, totals.invoice_count, 1),
            });
        }

        Ok(FinancialSummary {
            total_dues: to_f64(all.unpaid_amount),
            current_month_dues: to_f64(this_month.unpaid_amount),
            total_earnings: to_f64(all.paid_amount),
            current_month_earnings: to_f64(this_month.paid_amount),
            monthly_trends,
            as_of_date: today.format("%Y-%m-%d").to_string(),
        })
    }

    pub async fn enrollment_statistics(&self, user: &CurrentUser) -> AppResult<EnrollmentStatistics> {
        user.require_staff()?;
        let today = billing::today();

        let (total_students, active_enrollments, total_courses, total_batches) =
            queries::headline_counts(&self.pool).await?;

        let batches = queries::batch_enrollment_counts(&self.pool).await?;
        let course_enrollment_data = queries::course_enrollment_counts(&self.pool)
            .await?
            .into_iter()
            .map(|course| CourseEnrollment {
                batches: batches
                    .iter()
                    .filter(|b| b.course_id == course.course_id)
                    .map(|b| BatchEnrollment {
                        batch_id: b.batch_id,
                        batch_name: b.batch_name.clone(),
                        enrollment_count: b.enrollment_count,
                    })
                    .collect(),
                course_id: course.course_id,
                course_name: course.course_name,
                enrollment_count: course.enrollment_count,
            })
            .collect();

        let mut enrollment_trends = Vec::new();
        for month in trailing_months(month_start(today), ENROLLMENT_TREND_MONTHS) {
            let new_enrollments =
                queries::count_enrollments_starting(&self.pool, month, next_month(month)).await?;
            enrollment_trends.push(EnrollmentTrend {
                month: short_month(month),
                new_enrollments,
            });
        }

        Ok(EnrollmentStatistics {
            total_students,
            active_enrollments,
            total_courses,
            total_batches,
            course_enrollment_data,
            enrollment_trends,
            as_of_date: today.format("%Y-%m-%d").to_string(),
        })
    }

    pub async fn sms_statistics(&self, user: &CurrentUser) -> AppResult<SmsStatistics> {
        user.require_staff()?;
        let today = billing::today();

        let mut by_type = BTreeMap::new();
        for message_type in SmsMessageType::ALL {
            let totals = queries::sms_totals(&self.pool, Some(message_type.as_str()), None, None).await?;
            by_type.insert(
                message_type.as_str(),
                SmsDelivery {
                    type_name: Some(message_type.display_name()),
                    ..SmsDelivery::from_totals(totals)
                },
            );
        }

        let overall = SmsDelivery::from_totals(queries::sms_totals(&self.pool, None, None, None).await?);

        let mut monthly_breakdown = Vec::new();
        for month in trailing_months(month_start(today), SMS_TREND_MONTHS) {
            let totals =
                queries::sms_totals(&self.pool, None, Some(month), Some(next_month(month))).await?;
            monthly_breakdown.push(SmsDelivery {
                month: Some(short_month(month)),
                ..SmsDelivery::from_totals(totals)
            });
        }

        Ok(SmsStatistics {
            by_type,
            overall,
            monthly_breakdown,
            as_of_date: today.format("%Y-%m-%d").to_string(),
        })
    }
}

/// The `count` months ending with `current`, oldest first.
fn trailing_months(current: NaiveDate, count: i32) -> Vec<NaiveDate> {
    (0..count).rev().map(|back| add_months(current, -back)).collect()
}

fn short_month(month: NaiveDate) -> String {
    month.format("%b %Y").to_string()
}

fn to_f64(amount: Decimal) -> f64 {
    amount.to_f64().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_months_cross_year() {
        let current = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
        let months: Vec<String> = trailing_months(current, 3).into_iter().map(short_month).collect();
        assert_eq!(months, vec!["Dec 2024", "Jan 2025", "Feb 2025"]);
    }

    #[test]
    fn test_delivery_rate() {
        let delivery = SmsDelivery::from_totals(SmsTotals {
            total_sent: 8,
            successful: 7,
            failed: 1,
        });
        assert_eq!(delivery.success_rate, 87.5);

        let value = serde_json::to_value(&delivery).unwrap();
        assert!(value.get("type_name").is_none());
        assert_eq!(value["failed"], 1);
    }
}
