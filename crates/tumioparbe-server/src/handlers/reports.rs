//! Admin report handlers.

use axum::{extract::State, Extension, Json};

use crate::auth::CurrentUser;
use crate::error::AppResult;
use crate::services::reports::{EnrollmentStatistics, FinancialSummary, SmsStatistics};
use crate::services::ReportService;

/// `GET /api/reports/financial_summary/`
pub async fn financial_summary(
    State(service): State<ReportService>,
    Extension(user): Extension<CurrentUser>,
) -> AppResult<Json<FinancialSummary>> {
    Ok(Json(service.financial_summary(&user).await?))
}

/// `GET /api/reports/enrollment_statistics/`
pub async fn enrollment_statistics(
    State(service): State<ReportService>,
    Extension(user): Extension<CurrentUser>,
) -> AppResult<Json<EnrollmentStatistics>> {
    Ok(Json(service.enrollment_statistics(&user).await?))
}

/// `GET /api/reports/sms_statistics/`
pub async fn sms_statistics(
    State(service): State<ReportService>,
    Extension(user): Extension<CurrentUser>,
) -> AppResult<Json<SmsStatistics>> {
    Ok(Json(service.sms_statistics(&user).await?))
}
