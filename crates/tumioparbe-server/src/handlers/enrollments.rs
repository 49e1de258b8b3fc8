//! Enrollment and coupon handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::Value;

use crate::auth::CurrentUser;
use crate::db::models::{
    CompleteEnrollmentRequest, CompleteWithPaymentRequest, CouponInput, CouponView,
    EnrollmentInput, EnrollmentPaymentRequest, EnrollmentQuote, EnrollmentQuoteRequest,
    EnrollmentView,
};
use crate::error::AppResult;
use crate::services::{CouponService, EnrollmentService};

/// `GET /api/enrollments/`
pub async fn list(
    State(service): State<EnrollmentService>,
    Extension(user): Extension<CurrentUser>,
) -> AppResult<Json<Vec<EnrollmentView>>> {
    Ok(Json(service.list(&user).await?))
}

/// `POST /api/enrollments/`
pub async fn create(
    State(service): State<EnrollmentService>,
    Extension(user): Extension<CurrentUser>,
    Json(input): Json<EnrollmentInput>,
) -> AppResult<(StatusCode, Json<EnrollmentView>)> {
    let enrollment = service.create(&user, input).await?;
    Ok((StatusCode::CREATED, Json(enrollment)))
}

/// `GET /api/enrollments/{id}/`
pub async fn get(
    State(service): State<EnrollmentService>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<EnrollmentView>> {
    Ok(Json(service.get(&user, id).await?))
}

/// `PUT|PATCH /api/enrollments/{id}/`
pub async fn update(
    State(service): State<EnrollmentService>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(input): Json<EnrollmentInput>,
) -> AppResult<Json<EnrollmentView>> {
    Ok(Json(service.update(&user, id, input).await?))
}

/// `DELETE /api/enrollments/{id}/`
pub async fn delete(
    State(service): State<EnrollmentService>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    service.delete(&user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/enrollments/initiate/`
///
/// Quote fees for a student and batch, applying an optional coupon.
///
/// ```json
/// {"student": 3, "batch": 7, "start_month": "2025-02-01", "coupon_code": "SPRING25"}
/// ```
pub async fn initiate(
    State(service): State<EnrollmentService>,
    Extension(user): Extension<CurrentUser>,
    Json(request): Json<EnrollmentQuoteRequest>,
) -> AppResult<Json<EnrollmentQuote>> {
    Ok(Json(service.initiate(&user, request).await?))
}

/// `POST /api/enrollments/complete/`
pub async fn complete(
    State(service): State<EnrollmentService>,
    Extension(user): Extension<CurrentUser>,
    Json(request): Json<CompleteEnrollmentRequest>,
) -> AppResult<(StatusCode, Json<EnrollmentView>)> {
    let enrollment = service.complete(&user, request).await?;
    Ok((StatusCode::CREATED, Json(enrollment)))
}

/// `POST /api/enrollments/initiate_payment/`
pub async fn initiate_payment(
    State(service): State<EnrollmentService>,
    Extension(user): Extension<CurrentUser>,
    Json(request): Json<EnrollmentPaymentRequest>,
) -> AppResult<Json<Value>> {
    Ok(Json(service.initiate_payment(&user, request).await?))
}

/// `POST /api/enrollments/complete_with_payment/`
pub async fn complete_with_payment(
    State(service): State<EnrollmentService>,
    Extension(user): Extension<CurrentUser>,
    Json(request): Json<CompleteWithPaymentRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let completed = service.complete_with_payment(&user, request).await?;
    Ok((StatusCode::CREATED, Json(completed)))
}

#[derive(Debug, Deserialize, Default)]
pub struct ValidateCouponQuery {
    pub code: Option<String>,
}

/// `GET /api/coupons/`
pub async fn list_coupons(State(service): State<CouponService>) -> AppResult<Json<Vec<CouponView>>> {
    Ok(Json(service.list().await?))
}

/// `POST /api/coupons/` (staff)
pub async fn create_coupon(
    State(service): State<CouponService>,
    Extension(user): Extension<CurrentUser>,
    Json(input): Json<CouponInput>,
) -> AppResult<(StatusCode, Json<CouponView>)> {
    let coupon = service.create(&user, input).await?;
    Ok((StatusCode::CREATED, Json(coupon)))
}

/// `GET /api/coupons/{id}/`
pub async fn get_coupon(
    State(service): State<CouponService>,
    Path(id): Path<i64>,
) -> AppResult<Json<CouponView>> {
    Ok(Json(service.get(id).await?))
}

/// `PUT|PATCH /api/coupons/{id}/` (staff)
pub async fn update_coupon(
    State(service): State<CouponService>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(input): Json<CouponInput>,
) -> AppResult<Json<CouponView>> {
    Ok(Json(service.update(&user, id, input).await?))
}

/// `DELETE /api/coupons/{id}/` (staff)
pub async fn delete_coupon(
    State(service): State<CouponService>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    service.delete(&user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/coupons/validate/?code=SPRING25`
pub async fn validate_coupon(
    State(service): State<CouponService>,
    Query(query): Query<ValidateCouponQuery>,
) -> AppResult<Json<CouponView>> {
    Ok(Json(service.validate(query.code.as_deref()).await?))
}
