//! Account handlers: OTP verification, registration, tokens, profile and
//! students.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde_json::{json, Value};

use crate::auth::CurrentUser;
use crate::db::models::{
    OtpRequest, OtpVerifyRequest, ProfileUpdate, RegisterRequest, Student, StudentInput,
    TokenPair, TokenRefreshRequest, TokenRequest, User,
};
use crate::error::AppResult;
use crate::services::accounts::Registration;
use crate::services::AccountService;

/// `POST /api/accounts/request-otp/`
///
/// ```json
/// {"phone": "01712345678"}
/// ```
pub async fn request_otp(
    State(service): State<AccountService>,
    Json(request): Json<OtpRequest>,
) -> AppResult<Json<Value>> {
    Ok(Json(service.request_otp(request).await?))
}

/// `POST /api/accounts/verify-otp/`
pub async fn verify_otp(
    State(service): State<AccountService>,
    Json(request): Json<OtpVerifyRequest>,
) -> AppResult<Json<Value>> {
    Ok(Json(service.verify_otp(request).await?))
}

/// `POST /api/accounts/register/`
///
/// Requires a phone verified within the last ten minutes.
pub async fn register(
    State(service): State<AccountService>,
    Json(request): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<Registration>)> {
    let registration = service.register(request).await?;
    Ok((StatusCode::CREATED, Json(registration)))
}

/// `POST /api/accounts/token/`
pub async fn token(
    State(service): State<AccountService>,
    Json(request): Json<TokenRequest>,
) -> AppResult<Json<TokenPair>> {
    Ok(Json(service.login(request).await?))
}

/// `POST /api/accounts/token/refresh/`
pub async fn token_refresh(
    State(service): State<AccountService>,
    Json(request): Json<TokenRefreshRequest>,
) -> AppResult<Json<Value>> {
    let access = service.refresh(request.refresh.as_deref())?;
    Ok(Json(json!({ "access": access })))
}

/// `GET /api/accounts/profile/`
pub async fn profile(Extension(user): Extension<CurrentUser>) -> Json<User> {
    Json(user.0)
}

/// `PUT|PATCH /api/accounts/profile/`
pub async fn update_profile(
    State(service): State<AccountService>,
    Extension(user): Extension<CurrentUser>,
    Json(update): Json<ProfileUpdate>,
) -> AppResult<Json<User>> {
    Ok(Json(service.update_profile(&user.0, update).await?))
}

/// `GET /api/accounts/students/`
pub async fn list_students(
    State(service): State<AccountService>,
    Extension(user): Extension<CurrentUser>,
) -> AppResult<Json<Vec<Student>>> {
    Ok(Json(service.list_students(&user.0).await?))
}

/// `POST /api/accounts/students/`
pub async fn create_student(
    State(service): State<AccountService>,
    Extension(user): Extension<CurrentUser>,
    Json(input): Json<StudentInput>,
) -> AppResult<(StatusCode, Json<Student>)> {
    let student = service.create_student(&user.0, input).await?;
    Ok((StatusCode::CREATED, Json(student)))
}

/// `GET /api/accounts/students/{id}/`
pub async fn get_student(
    State(service): State<AccountService>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<Student>> {
    Ok(Json(service.get_student(&user.0, id).await?))
}

/// `PUT|PATCH /api/accounts/students/{id}/`
pub async fn update_student(
    State(service): State<AccountService>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(input): Json<StudentInput>,
) -> AppResult<Json<Student>> {
    Ok(Json(service.update_student(&user.0, id, input).await?))
}

/// `DELETE /api/accounts/students/{id}/`
pub async fn delete_student(
    State(service): State<AccountService>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    service.delete_student(&user.0, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
