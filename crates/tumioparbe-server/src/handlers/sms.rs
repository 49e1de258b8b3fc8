//! Admin SMS handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::json;

use crate::auth::CurrentUser;
use crate::db::models::{BulkSmsRequest, SingleSmsRequest, SmsLog, SmsLogFilter, SmsStatus};
use crate::error::{AppError, AppResult, FieldErrors};
use crate::services::sms::SmsDashboard;
use crate::services::SmsService;

const MAX_PHONE_LENGTH: usize = 20;

fn require_message(errors: &mut FieldErrors, message: Option<&str>) {
    if message.map(str::trim).unwrap_or("").is_empty() {
        errors.insert("message".to_string(), vec!["This field is required.".to_string()]);
    }
}

fn failure(message: String, log_id: Option<i64>) -> Response {
    let mut body = json!({ "success": false, "message": message });
    if let Some(log_id) = log_id {
        body["log_id"] = json!(log_id);
    }
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

/// `GET /api/sms/`
///
/// # Query Parameters
///
/// - `message_type`, `status`: exact codes
/// - `start_date`, `end_date`: inclusive `YYYY-MM-DD` bounds
/// - `search`: substring of phone number or message
pub async fn list(
    State(service): State<SmsService>,
    Extension(user): Extension<CurrentUser>,
    Query(filter): Query<SmsLogFilter>,
) -> AppResult<Json<Vec<SmsLog>>> {
    user.require_staff()?;
    Ok(Json(service.list_logs(&filter).await?))
}

/// `GET /api/sms/{id}/`
pub async fn get(
    State(service): State<SmsService>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<SmsLog>> {
    user.require_staff()?;
    Ok(Json(service.get_log(id).await?))
}

/// `POST /api/sms/send_single/`
///
/// ```json
/// {"phone_number": "01712345678", "message": "Class is cancelled today"}
/// ```
pub async fn send_single(
    State(service): State<SmsService>,
    Extension(user): Extension<CurrentUser>,
    Json(request): Json<SingleSmsRequest>,
) -> AppResult<Response> {
    user.require_staff()?;

    let mut errors = FieldErrors::new();
    let phone = request.phone_number.as_deref().map(str::trim).unwrap_or("");
    if phone.is_empty() {
        errors.insert("phone_number".to_string(), vec!["This field is required.".to_string()]);
    } else if phone.chars().count() > MAX_PHONE_LENGTH {
        errors.insert(
            "phone_number".to_string(),
            vec!["Ensure this field has no more than 20 characters.".to_string()],
        );
    }
    require_message(&mut errors, request.message.as_deref());
    if !errors.is_empty() {
        return Err(AppError::Fields(errors));
    }
    let message = request.message.unwrap_or_default();

    let outcome = match service.send_custom(phone, &message, Some(user.id())).await {
        Ok(outcome) => outcome,
        Err(e) => return Ok(failure(format!("Failed to send SMS: {}", e), None)),
    };

    if outcome.is_success() {
        Ok(Json(json!({
            "success": true,
            "message": format!("SMS sent successfully to {}", phone),
            "log_id": outcome.log_id,
        }))
        .into_response())
    } else {
        let reason = outcome.result.failures.join("; ");
        Ok(failure(format!("Failed to send SMS: {}", reason), Some(outcome.log_id)))
    }
}

/// `POST /api/sms/send_bulk/`
///
/// Answers `207 Multi-Status` when only some recipients were reached.
pub async fn send_bulk(
    State(service): State<SmsService>,
    Extension(user): Extension<CurrentUser>,
    Json(request): Json<BulkSmsRequest>,
) -> AppResult<Response> {
    user.require_staff()?;

    let mut errors = FieldErrors::new();
    require_message(&mut errors, request.message.as_deref());
    if !errors.is_empty() {
        return Err(AppError::Fields(errors));
    }
    let message = request.message.unwrap_or_default();
    let phones = request.phone_numbers;

    let outcome = match service.send_bulk(&phones, &message, Some(user.id())).await {
        Ok(outcome) => outcome,
        Err(e @ AppError::Fields(_)) => return Err(e),
        Err(e) => return Ok(failure(format!("Failed to send SMS: {}", e), None)),
    };

    let result = &outcome.result;
    if outcome.is_success() {
        Ok(Json(json!({
            "success": true,
            "message": format!("SMS sent successfully to {} recipients", phones.len()),
            "log_id": outcome.log_id,
        }))
        .into_response())
    } else if result.status == SmsStatus::Partial {
        Ok((
            StatusCode::MULTI_STATUS,
            Json(json!({
                "success": true,
                "message": format!(
                    "SMS sent partially: {} succeeded, {} failed",
                    result.successful, result.failed
                ),
                "failures": result.failures,
                "log_id": outcome.log_id,
            })),
        )
            .into_response())
    } else {
        let reason = result.failures.join("; ");
        Ok(failure(format!("Failed to send SMS: {}", reason), Some(outcome.log_id)))
    }
}

/// `GET /api/sms/check_balance/`
pub async fn check_balance(
    State(service): State<SmsService>,
    Extension(user): Extension<CurrentUser>,
) -> AppResult<Response> {
    user.require_staff()?;
    match service.check_balance().await {
        Ok(balance) => Ok(Json(json!({ "success": true, "balance": balance })).into_response()),
        Err(e) => Ok(failure(format!("Failed to check balance: {}", e), None)),
    }
}

/// `GET /api/sms/get_stats/`
///
/// Usage statistics as reported by the provider.
pub async fn get_stats(
    State(service): State<SmsService>,
    Extension(user): Extension<CurrentUser>,
) -> AppResult<Response> {
    user.require_staff()?;
    match service.provider_stats().await {
        Ok(statistics) => {
            Ok(Json(json!({ "success": true, "statistics": statistics })).into_response())
        }
        Err(e) => Ok(failure(format!("Failed to get statistics: {}", e), None)),
    }
}

/// `GET /api/sms/dashboard_stats/`
///
/// Counts from the local SMS log.
pub async fn dashboard_stats(
    State(service): State<SmsService>,
    Extension(user): Extension<CurrentUser>,
) -> AppResult<Json<SmsDashboard>> {
    user.require_staff()?;
    Ok(Json(service.dashboard().await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_message() {
        let mut errors = FieldErrors::new();
        require_message(&mut errors, Some("hello"));
        assert!(errors.is_empty());

        require_message(&mut errors, Some("   "));
        assert_eq!(errors["message"], vec!["This field is required."]);
    }

    #[test]
    fn test_failure_response() {
        let response = failure("Failed to send SMS: timeout".to_string(), Some(4));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
