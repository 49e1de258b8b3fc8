//! Error types for the TumioParbe server.
//!
//! Every handler returns [`AppResult`]; the error converts into a JSON
//! response of the form `{"error": "...", "status": 400}`.

use std::collections::BTreeMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Per-field validation messages, keyed by field name.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Application-level errors.
#[derive(Error, Debug)]
pub enum AppError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Not found error
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Request payload failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// One or more fields failed validation
    #[error("Invalid fields: {}", .0.keys().cloned().collect::<Vec<_>>().join(", "))]
    Fields(FieldErrors),

    /// Authentication error
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Authorization error
    #[error("Authorization error: {0}")]
    Forbidden(String),

    /// Conflict error (e.g., duplicate resource)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Bad request error
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Template rendering error
    #[error("Template error: {0}")]
    Template(String),

    /// Payment gateway or SMS provider error
    #[error("External service error: {0}")]
    ExternalService(String),

    /// Error with a prebuilt JSON body, for responses that carry extra fields
    #[error("Request rejected ({status}): {body}")]
    Detailed {
        status: StatusCode,
        body: serde_json::Value,
    },
}

impl AppError {
    /// Build a single-field validation error.
    pub fn field(name: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(name.to_string(), vec![message.into()]);
        AppError::Fields(errors)
    }

    /// Build a [`AppError::Detailed`] from a status and JSON body.
    pub fn detailed(status: StatusCode, body: serde_json::Value) -> Self {
        AppError::Detailed { status, body }
    }

    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) | AppError::Fields(_) | AppError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            AppError::Detailed { status, .. } => *status,
            AppError::Database(_)
            | AppError::Internal(_)
            | AppError::Config(_)
            | AppError::Serialization(_)
            | AppError::Template(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = match &self {
            AppError::Database(e) => {
                tracing::error!(error = %e, "Database error");
                self.to_string()
            }
            AppError::Fields(errors) => {
                return (status, Json(json!(errors))).into_response();
            }
            AppError::Detailed { body, .. } => {
                return (status, Json(body.clone())).into_response();
            }
            AppError::NotFound(msg)
            | AppError::Validation(msg)
            | AppError::Auth(msg)
            | AppError::Forbidden(msg)
            | AppError::Conflict(msg)
            | AppError::BadRequest(msg) => msg.clone(),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                msg.clone()
            }
            AppError::Config(msg) => {
                tracing::error!(error = %msg, "Configuration error");
                msg.clone()
            }
            AppError::Serialization(e) => {
                tracing::error!(error = %e, "Serialization error");
                self.to_string()
            }
            AppError::Template(msg) => {
                tracing::error!(error = %msg, "Template error");
                msg.clone()
            }
            AppError::ExternalService(msg) => {
                tracing::warn!(error = %msg, "External service error");
                msg.clone()
            }
        };

        let body = Json(json!({
            "error": message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError.
pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<envy::Error> for AppError {
    fn from(err: envy::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        AppError::Auth(format!("Token is invalid or expired: {}", err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::ExternalService(err.to_string())
    }
}

impl From<minijinja::Error> for AppError {
    fn from(err: minijinja::Error) -> Self {
        AppError::Template(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error() {
        let err = AppError::NotFound("Invoice not found".to_string());
        assert_eq!(err.to_string(), "Resource not found: Invoice not found");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_validation_maps_to_bad_request() {
        let err = AppError::Validation("Start month cannot be in the past".to_string());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_field_error() {
        let err = AppError::field("confirm_password", "Passwords don't match.");
        match &err {
            AppError::Fields(map) => {
                assert_eq!(map["confirm_password"], vec!["Passwords don't match."]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.to_string(), "Invalid fields: confirm_password");
    }

    #[test]
    fn test_detailed_error_keeps_status() {
        let err = AppError::detailed(
            StatusCode::BAD_REQUEST,
            json!({"error": "One or more invoices are already paid", "paid_invoice_ids": [4]}),
        );
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_gateway_error_status() {
        let err = AppError::ExternalService("bKash timed out".to_string());
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }
}
