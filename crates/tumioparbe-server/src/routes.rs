//! Router assembly.
//!
//! Each domain gets its own router carrying the service it needs. Routes
//! behind authentication are wrapped with the bearer-token middleware.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::auth::require_auth;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::handlers::{self, AutomationState};
use crate::state::AppState;

/// Reject requests whose `Host` header is not in `ALLOWED_HOSTS`.
async fn check_host(
    State(config): State<Arc<AppConfig>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| request.uri().host())
        .unwrap_or("");

    if !config.is_host_allowed(host) {
        tracing::warn!(host, "Rejected request for disallowed host");
        return Err(AppError::BadRequest(format!("Invalid HTTP_HOST header: '{}'", host)));
    }
    Ok(next.run(request).await)
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .allow_credentials(true)
}

/// Build the application router with all routes.
pub fn build_router(state: AppState) -> Router {
    let auth = middleware::from_fn_with_state(state.auth.clone(), require_auth);

    // Health check routes (no auth required)
    let health_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/health", get(handlers::api_health))
        .with_state(state.clone());

    let public_account_routes = Router::new()
        .route("/api/accounts/request-otp/", post(handlers::accounts::request_otp))
        .route("/api/accounts/verify-otp/", post(handlers::accounts::verify_otp))
        .route("/api/accounts/register/", post(handlers::accounts::register))
        .route("/api/accounts/token/", post(handlers::accounts::token))
        .route("/api/accounts/token/refresh/", post(handlers::accounts::token_refresh))
        .with_state(state.accounts.clone());

    let account_routes = Router::new()
        .route(
            "/api/accounts/profile/",
            get(handlers::accounts::profile)
                .put(handlers::accounts::update_profile)
                .patch(handlers::accounts::update_profile),
        )
        .route(
            "/api/accounts/students/",
            get(handlers::accounts::list_students).post(handlers::accounts::create_student),
        )
        .route(
            "/api/accounts/students/{id}/",
            get(handlers::accounts::get_student)
                .put(handlers::accounts::update_student)
                .patch(handlers::accounts::update_student)
                .delete(handlers::accounts::delete_student),
        )
        .route_layer(auth.clone())
        .with_state(state.accounts.clone());

    let course_routes = Router::new()
        .route(
            "/api/courses/",
            get(handlers::courses::list_courses).post(handlers::courses::create_course),
        )
        .route(
            "/api/courses/check_permissions/",
            get(handlers::courses::check_permissions),
        )
        .route(
            "/api/courses/{id}/",
            get(handlers::courses::get_course)
                .put(handlers::courses::update_course)
                .patch(handlers::courses::update_course)
                .delete(handlers::courses::delete_course),
        )
        .route(
            "/api/batches/",
            get(handlers::courses::list_batches).post(handlers::courses::create_batch),
        )
        .route(
            "/api/batches/{id}/",
            get(handlers::courses::get_batch)
                .put(handlers::courses::update_batch)
                .patch(handlers::courses::update_batch)
                .delete(handlers::courses::delete_batch),
        )
        .route(
            "/api/batches/{id}/enrolled_students/",
            get(handlers::courses::enrolled_students),
        )
        .route(
            "/api/batches/{id}/transfer_students/",
            post(handlers::courses::transfer_students),
        )
        .route_layer(auth.clone())
        .with_state(state.courses.clone());

    let enrollment_routes = Router::new()
        .route(
            "/api/enrollments/",
            get(handlers::enrollments::list).post(handlers::enrollments::create),
        )
        .route("/api/enrollments/initiate/", post(handlers::enrollments::initiate))
        .route("/api/enrollments/complete/", post(handlers::enrollments::complete))
        .route(
            "/api/enrollments/initiate_payment/",
            post(handlers::enrollments::initiate_payment),
        )
        .route(
            "/api/enrollments/complete_with_payment/",
            post(handlers::enrollments::complete_with_payment),
        )
        .route(
            "/api/enrollments/{id}/",
            get(handlers::enrollments::get)
                .put(handlers::enrollments::update)
                .patch(handlers::enrollments::update)
                .delete(handlers::enrollments::delete),
        )
        .route_layer(auth.clone())
        .with_state(state.enrollments.clone());

    let coupon_routes = Router::new()
        .route(
            "/api/coupons/",
            get(handlers::enrollments::list_coupons).post(handlers::enrollments::create_coupon),
        )
        .route("/api/coupons/validate/", get(handlers::enrollments::validate_coupon))
        .route(
            "/api/coupons/{id}/",
            get(handlers::enrollments::get_coupon)
                .put(handlers::enrollments::update_coupon)
                .patch(handlers::enrollments::update_coupon)
                .delete(handlers::enrollments::delete_coupon),
        )
        .route_layer(auth.clone())
        .with_state(state.coupons.clone());

    let payment_routes = Router::new()
        .route("/api/payments/", get(handlers::payments::list))
        .route(
            "/api/payments/pending_invoices/",
            get(handlers::payments::pending_invoices),
        )
        .route(
            "/api/payments/payment_history/",
            get(handlers::payments::payment_history),
        )
        .route(
            "/api/payments/initiate_bkash/",
            post(handlers::payments::initiate_bkash),
        )
        .route("/api/payments/pay_invoice/", post(handlers::payments::pay_invoice))
        .route(
            "/api/payments/bulk_pay_invoices/",
            post(handlers::payments::bulk_pay_invoices),
        )
        .route(
            "/api/payments/execute_bkash_payment/",
            post(handlers::payments::execute_bkash_payment),
        )
        .route(
            "/api/payments/query_bkash_payment/",
            post(handlers::payments::query_bkash_payment),
        )
        .route(
            "/api/payments/create_manual_invoice/",
            post(handlers::payments::create_manual_invoice),
        )
        .route("/api/payments/{id}/", get(handlers::payments::get))
        .route_layer(auth.clone())
        .with_state(state.payments.clone());

    // bKash calls these directly
    let bkash_routes = Router::new()
        .route("/api/bkash/callback/", get(handlers::payments::bkash_callback))
        .route("/api/bkash/webhook/", post(handlers::payments::bkash_webhook))
        .with_state(state.payments.clone());

    let sms_routes = Router::new()
        .route("/api/sms/", get(handlers::sms::list))
        .route("/api/sms/send_single/", post(handlers::sms::send_single))
        .route("/api/sms/send_bulk/", post(handlers::sms::send_bulk))
        .route("/api/sms/check_balance/", get(handlers::sms::check_balance))
        .route("/api/sms/get_stats/", get(handlers::sms::get_stats))
        .route("/api/sms/dashboard_stats/", get(handlers::sms::dashboard_stats))
        .route("/api/sms/{id}/", get(handlers::sms::get))
        .route_layer(auth.clone())
        .with_state(state.sms.clone());

    let automation_routes = Router::new()
        .route(
            "/api/automation/generate_invoices/",
            post(handlers::automation::generate_invoices),
        )
        .route(
            "/api/automation/send_reminders/",
            post(handlers::automation::send_reminders),
        )
        .route(
            "/api/automation/task_result/{task_id}/",
            get(handlers::automation::task_result),
        )
        .route(
            "/api/automation/get_settings/",
            get(handlers::automation::get_settings),
        )
        .route(
            "/api/automation/update_settings/",
            axum::routing::put(handlers::automation::update_settings)
                .patch(handlers::automation::update_settings),
        )
        .route_layer(auth.clone())
        .with_state(AutomationState {
            automation: state.automation.clone(),
            settings: state.settings.clone(),
        });

    let report_routes = Router::new()
        .route(
            "/api/reports/financial_summary/",
            get(handlers::reports::financial_summary),
        )
        .route(
            "/api/reports/enrollment_statistics/",
            get(handlers::reports::enrollment_statistics),
        )
        .route(
            "/api/reports/sms_statistics/",
            get(handlers::reports::sms_statistics),
        )
        .route_layer(auth)
        .with_state(state.reports.clone());

    Router::new()
        .merge(health_routes)
        .merge(public_account_routes)
        .merge(account_routes)
        .merge(course_routes)
        .merge(enrollment_routes)
        .merge(coupon_routes)
        .merge(payment_routes)
        .merge(bkash_routes)
        .merge(sms_routes)
        .merge(automation_routes)
        .merge(report_routes)
        .nest_service("/static", ServeDir::new(&state.config.static_root))
        .nest_service("/media", ServeDir::new(&state.config.media_root))
        .layer(middleware::from_fn_with_state(state.config.clone(), check_host))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::config::{BkashConfig, DatabaseConfig, SmsConfig};
    use crate::db::pool::create_lazy_pool;

    fn test_router(config: AppConfig) -> Router {
        let db = create_lazy_pool(&DatabaseConfig {
            database_url: "postgres://nobody@127.0.0.1:1/none".to_string(),
            ..DatabaseConfig::default()
        })
        .expect("lazy pool");
        let state = AppState::new(db, config, SmsConfig::default(), BkashConfig::default())
            .expect("state");
        build_router(state)
    }

    fn debug_config() -> AppConfig {
        AppConfig {
            debug: true,
            ..AppConfig::default()
        }
    }

    async fn send(router: Router, request: Request<Body>) -> Response {
        router.oneshot(request).await.expect("response")
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let response = send(
            test_router(debug_config()),
            Request::builder().uri("/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_protected_route_requires_token() {
        let response = send(
            test_router(debug_config()),
            Request::builder()
                .uri("/api/enrollments/")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_disallowed_host_rejected() {
        let config = AppConfig {
            allowed_hosts: vec!["api.tumioparbe.com".to_string()],
            ..debug_config()
        };
        let response = send(
            test_router(config),
            Request::builder()
                .uri("/health")
                .header(header::HOST, "evil.example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_webhook_rejects_bad_signature() {
        let response = send(
            test_router(debug_config()),
            Request::builder()
                .method(Method::POST)
                .uri("/api/bkash/webhook/")
                .header("x-bkash-signature", "bm90LWEtc2lnbmF0dXJl")
                .body(Body::from(r#"{"Type":"Notification"}"#))
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
