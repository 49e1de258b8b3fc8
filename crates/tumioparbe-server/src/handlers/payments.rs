//! Payment handlers, including the public bKash callback and webhook.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::Value;

use crate::auth::CurrentUser;
use crate::db::models::{
    BkashPaymentRef, BulkPaymentRequest, InvoicePaymentRequest, ManualInvoiceRequest, Payment,
    PaymentFilter,
};
use crate::error::AppResult;
use crate::services::payments::{PaymentHistoryEntry, PendingInvoice, SIGNATURE_HEADER};
use crate::services::PaymentService;

/// `GET /api/payments/`
///
/// # Query Parameters
///
/// - `status`: Payment status (`Initiated`, `Completed`, ...)
/// - `invoice`: Invoice id
pub async fn list(
    State(service): State<PaymentService>,
    Extension(user): Extension<CurrentUser>,
    Query(filter): Query<PaymentFilter>,
) -> AppResult<Json<Vec<Payment>>> {
    Ok(Json(service.list(&user, &filter).await?))
}

/// `GET /api/payments/{id}/`
pub async fn get(
    State(service): State<PaymentService>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<Payment>> {
    Ok(Json(service.get(&user, id).await?))
}

/// `GET /api/payments/pending_invoices/`
pub async fn pending_invoices(
    State(service): State<PaymentService>,
    Extension(user): Extension<CurrentUser>,
) -> AppResult<Json<Vec<PendingInvoice>>> {
    Ok(Json(service.pending_invoices(&user).await?))
}

/// `GET /api/payments/payment_history/`
pub async fn payment_history(
    State(service): State<PaymentService>,
    Extension(user): Extension<CurrentUser>,
) -> AppResult<Json<Vec<PaymentHistoryEntry>>> {
    Ok(Json(service.payment_history(&user).await?))
}

/// `POST /api/payments/initiate_bkash/`
///
/// ```json
/// {"invoice_id": 42, "callback_url": "https://app.example.com/payment/callback"}
/// ```
pub async fn initiate_bkash(
    State(service): State<PaymentService>,
    Extension(user): Extension<CurrentUser>,
    Json(request): Json<InvoicePaymentRequest>,
) -> AppResult<Json<Value>> {
    Ok(Json(service.initiate_bkash(&user, request).await?))
}

/// `POST /api/payments/pay_invoice/`
pub async fn pay_invoice(
    State(service): State<PaymentService>,
    Extension(user): Extension<CurrentUser>,
    Json(request): Json<InvoicePaymentRequest>,
) -> AppResult<Json<Value>> {
    Ok(Json(service.pay_invoice(&user, request).await?))
}

/// `POST /api/payments/bulk_pay_invoices/`
pub async fn bulk_pay_invoices(
    State(service): State<PaymentService>,
    Extension(user): Extension<CurrentUser>,
    Json(request): Json<BulkPaymentRequest>,
) -> AppResult<Json<Value>> {
    Ok(Json(service.bulk_pay_invoices(&user, request).await?))
}

/// `POST /api/payments/execute_bkash_payment/`
///
/// ```json
/// {"paymentID": "TR0011ON1565154754797"}
/// ```
pub async fn execute_bkash_payment(
    State(service): State<PaymentService>,
    Extension(user): Extension<CurrentUser>,
    Json(request): Json<BkashPaymentRef>,
) -> AppResult<Json<Value>> {
    Ok(Json(service.execute_bkash_payment(&user, request).await?))
}

/// `POST /api/payments/query_bkash_payment/`
pub async fn query_bkash_payment(
    State(service): State<PaymentService>,
    Extension(user): Extension<CurrentUser>,
    Json(request): Json<BkashPaymentRef>,
) -> AppResult<Json<Value>> {
    Ok(Json(service.query_bkash_payment(&user, request).await?))
}

/// `POST /api/payments/create_manual_invoice/` (staff)
pub async fn create_manual_invoice(
    State(service): State<PaymentService>,
    Extension(user): Extension<CurrentUser>,
    Json(request): Json<ManualInvoiceRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let created = service.create_manual_invoice(&user, request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Deserialize, Default)]
pub struct CallbackQuery {
    #[serde(rename = "paymentID")]
    pub payment_id: Option<String>,
    pub status: Option<String>,
}

/// `GET /api/bkash/callback/?paymentID=...&status=success|failure|cancel`
///
/// Always answers with a `302` to the matching frontend page.
pub async fn bkash_callback(
    State(service): State<PaymentService>,
    Query(query): Query<CallbackQuery>,
) -> AppResult<Response> {
    let location = service
        .callback_redirect(query.payment_id.as_deref(), query.status.as_deref())
        .await?;
    Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
}

/// `POST /api/bkash/webhook/`
///
/// The raw body is needed to check the `x-bkash-signature` HMAC.
pub async fn bkash_webhook(
    State(service): State<PaymentService>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    Ok(Json(service.handle_webhook(signature, &body).await?))
}
