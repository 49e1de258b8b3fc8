//! Invoices and payments: bKash checkout, settlement, callbacks and the
//! gateway webhook.
//!
//! A completed bKash payment is settled one of three ways depending on the
//! invoice it was made against:
//!
//! * a regular invoice is simply marked paid;
//! * a bulk parent invoice is fanned out into one derived payment per listed
//!   invoice, then removed;
//! * an enrollment temporary invoice becomes a real enrollment through
//!   [`EnrollmentService::materialize`].

use std::sync::Arc;

use axum::http::StatusCode;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use sha2::Sha256;

use crate::auth::CurrentUser;
use crate::billing::{self, bulk_merchant_invoice, invoice_merchant_invoice, manual_transaction_id, month_start};
use crate::clients::{BkashClient, BkashResponse};
use crate::config::AppConfig;
use crate::db::models::{
    ActionType, BkashPaymentRef, BulkPaymentRequest, CompletedEnrollment, EnrollmentData,
    Invoice, InvoicePaymentRequest, ManualInvoiceRequest, NewPayment, Payment, PaymentFilter,
    PaymentMethod, PaymentStatus, PendingInvoiceRow, MULTI_INVOICE_PAYMENT,
};
use crate::db::queries::payment::{self as queries, NewInvoice};
use crate::db::queries::{account, common, enrollment};
use crate::db::DbPool;
use crate::error::{AppError, AppResult, FieldErrors};
use crate::result_ext::{OptionResultExt, ResultExt};
use crate::services::enrollments::{EnrollmentService, Settlement};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the webhook body signature.
pub const SIGNATURE_HEADER: &str = "x-bkash-signature";

const NO_STUDENT: &str = "No student (Temporary/Pending)";
const NOT_APPLICABLE: &str = "N/A";

/// Unpaid invoice as shown to a parent.
#[derive(Debug, Clone, Serialize)]
pub struct PendingInvoice {
    #[serde(flatten)]
    pub row: PendingInvoiceRow,
    pub month_display: String,
}

/// Payment history entry with display names.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentHistoryEntry {
    #[serde(flatten)]
    pub payment: Payment,
    pub student_name: String,
    pub course_name: String,
    pub batch_name: String,
    pub month: String,
}

/// What settling a completed bKash payment did.
#[derive(Debug, Clone)]
pub enum SettledPayment {
    Invoice,
    Bulk { processed: Vec<i64> },
    Enrollment(CompletedEnrollment),
    /// The money was taken but the enrollment could not be created
    EnrollmentFailed(String),
}

/// Error wording that differs between the two single-invoice checkouts.
struct CheckoutWording {
    not_found: &'static str,
    already_paid: &'static str,
}

const INITIATE_WORDING: CheckoutWording = CheckoutWording {
    not_found: "Invoice not found.",
    already_paid: "Invoice is already paid.",
};

const PAY_INVOICE_WORDING: CheckoutWording = CheckoutWording {
    not_found: "Invoice not found",
    already_paid: "This invoice is already paid",
};

/// Service for invoice and payment operations.
#[derive(Clone)]
pub struct PaymentService {
    pool: DbPool,
    bkash: BkashClient,
    enrollments: EnrollmentService,
    config: Arc<AppConfig>,
}

impl PaymentService {
    pub fn new(
        pool: DbPool,
        bkash: BkashClient,
        enrollments: EnrollmentService,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            pool,
            bkash,
            enrollments,
            config,
        }
    }

    pub async fn list(&self, user: &CurrentUser, filter: &PaymentFilter) -> AppResult<Vec<Payment>> {
        queries::list_payments(&self.pool, user.parent_scope(), filter).await
    }

    pub async fn get(&self, user: &CurrentUser, id: i64) -> AppResult<Payment> {
        queries::get_payment(&self.pool, id, user.parent_scope())
            .await?
            .ok_or_else(|| AppError::NotFound("No Payment matches the given query.".to_string()))
    }

    pub async fn pending_invoices(&self, user: &CurrentUser) -> AppResult<Vec<PendingInvoice>> {
        let rows = queries::list_pending_invoices(&self.pool, user.parent_scope()).await?;
        Ok(rows
            .into_iter()
            .map(|row| PendingInvoice {
                month_display: row.invoice.month.format("%B %Y").to_string(),
                row,
            })
            .collect())
    }

    pub async fn payment_history(&self, user: &CurrentUser) -> AppResult<Vec<PaymentHistoryEntry>> {
        let rows = queries::payment_history(&self.pool, user.parent_scope()).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let month = row.invoice_month.format("%B %Y").to_string();
                match row.student_name {
                    Some(student_name) => PaymentHistoryEntry {
                        payment: row.payment,
                        student_name,
                        course_name: row.course_name.unwrap_or_default(),
                        batch_name: row.batch_name.unwrap_or_default(),
                        month,
                    },
                    None => PaymentHistoryEntry {
                        payment: row.payment,
                        student_name: NO_STUDENT.to_string(),
                        course_name: NOT_APPLICABLE.to_string(),
                        batch_name: NOT_APPLICABLE.to_string(),
                        month,
                    },
                }
            })
            .collect())
    }

    /// `initiate_bkash`: serializer-style field errors for missing input.
    pub async fn initiate_bkash(
        &self,
        user: &CurrentUser,
        request: InvoicePaymentRequest,
    ) -> AppResult<serde_json::Value> {
        let mut errors = FieldErrors::new();
        for (field, missing) in [
            ("invoice_id", request.invoice_id.is_none()),
            ("callback_url", request.callback_url.as_deref().unwrap_or("").is_empty()),
            ("customer_phone", request.customer_phone.as_deref().unwrap_or("").is_empty()),
        ] {
            if missing {
                errors.insert(field.to_string(), vec!["This field is required.".to_string()]);
            }
        }
        match (request.invoice_id, request.callback_url, request.customer_phone) {
            (Some(id), Some(callback), Some(phone)) if errors.is_empty() => {
                self.checkout_invoice(user, id, &callback, &phone, &INITIATE_WORDING)
                    .await
            }
            _ => Err(AppError::Fields(errors)),
        }
    }

    /// `pay_invoice`: one combined message for missing input.
    pub async fn pay_invoice(
        &self,
        user: &CurrentUser,
        request: InvoicePaymentRequest,
    ) -> AppResult<serde_json::Value> {
        match (
            request.invoice_id,
            request.callback_url.filter(|s| !s.is_empty()),
            request.customer_phone.filter(|s| !s.is_empty()),
        ) {
            (Some(id), Some(callback), Some(phone)) => {
                self.checkout_invoice(user, id, &callback, &phone, &PAY_INVOICE_WORDING)
                    .await
            }
            _ => Err(AppError::BadRequest(
                "invoice_id, callback_url, and customer_phone are required".to_string(),
            )),
        }
    }

    async fn checkout_invoice(
        &self,
        user: &CurrentUser,
        invoice_id: i64,
        callback_url: &str,
        customer_phone: &str,
        wording: &CheckoutWording,
    ) -> AppResult<serde_json::Value> {
        let invoice = queries::get_invoice(&self.pool, invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(wording.not_found.to_string()))?;

        if let Some(parent_id) = user.parent_scope() {
            if queries::get_invoice_owner(&self.pool, invoice.id).await? != Some(parent_id) {
                return Err(AppError::Forbidden(
                    "You don't have permission to pay this invoice".to_string(),
                ));
            }
        }
        if invoice.is_paid {
            return Err(AppError::BadRequest(wording.already_paid.to_string()));
        }

        let merchant_invoice = invoice_merchant_invoice(invoice.id);
        let response = self
            .bkash
            .create_payment(invoice.amount, &merchant_invoice, customer_phone, callback_url)
            .await
            .log("initiating invoice payment")?;
        if !response.is_success() {
            return Err(initiation_failed(&response));
        }

        let payment = queries::insert_payment(
            &self.pool,
            &NewPayment {
                invoice_id: invoice.id,
                transaction_id: &merchant_invoice,
                amount: invoice.amount,
                method: PaymentMethod::Bkash,
                status: PaymentStatus::Initiated,
                payment_id: response.payment_id.as_deref(),
                payer_reference: Some(customer_phone),
                payment_create_time: Some(Utc::now()),
                payment_execute_time: None,
            },
        )
        .await?;

        tracing::info!(
            invoice_id = invoice.id,
            payment_id = payment.id,
            bkash_payment_id = ?response.payment_id,
            "Invoice payment initiated"
        );

        Ok(json!({
            "payment_id": payment.id,
            "bkash_payment_id": response.payment_id,
            "bkash_url": response.bkash_url,
            "callback_urls": response.callback_urls(),
        }))
    }

    /// One bKash checkout covering several unpaid invoices.
    pub async fn bulk_pay_invoices(
        &self,
        user: &CurrentUser,
        request: BulkPaymentRequest,
    ) -> AppResult<serde_json::Value> {
        let mut errors = FieldErrors::new();
        for (field, missing) in [
            ("callback_url", request.callback_url.as_deref().unwrap_or("").is_empty()),
            ("customer_phone", request.customer_phone.as_deref().unwrap_or("").is_empty()),
        ] {
            if missing {
                errors.insert(field.to_string(), vec!["This field is required.".to_string()]);
            }
        }
        let (callback_url, customer_phone) = match (request.callback_url, request.customer_phone) {
            (Some(c), Some(p)) if errors.is_empty() => (c, p),
            _ => return Err(AppError::Fields(errors)),
        };

        let mut invoice_ids = request.invoice_ids;
        invoice_ids.sort_unstable();
        invoice_ids.dedup();
        if invoice_ids.is_empty() {
            return Err(AppError::BadRequest("No invoice IDs provided".to_string()));
        }

        let invoices = queries::get_invoices_by_ids(&self.pool, &invoice_ids).await?;
        if invoices.len() != invoice_ids.len() {
            return Err(AppError::NotFound("One or more invoices not found".to_string()));
        }

        if let Some(parent_id) = user.parent_scope() {
            if !queries::invoices_not_owned_by(&self.pool, &invoice_ids, parent_id)
                .await?
                .is_empty()
            {
                return Err(AppError::Forbidden(
                    "You don't have permission to pay one or more of these invoices".to_string(),
                ));
            }
        }

        let paid_ids: Vec<i64> = invoices.iter().filter(|i| i.is_paid).map(|i| i.id).collect();
        if !paid_ids.is_empty() {
            return Err(AppError::detailed(
                StatusCode::BAD_REQUEST,
                json!({
                    "error": "One or more invoices are already paid",
                    "paid_invoice_ids": paid_ids,
                }),
            ));
        }

        let total: Decimal = invoices.iter().map(|i| i.amount).sum();
        let merchant_invoice = bulk_merchant_invoice(&invoice_ids);
        let temp_data = json!({
            "type": MULTI_INVOICE_PAYMENT,
            "invoice_ids": invoice_ids,
            "payment_date": Utc::now().to_rfc3339(),
        });

        // Dropping the transaction on any early return rolls back the parent invoice.
        let mut tx = self.pool.begin().await?;
        let parent = queries::insert_invoice(
            &mut *tx,
            &NewInvoice {
                enrollment_id: None,
                month: month_start(billing::today()),
                amount: total,
                is_paid: false,
                coupon_id: None,
                temp_invoice_data: Some(&temp_data),
            },
        )
        .await?;

        let response = self
            .bkash
            .create_payment(total, &merchant_invoice, &customer_phone, &callback_url)
            .await
            .log("initiating bulk payment")?;
        if !response.is_success() {
            return Err(initiation_failed(&response));
        }

        let payment = queries::insert_payment(
            &mut *tx,
            &NewPayment {
                invoice_id: parent.id,
                transaction_id: &merchant_invoice,
                amount: total,
                method: PaymentMethod::Bkash,
                status: PaymentStatus::Initiated,
                payment_id: response.payment_id.as_deref(),
                payer_reference: Some(&customer_phone),
                payment_create_time: Some(Utc::now()),
                payment_execute_time: None,
            },
        )
        .await?;
        tx.commit().await?;

        tracing::info!(
            parent_invoice_id = parent.id,
            payment_id = payment.id,
            invoice_count = invoice_ids.len(),
            "Bulk payment initiated"
        );

        Ok(json!({
            "payment_id": payment.id,
            "bkash_payment_id": response.payment_id,
            "bkash_url": response.bkash_url,
            "total_amount": total.to_string(),
            "invoice_count": invoice_ids.len(),
            "callback_urls": response.callback_urls(),
        }))
    }

    /// Find a payment by bKash id that the caller may act on.
    async fn payment_for(&self, user: &CurrentUser, request: BkashPaymentRef) -> AppResult<(String, Payment)> {
        let bkash_id = request
            .payment_id
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AppError::BadRequest("Payment ID is required.".to_string()))?;
        let not_found = || AppError::NotFound("Payment not found.".to_string());

        let payment = queries::get_payment_by_bkash_id(&self.pool, &bkash_id)
            .await?
            .ok_or_else(not_found)?;

        if let Some(parent_id) = user.parent_scope() {
            if !self.parent_owns_invoice(parent_id, payment.invoice_id).await? {
                return Err(not_found());
            }
        }
        Ok((bkash_id, payment))
    }

    async fn parent_owns_invoice(&self, parent_id: i64, invoice_id: i64) -> AppResult<bool> {
        let Some(invoice) = queries::get_invoice(&self.pool, invoice_id).await? else {
            return Ok(false);
        };

        if let Some(ids) = invoice.bulk_invoice_ids() {
            return Ok(queries::invoices_not_owned_by(&self.pool, &ids, parent_id)
                .await?
                .is_empty());
        }
        if let Some(data) = enrollment_data(&invoice) {
            let student = account::get_student(&self.pool, data.student).await?;
            return Ok(student.map(|s| s.parent_id) == Some(parent_id));
        }
        Ok(queries::get_invoice_owner(&self.pool, invoice.id).await? == Some(parent_id))
    }

    /// Execute a customer-approved bKash payment and settle it.
    pub async fn execute_bkash_payment(
        &self,
        user: &CurrentUser,
        request: BkashPaymentRef,
    ) -> AppResult<serde_json::Value> {
        let (bkash_id, payment) = self.payment_for(user, request).await?;

        if payment.status == PaymentStatus::Completed.as_str() {
            return Ok(json!({
                "status": "success",
                "transaction_id": payment.transaction_id,
                "payment_status": payment.status,
                "message": "Payment already completed.",
            }));
        }

        let response = self.bkash.execute_payment(&bkash_id).await.log("executing payment")?;
        if !response.is_completed() {
            queries::set_payment_status(&self.pool, payment.id, PaymentStatus::Failed).await?;
            tracing::warn!(
                payment_id = payment.id,
                status_code = response.status_code(),
                "bKash payment execution failed"
            );
            return Err(AppError::detailed(
                StatusCode::BAD_REQUEST,
                json!({
                    "status": "failed",
                    "message": response
                        .status_message
                        .as_deref()
                        .unwrap_or("Payment execution failed"),
                    "bkash_status_code": response.status_code,
                }),
            ));
        }

        let transaction_id = response
            .trx_id
            .clone()
            .unwrap_or_else(|| payment.transaction_id.clone());
        let completed = PaymentStatus::Completed.as_str();

        match self.settle(&payment, &transaction_id, Some(user.id())).await? {
            SettledPayment::Invoice => Ok(json!({
                "status": "success",
                "transaction_id": transaction_id,
                "payment_status": completed,
                "message": "Payment completed successfully.",
            })),
            SettledPayment::Bulk { processed } => Ok(json!({
                "status": "success",
                "transaction_id": transaction_id,
                "payment_status": completed,
                "message": format!(
                    "Bulk payment completed successfully. {} invoices marked as paid.",
                    processed.len()
                ),
                "processed_invoices": processed,
            })),
            SettledPayment::Enrollment(done) => Ok(json!({
                "status": "success",
                "transaction_id": transaction_id,
                "payment_status": completed,
                "message": "Payment completed and enrollment created successfully.",
                "enrollment": done.enrollment,
            })),
            SettledPayment::EnrollmentFailed(reason) => Err(AppError::detailed(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "status": "payment_succeeded_enrollment_failed",
                    "message": format!(
                        "Payment was successful but enrollment creation failed: {}",
                        reason
                    ),
                    "transaction_id": transaction_id,
                }),
            )),
        }
    }

    /// Ask bKash for a payment's status and record it locally.
    pub async fn query_bkash_payment(
        &self,
        user: &CurrentUser,
        request: BkashPaymentRef,
    ) -> AppResult<serde_json::Value> {
        let (bkash_id, payment) = self.payment_for(user, request).await?;

        let response = self.bkash.query_payment(&bkash_id).await.log("querying payment")?;
        if !response.is_success() {
            return Err(AppError::detailed(
                StatusCode::BAD_REQUEST,
                json!({
                    "error": "Failed to query payment status",
                    "bkash_status_code": response.status_code,
                    "bkash_status_message": response.status_message,
                }),
            ));
        }

        let transaction_status = response.transaction_status.clone().unwrap_or_default();
        let status = PaymentStatus::from_transaction_status(&transaction_status);
        match status {
            PaymentStatus::Completed if payment.status != status.as_str() => {
                let transaction_id = response
                    .trx_id
                    .clone()
                    .unwrap_or_else(|| payment.transaction_id.clone());
                if let SettledPayment::EnrollmentFailed(reason) =
                    self.settle(&payment, &transaction_id, Some(user.id())).await?
                {
                    tracing::error!(payment_id = payment.id, %reason, "Enrollment failed after query");
                }
            }
            PaymentStatus::Completed => {}
            other => queries::set_payment_status(&self.pool, payment.id, other).await?,
        }

        Ok(json!({
            "payment_id": payment.id,
            "bkash_payment_id": bkash_id,
            "transaction_status": transaction_status,
            "payment_status": status.as_str(),
        }))
    }

    /// Record a completed payment and apply it to whatever it paid for.
    ///
    /// `actor_id` is the user recorded in the activity log; without one the
    /// owning parent is used.
    pub async fn settle(
        &self,
        payment: &Payment,
        transaction_id: &str,
        actor_id: Option<i64>,
    ) -> AppResult<SettledPayment> {
        let invoice = queries::get_invoice(&self.pool, payment.invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Invoice {} not found", payment.invoice_id)))?;
        let now = Utc::now();

        if let Some(ids) = invoice.bulk_invoice_ids() {
            return self.settle_bulk(payment, &invoice, &ids, transaction_id, actor_id).await;
        }

        if invoice.enrollment_id.is_none() && invoice.temp_invoice {
            let Some(data) = enrollment_data(&invoice) else {
                return Err(AppError::Internal(format!(
                    "Temporary invoice {} has no enrollment data",
                    invoice.id
                )));
            };
            let mut tx = self.pool.begin().await?;
            queries::complete_payment(&mut *tx, payment.id, transaction_id, now).await?;
            queries::mark_invoice_paid(&mut *tx, invoice.id).await?;
            tx.commit().await?;

            let actor = match actor_id {
                Some(id) => id,
                None => account::get_student(&self.pool, data.student)
                    .await?
                    .map(|s| s.parent_id)
                    .ok_or_else(|| AppError::NotFound("No Student matches the given query.".to_string()))?,
            };
            let settlement = Settlement {
                payment_id: payment.id,
                temp_invoice_id: invoice.id,
                transaction_id: transaction_id.to_string(),
            };
            return match self.enrollments.materialize(&data, actor, Some(settlement)).await {
                Ok(done) => Ok(SettledPayment::Enrollment(done)),
                Err(e) => {
                    tracing::error!(payment_id = payment.id, error = %e, "Enrollment creation failed after payment");
                    Ok(SettledPayment::EnrollmentFailed(e.to_string()))
                }
            };
        }

        let actor = match actor_id {
            Some(id) => Some(id),
            None => queries::get_invoice_owner(&self.pool, invoice.id).await?,
        };

        let mut tx = self.pool.begin().await?;
        queries::complete_payment(&mut *tx, payment.id, transaction_id, now).await?;
        queries::mark_invoice_paid(&mut *tx, invoice.id).await?;
        if let Some(actor) = actor {
            common::insert_activity(
                &mut *tx,
                actor,
                ActionType::Payment,
                &json!({
                    "payment_id": payment.id,
                    "invoice_id": invoice.id,
                    "transaction_id": transaction_id,
                    "amount": payment.amount,
                }),
            )
            .await?;
        }
        tx.commit().await?;

        tracing::info!(payment_id = payment.id, invoice_id = invoice.id, "Payment settled");
        Ok(SettledPayment::Invoice)
    }

    async fn settle_bulk(
        &self,
        payment: &Payment,
        parent: &Invoice,
        invoice_ids: &[i64],
        transaction_id: &str,
        actor_id: Option<i64>,
    ) -> AppResult<SettledPayment> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut processed = Vec::with_capacity(invoice_ids.len());

        for &id in invoice_ids {
            let Some(invoice) = queries::get_invoice(&mut *tx, id).await? else {
                tracing::error!(invoice_id = id, payment_id = payment.id, "Invoice in bulk payment not found");
                continue;
            };
            queries::mark_invoice_paid(&mut *tx, invoice.id).await?;

            let derived_id = format!("{}-{}", transaction_id, invoice.id);
            queries::insert_payment(
                &mut *tx,
                &NewPayment {
                    invoice_id: invoice.id,
                    transaction_id: &derived_id,
                    amount: invoice.amount,
                    method: PaymentMethod::Bkash,
                    status: PaymentStatus::Completed,
                    payment_id: payment.payment_id.as_deref(),
                    payer_reference: payment.payer_reference.as_deref(),
                    payment_create_time: payment.payment_create_time,
                    payment_execute_time: Some(now),
                },
            )
            .await?;
            processed.push(invoice.id);
        }

        queries::delete_payment(&mut *tx, payment.id).await?;
        queries::delete_invoice(&mut *tx, parent.id).await?;

        let actor = match (actor_id, processed.first()) {
            (Some(id), _) => Some(id),
            (None, Some(&first)) => queries::get_invoice_owner(&self.pool, first).await?,
            (None, None) => None,
        };
        if let Some(actor) = actor {
            common::insert_activity(
                &mut *tx,
                actor,
                ActionType::Payment,
                &json!({
                    "transaction_id": transaction_id,
                    "bulk": true,
                    "invoice_ids": processed,
                    "amount": payment.amount,
                }),
            )
            .await?;
        }
        tx.commit().await?;

        tracing::info!(
            parent_invoice_id = parent.id,
            processed = processed.len(),
            "Bulk payment distributed"
        );
        Ok(SettledPayment::Bulk { processed })
    }

    /// Staff-created invoice, optionally recorded as already paid.
    pub async fn create_manual_invoice(
        &self,
        user: &CurrentUser,
        request: ManualInvoiceRequest,
    ) -> AppResult<serde_json::Value> {
        user.require_staff()?;

        let mut errors = FieldErrors::new();
        for (field, missing) in [
            ("enrollment", request.enrollment.is_none()),
            ("month", request.month.is_none()),
            ("amount", request.amount.is_none()),
        ] {
            if missing {
                errors.insert(field.to_string(), vec!["This field is required.".to_string()]);
            }
        }
        if request.amount.is_some_and(|a| a < Decimal::ZERO) {
            errors.insert(
                "amount".to_string(),
                vec!["Ensure this value is greater than or equal to 0.".to_string()],
            );
        }
        let (enrollment_id, month, amount) = match (request.enrollment, request.month, request.amount) {
            (Some(e), Some(m), Some(a)) if errors.is_empty() => (e, month_start(m), a),
            _ => return Err(AppError::Fields(errors)),
        };

        let enrolled = enrollment::get_enrollment(&self.pool, enrollment_id)
            .await?
            .ok_or_else(|| {
                AppError::field(
                    "enrollment",
                    format!("Invalid pk \"{}\" - object does not exist.", enrollment_id),
                )
            })?;
        if let Some(coupon_id) = request.coupon {
            if enrollment::get_coupon(&self.pool, coupon_id).await?.is_none() {
                return Err(AppError::field(
                    "coupon",
                    format!("Invalid pk \"{}\" - object does not exist.", coupon_id),
                ));
            }
        }
        if queries::invoice_exists_for_month(&self.pool, enrolled.id, month).await? {
            return Err(AppError::field(
                "month",
                "An invoice for this enrollment and month already exists.",
            ));
        }

        let mut tx = self.pool.begin().await?;
        let invoice = queries::insert_invoice(
            &mut *tx,
            &NewInvoice {
                enrollment_id: Some(enrolled.id),
                month,
                amount,
                is_paid: request.is_paid,
                coupon_id: request.coupon,
                temp_invoice_data: None,
            },
        )
        .await?;

        let payment = if request.is_paid {
            let now = Utc::now();
            let transaction_id = manual_transaction_id(billing::today());
            let payment = queries::insert_payment(
                &mut *tx,
                &NewPayment {
                    invoice_id: invoice.id,
                    transaction_id: &transaction_id,
                    amount,
                    method: PaymentMethod::Manual,
                    status: PaymentStatus::Completed,
                    payment_id: None,
                    payer_reference: None,
                    payment_create_time: Some(now),
                    payment_execute_time: Some(now),
                },
            )
            .await?;
            common::insert_activity(
                &mut *tx,
                user.id(),
                ActionType::Payment,
                &json!({
                    "payment_id": payment.id,
                    "invoice_id": invoice.id,
                    "transaction_id": transaction_id,
                    "amount": amount,
                    "method": PaymentMethod::Manual.as_str(),
                }),
            )
            .await?;
            Some(payment)
        } else {
            None
        };
        tx.commit().await?;

        tracing::info!(
            invoice_id = invoice.id,
            enrollment_id = enrolled.id,
            month = %month.format("%B %Y"),
            %amount,
            paid = request.is_paid,
            description = request.description.as_deref().unwrap_or("Manual invoice created by admin"),
            "Manual invoice created"
        );

        Ok(json!({
            "invoice": invoice,
            "payment": payment,
            "message": "Manual invoice created successfully",
        }))
    }

    /// Redirect target for a customer returning from the bKash checkout.
    pub async fn callback_redirect(&self, payment_id: Option<&str>, status: Option<&str>) -> AppResult<String> {
        let failure = self.config.callback_failure_url();

        let Some(payment_id) = payment_id.filter(|p| !p.is_empty()) else {
            tracing::error!("bKash callback received without payment ID");
            return Ok(failure);
        };
        let Some(payment) = queries::get_payment_by_bkash_id(&self.pool, payment_id).await? else {
            tracing::error!(payment_id, "bKash callback for unknown payment");
            return Ok(failure);
        };

        match status {
            Some("success") => Ok(format!(
                "{}?paymentID={}",
                self.config.callback_success_url(),
                payment_id
            )),
            Some("failure") => {
                queries::set_payment_status(&self.pool, payment.id, PaymentStatus::Failed).await?;
                tracing::info!(payment_id, "bKash payment failed");
                Ok(failure)
            }
            Some("cancel") => {
                queries::set_payment_status(&self.pool, payment.id, PaymentStatus::Cancelled).await?;
                tracing::info!(payment_id, "bKash payment cancelled");
                Ok(self.config.callback_cancel_url())
            }
            other => {
                tracing::error!(payment_id, status = ?other, "bKash callback with unknown status");
                Ok(failure)
            }
        }
    }

    /// Webhooks are refused outright until merchant credentials are set.
    pub fn verify_signature(&self, signature: Option<&str>, body: &[u8]) -> bool {
        if !self.bkash.is_configured() {
            tracing::error!("bKash credentials are not configured, rejecting webhook");
            return false;
        }
        signature.is_some_and(|s| signature_matches(self.bkash.app_secret(), s, body))
    }

    /// Handle a signed bKash webhook delivery.
    pub async fn handle_webhook(&self, signature: Option<&str>, body: &[u8]) -> AppResult<serde_json::Value> {
        if !self.verify_signature(signature, body) {
            tracing::error!("Invalid webhook signature");
            return Err(AppError::Forbidden("Invalid signature".to_string()));
        }

        let invalid_json = || AppError::BadRequest("Invalid JSON".to_string());
        let payload: serde_json::Value = serde_json::from_slice(body).map_err(|_| invalid_json())?;
        tracing::info!(notification_type = ?payload.get("Type"), "Received bKash webhook");

        match payload.get("Type").and_then(|t| t.as_str()) {
            Some("SubscriptionConfirmation") => {
                if let Some(url) = payload.get("SubscribeURL").and_then(|u| u.as_str()) {
                    tracing::info!(subscribe_url = url, "Webhook subscription URL");
                    return Ok(json!({ "status": "Subscription noted" }));
                }
            }
            Some("Notification") => {
                let message = payload.get("Message").and_then(|m| m.as_str()).unwrap_or("{}");
                let notification: BkashResponse =
                    serde_json::from_str(message).map_err(|_| invalid_json())?;

                return if self.process_notification(&notification).await {
                    Ok(json!({ "status": "Processed" }))
                } else {
                    Err(AppError::detailed(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        json!({ "error": "Failed to process payment" }),
                    ))
                };
            }
            _ => {}
        }

        Err(AppError::BadRequest("Unknown notification type".to_string()))
    }

    /// Apply a completed-payment notification; already completed payments
    /// are accepted without changes.
    async fn process_notification(&self, notification: &BkashResponse) -> bool {
        let (Some(payment_id), Some("Completed")) = (
            notification.payment_id.as_deref(),
            notification.transaction_status.as_deref(),
        ) else {
            tracing::error!(?notification, "Invalid webhook payload");
            return false;
        };

        let payment = match queries::get_payment_by_bkash_id(&self.pool, payment_id).await {
            Ok(Some(payment)) => payment,
            Ok(None) => {
                tracing::error!(payment_id, "Webhook payment not found");
                return false;
            }
            Err(e) => {
                tracing::error!(payment_id, error = %e, "Webhook payment lookup failed");
                return false;
            }
        };

        if payment.status == PaymentStatus::Completed.as_str() {
            tracing::info!(payment_id, "Payment already completed");
            return true;
        }

        let transaction_id = notification
            .trx_id
            .clone()
            .log_none("webhook notification without trxID")
            .unwrap_or_else(|| payment.transaction_id.clone());
        match self.settle(&payment, &transaction_id, None).await {
            Ok(_) => {
                tracing::info!(payment_id, "Processed webhook payment");
                true
            }
            Err(e) => {
                tracing::error!(payment_id, error = %e, "Webhook settlement failed");
                false
            }
        }
    }
}

fn initiation_failed(response: &BkashResponse) -> AppError {
    AppError::detailed(
        StatusCode::BAD_REQUEST,
        json!({
            "error": "bKash payment initiation failed",
            "status_code": response.status_code,
            "status_message": response.status_message,
        }),
    )
}

/// Enrollment to create from a temporary invoice, if it carries one.
fn enrollment_data(invoice: &Invoice) -> Option<EnrollmentData> {
    if !invoice.temp_invoice || invoice.bulk_invoice_ids().is_some() {
        return None;
    }
    serde_json::from_value(invoice.temp_invoice_data.clone()?).ok()
}

/// Base64 HMAC-SHA256 of `body` keyed by `secret`.
pub fn sign_body(secret: &str, body: &[u8]) -> AppResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(format!("Invalid HMAC key: {}", e)))?;
    mac.update(body);
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

fn signature_matches(secret: &str, signature: &str, body: &[u8]) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Ok(expected) = BASE64.decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    use crate::config::{BkashConfig, DatabaseConfig};
    use crate::db::pool::create_lazy_pool;
    use crate::db::test_support::{self as fixture, date};

    fn service(pool: DbPool, secret: Option<&str>) -> PaymentService {
        let config = match secret {
            Some(secret) => BkashConfig {
                app_key: "app-key".to_string(),
                app_secret: secret.to_string(),
                username: "merchant".to_string(),
                password: "merchant-pass".to_string(),
                ..Default::default()
            },
            None => BkashConfig::default(),
        };
        let bkash = BkashClient::new(config);
        PaymentService::new(
            pool.clone(),
            bkash.clone(),
            EnrollmentService::new(pool, bkash),
            Arc::new(AppConfig::default()),
        )
    }

    fn offline_pool() -> DbPool {
        create_lazy_pool(&DatabaseConfig {
            database_url: "postgres://nobody@127.0.0.1:1/none".to_string(),
            ..DatabaseConfig::default()
        })
        .unwrap()
    }

    /// Parent, student and a batch at the course fee.
    async fn family(pool: &DbPool, phone: &str) -> (CurrentUser, i64, i64) {
        let parent = fixture::user(pool, phone, false).await;
        let student = fixture::student(pool, parent.id(), "Rafi").await;
        let course = fixture::course(pool, dec!(1500)).await;
        let batch = fixture::batch(pool, course, "Morning", None).await;
        (parent, student, batch)
    }

    fn invoice(temp: bool, data: Option<serde_json::Value>) -> Invoice {
        Invoice {
            id: 5,
            enrollment_id: if temp { None } else { Some(2) },
            month: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            amount: dec!(2000.00),
            is_paid: false,
            coupon_id: None,
            temp_invoice: temp,
            temp_invoice_data: data,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_signature_round_trip_and_tamper() {
        let body = br#"{"Type":"Notification"}"#;
        let signature = sign_body("app-secret", body).unwrap();

        assert!(signature_matches("app-secret", &signature, body));
        assert!(!signature_matches("other-secret", &signature, body));
        assert!(!signature_matches("app-secret", &signature, br#"{"Type":"Other"}"#));
        assert!(!signature_matches("app-secret", "not base64!", body));
    }

    #[test]
    fn test_enrollment_data_only_from_enrollment_temp_invoices() {
        let data = json!({"student": 1, "batch": 2, "start_month": "2025-06-01"});
        let parsed = enrollment_data(&invoice(true, Some(data.clone()))).unwrap();
        assert_eq!(parsed.student, 1);
        assert_eq!(parsed.batch, 2);

        assert!(enrollment_data(&invoice(false, Some(data))).is_none());
        let bulk = json!({"type": "multi_invoice_payment", "invoice_ids": [1, 2]});
        assert!(enrollment_data(&invoice(true, Some(bulk))).is_none());
        assert!(enrollment_data(&invoice(true, None)).is_none());
    }

    #[test]
    fn test_initiation_failure_body() {
        let response = BkashResponse {
            status_code: Some("2056".to_string()),
            status_message: Some("Invalid Payment State".to_string()),
            ..Default::default()
        };
        match initiation_failed(&response) {
            AppError::Detailed { status, body } => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert_eq!(body["status_code"], "2056");
                assert_eq!(body["error"], "bKash payment initiation failed");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_webhook_signature_requires_credentials() {
        let body = br#"{"Type":"Notification","Message":"{}"}"#;
        // An empty key still yields a well-formed MAC
        let forged = sign_body("", body).unwrap();

        let unconfigured = service(offline_pool(), None);
        assert!(!unconfigured.verify_signature(Some(&forged), body));
        assert!(matches!(
            unconfigured.handle_webhook(Some(&forged), body).await,
            Err(AppError::Forbidden(_))
        ));

        let configured = service(offline_pool(), Some("app-secret"));
        let signed = sign_body("app-secret", body).unwrap();
        assert!(configured.verify_signature(Some(&signed), body));
        assert!(!configured.verify_signature(Some(&forged), body));
        assert!(!configured.verify_signature(None, body));
    }

    #[tokio::test]
    async fn test_settle_single_invoice() {
        let Some(pool) = fixture::test_pool().await else { return };
        let (parent, student, batch) = family(&pool, "01711111111").await;
        let enrollment = fixture::enrollment(&pool, student, batch, date(2025, 5, 1), None).await;
        let invoice = fixture::invoice(&pool, Some(enrollment), date(2025, 6, 1), dec!(1500), None).await;
        let payment = fixture::bkash_payment(
            &pool, invoice.id, "INV-1-ABC123", dec!(1500), PaymentStatus::Initiated, "BK-1",
        )
        .await;

        let settled = service(pool.clone(), Some("app-secret"))
            .settle(&payment, "TRX100", None)
            .await
            .unwrap();
        assert!(matches!(settled, SettledPayment::Invoice));

        assert!(queries::get_invoice(&pool, invoice.id).await.unwrap().unwrap().is_paid);
        let paid = queries::get_payment_by_bkash_id(&pool, "BK-1").await.unwrap().unwrap();
        assert_eq!(paid.status, "Completed");
        assert_eq!(paid.transaction_id, "TRX100");
        assert!(paid.payment_execute_time.is_some());

        let logged = fixture::count(
            &pool,
            &format!(
                "SELECT COUNT(*) FROM activity_logs WHERE action_type = 'PAYMENT' AND user_id = {}",
                parent.id()
            ),
        )
        .await;
        assert_eq!(logged, 1);
    }

    #[tokio::test]
    async fn test_settle_bulk_splits_payment_per_invoice() {
        let Some(pool) = fixture::test_pool().await else { return };
        let (_parent, student, batch) = family(&pool, "01711111112").await;
        let enrollment = fixture::enrollment(&pool, student, batch, date(2025, 5, 1), None).await;
        let june = fixture::invoice(&pool, Some(enrollment), date(2025, 6, 1), dec!(1500), None).await;
        let july = fixture::invoice(&pool, Some(enrollment), date(2025, 7, 1), dec!(1500), None).await;
        let data = json!({"type": MULTI_INVOICE_PAYMENT, "invoice_ids": [june.id, july.id]});
        let combined = fixture::invoice(&pool, None, date(2025, 7, 1), dec!(3000), Some(&data)).await;
        let payment = fixture::bkash_payment(
            &pool, combined.id, "MULTI-TEST", dec!(3000), PaymentStatus::Initiated, "BK-2",
        )
        .await;

        let settled = service(pool.clone(), Some("app-secret"))
            .settle(&payment, "TRX200", None)
            .await
            .unwrap();
        match settled {
            SettledPayment::Bulk { processed } => assert_eq!(processed, vec![june.id, july.id]),
            other => panic!("unexpected: {other:?}"),
        }

        for invoice in [&june, &july] {
            assert!(queries::get_invoice(&pool, invoice.id).await.unwrap().unwrap().is_paid);
            let derived = fixture::count(
                &pool,
                &format!(
                    "SELECT COUNT(*) FROM payments WHERE transaction_id = 'TRX200-{}' \
                     AND status = 'Completed' AND amount = 1500 AND invoice_id = {}",
                    invoice.id, invoice.id
                ),
            )
            .await;
            assert_eq!(derived, 1);
        }
        assert!(queries::get_invoice(&pool, combined.id).await.unwrap().is_none());
        let leftover = fixture::count(
            &pool,
            &format!("SELECT COUNT(*) FROM payments WHERE id = {}", payment.id),
        )
        .await;
        assert_eq!(leftover, 0);
    }

    #[tokio::test]
    async fn test_webhook_settles_once() {
        let Some(pool) = fixture::test_pool().await else { return };
        let (_parent, student, batch) = family(&pool, "01711111113").await;
        let enrollment = fixture::enrollment(&pool, student, batch, date(2025, 5, 1), None).await;
        let done = fixture::invoice(&pool, Some(enrollment), date(2025, 6, 1), dec!(1500), None).await;
        let open = fixture::invoice(&pool, Some(enrollment), date(2025, 7, 1), dec!(1500), None).await;
        fixture::bkash_payment(&pool, done.id, "TRX300", dec!(1500), PaymentStatus::Completed, "BK-3").await;
        fixture::bkash_payment(&pool, open.id, "INV-2-XYZ789", dec!(1500), PaymentStatus::Initiated, "BK-4")
            .await;
        let service = service(pool.clone(), Some("app-secret"));

        let deliver = |payment_id: &str, trx: &str| {
            let message = json!({"paymentID": payment_id, "transactionStatus": "Completed", "trxID": trx});
            json!({"Type": "Notification", "Message": message.to_string()}).to_string()
        };

        // Already completed: accepted, nothing changes
        let body = deliver("BK-3", "TRX-LATE");
        let signature = sign_body("app-secret", body.as_bytes()).unwrap();
        let reply = service.handle_webhook(Some(&signature), body.as_bytes()).await.unwrap();
        assert_eq!(reply, json!({"status": "Processed"}));
        let unchanged = queries::get_payment_by_bkash_id(&pool, "BK-3").await.unwrap().unwrap();
        assert_eq!(unchanged.transaction_id, "TRX300");
        assert!(!queries::get_invoice(&pool, done.id).await.unwrap().unwrap().is_paid);

        let body = deliver("BK-4", "TRX400");
        let signature = sign_body("app-secret", body.as_bytes()).unwrap();
        let reply = service.handle_webhook(Some(&signature), body.as_bytes()).await.unwrap();
        assert_eq!(reply, json!({"status": "Processed"}));
        let settled = queries::get_payment_by_bkash_id(&pool, "BK-4").await.unwrap().unwrap();
        assert_eq!(settled.status, "Completed");
        assert_eq!(settled.transaction_id, "TRX400");
        assert!(queries::get_invoice(&pool, open.id).await.unwrap().unwrap().is_paid);

        // Redelivery of the same notification
        let reply = service.handle_webhook(Some(&signature), body.as_bytes()).await.unwrap();
        assert_eq!(reply, json!({"status": "Processed"}));
        let payments = fixture::count(&pool, "SELECT COUNT(*) FROM payments").await;
        assert_eq!(payments, 2);
    }

    #[tokio::test]
    async fn test_settle_creates_paid_enrollment() {
        let Some(pool) = fixture::test_pool().await else { return };
        let parent = fixture::user(&pool, "01711111114", false).await;
        let student = fixture::student(&pool, parent.id(), "Nila").await;
        let course = fixture::course(&pool, dec!(1500)).await;
        let batch = fixture::batch(&pool, course, "Evening", Some(dec!(1200))).await;
        let data = json!({"student": student, "batch": batch, "start_month": "2025-07-01"});
        let temp = fixture::invoice(&pool, None, date(2025, 7, 1), dec!(1700), Some(&data)).await;
        let payment =
            fixture::bkash_payment(&pool, temp.id, "ENR-TEST", dec!(1700), PaymentStatus::Initiated, "BK-5")
                .await;

        let settled = service(pool.clone(), Some("app-secret"))
            .settle(&payment, "TRX500", None)
            .await
            .unwrap();
        let SettledPayment::Enrollment(done) = settled else {
            panic!("enrollment was not created");
        };
        assert_eq!(done.enrollment.student_id, student);
        assert_eq!(done.enrollment.tuition_fee, Some(dec!(1200)));

        let first = queries::get_invoice(&pool, done.first_month_invoice_id).await.unwrap().unwrap();
        assert!(first.is_paid);
        assert_eq!(first.month, date(2025, 7, 1));
        assert_eq!(first.amount, dec!(1200));
        let next = queries::get_invoice(&pool, done.next_month_invoice_id).await.unwrap().unwrap();
        assert!(!next.is_paid);
        assert_eq!(next.month, date(2025, 8, 1));

        let moved = queries::get_payment_by_bkash_id(&pool, "BK-5").await.unwrap().unwrap();
        assert_eq!(moved.invoice_id, first.id);
        assert_eq!(moved.status, "Completed");
        assert!(queries::get_invoice(&pool, temp.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_enrollment_leaves_payment_recorded() {
        let Some(pool) = fixture::test_pool().await else { return };
        let (_parent, student, batch) = family(&pool, "01711111115").await;
        fixture::enrollment(&pool, student, batch, date(2025, 5, 1), None).await;
        let data = json!({"student": student, "batch": batch, "start_month": "2025-07-01"});
        let temp = fixture::invoice(&pool, None, date(2025, 7, 1), dec!(2000), Some(&data)).await;
        let payment =
            fixture::bkash_payment(&pool, temp.id, "ENR-DUP", dec!(2000), PaymentStatus::Initiated, "BK-6")
                .await;

        let settled = service(pool.clone(), Some("app-secret"))
            .settle(&payment, "TRX600", None)
            .await
            .unwrap();
        match settled {
            SettledPayment::EnrollmentFailed(reason) => assert!(reason.contains("already enrolled")),
            other => panic!("unexpected: {other:?}"),
        }

        let kept = queries::get_invoice(&pool, temp.id).await.unwrap().unwrap();
        assert!(kept.is_paid);
        let recorded = queries::get_payment_by_bkash_id(&pool, "BK-6").await.unwrap().unwrap();
        assert_eq!(recorded.status, "Completed");
        assert_eq!(recorded.transaction_id, "TRX600");
        assert_eq!(recorded.invoice_id, temp.id);
    }
}
