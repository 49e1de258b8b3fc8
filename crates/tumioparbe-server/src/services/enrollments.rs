//! Enrollment lifecycle: fee quotes, free and paid enrollment, and the
//! transactional creation of an enrollment with its first invoices.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::json;

use crate::auth::CurrentUser;
use crate::billing::{
    self, batch_monthly_fee, enrollment_merchant_invoice, locked_tuition_fee, month_start,
    next_month, quote_fees, FeeQuote, DISCOUNT_FIRST_MONTH,
};
use crate::clients::BkashClient;
use crate::db::models::{
    ActionType, Batch, CompleteEnrollmentRequest, CompleteWithPaymentRequest,
    CompletedEnrollment, Coupon, Course, Enrollment, EnrollmentData, EnrollmentInput,
    EnrollmentPaymentRequest, EnrollmentQuote, EnrollmentQuoteRequest, EnrollmentView, NewPayment,
    PaymentMethod, PaymentStatus, Student,
};
use crate::db::queries::payment::{self as payments, NewInvoice};
use crate::db::queries::{account, common, course, enrollment as queries};
use crate::db::DbPool;
use crate::error::{AppError, AppResult, FieldErrors};
use crate::result_ext::ResultExt;

const ALREADY_ENROLLED: &str = "This student is already enrolled in this batch";

/// A bKash payment that paid for an enrollment through a temporary invoice.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub payment_id: i64,
    pub temp_invoice_id: i64,
    pub transaction_id: String,
}

/// Everything resolved for a prospective enrollment.
#[derive(Debug, Clone)]
struct Prepared {
    student: Student,
    batch: Batch,
    course: Course,
    coupon: Option<Coupon>,
    monthly_fee: Decimal,
    quote: FeeQuote,
}

impl Prepared {
    fn enrollment_data(&self, start_month: NaiveDate) -> EnrollmentData {
        EnrollmentData {
            student: self.student.id,
            batch: self.batch.id,
            start_month,
            tuition_fee: Some(locked_tuition_fee(self.quote.tuition_fee, self.monthly_fee)),
            coupon_code: self.coupon.as_ref().map(|c| c.code.clone()),
        }
    }
}

/// Service for enrollment operations.
#[derive(Clone)]
pub struct EnrollmentService {
    pool: DbPool,
    bkash: BkashClient,
}

impl EnrollmentService {
    pub fn new(pool: DbPool, bkash: BkashClient) -> Self {
        Self { pool, bkash }
    }

    async fn view(&self, enrollment: Enrollment) -> AppResult<EnrollmentView> {
        let student = account::get_student(&self.pool, enrollment.student_id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("Student {} missing", enrollment.student_id)))?;
        let batch = course::get_batch_view(&self.pool, enrollment.batch_id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("Batch {} missing", enrollment.batch_id)))?;

        Ok(EnrollmentView {
            enrollment,
            student_details: student,
            batch_details: batch,
        })
    }

    pub async fn list(&self, user: &CurrentUser) -> AppResult<Vec<EnrollmentView>> {
        let enrollments = queries::list_enrollments(&self.pool, user.parent_scope()).await?;
        let mut views = Vec::with_capacity(enrollments.len());
        for enrollment in enrollments {
            views.push(self.view(enrollment).await?);
        }
        Ok(views)
    }

    async fn owned(&self, user: &CurrentUser, id: i64) -> AppResult<Enrollment> {
        let not_found = || AppError::NotFound("No Enrollment matches the given query.".to_string());
        let enrollment = queries::get_enrollment(&self.pool, id)
            .await?
            .ok_or_else(not_found)?;

        if let Some(parent_id) = user.parent_scope() {
            let student = account::get_student(&self.pool, enrollment.student_id).await?;
            if student.map(|s| s.parent_id) != Some(parent_id) {
                return Err(not_found());
            }
        }
        Ok(enrollment)
    }

    pub async fn get(&self, user: &CurrentUser, id: i64) -> AppResult<EnrollmentView> {
        let enrollment = self.owned(user, id).await?;
        self.view(enrollment).await
    }

    /// Create an enrollment directly, without invoices.
    ///
    /// Without an explicit fee the enrollment is billed at the batch fee.
    pub async fn create(&self, user: &CurrentUser, input: EnrollmentInput) -> AppResult<EnrollmentView> {
        check_staff_only_fields(user, &input)?;

        let mut errors = FieldErrors::new();
        for (field, value) in [("student", input.student), ("batch", input.batch)] {
            if value.is_none() {
                errors.insert(field.to_string(), vec!["This field is required.".to_string()]);
            }
        }
        match input.start_month {
            None => {
                errors.insert("start_month".to_string(), vec!["This field is required.".to_string()]);
            }
            Some(month) => check_start_month(&mut errors, month, billing::today()),
        }
        if let Some(fee) = input.tuition_fee {
            if fee < Decimal::ZERO {
                errors.insert(
                    "tuition_fee".to_string(),
                    vec!["Ensure this value is greater than or equal to 0.".to_string()],
                );
            }
        }
        if !errors.is_empty() {
            return Err(AppError::Fields(errors));
        }

        let (student_id, batch_id, start_month) = match (input.student, input.batch, input.start_month) {
            (Some(s), Some(b), Some(m)) => (s, b, month_start(m)),
            _ => return Err(AppError::Validation("Missing enrollment fields".to_string())),
        };

        let student = self.student_for(user, student_id).await?;
        let batch = self.batch(batch_id).await?;
        if queries::active_enrollment_exists(&self.pool, student.id, batch.id).await? {
            return Err(AppError::field("non_field_errors", ALREADY_ENROLLED));
        }

        let enrollment =
            queries::insert_enrollment(&self.pool, student.id, batch.id, start_month, input.tuition_fee)
                .await?;
        if input.is_active == Some(false) {
            queries::update_enrollment(&self.pool, enrollment.id, None, None, Some(false)).await?;
        }

        common::insert_activity(
            &self.pool,
            user.id(),
            ActionType::Enrollment,
            &json!({
                "enrollment_id": enrollment.id,
                "student_id": student.id,
                "batch_id": batch.id,
                "action": "created",
            }),
        )
        .await?;

        tracing::info!(
            enrollment_id = enrollment.id,
            student_id = student.id,
            batch_id = batch.id,
            "Enrollment created"
        );
        let enrollment = self.owned(user, enrollment.id).await?;
        self.view(enrollment).await
    }

    pub async fn update(
        &self,
        user: &CurrentUser,
        id: i64,
        input: EnrollmentInput,
    ) -> AppResult<EnrollmentView> {
        let existing = self.owned(user, id).await?;
        check_staff_only_fields(user, &input)?;

        let mut errors = FieldErrors::new();
        if let Some(month) = input.start_month {
            check_start_month(&mut errors, month, billing::today());
        }
        if input.student.is_some_and(|s| s != existing.student_id)
            || input.batch.is_some_and(|b| b != existing.batch_id)
        {
            errors.insert(
                "non_field_errors".to_string(),
                vec!["Student and batch cannot be changed; use a batch transfer instead.".to_string()],
            );
        }
        if !errors.is_empty() {
            return Err(AppError::Fields(errors));
        }

        let enrollment = queries::update_enrollment(
            &self.pool,
            id,
            input.start_month.map(month_start),
            input.tuition_fee,
            input.is_active,
        )
        .await?;

        tracing::info!(enrollment_id = id, "Enrollment updated");
        self.view(enrollment).await
    }

    pub async fn delete(&self, user: &CurrentUser, id: i64) -> AppResult<()> {
        let enrollment = self.owned(user, id).await?;
        queries::delete_enrollment(&self.pool, enrollment.id).await?;
        tracing::info!(enrollment_id = id, "Enrollment deleted");
        Ok(())
    }

    async fn student_for(&self, user: &CurrentUser, id: i64) -> AppResult<Student> {
        let student = account::get_student(&self.pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound("No Student matches the given query.".to_string()))?;

        if !user.is_staff() && student.parent_id != user.id() {
            return Err(AppError::Forbidden(
                "You don't have permission to enroll this student".to_string(),
            ));
        }
        Ok(student)
    }

    async fn batch(&self, id: i64) -> AppResult<Batch> {
        course::get_batch(&self.pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound("No Batch matches the given query.".to_string()))
    }

    /// Resolve the student, batch and coupon and price the enrollment.
    async fn prepare(
        &self,
        user: &CurrentUser,
        student_id: i64,
        batch_id: i64,
        coupon_code: Option<&str>,
    ) -> AppResult<Prepared> {
        let student = self.student_for(user, student_id).await?;
        let batch = self.batch(batch_id).await?;
        let course = course::get_course(&self.pool, batch.course_id)
            .await?
            .ok_or_else(|| AppError::NotFound("No Course matches the given query.".to_string()))?;

        if queries::active_enrollment_exists(&self.pool, student.id, batch.id).await? {
            return Err(AppError::BadRequest(ALREADY_ENROLLED.to_string()));
        }

        let coupon = match coupon_code.map(str::trim).filter(|c| !c.is_empty()) {
            None => None,
            Some(code) => Some(self.usable_coupon(code).await?),
        };

        let monthly_fee = batch_monthly_fee(batch.tuition_fee, course.monthly_fee);
        let quote = quote_fees(course.admission_fee, monthly_fee, coupon.as_ref());

        Ok(Prepared {
            student,
            batch,
            course,
            coupon,
            monthly_fee,
            quote,
        })
    }

    async fn usable_coupon(&self, code: &str) -> AppResult<Coupon> {
        let coupon = queries::get_coupon_by_code(&self.pool, code)
            .await?
            .filter(|c| c.is_active)
            .ok_or_else(|| AppError::BadRequest("Invalid coupon code".to_string()))?;

        if coupon.is_expired_at(Utc::now()) {
            return Err(AppError::BadRequest("This coupon has expired".to_string()));
        }
        Ok(coupon)
    }

    /// Price a prospective enrollment.
    pub async fn initiate(
        &self,
        user: &CurrentUser,
        request: EnrollmentQuoteRequest,
    ) -> AppResult<EnrollmentQuote> {
        let mut errors = FieldErrors::new();
        for (field, missing) in [
            ("student", request.student.is_none()),
            ("batch", request.batch.is_none()),
            ("start_month", request.start_month.is_none()),
        ] {
            if missing {
                errors.insert(field.to_string(), vec!["This field is required.".to_string()]);
            }
        }
        let (student_id, batch_id, start_month) =
            match (request.student, request.batch, request.start_month) {
                (Some(s), Some(b), Some(m)) if errors.is_empty() => (s, b, month_start(m)),
                _ => return Err(AppError::Fields(errors)),
            };

        let prepared = self
            .prepare(user, student_id, batch_id, request.coupon_code.as_deref())
            .await?;
        let quote = &prepared.quote;

        Ok(EnrollmentQuote {
            student_id: prepared.student.id,
            student_name: prepared.student.name.clone(),
            batch_id: prepared.batch.id,
            batch_name: prepared.batch.name.clone(),
            course_name: prepared.course.name.clone(),
            start_month,
            admission_fee: quote.admission_fee,
            tuition_fee: quote.tuition_fee,
            total_amount: quote.total_amount,
            coupon_applied: prepared.coupon.is_some(),
            payment_required: quote.total_amount > Decimal::ZERO,
            enrollment_data: prepared.enrollment_data(start_month),
        })
    }

    /// Enroll without payment. Parents may only do this when nothing is due.
    pub async fn complete(
        &self,
        user: &CurrentUser,
        request: CompleteEnrollmentRequest,
    ) -> AppResult<EnrollmentView> {
        let data = request
            .enrollment_data
            .ok_or_else(|| AppError::BadRequest("Enrollment data is required".to_string()))?;

        let mut errors = FieldErrors::new();
        check_start_month(&mut errors, data.start_month, billing::today());
        if !errors.is_empty() {
            return Err(AppError::Fields(errors));
        }

        let prepared = self
            .prepare(user, data.student, data.batch, data.coupon_code.as_deref())
            .await?;
        if !user.is_staff() && prepared.quote.total_amount > Decimal::ZERO {
            return Err(AppError::BadRequest(
                "Payment is required to complete this enrollment".to_string(),
            ));
        }

        let data = prepared.enrollment_data(month_start(data.start_month));
        let completed = self.materialize(&data, user.id(), None).await?;
        self.view(completed.enrollment).await
    }

    /// Start a bKash checkout for an enrollment's first payment.
    pub async fn initiate_payment(
        &self,
        user: &CurrentUser,
        request: EnrollmentPaymentRequest,
    ) -> AppResult<serde_json::Value> {
        let (data, callback_url, customer_phone) = match (
            request.enrollment_data,
            request.callback_url.filter(|s| !s.is_empty()),
            request.customer_phone.filter(|s| !s.is_empty()),
        ) {
            (Some(d), Some(c), Some(p)) => (d, c, p),
            _ => {
                return Err(AppError::BadRequest(
                    "enrollment_data, callback_url, and customer_phone are required".to_string(),
                ))
            }
        };

        let mut errors = FieldErrors::new();
        check_start_month(&mut errors, data.start_month, billing::today());
        if !errors.is_empty() {
            return Err(AppError::Fields(errors));
        }

        let prepared = self
            .prepare(user, data.student, data.batch, data.coupon_code.as_deref())
            .await?;
        let total = prepared.quote.total_amount;
        let start_month = month_start(data.start_month);

        if total <= Decimal::ZERO {
            return Ok(json!({
                "message": "No payment required. You can complete the enrollment directly.",
                "total_amount": 0,
                "payment_required": false,
                "enrollment_data": data,
            }));
        }

        let stored = prepared.enrollment_data(start_month);
        let stored_json = serde_json::to_value(&stored)?;
        let temp_invoice = payments::insert_invoice(
            &self.pool,
            &NewInvoice {
                enrollment_id: None,
                month: start_month,
                amount: total,
                is_paid: false,
                coupon_id: prepared.coupon.as_ref().map(|c| c.id),
                temp_invoice_data: Some(&stored_json),
            },
        )
        .await?;

        let merchant_invoice = enrollment_merchant_invoice(prepared.student.id, prepared.batch.id);
        let response = match self
            .bkash
            .create_payment(total, &merchant_invoice, &customer_phone, &callback_url)
            .await
        {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                payments::delete_invoice(&self.pool, temp_invoice.id).await?;
                return Err(AppError::detailed(
                    axum::http::StatusCode::BAD_REQUEST,
                    json!({
                        "error": "bKash payment initiation failed",
                        "status_code": response.status_code,
                        "status_message": response.status_message,
                    }),
                ));
            }
            Err(e) => {
                payments::delete_invoice(&self.pool, temp_invoice.id).await?;
                return Err(e).log("initiating enrollment payment");
            }
        };

        let payment = payments::insert_payment(
            &self.pool,
            &NewPayment {
                invoice_id: temp_invoice.id,
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

        tracing::info!(
            payment_id = payment.id,
            temp_invoice_id = temp_invoice.id,
            bkash_payment_id = ?response.payment_id,
            "Enrollment payment initiated"
        );

        Ok(json!({
            "payment_id": payment.id,
            "temp_invoice_id": temp_invoice.id,
            "bkash_payment_id": response.payment_id,
            "bkash_url": response.bkash_url,
            "total_amount": total.to_string(),
            "callback_urls": response.callback_urls(),
            "enrollment_data": stored,
        }))
    }

    /// Execute the customer-approved bKash payment and create the enrollment.
    pub async fn complete_with_payment(
        &self,
        user: &CurrentUser,
        request: CompleteWithPaymentRequest,
    ) -> AppResult<serde_json::Value> {
        let (data, bkash_payment_id, temp_invoice_id) = match (
            request.enrollment_data,
            request.bkash_payment_id.filter(|s| !s.is_empty()),
            request.temp_invoice_id,
        ) {
            (Some(d), Some(p), Some(t)) => (d, p, t),
            _ => {
                return Err(AppError::BadRequest(
                    "enrollment_data, bkash_payment_id, and temp_invoice_id are required"
                        .to_string(),
                ))
            }
        };

        let invalid = || AppError::BadRequest("Invalid payment or temp invoice ID".to_string());
        let payment = payments::get_payment_by_bkash_id(&self.pool, &bkash_payment_id)
            .await?
            .ok_or_else(invalid)?;
        let temp_invoice = payments::get_invoice(&self.pool, temp_invoice_id)
            .await?
            .filter(|i| i.temp_invoice && payment.invoice_id == i.id)
            .ok_or_else(invalid)?;

        // Prefer what was priced at checkout over the echoed copy.
        let data = temp_invoice
            .temp_invoice_data
            .clone()
            .and_then(|stored| serde_json::from_value::<EnrollmentData>(stored).ok())
            .unwrap_or(data);
        self.student_for(user, data.student).await?;

        let response = self.bkash.execute_payment(&bkash_payment_id).await?;
        if !response.is_completed() {
            return Err(AppError::detailed(
                axum::http::StatusCode::BAD_REQUEST,
                json!({
                    "error": "Payment execution failed",
                    "status_code": response.status_code,
                    "status_message": response.status_message,
                }),
            ));
        }

        let transaction_id = response
            .trx_id
            .clone()
            .unwrap_or_else(|| payment.transaction_id.clone());
        payments::complete_payment(&self.pool, payment.id, &transaction_id, Utc::now()).await?;

        let completed = self
            .materialize(
                &data,
                user.id(),
                Some(Settlement {
                    payment_id: payment.id,
                    temp_invoice_id: temp_invoice.id,
                    transaction_id: transaction_id.clone(),
                }),
            )
            .await?;

        let view = self.view(completed.enrollment).await?;
        Ok(json!({
            "enrollment": view,
            "payment_status": PaymentStatus::Completed.as_str(),
            "transaction_id": transaction_id,
            "payment_method": PaymentMethod::Bkash.as_str(),
            "first_month_invoice_id": completed.first_month_invoice_id,
            "next_month_invoice_id": completed.next_month_invoice_id,
        }))
    }

    /// Create the enrollment with a paid first-month invoice and an unpaid
    /// next-month invoice, in one transaction.
    ///
    /// With a settlement the payment is moved onto the first-month invoice
    /// and the temporary invoice is removed.
    pub async fn materialize(
        &self,
        data: &EnrollmentData,
        actor_id: i64,
        settlement: Option<Settlement>,
    ) -> AppResult<CompletedEnrollment> {
        let batch = self.batch(data.batch).await?;
        let tuition_fee = match data.tuition_fee {
            Some(fee) => fee,
            None => {
                let course = course::get_course(&self.pool, batch.course_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound("No Course matches the given query.".to_string()))?;
                batch_monthly_fee(batch.tuition_fee, course.monthly_fee)
            }
        };
        let first_month = month_start(data.start_month);

        let mut tx = self.pool.begin().await?;

        if queries::active_enrollment_exists(&mut *tx, data.student, batch.id).await? {
            return Err(AppError::BadRequest(ALREADY_ENROLLED.to_string()));
        }

        let coupon = match data.coupon_code.as_deref().filter(|c| !c.is_empty()) {
            Some(code) => queries::get_coupon_by_code(&mut *tx, code).await?,
            None => None,
        };
        let first_month_waived = coupon.as_ref().is_some_and(|c| c.has_type(DISCOUNT_FIRST_MONTH));

        let enrollment = queries::insert_enrollment(
            &mut *tx,
            data.student,
            batch.id,
            first_month,
            Some(tuition_fee),
        )
        .await?;

        let first = payments::insert_invoice(
            &mut *tx,
            &NewInvoice {
                enrollment_id: Some(enrollment.id),
                month: first_month,
                amount: if first_month_waived { Decimal::ZERO } else { tuition_fee },
                is_paid: true,
                coupon_id: coupon.as_ref().map(|c| c.id),
                temp_invoice_data: None,
            },
        )
        .await?;

        let next = payments::insert_invoice(
            &mut *tx,
            &NewInvoice {
                enrollment_id: Some(enrollment.id),
                month: next_month(first_month),
                amount: tuition_fee,
                is_paid: false,
                coupon_id: None,
                temp_invoice_data: None,
            },
        )
        .await?;

        common::insert_activity(
            &mut *tx,
            actor_id,
            ActionType::Enrollment,
            &json!({
                "enrollment_id": enrollment.id,
                "student_id": data.student,
                "batch_id": batch.id,
                "start_month": first_month,
                "coupon_code": data.coupon_code,
            }),
        )
        .await?;

        if let Some(settlement) = &settlement {
            payments::reassign_payment(&mut *tx, settlement.payment_id, first.id).await?;
            payments::delete_invoice(&mut *tx, settlement.temp_invoice_id).await?;
            common::insert_activity(
                &mut *tx,
                actor_id,
                ActionType::Payment,
                &json!({
                    "payment_id": settlement.payment_id,
                    "transaction_id": settlement.transaction_id,
                    "invoice_id": first.id,
                    "enrollment_id": enrollment.id,
                }),
            )
            .await?;
        }

        tx.commit().await?;

        tracing::info!(
            enrollment_id = enrollment.id,
            first_month_invoice_id = first.id,
            next_month_invoice_id = next.id,
            paid = settlement.is_some(),
            "Enrollment completed"
        );

        Ok(CompletedEnrollment {
            enrollment,
            first_month_invoice_id: first.id,
            next_month_invoice_id: next.id,
        })
    }
}

/// Fee and status overrides are staff-only; parents always get the
/// derived batch fee.
fn check_staff_only_fields(user: &CurrentUser, input: &EnrollmentInput) -> AppResult<()> {
    if input.tuition_fee.is_some() || input.is_active.is_some() {
        user.require_staff()?;
    }
    Ok(())
}

/// Reject start months before the current one.
fn check_start_month(errors: &mut FieldErrors, start_month: NaiveDate, today: NaiveDate) {
    if start_month < month_start(today) {
        errors.insert(
            "start_month".to_string(),
            vec!["Start month cannot be in the past".to_string()],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::User;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn caller(is_staff: bool) -> CurrentUser {
        let now = Utc::now();
        CurrentUser(User {
            id: 3,
            phone: "01712345678".to_string(),
            name: "Rahim".to_string(),
            address: "Mirpur, Dhaka".to_string(),
            facebook_profile: "https://facebook.com/rahim".to_string(),
            email: String::new(),
            password: String::new(),
            is_admin: is_staff,
            is_staff,
            is_superuser: false,
            is_active: true,
            last_login: None,
            created_at: now,
            updated_at: now,
        })
    }

    #[test]
    fn test_parents_cannot_set_fee_or_status() {
        use rust_decimal_macros::dec;

        let free = EnrollmentInput {
            student: Some(1),
            batch: Some(2),
            start_month: Some(date(2030, 1, 1)),
            tuition_fee: Some(dec!(0)),
            ..Default::default()
        };
        assert!(matches!(
            check_staff_only_fields(&caller(false), &free),
            Err(AppError::Forbidden(_))
        ));
        assert!(check_staff_only_fields(&caller(true), &free).is_ok());

        let reactivate = EnrollmentInput {
            is_active: Some(true),
            ..Default::default()
        };
        assert!(matches!(
            check_staff_only_fields(&caller(false), &reactivate),
            Err(AppError::Forbidden(_))
        ));

        let plain = EnrollmentInput {
            student: Some(1),
            batch: Some(2),
            start_month: Some(date(2030, 1, 1)),
            ..Default::default()
        };
        assert!(check_staff_only_fields(&caller(false), &plain).is_ok());
    }

    #[test]
    fn test_start_month_may_be_current_month() {
        let mut errors = FieldErrors::new();
        check_start_month(&mut errors, date(2025, 3, 1), date(2025, 3, 20));
        check_start_month(&mut errors, date(2025, 4, 1), date(2025, 3, 20));
        assert!(errors.is_empty());

        check_start_month(&mut errors, date(2025, 2, 1), date(2025, 3, 20));
        assert_eq!(errors["start_month"], vec!["Start month cannot be in the past"]);
    }

    #[test]
    fn test_enrollment_data_locks_undiscounted_fee_on_waiver() {
        use rust_decimal_macros::dec;
        use sqlx::types::Json;

        let now = Utc::now();
        let coupon = Coupon {
            id: 7,
            code: "FREEMONTH".to_string(),
            name: "Free month".to_string(),
            discount_types: Json(vec![DISCOUNT_FIRST_MONTH.to_string()]),
            discount_value: None,
            expires_at: now + chrono::Duration::days(3),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let student = Student {
            id: 3,
            parent_id: 1,
            name: "Rafi".to_string(),
            date_of_birth: date(2014, 5, 2),
            school: String::new(),
            current_class: String::new(),
            father_name: String::new(),
            mother_name: String::new(),
            created_at: now,
            updated_at: now,
        };
        let batch = Batch {
            id: 9,
            course_id: 2,
            name: "Morning".to_string(),
            timing: String::new(),
            group_link: String::new(),
            class_link: String::new(),
            tuition_fee: None,
            is_visible: true,
            created_at: now,
            updated_at: now,
        };
        let course = Course {
            id: 2,
            name: "Math".to_string(),
            description: String::new(),
            image: String::new(),
            admission_fee: dec!(500),
            monthly_fee: dec!(1500),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let quote = quote_fees(course.admission_fee, course.monthly_fee, Some(&coupon));
        let prepared = Prepared {
            student,
            batch,
            course,
            coupon: Some(coupon),
            monthly_fee: dec!(1500),
            quote,
        };

        let data = prepared.enrollment_data(date(2025, 5, 1));
        assert_eq!(data.tuition_fee, Some(dec!(1500)));
        assert_eq!(data.coupon_code.as_deref(), Some("FREEMONTH"));
        assert_eq!(prepared.quote.total_amount, dec!(500));
    }

    #[tokio::test]
    async fn test_parent_fee_override_rejected_before_insert() {
        use crate::config::BkashConfig;
        use crate::db::test_support as fixture;
        use rust_decimal_macros::dec;

        let Some(pool) = fixture::test_pool().await else { return };
        let parent = fixture::user(&pool, "01722222221", false).await;
        let staff = fixture::user(&pool, "01722222222", true).await;
        let student = fixture::student(&pool, parent.id(), "Rafi").await;
        let course = fixture::course(&pool, dec!(1500)).await;
        let batch = fixture::batch(&pool, course, "Morning", None).await;
        let service = EnrollmentService::new(pool.clone(), BkashClient::new(BkashConfig::default()));

        let free = EnrollmentInput {
            student: Some(student),
            batch: Some(batch),
            start_month: Some(next_month(billing::today())),
            tuition_fee: Some(dec!(0)),
            ..Default::default()
        };
        assert!(matches!(
            service.create(&parent, free.clone()).await,
            Err(AppError::Forbidden(_))
        ));
        assert_eq!(fixture::count(&pool, "SELECT COUNT(*) FROM enrollments").await, 0);

        let created = service.create(&staff, free).await.unwrap();
        assert_eq!(created.enrollment.tuition_fee, Some(dec!(0)));

        let waive = EnrollmentInput {
            tuition_fee: Some(dec!(0)),
            ..Default::default()
        };
        assert!(matches!(
            service.update(&parent, created.enrollment.id, waive).await,
            Err(AppError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_materialize_waived_first_month() {
        use crate::config::BkashConfig;
        use crate::db::test_support as fixture;
        use rust_decimal_macros::dec;

        let Some(pool) = fixture::test_pool().await else { return };
        let parent = fixture::user(&pool, "01722222223", false).await;
        let student = fixture::student(&pool, parent.id(), "Nila").await;
        let course = fixture::course(&pool, dec!(1500)).await;
        let batch = fixture::batch(&pool, course, "Evening", None).await;
        let coupon_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO coupons (code, name, discount_types, expires_at)
            VALUES ('FREEMONTH', 'Free month', $1, NOW() + INTERVAL '3 days')
            RETURNING id
            "#,
        )
        .bind(json!([DISCOUNT_FIRST_MONTH]))
        .fetch_one(&pool)
        .await
        .unwrap();
        let service = EnrollmentService::new(pool.clone(), BkashClient::new(BkashConfig::default()));

        let data = EnrollmentData {
            student,
            batch,
            start_month: date(2025, 7, 15),
            tuition_fee: None,
            coupon_code: Some("FREEMONTH".to_string()),
        };
        let done = service.materialize(&data, parent.id(), None).await.unwrap();
        assert_eq!(done.enrollment.start_month, date(2025, 7, 1));
        assert_eq!(done.enrollment.tuition_fee, Some(dec!(1500)));

        let first = payments::get_invoice(&pool, done.first_month_invoice_id).await.unwrap().unwrap();
        assert!(first.is_paid);
        assert_eq!(first.amount, dec!(0));
        assert_eq!(first.coupon_id, Some(coupon_id));
        let next = payments::get_invoice(&pool, done.next_month_invoice_id).await.unwrap().unwrap();
        assert!(!next.is_paid);
        assert_eq!(next.month, date(2025, 8, 1));
        assert_eq!(next.amount, dec!(1500));

        assert!(matches!(
            service.materialize(&data, parent.id(), None).await,
            Err(AppError::BadRequest(_))
        ));
    }
}
