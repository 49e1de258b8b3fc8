//! Coupon management and lookup.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::auth::CurrentUser;
use crate::billing::{discount_type_display, DISCOUNT_TUITION};
use crate::db::models::{Coupon, CouponInput, CouponView};
use crate::db::queries::enrollment as queries;
use crate::db::DbPool;
use crate::error::{AppError, AppResult, FieldErrors};

const MAX_CODE_LENGTH: usize = 20;

/// Service for coupon operations.
#[derive(Clone)]
pub struct CouponService {
    pool: DbPool,
}

impl CouponService {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self) -> AppResult<Vec<CouponView>> {
        let now = Utc::now();
        Ok(queries::list_coupons(&self.pool)
            .await?
            .into_iter()
            .map(|c| coupon_view(c, now))
            .collect())
    }

    async fn existing(&self, id: i64) -> AppResult<Coupon> {
        queries::get_coupon(&self.pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound("No Coupon matches the given query.".to_string()))
    }

    pub async fn get(&self, id: i64) -> AppResult<CouponView> {
        Ok(coupon_view(self.existing(id).await?, Utc::now()))
    }

    pub async fn create(&self, user: &CurrentUser, input: CouponInput) -> AppResult<CouponView> {
        user.require_staff()?;
        let now = Utc::now();

        let mut errors = FieldErrors::new();
        let code = input.code.as_deref().map(str::trim).unwrap_or("");
        let name = input.name.as_deref().map(str::trim).unwrap_or("");
        for (field, value) in [("code", code), ("name", name)] {
            if value.is_empty() {
                errors.insert(field.to_string(), vec!["This field is required.".to_string()]);
            }
        }
        let types = input.discount_types.clone().unwrap_or_default();
        if input.discount_types.is_none() {
            errors.insert("discount_types".to_string(), vec!["This field is required.".to_string()]);
        }
        match input.expires_at {
            None => {
                errors.insert("expires_at".to_string(), vec!["This field is required.".to_string()]);
            }
            Some(expires_at) => check_expiry(&mut errors, expires_at, now),
        }
        check_discount(&mut errors, &types, input.discount_value);
        check_code(&mut errors, code);
        if !code.is_empty() && queries::coupon_code_taken(&self.pool, code, None).await? {
            push(&mut errors, "code", "coupon with this code already exists.");
        }
        if !errors.is_empty() {
            return Err(AppError::Fields(errors));
        }

        let coupon = queries::insert_coupon(
            &self.pool,
            code,
            name,
            &types,
            input.discount_value,
            input.expires_at.unwrap_or(now),
            input.is_active.unwrap_or(true),
        )
        .await?;

        tracing::info!(coupon_id = coupon.id, code = %coupon.code, "Coupon created");
        Ok(coupon_view(coupon, now))
    }

    /// Partial update; the merged coupon is validated as a whole.
    pub async fn update(&self, user: &CurrentUser, id: i64, input: CouponInput) -> AppResult<CouponView> {
        user.require_staff()?;
        let existing = self.existing(id).await?;
        let now = Utc::now();

        let code = input.code.as_deref().map(str::trim).unwrap_or(&existing.code).to_string();
        let name = input.name.as_deref().map(str::trim).unwrap_or(&existing.name).to_string();
        let types = input
            .discount_types
            .clone()
            .unwrap_or_else(|| existing.discount_types.0.clone());
        let discount_value = input.discount_value.or(existing.discount_value);

        let mut errors = FieldErrors::new();
        if name.is_empty() {
            push(&mut errors, "name", "This field may not be blank.");
        }
        if let Some(expires_at) = input.expires_at {
            check_expiry(&mut errors, expires_at, now);
        }
        check_discount(&mut errors, &types, discount_value);
        check_code(&mut errors, &code);
        if code != existing.code && queries::coupon_code_taken(&self.pool, &code, Some(id)).await? {
            push(&mut errors, "code", "coupon with this code already exists.");
        }
        if !errors.is_empty() {
            return Err(AppError::Fields(errors));
        }

        let coupon = queries::update_coupon(
            &self.pool,
            id,
            &code,
            &name,
            &types,
            discount_value,
            input.expires_at.unwrap_or(existing.expires_at),
            input.is_active.unwrap_or(existing.is_active),
        )
        .await?;

        tracing::info!(coupon_id = id, "Coupon updated");
        Ok(coupon_view(coupon, now))
    }

    pub async fn delete(&self, user: &CurrentUser, id: i64) -> AppResult<()> {
        user.require_staff()?;
        let coupon = self.existing(id).await?;
        queries::delete_coupon(&self.pool, coupon.id).await?;
        tracing::info!(coupon_id = id, "Coupon deleted");
        Ok(())
    }

    /// Look up a coupon by code for a customer about to use it.
    pub async fn validate(&self, code: Option<&str>) -> AppResult<CouponView> {
        let code = code
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AppError::BadRequest("Coupon code is required".to_string()))?;

        let coupon = queries::get_coupon_by_code(&self.pool, code)
            .await?
            .ok_or_else(|| AppError::NotFound("Invalid coupon code".to_string()))?;

        let now = Utc::now();
        if coupon.is_expired_at(now) {
            return Err(AppError::BadRequest("This coupon has expired".to_string()));
        }
        Ok(coupon_view(coupon, now))
    }
}

pub fn coupon_view(coupon: Coupon, now: DateTime<Utc>) -> CouponView {
    let discount_types_display = coupon
        .discount_types
        .0
        .iter()
        .filter_map(|t| discount_type_display(t))
        .map(str::to_string)
        .collect();

    CouponView {
        is_expired: coupon.is_expired_at(now),
        discount_types_display,
        coupon,
    }
}

fn push(errors: &mut FieldErrors, field: &str, message: impl Into<String>) {
    errors.entry(field.to_string()).or_default().push(message.into());
}

fn check_code(errors: &mut FieldErrors, code: &str) {
    if code.chars().count() > MAX_CODE_LENGTH {
        push(errors, "code", "Ensure this field has no more than 20 characters.");
    }
}

fn check_expiry(errors: &mut FieldErrors, expires_at: DateTime<Utc>, now: DateTime<Utc>) {
    if expires_at < now {
        push(errors, "expires_at", "Expiration date must be in the future");
    }
}

fn check_discount(errors: &mut FieldErrors, types: &[String], value: Option<Decimal>) {
    if types.is_empty() {
        push(errors, "discount_types", "At least one discount type must be provided");
    }
    for t in types {
        if discount_type_display(t).is_none() {
            push(errors, "discount_types", format!("Invalid discount type: {}", t));
        }
    }

    let has_tuition = types.iter().any(|t| t == DISCOUNT_TUITION);
    match value {
        None if has_tuition => push(
            errors,
            "discount_types",
            "Discount value is required for tuition discount",
        ),
        Some(_) if !has_tuition => push(
            errors,
            "discount_value",
            "Discount value is only used for tuition discounts",
        ),
        Some(v) if v <= Decimal::ZERO || v > Decimal::ONE_HUNDRED => push(
            errors,
            "discount_value",
            "Discount value must be a percentage between 0 and 100",
        ),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn types(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_discount_rules() {
        let mut errors = FieldErrors::new();
        check_discount(&mut errors, &types(&["TUITION", "ADMISSION"]), Some(dec!(15)));
        check_discount(&mut errors, &types(&["FIRST_MONTH"]), None);
        assert!(errors.is_empty());

        check_discount(&mut errors, &types(&[]), None);
        assert_eq!(
            errors["discount_types"],
            vec!["At least one discount type must be provided"]
        );
    }

    #[test]
    fn test_tuition_value_pairing() {
        let mut missing = FieldErrors::new();
        check_discount(&mut missing, &types(&["TUITION"]), None);
        assert_eq!(
            missing["discount_types"],
            vec!["Discount value is required for tuition discount"]
        );

        let mut stray = FieldErrors::new();
        check_discount(&mut stray, &types(&["ADMISSION"]), Some(dec!(10)));
        assert!(stray.contains_key("discount_value"));

        let mut unknown = FieldErrors::new();
        check_discount(&mut unknown, &types(&["CASHBACK"]), None);
        assert_eq!(unknown["discount_types"], vec!["Invalid discount type: CASHBACK"]);
    }

    #[test]
    fn test_expiry_and_code_length() {
        let now = Utc::now();
        let mut errors = FieldErrors::new();
        check_expiry(&mut errors, now + chrono::Duration::days(1), now);
        check_code(&mut errors, "SPRING25");
        assert!(errors.is_empty());

        check_expiry(&mut errors, now - chrono::Duration::seconds(1), now);
        check_code(&mut errors, "THIS-CODE-IS-WAY-TOO-LONG");
        assert!(errors.contains_key("expires_at"));
        assert!(errors.contains_key("code"));
    }
}
