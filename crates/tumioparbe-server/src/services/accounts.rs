//! Phone verification, registration, login and student management.

use std::sync::Arc;

use rand::Rng;
use serde::Serialize;
use serde_json::json;

use crate::auth::phone::{is_bd_mobile, is_valid_email, is_valid_url, looks_like_bd_mobile};
use crate::auth::{hash_password, verify_password, JwtKeys, MIN_PASSWORD_LENGTH};
use crate::cache::{otp_key, verified_phone_key, DbCache, OTP_TTL, VERIFIED_PHONE_TTL};
use crate::config::AppConfig;
use crate::db::models::{
    ActionType, OtpRequest, OtpVerifyRequest, ProfileUpdate, RegisterRequest, Student,
    StudentInput, TokenPair, TokenRequest, User,
};
use crate::db::queries::{account as queries, common};
use crate::db::DbPool;
use crate::error::{AppError, AppResult, FieldErrors};
use crate::result_ext::ResultExt;
use crate::services::SmsService;

/// Registration result: the new user and a token pair.
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub user: User,
    pub refresh: String,
    pub access: String,
    pub message: &'static str,
}

/// Service for account operations.
#[derive(Clone)]
pub struct AccountService {
    pool: DbPool,
    cache: DbCache,
    sms: SmsService,
    config: Arc<AppConfig>,
    keys: Arc<JwtKeys>,
}

impl AccountService {
    pub fn new(
        pool: DbPool,
        cache: DbCache,
        sms: SmsService,
        config: Arc<AppConfig>,
        keys: Arc<JwtKeys>,
    ) -> Self {
        Self {
            pool,
            cache,
            sms,
            config,
            keys,
        }
    }

    /// Generate, cache and send a six-digit OTP.
    pub async fn request_otp(&self, request: OtpRequest) -> AppResult<serde_json::Value> {
        let phone = request
            .phone
            .filter(|p| looks_like_bd_mobile(p))
            .ok_or_else(|| AppError::Validation("Valid phone number is required.".to_string()))?;

        let otp = rand::thread_rng().gen_range(100_000..=999_999).to_string();
        self.cache.set(&otp_key(&phone), &otp, OTP_TTL).await?;

        // The OTP stays valid even if delivery fails; the log records the failure.
        let _ = self.sms.send_otp(&phone, &otp).await.log("sending OTP");
        tracing::info!(phone = %phone, "OTP issued");

        if self.config.debug {
            Ok(json!({
                "phone": phone,
                "otp": otp,
                "message": "OTP generated successfully. In production, this would be sent via SMS.",
            }))
        } else {
            Ok(json!({
                "phone": phone,
                "message": "OTP sent successfully.",
            }))
        }
    }

    /// Check an OTP. A match consumes it and marks the phone verified.
    pub async fn verify_otp(&self, request: OtpVerifyRequest) -> AppResult<serde_json::Value> {
        let (Some(phone), Some(otp)) = (
            request.phone.filter(|p| !p.is_empty()),
            request.otp.filter(|o| !o.is_empty()),
        ) else {
            return Err(AppError::Validation("Phone and OTP are required.".to_string()));
        };

        let stored: Option<String> = self.cache.get(&otp_key(&phone)).await?;
        if stored.as_deref() != Some(otp.as_str()) {
            tracing::debug!(phone = %phone, "OTP mismatch or expired");
            return Err(AppError::Validation(
                "Invalid OTP or OTP has expired.".to_string(),
            ));
        }

        self.cache.delete(&otp_key(&phone)).await?;
        self.cache
            .set(
                &verified_phone_key(&phone),
                &chrono::Utc::now().timestamp(),
                VERIFIED_PHONE_TTL,
            )
            .await?;

        Ok(json!({ "success": true, "message": "OTP verified successfully." }))
    }

    /// Create an account for a verified phone and log it in.
    pub async fn register(&self, request: RegisterRequest) -> AppResult<Registration> {
        let phone = request.phone.clone().unwrap_or_default();
        let verified: Option<i64> = self.cache.get(&verified_phone_key(&phone)).await?;
        if verified.is_none() {
            return Err(AppError::Validation(
                "Phone number must be verified with OTP first.".to_string(),
            ));
        }

        let mut errors = FieldErrors::new();
        let mut push = |field: &str, msg: &str| {
            errors
                .entry(field.to_string())
                .or_default()
                .push(msg.to_string());
        };

        if !is_bd_mobile(&phone) {
            push("phone", "Phone number must be in the format: 01XXXXXXXXX.");
        } else if queries::phone_exists(&self.pool, &phone).await? {
            push("phone", "A user with this phone number already exists.");
        }

        let name = request.name.unwrap_or_default();
        if name.trim().is_empty() {
            push("name", "This field is required.");
        }
        let address = request.address.unwrap_or_default();
        if address.trim().is_empty() {
            push("address", "This field is required.");
        }
        let facebook_profile = request.facebook_profile.unwrap_or_default();
        if !is_valid_url(&facebook_profile) {
            push("facebook_profile", "Please enter a valid Facebook profile URL.");
        }
        let email = request.email.unwrap_or_default();
        if !email.is_empty() && !is_valid_email(&email) {
            push("email", "Enter a valid email address.");
        }

        let password = request.password.unwrap_or_default();
        if password.len() < MIN_PASSWORD_LENGTH {
            push(
                "password",
                "Ensure this field has at least 6 characters.",
            );
        }
        if Some(password.as_str()) != request.confirm_password.as_deref() {
            push("confirm_password", "Passwords don't match.");
        }

        if !errors.is_empty() {
            return Err(AppError::Fields(errors));
        }

        let is_admin = self.config.is_admin_phone(&phone);
        if is_admin {
            tracing::info!(phone = %phone, "Registering admin phone");
        }

        let password_hash = hash_password(&password).await?;
        let user = queries::insert_user(
            &self.pool,
            &queries::NewUser {
                phone: &phone,
                name: name.trim(),
                address: address.trim(),
                facebook_profile: &facebook_profile,
                email: &email,
                password_hash: &password_hash,
                is_admin,
            },
        )
        .await?;

        common::insert_activity(
            &self.pool,
            user.id,
            ActionType::AccountCreation,
            &json!({ "phone": user.phone, "is_admin": user.is_admin }),
        )
        .await?;

        let tokens = self.keys.issue_pair(user.id)?;
        self.cache.delete(&verified_phone_key(&phone)).await?;

        tracing::info!(user_id = user.id, "User registered");
        Ok(Registration {
            user,
            refresh: tokens.refresh,
            access: tokens.access,
            message: "Registration successful!",
        })
    }

    /// Phone/password login.
    pub async fn login(&self, request: TokenRequest) -> AppResult<TokenPair> {
        let mut errors = FieldErrors::new();
        if request.phone.as_deref().unwrap_or("").is_empty() {
            errors.insert("phone".to_string(), vec!["This field is required.".to_string()]);
        }
        if request.password.as_deref().unwrap_or("").is_empty() {
            errors.insert("password".to_string(), vec!["This field is required.".to_string()]);
        }
        if !errors.is_empty() {
            return Err(AppError::Fields(errors));
        }

        let phone = request.phone.unwrap_or_default();
        let password = request.password.unwrap_or_default();

        let invalid =
            || AppError::Auth("No active account found with the given credentials".to_string());
        let user = queries::get_user_by_phone(&self.pool, &phone)
            .await?
            .filter(|u| u.is_active)
            .ok_or_else(invalid)?;
        if !verify_password(&password, &user.password).await {
            return Err(invalid());
        }

        queries::touch_last_login(&self.pool, user.id).await?;
        tracing::info!(user_id = user.id, "User logged in");
        self.keys.issue_pair(user.id)
    }

    pub fn refresh(&self, refresh_token: Option<&str>) -> AppResult<String> {
        let token = refresh_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::field("refresh", "This field is required."))?;
        self.keys.refresh_access(token)
    }

    /// Partial profile update. A new password must be confirmed.
    pub async fn update_profile(&self, user: &User, update: ProfileUpdate) -> AppResult<User> {
        let mut errors = FieldErrors::new();

        if let Some(url) = update.facebook_profile.as_deref() {
            if !is_valid_url(url) {
                errors.insert(
                    "facebook_profile".to_string(),
                    vec!["Please enter a valid Facebook profile URL.".to_string()],
                );
            }
        }
        if let Some(email) = update.email.as_deref() {
            if !email.is_empty() && !is_valid_email(email) {
                errors.insert("email".to_string(), vec!["Enter a valid email address.".to_string()]);
            }
        }

        let password_hash = match update.password.as_deref() {
            Some(password) => {
                if password.len() < MIN_PASSWORD_LENGTH {
                    errors.insert(
                        "password".to_string(),
                        vec!["Ensure this field has at least 6 characters.".to_string()],
                    );
                }
                if update.confirm_password.as_deref() != Some(password) {
                    errors.insert(
                        "confirm_password".to_string(),
                        vec!["Passwords don't match.".to_string()],
                    );
                }
                Some(hash_password(password).await?)
            }
            None => None,
        };

        if !errors.is_empty() {
            return Err(AppError::Fields(errors));
        }

        queries::update_user_profile(
            &self.pool,
            user.id,
            update.name.as_deref(),
            update.address.as_deref(),
            update.facebook_profile.as_deref(),
            update.email.as_deref(),
            password_hash.as_deref(),
        )
        .await
    }

    /// Create an admin account, or promote an existing one.
    pub async fn create_superuser(&self, phone: &str, name: &str, password: &str) -> AppResult<User> {
        if !is_bd_mobile(phone) {
            return Err(AppError::Validation(
                "Phone number must be in the format: 01XXXXXXXXX.".to_string(),
            ));
        }
        if password.len() < MIN_PASSWORD_LENGTH {
            return Err(AppError::Validation(
                "Password must be at least 6 characters.".to_string(),
            ));
        }

        let password_hash = hash_password(password).await?;
        let user = match queries::get_user_by_phone(&self.pool, phone).await? {
            Some(existing) => queries::promote_user(&self.pool, existing.id, &password_hash).await?,
            None => {
                queries::insert_user(
                    &self.pool,
                    &queries::NewUser {
                        phone,
                        name,
                        address: "",
                        facebook_profile: "",
                        email: "",
                        password_hash: &password_hash,
                        is_admin: true,
                    },
                )
                .await?
            }
        };

        tracing::info!(user_id = user.id, phone, "Superuser ready");
        Ok(user)
    }

    pub async fn list_students(&self, parent: &User) -> AppResult<Vec<Student>> {
        queries::list_students_for_parent(&self.pool, parent.id).await
    }

    /// A student owned by `parent`; other parents' students read as missing.
    pub async fn get_student(&self, parent: &User, id: i64) -> AppResult<Student> {
        queries::get_student(&self.pool, id)
            .await?
            .filter(|s| s.parent_id == parent.id)
            .ok_or_else(|| AppError::NotFound("No Student matches the given query.".to_string()))
    }

    pub async fn create_student(&self, parent: &User, input: StudentInput) -> AppResult<Student> {
        let mut errors = FieldErrors::new();
        for (field, value) in [
            ("name", input.name.as_deref()),
            ("school", input.school.as_deref()),
            ("current_class", input.current_class.as_deref()),
            ("father_name", input.father_name.as_deref()),
            ("mother_name", input.mother_name.as_deref()),
        ] {
            if value.map(str::trim).unwrap_or("").is_empty() {
                errors.insert(field.to_string(), vec!["This field is required.".to_string()]);
            }
        }
        if input.date_of_birth.is_none() {
            errors.insert(
                "date_of_birth".to_string(),
                vec!["This field is required.".to_string()],
            );
        }
        let Some(date_of_birth) = input.date_of_birth.filter(|_| errors.is_empty()) else {
            return Err(AppError::Fields(errors));
        };

        queries::insert_student(
            &self.pool,
            parent.id,
            input.name.as_deref().unwrap_or_default().trim(),
            date_of_birth,
            input.school.as_deref().unwrap_or_default(),
            input.current_class.as_deref().unwrap_or_default(),
            input.father_name.as_deref().unwrap_or_default(),
            input.mother_name.as_deref().unwrap_or_default(),
        )
        .await
    }

    pub async fn update_student(
        &self,
        parent: &User,
        id: i64,
        input: StudentInput,
    ) -> AppResult<Student> {
        let student = self.get_student(parent, id).await?;
        queries::update_student(
            &self.pool,
            student.id,
            input.name.as_deref(),
            input.date_of_birth,
            input.school.as_deref(),
            input.current_class.as_deref(),
            input.father_name.as_deref(),
            input.mother_name.as_deref(),
        )
        .await
    }

    pub async fn delete_student(&self, parent: &User, id: i64) -> AppResult<()> {
        let student = self.get_student(parent, id).await?;
        queries::delete_student(&self.pool, student.id).await?;
        Ok(())
    }
}
