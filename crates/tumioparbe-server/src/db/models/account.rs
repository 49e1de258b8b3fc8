//! User and student models.
//!
//! Users are parents (or administrators) identified by a Bangladeshi mobile
//! number; students are the children they enroll.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A registered account.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,

    /// Mobile number in `01XXXXXXXXX` form
    pub phone: String,

    pub name: String,

    pub address: String,

    pub facebook_profile: String,

    pub email: String,

    /// Encoded password hash, never serialized
    #[serde(skip_serializing, default)]
    pub password: String,

    pub is_admin: bool,

    pub is_staff: bool,

    pub is_superuser: bool,

    pub is_active: bool,

    pub last_login: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// A child registered by a parent account.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Student {
    pub id: i64,

    /// Owning parent account
    #[serde(rename = "parent")]
    pub parent_id: i64,

    pub name: String,

    pub date_of_birth: NaiveDate,

    pub school: String,

    pub current_class: String,

    pub father_name: String,

    pub mother_name: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Student id and name, as shown to other parents in a batch.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StudentSummary {
    pub id: i64,
    pub name: String,
}

/// Request to send a one-time password.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OtpRequest {
    #[serde(default)]
    pub phone: Option<String>,
}

/// Request to verify a one-time password.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OtpVerifyRequest {
    #[serde(default)]
    pub phone: Option<String>,

    #[serde(default)]
    pub otp: Option<String>,
}

/// Registration payload, accepted after the phone has been verified.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub phone: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub address: Option<String>,

    #[serde(default)]
    pub facebook_profile: Option<String>,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub confirm_password: Option<String>,
}

/// Partial profile update. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub address: Option<String>,

    #[serde(default)]
    pub facebook_profile: Option<String>,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub confirm_password: Option<String>,
}

/// Phone/password login.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub phone: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

/// Refresh-token exchange.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRefreshRequest {
    #[serde(default)]
    pub refresh: Option<String>,
}

/// Access/refresh token pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub refresh: String,
    pub access: String,
}

/// Student create/update payload. For updates absent fields are unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StudentInput {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,

    #[serde(default)]
    pub school: Option<String>,

    #[serde(default)]
    pub current_class: Option<String>,

    #[serde(default)]
    pub father_name: Option<String>,

    #[serde(default)]
    pub mother_name: Option<String>,
}
