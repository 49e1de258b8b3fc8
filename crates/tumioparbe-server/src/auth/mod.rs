//! Authentication: password hashing, JWTs and the request guard.
//!
//! Protected routers are wrapped with [`middleware::require_auth`], which
//! places a [`CurrentUser`] in the request extensions for handlers to read.

pub mod jwt;
pub mod middleware;
pub mod password;
pub mod phone;

use std::sync::Arc;

pub use jwt::{Claims, JwtKeys, TokenType};
pub use middleware::require_auth;
pub use password::{hash_password, verify_password, MIN_PASSWORD_LENGTH};

use crate::db::models::User;
use crate::db::queries::account;
use crate::db::DbPool;
use crate::error::{AppError, AppResult};

/// Resolves bearer tokens to active users.
#[derive(Clone)]
pub struct Authenticator {
    pool: DbPool,
    keys: Arc<JwtKeys>,
}

impl Authenticator {
    pub fn new(pool: DbPool, keys: Arc<JwtKeys>) -> Self {
        Self { pool, keys }
    }

    pub fn keys(&self) -> &JwtKeys {
        &self.keys
    }

    pub async fn authenticate(&self, token: &str) -> AppResult<User> {
        let claims = self.keys.decode(token, TokenType::Access)?;

        let user = account::get_user_by_id(&self.pool, claims.user_id)
            .await?
            .ok_or_else(|| AppError::Auth("User not found".to_string()))?;

        if !user.is_active {
            return Err(AppError::Auth("User is inactive".to_string()));
        }

        Ok(user)
    }
}

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl CurrentUser {
    pub fn id(&self) -> i64 {
        self.0.id
    }

    pub fn is_staff(&self) -> bool {
        self.0.is_staff
    }

    /// Fail with 403 unless the caller is staff.
    pub fn require_staff(&self) -> AppResult<()> {
        if self.0.is_staff {
            Ok(())
        } else {
            Err(AppError::Forbidden(
                "You do not have permission to perform this action.".to_string(),
            ))
        }
    }

    /// Parent id to scope queries by; `None` for staff, who see everything.
    pub fn parent_scope(&self) -> Option<i64> {
        if self.0.is_staff {
            None
        } else {
            Some(self.0.id)
        }
    }
}
