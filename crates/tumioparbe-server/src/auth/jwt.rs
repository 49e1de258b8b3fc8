//! JWT access and refresh tokens.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::models::TokenPair;
use crate::error::{AppError, AppResult};

/// Which half of a token pair a JWT is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    pub token_type: TokenType,
    pub jti: String,
    pub exp: i64,
    pub iat: i64,
}

/// HS256 signing keys and token lifetimes.
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl JwtKeys {
    pub fn new(secret: &str, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl,
            refresh_ttl,
        }
    }

    fn issue(&self, user_id: i64, token_type: TokenType) -> AppResult<String> {
        let now = Utc::now();
        let ttl = match token_type {
            TokenType::Access => self.access_ttl,
            TokenType::Refresh => self.refresh_ttl,
        };
        let claims = Claims {
            user_id,
            token_type,
            jti: Uuid::new_v4().simple().to_string(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AppError::Internal(format!("Failed to sign token: {}", e)))
    }

    /// Issue a fresh refresh/access pair for a user.
    pub fn issue_pair(&self, user_id: i64) -> AppResult<TokenPair> {
        Ok(TokenPair {
            refresh: self.issue(user_id, TokenType::Refresh)?,
            access: self.issue(user_id, TokenType::Access)?,
        })
    }

    /// Issue a new access token from a valid refresh token.
    pub fn refresh_access(&self, refresh_token: &str) -> AppResult<String> {
        let claims = self.decode(refresh_token, TokenType::Refresh)?;
        self.issue(claims.user_id, TokenType::Access)
    }

    /// Validate signature, expiry and token type.
    pub fn decode(&self, token: &str, expected: TokenType) -> AppResult<Claims> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|_| AppError::Auth("Given token not valid for any token type".to_string()))?;

        if data.claims.token_type != expected {
            return Err(AppError::Auth("Token has wrong type".to_string()));
        }

        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> JwtKeys {
        JwtKeys::new("test-secret", Duration::minutes(60), Duration::days(7))
    }

    #[test]
    fn test_issue_and_decode_pair() {
        let keys = keys();
        let pair = keys.issue_pair(42).unwrap();

        let access = keys.decode(&pair.access, TokenType::Access).unwrap();
        assert_eq!(access.user_id, 42);
        assert!(access.exp > access.iat);

        let refresh = keys.decode(&pair.refresh, TokenType::Refresh).unwrap();
        assert_eq!(refresh.user_id, 42);
        assert_ne!(access.jti, refresh.jti);
    }

    #[test]
    fn test_wrong_type_rejected() {
        let keys = keys();
        let pair = keys.issue_pair(1).unwrap();
        assert!(matches!(
            keys.decode(&pair.refresh, TokenType::Access),
            Err(AppError::Auth(_))
        ));
        assert!(keys.refresh_access(&pair.access).is_err());
    }

    #[test]
    fn test_refresh_issues_access_token() {
        let keys = keys();
        let pair = keys.issue_pair(5).unwrap();
        let access = keys.refresh_access(&pair.refresh).unwrap();
        assert_eq!(keys.decode(&access, TokenType::Access).unwrap().user_id, 5);
    }

    #[test]
    fn test_expired_and_foreign_tokens_rejected() {
        let expired = JwtKeys::new("test-secret", Duration::minutes(-10), Duration::days(7));
        let pair = expired.issue_pair(1).unwrap();
        assert!(expired.decode(&pair.access, TokenType::Access).is_err());

        let other = JwtKeys::new("other-secret", Duration::minutes(60), Duration::days(7));
        let pair = other.issue_pair(1).unwrap();
        assert!(keys().decode(&pair.access, TokenType::Access).is_err());
    }
}
