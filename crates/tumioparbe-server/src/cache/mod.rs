//! Key/value cache stored in the `cache_entries` table.
//!
//! Holds short-lived state that must survive across workers: OTP codes,
//! verified-phone markers, and automation task results.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::db::DbPool;
use crate::error::{AppError, AppResult};

/// OTP lifetime.
pub const OTP_TTL: Duration = Duration::from_secs(300);

/// How long a verified phone may be used to register.
pub const VERIFIED_PHONE_TTL: Duration = Duration::from_secs(600);

/// Retention of automation task results.
pub const TASK_RESULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

pub fn otp_key(phone: &str) -> String {
    format!("otp:{}", phone)
}

pub fn verified_phone_key(phone: &str) -> String {
    format!("verified_phone:{}", phone)
}

pub fn task_result_key(task_id: &str) -> String {
    format!("task-result:{}", task_id)
}

/// Database-backed cache.
#[derive(Clone)]
pub struct DbCache {
    pool: DbPool,
}

impl DbCache {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> AppResult<()> {
        let value = serde_json::to_value(value)?;
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| AppError::Internal(format!("Invalid cache TTL: {}", e)))?;
        let expires: DateTime<Utc> = Utc::now() + ttl;

        sqlx::query(
            r#"
            INSERT INTO cache_entries (cache_key, value, expires)
            VALUES ($1, $2, $3)
            ON CONFLICT (cache_key) DO UPDATE SET value = EXCLUDED.value, expires = EXCLUDED.expires
            "#,
        )
        .bind(key)
        .bind(&value)
        .bind(expires)
        .execute(&self.pool)
        .await?;

        tracing::debug!(key, expires = %expires, "Cache entry stored");
        Ok(())
    }

    /// Fetch a live entry. Expired entries are removed and read as absent.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        let row: Option<(serde_json::Value, DateTime<Utc>)> =
            sqlx::query_as("SELECT value, expires FROM cache_entries WHERE cache_key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((_, expires)) if expires <= Utc::now() => {
                self.delete(key).await?;
                Ok(None)
            }
            Some((value, _)) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn delete(&self, key: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM cache_entries WHERE cache_key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Remove every expired entry. Returns the number removed.
    pub async fn purge_expired(&self) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires <= NOW()")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_formats() {
        assert_eq!(otp_key("01712345678"), "otp:01712345678");
        assert_eq!(verified_phone_key("01712345678"), "verified_phone:01712345678");
        assert_eq!(task_result_key("abc"), "task-result:abc");
    }

    #[test]
    fn test_ttls() {
        assert_eq!(OTP_TTL.as_secs(), 300);
        assert_eq!(VERIFIED_PHONE_TTL.as_secs(), 600);
        assert_eq!(TASK_RESULT_TTL.as_secs(), 86_400);
    }
}
