//! Password hashing.
//!
//! Hashes use PBKDF2-HMAC-SHA256 and the self-describing encoding
//! `pbkdf2_sha256$<iterations>$<salt>$<base64 digest>`, so the iteration count
//! can be raised without invalidating stored hashes.
//!
//! Key derivation is CPU-bound, so the public functions run it on the
//! blocking thread pool.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::Sha256;

use crate::error::{AppError, AppResult};

const ALGORITHM: &str = "pbkdf2_sha256";

/// Iterations used for new hashes.
pub const DEFAULT_ITERATIONS: u32 = 600_000;

/// Minimum accepted password length.
pub const MIN_PASSWORD_LENGTH: usize = 6;

const SALT_LENGTH: usize = 22;

/// Hash a password with a fresh random salt.
pub async fn hash_password(password: &str) -> AppResult<String> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || {
        let salt: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SALT_LENGTH)
            .map(char::from)
            .collect();
        encode(&password, &salt, DEFAULT_ITERATIONS)
    })
    .await
    .map_err(|e| AppError::Internal(format!("Password hashing task failed: {}", e)))?
}

/// Check a password against an encoded hash. Malformed hashes never match.
pub async fn verify_password(password: &str, encoded: &str) -> bool {
    let password = password.to_string();
    let encoded = encoded.to_string();
    match tokio::task::spawn_blocking(move || verify_encoded(&password, &encoded)).await {
        Ok(matched) => matched,
        Err(e) => {
            tracing::error!(error = %e, "Password verification task failed");
            false
        }
    }
}

fn verify_encoded(password: &str, encoded: &str) -> bool {
    let mut parts = encoded.splitn(4, '$');
    let (Some(algorithm), Some(iterations), Some(salt), Some(digest)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    if algorithm != ALGORITHM || digest.is_empty() {
        return false;
    }
    let Ok(iterations) = iterations.parse::<u32>() else {
        return false;
    };
    match encode(password, salt, iterations) {
        Ok(candidate) => constant_time_eq(candidate.as_bytes(), encoded.as_bytes()),
        Err(_) => false,
    }
}

fn encode(password: &str, salt: &str, iterations: u32) -> AppResult<String> {
    if salt.contains('$') {
        return Err(AppError::Internal("Salt must not contain '$'".to_string()));
    }
    let digest = derive(password.as_bytes(), salt.as_bytes(), iterations)?;
    Ok(format!(
        "{}${}${}${}",
        ALGORITHM,
        iterations,
        salt,
        STANDARD.encode(digest)
    ))
}

fn derive(password: &[u8], salt: &[u8], iterations: u32) -> AppResult<[u8; 32]> {
    if iterations == 0 {
        return Err(AppError::Internal("PBKDF2 needs at least one iteration".to_string()));
    }
    Ok(pbkdf2::pbkdf2_hmac_array::<Sha256, 32>(password, salt, iterations))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    #[test]
    fn test_pbkdf2_known_vectors() {
        assert_eq!(
            hex(&derive(b"password", b"salt", 1).unwrap()),
            "120fb6cffcf8b32c43e7225256c4f837a86548c92ccc35480805987cb70be17b"
        );
        assert_eq!(
            hex(&derive(b"password", b"salt", 2).unwrap()),
            "ae4d0c95af6b46d32d0adff928f06dd02a303f8ef3c251dfd6e2d85a95474c43"
        );
    }

    #[test]
    fn test_verify_encoded() {
        let encoded = encode("secret123", "abcdefgh", 1_000).unwrap();
        assert!(encoded.starts_with("pbkdf2_sha256$1000$abcdefgh$"));
        assert!(verify_encoded("secret123", &encoded));
        assert!(!verify_encoded("secret124", &encoded));
    }

    #[tokio::test]
    async fn test_hash_and_verify_off_the_runtime() {
        let encoded = hash_password("secret123").await.unwrap();
        assert!(encoded.starts_with("pbkdf2_sha256$600000$"));
        assert!(verify_password("secret123", &encoded).await);
        assert!(!verify_password("wrong-pass", &encoded).await);
    }

    #[test]
    fn test_malformed_hashes_never_match() {
        assert!(!verify_encoded("x", ""));
        assert!(!verify_encoded("x", "md5$1$salt$hash"));
        assert!(!verify_encoded("x", "pbkdf2_sha256$notanumber$salt$hash"));
        assert!(!verify_encoded("x", "pbkdf2_sha256$0$salt$hash"));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
