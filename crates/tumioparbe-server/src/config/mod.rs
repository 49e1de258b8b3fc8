//! Configuration module for the TumioParbe server.
//!
//! Configuration is read from environment variables (after `.env` has been
//! loaded) using `envy` for type-safe parsing. The deployment templates write
//! flags the Python way (`DEBUG=True`) and lists comma-separated
//! (`ALLOWED_HOSTS=api.example.com,localhost`), so both get dedicated
//! deserializers here.

mod app;
mod bkash;
mod database;
mod sms;

pub use app::AppConfig;
pub use bkash::{BkashConfig, BKASH_PRODUCTION_URL, BKASH_SANDBOX_URL};
pub use database::DatabaseConfig;
pub use sms::SmsConfig;

use serde::{Deserialize, Deserializer};

/// Interpret an environment flag. Accepts `True`, `true`, `1`, `yes` and `on`.
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Split a comma-separated list, trimming entries and dropping empty ones.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub(crate) fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(parse_flag(&raw))
}

pub(crate) fn comma_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(split_list(&raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("True"));
        assert!(parse_flag("true"));
        assert!(parse_flag(" 1 "));
        assert!(!parse_flag("False"));
        assert!(!parse_flag(""));
    }

    #[test]
    fn test_split_list() {
        assert_eq!(
            split_list("01712345678, 01812345678,,"),
            vec!["01712345678".to_string(), "01812345678".to_string()]
        );
        assert!(split_list("").is_empty());
    }
}
