//! bKash tokenized checkout configuration.

use serde::Deserialize;

use super::flag;

pub const BKASH_SANDBOX_URL: &str = "https://tokenized.sandbox.bka.sh/v1.2.0-beta";
pub const BKASH_PRODUCTION_URL: &str = "https://tokenized.pay.bka.sh/v1.2.0-beta";

/// bKash credentials, loaded from variables prefixed with `BKASH_`:
/// - `BKASH_BASE_URL`: Explicit API base (overrides the sandbox switch)
/// - `BKASH_APP_KEY` / `BKASH_APP_SECRET`
/// - `BKASH_USERNAME` / `BKASH_PASSWORD`
/// - `BKASH_SANDBOX_MODE`: Use the sandbox when no base URL is set (default: True)
#[derive(Debug, Clone, Deserialize)]
pub struct BkashConfig {
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub app_key: String,

    #[serde(default)]
    pub app_secret: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_true", deserialize_with = "flag")]
    pub sandbox_mode: bool,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

impl BkashConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("BKASH_").from_env::<BkashConfig>()
    }

    /// API base URL without a trailing slash.
    pub fn api_base(&self) -> String {
        let base = match self.base_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url,
            _ if self.sandbox_mode => BKASH_SANDBOX_URL,
            _ => BKASH_PRODUCTION_URL,
        };
        base.trim_end_matches('/').to_string()
    }

    /// Whether merchant credentials are present.
    pub fn is_configured(&self) -> bool {
        !self.app_key.is_empty()
            && !self.app_secret.is_empty()
            && !self.username.is_empty()
            && !self.password.is_empty()
    }
}

impl Default for BkashConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            app_key: String::new(),
            app_secret: String::new(),
            username: String::new(),
            password: String::new(),
            sandbox_mode: true,
            timeout_secs: default_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_base_selection() {
        let mut config = BkashConfig::default();
        assert_eq!(config.api_base(), BKASH_SANDBOX_URL);

        config.sandbox_mode = false;
        assert_eq!(config.api_base(), BKASH_PRODUCTION_URL);

        config.base_url = Some("https://checkout.example.com/v1/".to_string());
        assert_eq!(config.api_base(), "https://checkout.example.com/v1");
    }

    #[test]
    fn test_is_configured() {
        let mut config = BkashConfig::default();
        assert!(!config.is_configured());
        config.app_key = "k".into();
        config.app_secret = "s".into();
        config.username = "u".into();
        config.password = "p".into();
        assert!(config.is_configured());
    }
}
