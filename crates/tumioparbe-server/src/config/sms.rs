//! SMS provider configuration.

use serde::Deserialize;

use super::flag;

/// Greenweb SMS gateway settings.
///
/// - `SMS_ENABLED`: Send real messages (default: False)
/// - `GREENWEB_API_TOKEN`: Provider token
/// - `SMS_API_KEY`: Fallback token when `GREENWEB_API_TOKEN` is empty
/// - `SMS_SENDER_ID`: Masking sender id, sent when present
/// - `SMS_BASE_URL`: Provider base URL (default: http://api.greenweb.com.bd)
#[derive(Debug, Clone, Deserialize)]
pub struct SmsConfig {
    #[serde(default, deserialize_with = "flag")]
    pub sms_enabled: bool,

    #[serde(default)]
    pub greenweb_api_token: String,

    #[serde(default)]
    pub sms_api_key: String,

    #[serde(default)]
    pub sms_sender_id: Option<String>,

    #[serde(default = "default_base_url")]
    pub sms_base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub sms_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://api.greenweb.com.bd".to_string()
}

fn default_timeout() -> u64 {
    10
}

impl SmsConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env::<SmsConfig>()
    }

    /// Token sent to the provider.
    pub fn token(&self) -> &str {
        if self.greenweb_api_token.is_empty() {
            &self.sms_api_key
        } else {
            &self.greenweb_api_token
        }
    }
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            sms_enabled: false,
            greenweb_api_token: String::new(),
            sms_api_key: String::new(),
            sms_sender_id: None,
            sms_base_url: default_base_url(),
            sms_timeout_secs: default_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_fallback() {
        let mut config = SmsConfig {
            sms_api_key: "key".to_string(),
            ..SmsConfig::default()
        };
        assert_eq!(config.token(), "key");
        config.greenweb_api_token = "greenweb".to_string();
        assert_eq!(config.token(), "greenweb");
    }
}
