//! Application configuration for the TumioParbe server.

use serde::Deserialize;

use super::{comma_list, flag};
use crate::error::{AppError, AppResult};

/// Development-only signing key, used when `SECRET_KEY` is unset and `DEBUG`
/// is on.
const DEV_SECRET_KEY: &str = "tumioparbe-insecure-development-key";

/// Application configuration loaded from environment variables.
///
/// - `DEBUG`: Development mode; echoes OTPs in responses (default: False)
/// - `SECRET_KEY`: JWT signing key (required unless `DEBUG`)
/// - `ALLOWED_HOSTS`: Comma-separated `Host` header allow-list
/// - `CORS_ALLOWED_ORIGINS`: Comma-separated origins for CORS
/// - `ADMIN_PHONE_NUMBERS`: Phones promoted to admin on registration
/// - `HOST` / `PORT`: Bind address (default: 0.0.0.0:8000)
/// - `STATIC_ROOT`, `STATICFILES_DIRS`, `MEDIA_ROOT`: File serving roots
/// - `FRONTEND_BASE_URL`: Base for the bKash redirect targets
/// - `BKASH_CALLBACK_SUCCESS_URL` / `_FAILURE_URL` / `_CANCEL_URL`
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Development mode
    #[serde(default, deserialize_with = "flag")]
    pub debug: bool,

    /// JWT signing key
    #[serde(default)]
    pub secret_key: Option<String>,

    /// Accepted `Host` header values; empty accepts any
    #[serde(default, deserialize_with = "comma_list")]
    pub allowed_hosts: Vec<String>,

    /// Origins allowed by CORS; empty allows none
    #[serde(default, deserialize_with = "comma_list")]
    pub cors_allowed_origins: Vec<String>,

    /// Phone numbers that register as administrators
    #[serde(default, deserialize_with = "comma_list")]
    pub admin_phone_numbers: Vec<String>,

    /// Server bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Destination of `collectstatic`, served under `/static`
    #[serde(default = "default_static_root")]
    pub static_root: String,

    /// Source directories for `collectstatic`
    #[serde(default = "default_staticfiles_dirs", deserialize_with = "comma_list")]
    pub staticfiles_dirs: Vec<String>,

    /// Uploaded media, served under `/media`
    #[serde(default = "default_media_root")]
    pub media_root: String,

    /// Frontend base URL
    #[serde(default = "default_frontend_base_url")]
    pub frontend_base_url: String,

    #[serde(default)]
    pub bkash_callback_success_url: Option<String>,

    #[serde(default)]
    pub bkash_callback_failure_url: Option<String>,

    #[serde(default)]
    pub bkash_callback_cancel_url: Option<String>,

    /// Access token lifetime in minutes
    #[serde(default = "default_access_minutes")]
    pub access_token_lifetime_minutes: i64,

    /// Refresh token lifetime in days
    #[serde(default = "default_refresh_days")]
    pub refresh_token_lifetime_days: i64,

    /// Run the daily invoice/reminder scheduler inside `runserver`
    #[serde(default = "default_true", deserialize_with = "flag")]
    pub scheduler_enabled: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_static_root() -> String {
    "staticfiles".to_string()
}

fn default_staticfiles_dirs() -> Vec<String> {
    vec!["static".to_string()]
}

fn default_media_root() -> String {
    "media".to_string()
}

fn default_frontend_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_access_minutes() -> i64 {
    60
}

fn default_refresh_days() -> i64 {
    7
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env::<AppConfig>()
    }

    /// Get the server bind address as a string suitable for `TcpListener::bind`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Key used to sign JWTs.
    ///
    /// A missing `SECRET_KEY` is only tolerated in debug mode.
    pub fn signing_key(&self) -> AppResult<String> {
        match self.secret_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key.to_string()),
            _ if self.debug => {
                tracing::warn!("SECRET_KEY not set, using development key (DEBUG=True)");
                Ok(DEV_SECRET_KEY.to_string())
            }
            _ => Err(AppError::Config(
                "SECRET_KEY must be set when DEBUG is off".to_string(),
            )),
        }
    }

    /// Whether `phone` is on the admin allow-list.
    pub fn is_admin_phone(&self, phone: &str) -> bool {
        self.admin_phone_numbers.iter().any(|p| p == phone)
    }

    /// Whether a request `Host` header is accepted.
    ///
    /// The port is ignored; `*` and an empty list accept everything, and a
    /// leading dot matches the domain and all of its subdomains.
    pub fn is_host_allowed(&self, host: &str) -> bool {
        if self.allowed_hosts.is_empty() {
            return true;
        }
        let host = host_without_port(host).to_ascii_lowercase();
        self.allowed_hosts.iter().any(|allowed| {
            let allowed = allowed.to_ascii_lowercase();
            if allowed == "*" {
                true
            } else if let Some(domain) = allowed.strip_prefix('.') {
                host == domain || host.ends_with(&allowed)
            } else {
                host == allowed
            }
        })
    }

    pub fn callback_success_url(&self) -> String {
        self.bkash_callback_success_url
            .clone()
            .unwrap_or_else(|| format!("{}/payment/success", self.frontend_base_url))
    }

    pub fn callback_failure_url(&self) -> String {
        self.bkash_callback_failure_url
            .clone()
            .unwrap_or_else(|| format!("{}/payment/failure", self.frontend_base_url))
    }

    pub fn callback_cancel_url(&self) -> String {
        self.bkash_callback_cancel_url
            .clone()
            .unwrap_or_else(|| format!("{}/payment/cancel", self.frontend_base_url))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            debug: false,
            secret_key: None,
            allowed_hosts: Vec::new(),
            cors_allowed_origins: Vec::new(),
            admin_phone_numbers: Vec::new(),
            host: default_host(),
            port: default_port(),
            static_root: default_static_root(),
            staticfiles_dirs: default_staticfiles_dirs(),
            media_root: default_media_root(),
            frontend_base_url: default_frontend_base_url(),
            bkash_callback_success_url: None,
            bkash_callback_failure_url: None,
            bkash_callback_cancel_url: None,
            access_token_lifetime_minutes: default_access_minutes(),
            refresh_token_lifetime_days: default_refresh_days(),
            scheduler_enabled: true,
        }
    }
}

/// Drop a trailing `:port`. IPv6 literals keep their brackets (`[::1]`).
fn host_without_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, _)) if !name.contains(':') => name,
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.bind_address(), "0.0.0.0:8000");
        assert!(!config.debug);
        assert_eq!(config.access_token_lifetime_minutes, 60);
    }

    #[test]
    fn test_signing_key_required_outside_debug() {
        let config = AppConfig::default();
        assert!(config.signing_key().is_err());

        let config = AppConfig {
            debug: true,
            ..AppConfig::default()
        };
        assert_eq!(config.signing_key().unwrap(), DEV_SECRET_KEY);

        let config = AppConfig {
            secret_key: Some("s3cret".to_string()),
            ..AppConfig::default()
        };
        assert_eq!(config.signing_key().unwrap(), "s3cret");
    }

    #[test]
    fn test_callback_urls_follow_frontend() {
        let config = AppConfig {
            frontend_base_url: "https://tumioparbe.com".to_string(),
            bkash_callback_cancel_url: Some("https://tumioparbe.com/oops".to_string()),
            ..AppConfig::default()
        };
        assert_eq!(
            config.callback_success_url(),
            "https://tumioparbe.com/payment/success"
        );
        assert_eq!(
            config.callback_failure_url(),
            "https://tumioparbe.com/payment/failure"
        );
        assert_eq!(config.callback_cancel_url(), "https://tumioparbe.com/oops");
    }

    #[test]
    fn test_allowed_hosts() {
        let config = AppConfig {
            allowed_hosts: vec!["api.tumioparbe.com".to_string(), ".local".to_string()],
            ..AppConfig::default()
        };
        assert!(config.is_host_allowed("api.tumioparbe.com:443"));
        assert!(config.is_host_allowed("dev.local"));
        assert!(config.is_host_allowed("local"));
        assert!(!config.is_host_allowed("evil.com"));
        assert!(AppConfig::default().is_host_allowed("anything"));
    }

    #[test]
    fn test_allowed_hosts_ipv6() {
        let config = AppConfig {
            allowed_hosts: vec!["[::1]".to_string(), "localhost".to_string()],
            ..AppConfig::default()
        };
        assert!(config.is_host_allowed("[::1]:8000"));
        assert!(config.is_host_allowed("[::1]"));
        assert!(config.is_host_allowed("localhost:8000"));
        assert!(!config.is_host_allowed("[::2]:8000"));
        assert!(!config.is_host_allowed("[::1"));

        assert_eq!(host_without_port("[fe80::1]:443"), "[fe80::1]");
        assert_eq!(host_without_port("example.com:8080"), "example.com");
        assert_eq!(host_without_port("example.com"), "example.com");
    }

    #[test]
    fn test_admin_phone() {
        let config = AppConfig {
            admin_phone_numbers: vec!["01712345678".to_string()],
            ..AppConfig::default()
        };
        assert!(config.is_admin_phone("01712345678"));
        assert!(!config.is_admin_phone("01812345678"));
    }
}
