//! Database configuration for the PostgreSQL connection.

use serde::Deserialize;

/// Database configuration loaded from environment variables.
///
/// - `DATABASE_URL`: Full connection URL
/// - `DB_MAX_CONNECTIONS`: Pool upper bound (default: 10)
/// - `DB_MIN_CONNECTIONS`: Pool lower bound (default: 1)
/// - `DB_ACQUIRE_TIMEOUT`: Seconds to wait for a connection (default: 30)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL
    #[serde(default = "default_url")]
    pub database_url: String,

    /// Maximum connections in the pool
    #[serde(default = "default_max_connections")]
    pub db_max_connections: u32,

    /// Minimum connections in the pool
    #[serde(default = "default_min_connections")]
    pub db_min_connections: u32,

    /// Connection acquire timeout in seconds
    #[serde(default = "default_acquire_timeout")]
    pub db_acquire_timeout: u64,
}

fn default_url() -> String {
    "postgres://postgres@localhost:5432/tumioparbe".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_acquire_timeout() -> u64 {
    30
}

impl DatabaseConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env::<DatabaseConfig>()
    }

    /// Connection URL with the password masked, for logging.
    pub fn redacted_url(&self) -> String {
        let Some((scheme, rest)) = self.database_url.split_once("://") else {
            return self.database_url.clone();
        };
        let Some((credentials, location)) = rest.rsplit_once('@') else {
            return self.database_url.clone();
        };
        match credentials.split_once(':') {
            Some((user, _)) => format!("{}://{}:****@{}", scheme, user, location),
            None => self.database_url.clone(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: default_url(),
            db_max_connections: default_max_connections(),
            db_min_connections: default_min_connections(),
            db_acquire_timeout: default_acquire_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DatabaseConfig::default();
        assert_eq!(
            config.database_url,
            "postgres://postgres@localhost:5432/tumioparbe"
        );
        assert_eq!(config.db_max_connections, 10);
    }

    #[test]
    fn test_redacted_url() {
        let config = DatabaseConfig {
            database_url: "postgres://lms:hunter2@db:5432/lms".to_string(),
            ..DatabaseConfig::default()
        };
        assert_eq!(config.redacted_url(), "postgres://lms:****@db:5432/lms");
        assert_eq!(
            DatabaseConfig::default().redacted_url(),
            "postgres://postgres@localhost:5432/tumioparbe"
        );
    }
}
