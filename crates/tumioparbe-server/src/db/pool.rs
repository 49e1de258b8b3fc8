//! Database connection pool management.

use crate::config::DatabaseConfig;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

/// Type alias for the PostgreSQL connection pool.
pub type DbPool = PgPool;

fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .min_connections(config.db_min_connections)
        .acquire_timeout(Duration::from_secs(config.db_acquire_timeout))
}

/// Create a new database connection pool.
///
/// # Errors
///
/// Returns an error if the connection pool cannot be created.
pub async fn create_pool(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    let pool = pool_options(config).connect(&config.database_url).await?;

    tracing::info!(
        url = %config.redacted_url(),
        max_connections = config.db_max_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

/// Create a pool that connects on first use.
///
/// Used by the router tests, which never reach the database.
pub fn create_lazy_pool(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    pool_options(config).connect_lazy(&config.database_url)
}

/// Check if the database connection is healthy.
pub async fn health_check(pool: &DbPool) -> bool {
    sqlx::query("SELECT 1").execute(pool).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lazy_pool_does_not_connect() {
        let config = DatabaseConfig {
            database_url: "postgres://nobody@127.0.0.1:1/none".to_string(),
            ..DatabaseConfig::default()
        };
        let pool = create_lazy_pool(&config).expect("lazy pool");
        assert_eq!(pool.size(), 0);
    }
}
