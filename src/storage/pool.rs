//! # Database Connection Pool Management
//!
//! Provides database connection pool creation and management utilities.

use crate::config::DatabaseConfig;
use crate::errors::{KeywardError, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Pool, Postgres};

/// Type alias for the database connection pool
pub type DbPool = Pool<Postgres>;

/// Create a database connection pool with the specified configuration
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    validate_config(config)?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.connect_timeout())
        .test_before_acquire(true)
        .connect(&config.url)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, url = %sanitize_url(&config.url), "Failed to create database pool");
            KeywardError::database(
                e,
                format!("Failed to connect to database: {}", sanitize_url(&config.url)),
            )
        })?;

    tracing::info!(
        max_connections = config.max_connections,
        connect_timeout_ms = config.connect_timeout().as_millis() as u64,
        "Database connection pool created"
    );

    if config.auto_migrate {
        tracing::info!("Auto-migration enabled, running database migrations");
        crate::storage::migrations::run_migrations(&pool).await?;
    }

    Ok(pool)
}

/// Validate database configuration
fn validate_config(config: &DatabaseConfig) -> Result<()> {
    if config.max_connections == 0 {
        return Err(KeywardError::validation("max_connections must be greater than 0"));
    }

    if config.url.is_empty() {
        return Err(KeywardError::validation("database URL cannot be empty"));
    }

    if !config.is_postgresql() {
        return Err(KeywardError::validation(
            "database URL must start with 'postgres://' or 'postgresql://'",
        ));
    }

    Ok(())
}

/// Strip the password from a connection URL for logging
pub fn sanitize_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((credentials, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _)) => format!("{}://{}:***@{}", scheme, user, host),
        None => format!("{}://{}@{}", scheme, credentials, host),
    }
}
