//! # Storage and Persistence
//!
//! Optional Postgres persistence for key backups and the secret audit log.
//! Without a `database` section both stay in process memory and logs.

pub mod migrations;
pub mod pool;
pub mod repositories;

#[cfg(all(test, feature = "postgres_tests"))]
pub mod test_helpers;

pub use crate::config::DatabaseConfig;

pub use migrations::get_migration_version;
pub use pool::{create_pool, DbPool};
pub use repositories::{AuditLogRow, PgAuditSink, PgBackupStore};

use crate::errors::{KeywardError, Result};

/// Run database migrations
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    migrations::run_migrations(pool).await
}

/// Check database connectivity
pub async fn check_connection(pool: &DbPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .map_err(|e| KeywardError::database(e, "Database connectivity check failed"))?;

    Ok(())
}
