//! # Database Migration Management
//!
//! Migrations under `migrations/` are embedded in the binary at compile time
//! and applied on startup when `database.auto_migrate` is enabled.

use crate::errors::{KeywardError, Result};
use crate::storage::DbPool;
use sqlx::migrate::Migrator;
use tracing::{error, info};

/// Embedded migrator
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Apply all pending migrations
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    info!(available = MIGRATOR.iter().count(), "Running database migrations");

    MIGRATOR.run(pool).await.map_err(|e| {
        error!(error = %e, "Database migration failed");
        KeywardError::from(e)
    })?;

    info!("Database migrations completed");
    Ok(())
}

/// Highest applied migration version, if any
pub async fn get_migration_version(pool: &DbPool) -> Result<Option<i64>> {
    let version: Option<i64> =
        sqlx::query_scalar("SELECT MAX(version) FROM _sqlx_migrations WHERE success = true")
            .fetch_one(pool)
            .await
            .map_err(|e| KeywardError::database(e, "Failed to read migration version"))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_embedded_in_order() {
        let versions: Vec<i64> = MIGRATOR.iter().map(|m| m.version).collect();
        assert_eq!(versions.len(), 2);
        assert!(versions.windows(2).all(|pair| pair[0] < pair[1]));
    }
}
