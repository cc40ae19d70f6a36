//! Postgres-backed key backup store.
//!
//! Previous key values are sealed with the store cipher before they are
//! written; the table never holds plaintext.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tracing::{debug, error};
use uuid::Uuid;

use crate::rotation::backup::{BackupStore, KeyBackup};
use crate::secrets::{Result, SecretCipher, SecretString, SecretsError};
use crate::storage::DbPool;

#[derive(Debug, Clone, FromRow)]
struct KeyBackupRow {
    id: Uuid,
    previous_primary_secret: Option<String>,
    previous_encryption_key: Option<String>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    checksum: String,
}

#[derive(Debug, Clone)]
pub struct PgBackupStore {
    pool: DbPool,
    cipher: SecretCipher,
}

impl PgBackupStore {
    pub fn new(pool: DbPool, cipher: SecretCipher) -> Self {
        Self { pool, cipher }
    }

    fn seal(&self, value: Option<&SecretString>) -> Result<Option<String>> {
        value.map(|value| self.cipher.seal_secret_base64(value)).transpose()
    }

    fn open(&self, id: Uuid, sealed: Option<&str>) -> Result<Option<SecretString>> {
        sealed
            .map(|sealed| {
                self.cipher.open_secret_base64(sealed).map_err(|e| {
                    error!(backup_id = %id, error = %e, "Failed to decrypt key backup");
                    SecretsError::BackupCorrupted { id }
                })
            })
            .transpose()
    }
}

#[async_trait]
impl BackupStore for PgBackupStore {
    async fn save(&self, backup: &KeyBackup) -> Result<()> {
        let primary = self.seal(backup.previous_primary_secret.as_ref())?;
        let encryption = self.seal(backup.previous_encryption_key.as_ref())?;

        sqlx::query(
            "INSERT INTO key_backups (id, previous_primary_secret, previous_encryption_key, created_at, expires_at, checksum) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(backup.id)
        .bind(primary)
        .bind(encryption)
        .bind(backup.created_at)
        .bind(backup.expires_at)
        .bind(&backup.checksum)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(backup_id = %backup.id, error = %e, "Failed to persist key backup");
            SecretsError::persistence(format!("Failed to persist key backup: {}", e))
        })?;

        debug!(backup_id = %backup.id, "Persisted key backup");
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<KeyBackup>> {
        let row = sqlx::query_as::<_, KeyBackupRow>(
            "SELECT id, previous_primary_secret, previous_encryption_key, created_at, expires_at, checksum \
             FROM key_backups WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!(backup_id = %id, error = %e, "Failed to load key backup");
            SecretsError::persistence(format!("Failed to load key backup: {}", e))
        })?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(KeyBackup {
            id: row.id,
            previous_primary_secret: self.open(row.id, row.previous_primary_secret.as_deref())?,
            previous_encryption_key: self.open(row.id, row.previous_encryption_key.as_deref())?,
            created_at: row.created_at,
            expires_at: row.expires_at,
            checksum: row.checksum,
        }))
    }

    async fn expired_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM key_backups WHERE expires_at < $1 ORDER BY expires_at",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SecretsError::persistence(format!("Failed to list expired backups: {}", e)))
    }
}
