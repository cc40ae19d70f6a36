//! Pre-rotation key backups.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::secrets::audit::fingerprint;
use crate::secrets::{Result, SecretString};

/// Snapshot of the live key material taken before a rotation.
#[derive(Debug, Clone)]
pub struct KeyBackup {
    pub id: Uuid,
    /// `None` when the key had never been set.
    pub previous_primary_secret: Option<SecretString>,
    pub previous_encryption_key: Option<SecretString>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub checksum: String,
}

impl KeyBackup {
    /// Capture the given values; the backup is usable for `window`.
    pub fn new(
        previous_primary_secret: Option<SecretString>,
        previous_encryption_key: Option<SecretString>,
        window: TimeDelta,
    ) -> Self {
        let id = Uuid::new_v4();
        let created_at = Utc::now();
        let checksum = Self::compute_checksum(
            id,
            previous_primary_secret.as_ref(),
            previous_encryption_key.as_ref(),
        );

        Self {
            id,
            previous_primary_secret,
            previous_encryption_key,
            created_at,
            expires_at: created_at + window,
            checksum,
        }
    }

    /// SHA-256 hex over the id and the fingerprints of the captured values.
    pub fn compute_checksum(
        id: Uuid,
        primary: Option<&SecretString>,
        encryption: Option<&SecretString>,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(id.as_bytes());
        for value in [primary, encryption] {
            hasher.update([0u8]);
            match value {
                Some(value) => hasher.update(fingerprint(value).as_bytes()),
                None => hasher.update(b"-"),
            }
        }
        hex::encode(hasher.finalize())
    }

    pub fn verify_checksum(&self) -> bool {
        let expected = Self::compute_checksum(
            self.id,
            self.previous_primary_secret.as_ref(),
            self.previous_encryption_key.as_ref(),
        );
        expected == self.checksum
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Durable storage for key backups.
#[async_trait]
pub trait BackupStore: Send + Sync {
    async fn save(&self, backup: &KeyBackup) -> Result<()>;

    async fn find(&self, id: Uuid) -> Result<Option<KeyBackup>>;

    /// Ids of backups whose window closed before `cutoff`, for a retention job.
    async fn expired_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>>;
}

/// Process-local backup store, used when no database is configured.
#[derive(Debug, Default)]
pub struct InMemoryBackupStore {
    backups: RwLock<HashMap<Uuid, KeyBackup>>,
}

impl InMemoryBackupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.backups.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.backups.read().await.is_empty()
    }

    /// Overwrite a stored backup as-is, e.g. to simulate tampering in tests.
    pub async fn replace(&self, backup: KeyBackup) {
        self.backups.write().await.insert(backup.id, backup);
    }
}

#[async_trait]
impl BackupStore for InMemoryBackupStore {
    async fn save(&self, backup: &KeyBackup) -> Result<()> {
        self.backups.write().await.insert(backup.id, backup.clone());
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<KeyBackup>> {
        Ok(self.backups.read().await.get(&id).cloned())
    }

    async fn expired_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>> {
        Ok(self
            .backups
            .read()
            .await
            .values()
            .filter(|backup| backup.expires_at < cutoff)
            .map(|backup| backup.id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backup() -> KeyBackup {
        KeyBackup::new(
            Some(SecretString::new("old-primary")),
            None,
            TimeDelta::days(30),
        )
    }

    #[test]
    fn test_checksum_detects_tampering() {
        let mut backup = backup();
        assert!(backup.verify_checksum());

        backup.previous_primary_secret = Some(SecretString::new("attacker-value"));
        assert!(!backup.verify_checksum());
    }

    #[test]
    fn test_checksum_distinguishes_absent_slots() {
        let id = Uuid::new_v4();
        let value = SecretString::new("v");
        assert_ne!(
            KeyBackup::compute_checksum(id, Some(&value), None),
            KeyBackup::compute_checksum(id, None, Some(&value))
        );
    }

    #[test]
    fn test_expiry_window() {
        let backup = backup();
        assert_eq!(backup.expires_at - backup.created_at, TimeDelta::days(30));
        assert!(!backup.is_expired_at(Utc::now()));
        assert!(backup.is_expired_at(backup.expires_at));
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryBackupStore::new();
        let backup = backup();
        store.save(&backup).await.unwrap();

        let found = store.find(backup.id).await.unwrap().unwrap();
        assert_eq!(found.checksum, backup.checksum);
        assert!(store.find(Uuid::new_v4()).await.unwrap().is_none());

        assert!(store.expired_before(Utc::now()).await.unwrap().is_empty());
        let later = backup.expires_at + TimeDelta::seconds(1);
        assert_eq!(store.expired_before(later).await.unwrap(), vec![backup.id]);
    }
}
