//! Zero-downtime key rotation.
//!
//! A rotation replaces the primary signing key and the encryption key as a
//! saga:
//!
//! 1. **Generate** fresh random values and check their strength.
//! 2. **Back up** the current live values.
//! 3. **Stage** the new values under `NEW_<KEY>`.
//! 4. **Verify** the staged values by reading them back past the cache.
//! 5. **Activate**: copy the old value to `OLD_<KEY>`, then write the live slot.
//! 6. **Notify** the operator and write one audit event per key.
//!
//! Live slots are untouched until step 5, so a failure in steps 1-4 leaves
//! the running service on its current keys. A failure in step 5 may leave
//! the slots mixed and is reported with the backup id for [`KeyRotationCoordinator::rollback`].

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use super::backup::{BackupStore, KeyBackup};
use crate::config::RotationConfig;
use crate::observability::MetricsRecorder;
use crate::secrets::audit::AuditAction;
use crate::secrets::notify::{Alert, Severity};
use crate::secrets::strength::{self, MIN_GENERATED_ENTROPY_BITS};
use crate::secrets::{Result, SecretStore, SecretString, SecretsError};

/// Prefix of the slot new values are staged in.
pub const STAGING_PREFIX: &str = "NEW_";
/// Prefix of the slot the replaced value is kept in.
pub const PREVIOUS_PREFIX: &str = "OLD_";

/// Saga progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationState {
    Idle,
    Generating,
    BackingUp,
    Staging,
    Verifying,
    Activating,
    Completed,
    Failed,
}

impl fmt::Display for RotationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Generating => "generating",
            Self::BackingUp => "backing_up",
            Self::Staging => "staging",
            Self::Verifying => "verifying",
            Self::Activating => "activating",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationTrigger {
    Scheduled,
    Manual,
}

impl fmt::Display for RotationTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled => f.write_str("scheduled"),
            Self::Manual => f.write_str("manual"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RotationRequest {
    pub triggered_by: RotationTrigger,
    pub reason: String,
}

impl RotationRequest {
    pub fn manual(reason: impl Into<String>) -> Self {
        Self { triggered_by: RotationTrigger::Manual, reason: reason.into() }
    }

    pub fn scheduled() -> Self {
        Self { triggered_by: RotationTrigger::Scheduled, reason: "scheduled rotation".to_string() }
    }
}

/// Result of a completed rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationOutcome {
    pub backup_id: Uuid,
    pub rotated_keys: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Result of a rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackOutcome {
    pub backup_id: Uuid,
    /// Keys written back; keys without a previous value are skipped.
    pub restored_keys: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Runs the rotation saga against a [`SecretStore`].
pub struct KeyRotationCoordinator {
    store: SecretStore,
    backups: Arc<dyn BackupStore>,
    config: RotationConfig,
    lock: Mutex<()>,
    state_tx: watch::Sender<RotationState>,
    metrics: MetricsRecorder,
}

impl fmt::Debug for KeyRotationCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRotationCoordinator")
            .field("state", &self.state())
            .field("primary_key", &self.config.primary_key)
            .field("encryption_key", &self.config.encryption_key)
            .finish()
    }
}

impl KeyRotationCoordinator {
    pub fn new(store: SecretStore, backups: Arc<dyn BackupStore>, config: RotationConfig) -> Self {
        let (state_tx, _) = watch::channel(RotationState::Idle);
        Self { store, backups, config, lock: Mutex::new(()), state_tx, metrics: MetricsRecorder::new() }
    }

    /// Current saga state.
    pub fn state(&self) -> RotationState {
        *self.state_tx.borrow()
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<RotationState> {
        self.state_tx.subscribe()
    }

    /// Whether a rotation or rollback currently holds the lock.
    pub fn is_rotating(&self) -> bool {
        self.lock.try_lock().is_err()
    }

    fn set_state(&self, state: RotationState) {
        self.state_tx.send_replace(state);
    }

    fn rotated_keys(&self) -> [&str; 2] {
        [self.config.primary_key.as_str(), self.config.encryption_key.as_str()]
    }

    /// Run the full saga. Fails immediately with `RotationInProgress` when
    /// another rotation or rollback is running.
    #[instrument(skip(self), fields(trigger = %request.triggered_by))]
    pub async fn rotate(&self, request: RotationRequest) -> Result<RotationOutcome> {
        let _lock = self.lock.try_lock().map_err(|_| SecretsError::RotationInProgress)?;

        info!(reason = %request.reason, "Starting key rotation");

        self.set_state(RotationState::Generating);
        let generated = self
            .rotated_keys()
            .iter()
            .map(|key| self.generate_key(key).map(|value| (key.to_string(), value)))
            .collect::<Result<Vec<_>>>();
        let new_values = match generated {
            Ok(values) => values,
            Err(e) => return Err(self.abort(e)),
        };

        self.set_state(RotationState::BackingUp);
        let backup = match self.create_backup().await {
            Ok(backup) => backup,
            Err(e) => return Err(self.abort(e)),
        };

        let mut flagged = Vec::new();
        for key in self.rotated_keys() {
            flagged.push(key.to_string());
            flagged.push(format!("{}{}", STAGING_PREFIX, key));
            flagged.push(format!("{}{}", PREVIOUS_PREFIX, key));
        }
        let _flags = self.store.mark_rotating(flagged);

        match self.stage_verify_activate(&backup, &new_values).await {
            Ok(()) => {
                self.set_state(RotationState::Completed);
                let outcome = RotationOutcome {
                    backup_id: backup.id,
                    rotated_keys: new_values.iter().map(|(key, _)| key.clone()).collect(),
                    completed_at: Utc::now(),
                };

                for (key, value) in &new_values {
                    let event = self
                        .store
                        .audit()
                        .event(AuditAction::SecretRotated, key, self.store.backend().as_str(), Some(value))
                        .with_backup(backup.id);
                    self.store.audit().record(event).await;
                }

                self.metrics.record_rotation("completed");
                info!(backup_id = %backup.id, reason = %request.reason, "Key rotation completed");

                let alert = Alert::new(
                    "Key rotation completed",
                    format!("Rotated {} keys ({})", outcome.rotated_keys.len(), request.reason),
                    Severity::Info,
                    serde_json::json!({
                        "backup_id": backup.id,
                        "keys": outcome.rotated_keys,
                        "trigger": request.triggered_by,
                    }),
                );
                self.store.send_alert(&alert).await;

                Ok(outcome)
            }
            Err(e) => {
                self.set_state(RotationState::Failed);
                self.metrics.record_rotation("failed");

                for key in self.rotated_keys() {
                    let event = self
                        .store
                        .audit()
                        .event(AuditAction::SecretRotationFailed, key, self.store.backend().as_str(), None)
                        .with_backup(backup.id)
                        .with_error(e.to_string());
                    self.store.audit().record(event).await;
                }

                let alert = match &e {
                    SecretsError::RotationActivationFailed { key, .. } => {
                        error!(backup_id = %backup.id, key = %key, error = %e, "Key rotation activation failed");
                        Alert::new(
                            "Key rotation activation failed",
                            format!(
                                "Live keys may be inconsistent; roll back with backup {}: {}",
                                backup.id, e
                            ),
                            Severity::Critical,
                            serde_json::json!({ "backup_id": backup.id, "key": key }),
                        )
                    }
                    _ => {
                        error!(backup_id = %backup.id, error = %e, "Key rotation failed before activation");
                        Alert::new(
                            "Key rotation failed",
                            format!("Live keys are unchanged: {}", e),
                            Severity::High,
                            serde_json::json!({ "backup_id": backup.id }),
                        )
                    }
                };
                self.store.send_alert(&alert).await;

                Err(e)
            }
        }
    }

    /// Abort before anything was written.
    fn abort(&self, error: SecretsError) -> SecretsError {
        warn!(error = %error, "Key rotation aborted");
        self.set_state(RotationState::Idle);
        self.metrics.record_rotation("aborted");
        error
    }

    fn generate_key(&self, key: &str) -> Result<SecretString> {
        let mut bytes = Zeroizing::new(vec![0u8; self.config.generated_key_bytes]);
        OsRng.fill_bytes(&mut bytes);
        let encoded = URL_SAFE_NO_PAD.encode(&*bytes);

        if let Some(reason) = strength::weakness_reason(&encoded) {
            return Err(SecretsError::weak_secret(key, reason));
        }
        let bits = strength::estimated_entropy_bits(&encoded);
        if bits < MIN_GENERATED_ENTROPY_BITS {
            return Err(SecretsError::weak_secret(
                key,
                format!("estimated entropy {:.0} bits is below {:.0}", bits, MIN_GENERATED_ENTROPY_BITS),
            ));
        }

        Ok(SecretString::new(encoded))
    }

    async fn create_backup(&self) -> Result<KeyBackup> {
        let primary = self
            .store
            .refresh(&self.config.primary_key)
            .await
            .map_err(|e| SecretsError::backup_failed(format!("reading {}: {}", self.config.primary_key, e)))?;
        let encryption = self
            .store
            .refresh(&self.config.encryption_key)
            .await
            .map_err(|e| SecretsError::backup_failed(format!("reading {}: {}", self.config.encryption_key, e)))?;

        let backup = KeyBackup::new(primary, encryption, self.config.backup_window());
        self.backups.save(&backup).await.map_err(|e| SecretsError::backup_failed(e.to_string()))?;

        info!(backup_id = %backup.id, expires_at = %backup.expires_at, "Recorded key backup");
        Ok(backup)
    }

    async fn stage_verify_activate(
        &self,
        backup: &KeyBackup,
        new_values: &[(String, SecretString)],
    ) -> Result<()> {
        self.set_state(RotationState::Staging);
        for (key, value) in new_values {
            self.store.write(&format!("{}{}", STAGING_PREFIX, key), value).await?;
        }

        self.set_state(RotationState::Verifying);
        for (key, value) in new_values {
            let staged_key = format!("{}{}", STAGING_PREFIX, key);
            match self.store.refresh(&staged_key).await {
                Ok(Some(staged)) if staged == *value => {}
                Ok(Some(_)) => {
                    return Err(SecretsError::verification_failed(key, "staged value does not match"))
                }
                Ok(None) => return Err(SecretsError::verification_failed(key, "staged value is missing")),
                Err(e) => return Err(SecretsError::verification_failed(key, e.to_string())),
            }
        }

        self.set_state(RotationState::Activating);
        let previous = [
            backup.previous_primary_secret.as_ref(),
            backup.previous_encryption_key.as_ref(),
        ];
        for ((key, value), previous) in new_values.iter().zip(previous) {
            if let Some(previous) = previous {
                self.store
                    .write(&format!("{}{}", PREVIOUS_PREFIX, key), previous)
                    .await
                    .map_err(|e| SecretsError::activation_failed(key, backup.id, e.to_string()))?;
            }
            self.store
                .write(key, value)
                .await
                .map_err(|e| SecretsError::activation_failed(key, backup.id, e.to_string()))?;
        }

        Ok(())
    }

    /// Restore the live slots from a backup inside its window.
    #[instrument(skip(self))]
    pub async fn rollback(&self, backup_id: Uuid, reason: &str) -> Result<RollbackOutcome> {
        let _lock = self.lock.try_lock().map_err(|_| SecretsError::RotationInProgress)?;

        let backup = self
            .backups
            .find(backup_id)
            .await?
            .ok_or(SecretsError::BackupNotFound { id: backup_id })?;

        if backup.is_expired_at(Utc::now()) {
            warn!(backup_id = %backup_id, expires_at = %backup.expires_at, "Refusing rollback to expired backup");
            return Err(SecretsError::BackupExpired { id: backup_id });
        }
        if !backup.verify_checksum() {
            error!(backup_id = %backup_id, "Key backup failed its integrity check");
            return Err(SecretsError::BackupCorrupted { id: backup_id });
        }

        let _flags =
            self.store.mark_rotating(self.rotated_keys().iter().map(|key| key.to_string()).collect());

        let previous = [
            backup.previous_primary_secret.as_ref(),
            backup.previous_encryption_key.as_ref(),
        ];
        let mut restored_keys = Vec::new();
        for (key, previous) in self.rotated_keys().into_iter().zip(previous) {
            let Some(previous) = previous else {
                info!(key = %key, "No previous value in backup, leaving key as is");
                continue;
            };

            if let Err(e) = self.store.write(key, previous).await {
                let error = SecretsError::activation_failed(key, backup_id, e.to_string());
                self.metrics.record_rotation("rollback_failed");
                let alert = Alert::new(
                    "Key rollback failed",
                    error.to_string(),
                    Severity::Critical,
                    serde_json::json!({ "backup_id": backup_id, "key": key, "restored": restored_keys }),
                );
                self.store.send_alert(&alert).await;
                return Err(error);
            }

            let event = self
                .store
                .audit()
                .event(AuditAction::SecretRotated, key, self.store.backend().as_str(), Some(previous))
                .with_backup(backup_id);
            self.store.audit().record(event).await;
            restored_keys.push(key.to_string());
        }

        self.metrics.record_rotation("rolled_back");
        warn!(backup_id = %backup_id, reason = %reason, restored = ?restored_keys, "Rolled back key rotation");

        let alert = Alert::new(
            "Key rotation rolled back",
            format!("Restored {} keys from backup {}: {}", restored_keys.len(), backup_id, reason),
            Severity::Warning,
            serde_json::json!({ "backup_id": backup_id, "keys": restored_keys }),
        );
        self.store.send_alert(&alert).await;

        Ok(RollbackOutcome { backup_id, restored_keys, completed_at: Utc::now() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rotation::backup::InMemoryBackupStore;
    use crate::secrets::providers::{EnvProvider, EnvProviderConfig};
    use crate::secrets::{MemoryAuditSink, StoreSettings, TracingNotifier};

    fn coordinator(config: RotationConfig) -> KeyRotationCoordinator {
        let provider = Arc::new(
            EnvProvider::new(EnvProviderConfig { prefix: "KWTEST_COORD_".to_string(), mirror_file: None })
                .unwrap(),
        );
        let settings = StoreSettings::new(
            SecretString::new("coordinator-encryption-source-012345678"),
            SecretString::new("coordinator-audit-source-0123456789abcd"),
        );
        let store = SecretStore::new(
            provider,
            settings,
            Arc::new(MemoryAuditSink::new()),
            Arc::new(TracingNotifier),
        )
        .unwrap();
        KeyRotationCoordinator::new(store, Arc::new(InMemoryBackupStore::new()), config)
    }

    #[test]
    fn test_generated_keys_pass_strength_policy() {
        let coordinator = coordinator(RotationConfig::default());
        let a = coordinator.generate_key("JWT_SECRET").unwrap();
        let b = coordinator.generate_key("JWT_SECRET").unwrap();

        assert_eq!(a.len(), 64);
        assert!(!strength::is_weak(a.expose_secret()));
        assert_ne!(a, b);
        assert!(a.expose_secret().chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_short_generated_key_is_rejected() {
        let coordinator =
            coordinator(RotationConfig { generated_key_bytes: 16, ..Default::default() });
        let err = coordinator.generate_key("JWT_SECRET").unwrap_err();
        assert!(matches!(err, SecretsError::WeakSecretDetected { .. }));
    }

    #[tokio::test]
    async fn test_generation_failure_returns_to_idle() {
        let coordinator =
            coordinator(RotationConfig { generated_key_bytes: 16, ..Default::default() });
        let err = coordinator.rotate(RotationRequest::manual("test")).await.unwrap_err();
        assert!(matches!(err, SecretsError::WeakSecretDetected { .. }));
        assert_eq!(coordinator.state(), RotationState::Idle);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(RotationState::BackingUp.to_string(), "backing_up");
        assert_eq!(RotationTrigger::Scheduled.to_string(), "scheduled");
        assert_eq!(
            serde_json::to_string(&RotationState::Completed).unwrap(),
            "\"completed\""
        );
    }
}
