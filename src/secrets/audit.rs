//! Tamper-evident audit trail for secret access.
//!
//! Every event carries a truncated SHA-256 fingerprint of the value and an
//! HMAC-SHA256 signature of that fingerprint. The HMAC key is derived from a
//! different source than the cache encryption key, so forging audit rows
//! requires a second compromise. Plaintext never leaves the recorder.
//!
//! Recording is best effort: sink failures and slow sinks are logged and
//! swallowed so auditing can never fail or stall the operation being audited.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::cipher::derive_key;
use super::error::{Result, SecretsError};
use super::types::SecretString;

type HmacSha256 = Hmac<Sha256>;

/// Hex characters kept from the SHA-256 digest.
pub const FINGERPRINT_LEN: usize = 16;

const AUDIT_KEY_DOMAIN: &[u8] = b"keyward:audit-key:v1";

/// Audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    SecretRead,
    SecretRotated,
    SecretRotationFailed,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SecretRead => "SECRET_READ",
            Self::SecretRotated => "SECRET_ROTATED",
            Self::SecretRotationFailed => "SECRET_ROTATION_FAILED",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single append-only audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub action: AuditAction,
    pub key: String,
    /// Empty when no value was involved (failed reads and failed rotations).
    pub fingerprint: String,
    pub signature: String,
    pub backend: String,
    pub timestamp: DateTime<Utc>,
    pub backup_id: Option<Uuid>,
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn with_backup(mut self, backup_id: Uuid) -> Self {
        self.backup_id = Some(backup_id);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// Destination for audit events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> Result<()>;
}

/// Writes audit events to the `keyward::audit` tracing target.
#[derive(Debug, Default, Clone)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<()> {
        tracing::info!(
            target: "keyward::audit",
            event_id = %event.id,
            action = %event.action,
            key = %event.key,
            fingerprint = %event.fingerprint,
            signature = %event.signature,
            backend = %event.backend,
            backup_id = ?event.backup_id,
            error = ?event.error,
            "secret audit event"
        );
        Ok(())
    }
}

/// Keeps audit events in memory. Used by tests and by embedders that
/// forward events elsewhere in batches.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: RwLock<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }

    pub async fn events_for(&self, action: AuditAction) -> Vec<AuditEvent> {
        self.events.read().await.iter().filter(|e| e.action == action).cloned().collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<()> {
        self.events.write().await.push(event.clone());
        Ok(())
    }
}

/// One-way fingerprint of a secret value: truncated hex SHA-256.
pub fn fingerprint(value: &SecretString) -> String {
    let digest = Sha256::digest(value.expose_secret().as_bytes());
    let mut encoded = hex::encode(digest);
    encoded.truncate(FINGERPRINT_LEN);
    encoded
}

/// Computes fingerprints and signatures and forwards events to a sink.
#[derive(Clone)]
pub struct AuditRecorder {
    mac: HmacSha256,
    sink: Arc<dyn AuditSink>,
    timeout: Duration,
}

impl fmt::Debug for AuditRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditRecorder")
            .field("mac", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl AuditRecorder {
    /// `timeout` bounds how long a slow sink may hold up the caller.
    pub fn new(
        audit_key_source: &SecretString,
        sink: Arc<dyn AuditSink>,
        timeout: Duration,
    ) -> Result<Self> {
        if audit_key_source.is_empty() {
            return Err(SecretsError::config_error("audit key source cannot be empty"));
        }

        let key = derive_key(AUDIT_KEY_DOMAIN, audit_key_source.expose_secret());
        let mac = <HmacSha256 as Mac>::new_from_slice(&key[..])
            .map_err(|e| SecretsError::config_error(format!("invalid audit key: {}", e)))?;

        Ok(Self { mac, sink, timeout })
    }

    /// Hex HMAC-SHA256 of `fingerprint` under the audit key.
    pub fn sign(&self, fingerprint: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(fingerprint.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time check that `signature` was produced by [`AuditRecorder::sign`].
    pub fn verify(&self, fingerprint: &str, signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(fingerprint.as_bytes());
        mac.verify_slice(&expected).is_ok()
    }

    /// Fingerprint and signature for `value`.
    pub fn seal_identity(&self, value: &SecretString) -> (String, String) {
        let fingerprint = fingerprint(value);
        let signature = self.sign(&fingerprint);
        (fingerprint, signature)
    }

    /// Build an event. `value` is `None` when the action involved no readable value.
    pub fn event(
        &self,
        action: AuditAction,
        key: &str,
        backend: &str,
        value: Option<&SecretString>,
    ) -> AuditEvent {
        let (fingerprint, signature) = match value {
            Some(value) => self.seal_identity(value),
            None => (String::new(), String::new()),
        };

        AuditEvent {
            id: Uuid::new_v4(),
            action,
            key: key.to_string(),
            fingerprint,
            signature,
            backend: backend.to_string(),
            timestamp: Utc::now(),
            backup_id: None,
            error: None,
        }
    }

    /// Forward `event` to the sink. Never fails.
    pub async fn record(&self, event: AuditEvent) {
        match tokio::time::timeout(self.timeout, self.sink.record(&event)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(
                    error = %e,
                    action = %event.action,
                    key = %event.key,
                    "Failed to record secrets audit event"
                );
            }
            Err(_) => {
                tracing::error!(
                    action = %event.action,
                    key = %event.key,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Timed out recording secrets audit event"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn record(&self, _event: &AuditEvent) -> Result<()> {
            Err(SecretsError::persistence("audit table unavailable"))
        }
    }

    struct StallingSink;

    #[async_trait]
    impl AuditSink for StallingSink {
        async fn record(&self, _event: &AuditEvent) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    }

    fn recorder(sink: Arc<dyn AuditSink>) -> AuditRecorder {
        AuditRecorder::new(
            &SecretString::new("audit-key-material-0123456789abcdef"),
            sink,
            Duration::from_millis(100),
        )
        .unwrap()
    }

    #[test]
    fn test_fingerprint_is_deterministic_and_truncated() {
        let value = SecretString::new("jwt-secret-value");
        let first = fingerprint(&value);
        assert_eq!(first, fingerprint(&value));
        assert_eq!(first.len(), FINGERPRINT_LEN);
        assert!(!first.contains("jwt"));
        assert_ne!(first, fingerprint(&SecretString::new("jwt-secret-valuf")));
    }

    #[test]
    fn test_sign_and_verify() {
        let recorder = recorder(Arc::new(MemoryAuditSink::new()));
        let fp = fingerprint(&SecretString::new("value"));
        let signature = recorder.sign(&fp);

        assert_eq!(signature.len(), 64);
        assert!(recorder.verify(&fp, &signature));
        assert!(!recorder.verify("0000000000000000", &signature));
        assert!(!recorder.verify(&fp, "not-hex"));
    }

    #[test]
    fn test_signature_depends_on_audit_key() {
        let a = recorder(Arc::new(MemoryAuditSink::new()));
        let b = AuditRecorder::new(
            &SecretString::new("a-different-audit-key-material-000"),
            Arc::new(MemoryAuditSink::new()),
            Duration::from_millis(100),
        )
        .unwrap();
        assert_ne!(a.sign("abcdef0123456789"), b.sign("abcdef0123456789"));
    }

    #[tokio::test]
    async fn test_event_never_contains_plaintext() {
        let sink = Arc::new(MemoryAuditSink::new());
        let recorder = recorder(sink.clone());
        let value = SecretString::new("plaintext-that-must-not-leak");

        let event = recorder.event(AuditAction::SecretRead, "API_KEY", "env", Some(&value));
        recorder.record(event).await;

        let events = sink.events().await;
        assert_eq!(events.len(), 1);
        let json = serde_json::to_string(&events[0]).unwrap();
        assert!(json.contains("SECRET_READ"));
        assert!(!json.contains("plaintext-that-must-not-leak"));
        assert!(recorder.verify(&events[0].fingerprint, &events[0].signature));
    }

    #[tokio::test]
    async fn test_sink_failure_is_swallowed() {
        let recorder = recorder(Arc::new(FailingSink));
        let event = recorder.event(AuditAction::SecretRotated, "JWT_SECRET", "env", None);
        recorder.record(event).await;
    }

    #[tokio::test]
    async fn test_stalled_sink_is_bounded() {
        let recorder = recorder(Arc::new(StallingSink));
        let event = recorder.event(AuditAction::SecretRead, "JWT_SECRET", "env", None);
        let finished =
            tokio::time::timeout(Duration::from_secs(2), recorder.record(event)).await;
        assert!(finished.is_ok());
    }

    #[test]
    fn test_empty_audit_key_rejected() {
        let err = AuditRecorder::new(
            &SecretString::new(""),
            Arc::new(TracingAuditSink),
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(err, SecretsError::Configuration { .. }));
    }

    #[test]
    fn test_action_serializes_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&AuditAction::SecretRotationFailed).unwrap(),
            "\"SECRET_ROTATION_FAILED\""
        );
        assert_eq!(AuditAction::SecretRotated.to_string(), "SECRET_ROTATED");
    }
}
