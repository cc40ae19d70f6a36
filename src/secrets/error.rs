//! Error types for secret store and key rotation operations.

use thiserror::Error;
use uuid::Uuid;

/// Result type for secrets operations.
pub type Result<T> = std::result::Result<T, SecretsError>;

/// Errors that can occur in the secret pipeline and the rotation saga.
///
/// The type is `Clone` so a single provider failure can be handed to every
/// caller that joined the same in-flight fetch. Foreign errors are therefore
/// captured as messages rather than boxed sources.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecretsError {
    /// Backend unreachable or misconfigured.
    #[error("Secret provider '{backend}' unavailable: {message}")]
    ProviderUnavailable { backend: String, message: String },

    /// Backend call exceeded the configured timeout.
    #[error("Secret provider '{backend}' timed out during {operation} after {timeout_ms}ms")]
    ProviderTimeout { backend: String, operation: String, timeout_ms: u64 },

    /// Authentication with the secrets backend failed.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// Cached ciphertext failed authentication or was malformed.
    #[error("Failed to decrypt cached secret: {reason}")]
    DecryptionFailure { reason: String },

    /// Encrypting a value for the cache or a backup failed.
    #[error("Failed to encrypt secret: {reason}")]
    EncryptionFailure { reason: String },

    /// A required key is absent from every provider.
    #[error("Required secret is missing: {key}")]
    MissingSecret { key: String },

    /// A value is present but fails the strength policy.
    #[error("Secret '{key}' is too weak: {reason}")]
    WeakSecretDetected { key: String, reason: String },

    /// The startup gate found missing or weak critical secrets.
    #[error("Critical secrets unavailable (missing: [{}], weak: [{}])", .missing.join(", "), .weak.join(", "))]
    CriticalSecretsUnavailable { missing: Vec<String>, weak: Vec<String> },

    /// Another rotation currently holds the rotation lock.
    #[error("A key rotation is already in progress")]
    RotationInProgress,

    /// The pre-rotation backup could not be recorded.
    #[error("Failed to record key backup: {reason}")]
    BackupFailed { reason: String },

    /// No backup with the given id exists.
    #[error("Key backup {id} not found")]
    BackupNotFound { id: Uuid },

    /// The backup's rollback window has elapsed.
    #[error("Key backup {id} expired and can no longer be used for rollback")]
    BackupExpired { id: Uuid },

    /// The stored checksum does not match the backup contents.
    #[error("Key backup {id} failed its integrity check")]
    BackupCorrupted { id: Uuid },

    /// A staged value could not be read back or did not match.
    #[error("Rotation verification failed for '{key}': {reason}")]
    RotationVerificationFailed { key: String, reason: String },

    /// Writing the live slots failed; manual rollback may be required.
    #[error("Rotation activation failed for '{key}' (backup {backup_id}): {reason}")]
    RotationActivationFailed { key: String, backup_id: Uuid, reason: String },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Durable storage (backups, audit rows) failed.
    #[error("Persistence error: {message}")]
    Persistence { message: String },

    /// Serialization/deserialization error.
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// I/O error.
    #[error("I/O error: {message}")]
    Io { message: String },
}

impl SecretsError {
    /// Create a provider unavailable error.
    pub fn provider_unavailable(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProviderUnavailable { backend: backend.into(), message: message.into() }
    }

    /// Create a provider timeout error.
    pub fn provider_timeout(
        backend: impl Into<String>,
        operation: impl Into<String>,
        timeout_ms: u64,
    ) -> Self {
        Self::ProviderTimeout { backend: backend.into(), operation: operation.into(), timeout_ms }
    }

    /// Create an authentication failed error.
    pub fn authentication_failed(message: impl Into<String>) -> Self {
        Self::AuthenticationFailed { message: message.into() }
    }

    /// Create a decryption failure.
    pub fn decryption_failure(reason: impl Into<String>) -> Self {
        Self::DecryptionFailure { reason: reason.into() }
    }

    /// Create an encryption failure.
    pub fn encryption_failure(reason: impl Into<String>) -> Self {
        Self::EncryptionFailure { reason: reason.into() }
    }

    /// Create a missing secret error.
    pub fn missing_secret(key: impl Into<String>) -> Self {
        Self::MissingSecret { key: key.into() }
    }

    /// Create a weak secret error.
    pub fn weak_secret(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::WeakSecretDetected { key: key.into(), reason: reason.into() }
    }

    /// Create a backup failure.
    pub fn backup_failed(reason: impl Into<String>) -> Self {
        Self::BackupFailed { reason: reason.into() }
    }

    /// Create a verification failure.
    pub fn verification_failed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RotationVerificationFailed { key: key.into(), reason: reason.into() }
    }

    /// Create an activation failure.
    pub fn activation_failed(
        key: impl Into<String>,
        backup_id: Uuid,
        reason: impl Into<String>,
    ) -> Self {
        Self::RotationActivationFailed { key: key.into(), backup_id, reason: reason.into() }
    }

    /// Create a configuration error.
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Create a persistence error.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence { message: message.into() }
    }

    /// Whether the error came from talking to a backend, which makes the
    /// environment fallback worth trying on the read path.
    pub fn is_provider_failure(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable { .. }
                | Self::ProviderTimeout { .. }
                | Self::AuthenticationFailed { .. }
                | Self::Serialization { .. }
                | Self::Io { .. }
        )
    }
}

impl From<serde_json::Error> for SecretsError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization { message: error.to_string() }
    }
}

impl From<std::io::Error> for SecretsError {
    fn from(error: std::io::Error) -> Self {
        Self::Io { message: error.to_string() }
    }
}

impl From<sqlx::Error> for SecretsError {
    fn from(error: sqlx::Error) -> Self {
        Self::Persistence { message: error.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructors() {
        let err = SecretsError::missing_secret("JWT_SECRET");
        assert!(matches!(err, SecretsError::MissingSecret { .. }));
        assert_eq!(err.to_string(), "Required secret is missing: JWT_SECRET");

        let err = SecretsError::provider_unavailable("kv-store", "connection refused");
        assert!(err.is_provider_failure());

        let err = SecretsError::provider_timeout("cloud", "fetch", 5000);
        assert!(err.is_provider_failure());
        assert!(err.to_string().contains("5000ms"));
    }

    #[test]
    fn test_critical_secrets_display_lists_both() {
        let err = SecretsError::CriticalSecretsUnavailable {
            missing: vec!["A".to_string()],
            weak: vec!["B".to_string(), "C".to_string()],
        };
        assert_eq!(err.to_string(), "Critical secrets unavailable (missing: [A], weak: [B, C])");
    }

    #[test]
    fn test_rotation_errors_are_not_provider_failures() {
        let id = Uuid::new_v4();
        assert!(!SecretsError::activation_failed("JWT_SECRET", id, "write failed")
            .is_provider_failure());
        assert!(!SecretsError::verification_failed("JWT_SECRET", "mismatch").is_provider_failure());
        assert!(!SecretsError::RotationInProgress.is_provider_failure());
    }

    #[test]
    fn test_foreign_error_conversions() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: SecretsError = io_error.into();
        assert!(matches!(err, SecretsError::Io { .. }));

        let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: SecretsError = json_error.into();
        assert!(matches!(err, SecretsError::Serialization { .. }));
    }
}
