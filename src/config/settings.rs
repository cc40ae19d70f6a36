//! # Configuration Settings
//!
//! Defines the configuration structure for the keyward daemon.

use crate::errors::{KeywardError, Result};
use crate::secrets::notify::NotificationConfig;
use crate::secrets::providers::{BackendKind, CloudProviderConfig, EnvProviderConfig, KvStoreConfig};
use crate::secrets::store::StoreSettings;
use crate::secrets::SecretString;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Minimum length for the encryption and audit key sources.
pub const MIN_KEY_SOURCE_LEN: usize = 32;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
#[serde(default)]
pub struct KeywardConfig {
    /// Secret store configuration
    #[validate(nested)]
    pub secrets: SecretsConfig,

    /// Key rotation configuration
    #[validate(nested)]
    pub rotation: RotationConfig,

    /// Operator notifications
    pub notifications: NotificationConfig,

    /// Postgres persistence for backups and audit rows (in-memory when absent)
    #[validate(nested)]
    pub database: Option<DatabaseConfig>,

    /// Observability configuration
    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl KeywardConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(KeywardError::from)?;
        self.validate_custom()?;
        Ok(())
    }

    /// Checks that span fields or depend on the selected backend
    fn validate_custom(&self) -> Result<()> {
        let secrets = &self.secrets;

        if secrets.encryption_key_source.len() < MIN_KEY_SOURCE_LEN {
            return Err(KeywardError::validation_field(
                format!("Encryption key source must be at least {} characters long", MIN_KEY_SOURCE_LEN),
                "secrets.encryption_key_source",
            ));
        }

        if secrets.audit_key_source.len() < MIN_KEY_SOURCE_LEN {
            return Err(KeywardError::validation_field(
                format!("Audit key source must be at least {} characters long", MIN_KEY_SOURCE_LEN),
                "secrets.audit_key_source",
            ));
        }

        if secrets.audit_key_source == secrets.encryption_key_source {
            return Err(KeywardError::validation_field(
                "Audit key source must differ from the encryption key source",
                "secrets.audit_key_source",
            ));
        }

        match secrets.backend {
            BackendKind::KvStore if secrets.kv_store.is_none() => {
                return Err(KeywardError::validation_field(
                    "Backend 'kv-store' requires a secrets.kv_store section",
                    "secrets.kv_store",
                ));
            }
            BackendKind::Cloud if secrets.cloud.is_none() => {
                return Err(KeywardError::validation_field(
                    "Backend 'cloud' requires a secrets.cloud section",
                    "secrets.cloud",
                ));
            }
            _ => {}
        }

        if self.rotation.primary_key == self.rotation.encryption_key {
            return Err(KeywardError::validation(
                "Rotation primary and encryption keys must be different",
            ));
        }

        if let Some(database) = &self.database {
            if !database.is_postgresql() {
                return Err(KeywardError::validation_field(
                    "Database URL must start with 'postgres://' or 'postgresql://'",
                    "database.url",
                ));
            }
        }

        Ok(())
    }
}

/// Secret store configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SecretsConfig {
    /// Active backend
    pub backend: BackendKind,

    /// Cache TTL in seconds
    #[validate(range(min = 1, max = 86400, message = "Default TTL must be between 1 second and 24 hours"))]
    pub default_ttl_seconds: u64,

    /// Background refresh interval in seconds (defaults to twice the TTL)
    #[validate(range(min = 1, message = "Refresh interval must be at least 1 second"))]
    pub refresh_interval_seconds: Option<u64>,

    /// Timeout for a single provider call
    #[validate(range(min = 1, max = 60, message = "Provider timeout must be between 1 and 60 seconds"))]
    pub provider_timeout_seconds: u64,

    /// Material the cache encryption key is derived from
    pub encryption_key_source: SecretString,

    /// Material the audit HMAC key is derived from
    pub audit_key_source: SecretString,

    /// Keys checked by the startup gate
    pub critical_secrets: Vec<String>,

    /// Environment provider settings, also used for the read fallback
    pub env: EnvProviderConfig,

    /// Vault KV v2 settings
    pub kv_store: Option<KvStoreConfig>,

    /// GCP Secret Manager settings
    pub cloud: Option<CloudProviderConfig>,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Env,
            default_ttl_seconds: 300, // 5 minutes
            refresh_interval_seconds: None,
            provider_timeout_seconds: 5,
            encryption_key_source: SecretString::new(""),
            audit_key_source: SecretString::new(""),
            critical_secrets: vec![],
            env: EnvProviderConfig::default(),
            kv_store: None,
            cloud: None,
        }
    }
}

impl SecretsConfig {
    /// Get cache TTL as Duration
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }

    /// Get refresh interval as Duration
    pub fn refresh_interval(&self) -> Duration {
        match self.refresh_interval_seconds {
            Some(seconds) => Duration::from_secs(seconds),
            None => self.default_ttl() * 2,
        }
    }

    /// Get provider timeout as Duration
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_seconds)
    }

    /// Runtime settings for [`crate::secrets::SecretStore`]
    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            default_ttl: self.default_ttl(),
            refresh_interval: self.refresh_interval(),
            provider_timeout: self.provider_timeout(),
            encryption_key_source: self.encryption_key_source.clone(),
            audit_key_source: self.audit_key_source.clone(),
            env_fallback: self.env.clone(),
        }
    }
}

/// Key rotation configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RotationConfig {
    /// How long a backup stays usable for rollback
    #[validate(range(min = 1, max = 365, message = "Backup window must be between 1 and 365 days"))]
    pub backup_window_days: u32,

    /// Signing key slot
    #[validate(length(min = 1, message = "Primary key name cannot be empty"))]
    pub primary_key: String,

    /// Encryption key slot
    #[validate(length(min = 1, message = "Encryption key name cannot be empty"))]
    pub encryption_key: String,

    /// Random bytes per generated key
    #[validate(range(min = 24, max = 512, message = "Generated key size must be between 24 and 512 bytes"))]
    pub generated_key_bytes: usize,

    /// Scheduled rotation interval in hours (disabled when unset)
    #[validate(range(min = 1, message = "Schedule interval must be at least 1 hour"))]
    pub schedule_interval_hours: Option<u64>,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            backup_window_days: 30,
            primary_key: "JWT_SECRET".to_string(),
            encryption_key: "ENCRYPTION_KEY".to_string(),
            generated_key_bytes: 48,
            schedule_interval_hours: None,
        }
    }
}

impl RotationConfig {
    /// Get backup window as a chrono delta
    pub fn backup_window(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::days(i64::from(self.backup_window_days))
    }

    /// Get schedule interval as Duration (None if disabled)
    pub fn schedule_interval(&self) -> Option<Duration> {
        self.schedule_interval_hours.map(|hours| Duration::from_secs(hours * 3600))
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database connection URL
    #[validate(length(min = 1, message = "Database URL cannot be empty"))]
    pub url: String,

    /// Maximum number of connections in the pool
    #[validate(range(min = 1, max = 100, message = "Max connections must be between 1 and 100"))]
    pub max_connections: u32,

    /// Connection timeout in seconds
    #[validate(range(
        min = 1,
        max = 60,
        message = "Connect timeout must be between 1 and 60 seconds"
    ))]
    pub connect_timeout_seconds: u64,

    /// Enable automatic migrations
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/keyward".to_string(),
            max_connections: 5,
            connect_timeout_seconds: 10,
            auto_migrate: true,
        }
    }
}

impl DatabaseConfig {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Check if this is a PostgreSQL configuration
    pub fn is_postgresql(&self) -> bool {
        self.url.starts_with("postgresql://") || self.url.starts_with("postgres://")
    }
}

/// Logging and metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level or `EnvFilter` directive (overridden by `RUST_LOG`)
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,

    /// Enable the Prometheus exporter
    pub enable_metrics: bool,

    /// Metrics server port (0 = disabled)
    pub metrics_port: u16,

    /// Service name attached to metrics
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logging: false,
            enable_metrics: true,
            metrics_port: 9090,
            service_name: "keyward".to_string(),
        }
    }
}

impl ObservabilityConfig {
    /// Get metrics bind address (None if disabled)
    pub fn metrics_bind_address(&self) -> Option<String> {
        if !self.enable_metrics || self.metrics_port == 0 {
            None
        } else {
            Some(format!("0.0.0.0:{}", self.metrics_port))
        }
    }
}
