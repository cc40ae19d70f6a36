//! Backend providers.
//!
//! A provider stores secret values somewhere outside the process. Exactly one
//! provider is active per store, chosen by [`build_provider`] from
//! configuration. The environment provider is always constructed as well and
//! serves as the terminal read fallback.
//!
//! Contract shared by every implementation:
//! - an absent key is `Ok(None)`, never an error
//! - network and auth failures are errors
//! - calls may block on I/O; the store bounds every call with a timeout

pub mod env;
pub mod gcp;
pub mod vault;

pub use env::{EnvProvider, EnvProviderConfig};
pub use gcp::CloudProviderConfig;
#[cfg(feature = "gcp")]
pub use gcp::CloudSecretProvider;
pub use vault::{KvStoreConfig, KvStoreProvider};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::error::{Result, SecretsError};
use super::types::SecretString;
use crate::config::SecretsConfig;

/// Which backend a provider talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Process environment plus an optional dev-only mirror file
    #[default]
    Env,
    /// Cloud secret manager (GCP Secret Manager)
    Cloud,
    /// KV store (HashiCorp Vault KV v2)
    KvStore,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Env => "env",
            Self::Cloud => "cloud",
            Self::KvStore => "kv-store",
        }
    }
}

impl FromStr for BackendKind {
    type Err = SecretsError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "env" => Ok(Self::Env),
            "cloud" => Ok(Self::Cloud),
            "kv-store" => Ok(Self::KvStore),
            _ => Err(SecretsError::config_error(format!("Unknown secret backend: {}", s))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability implemented by every secret backend.
#[async_trait]
pub trait BackendProvider: Send + Sync + fmt::Debug {
    /// Backend identifier used in logs, metrics and audit events.
    fn kind(&self) -> BackendKind;

    /// Fetch the current value of `key`; `Ok(None)` if it does not exist.
    async fn fetch(&self, key: &str) -> Result<Option<SecretString>>;

    /// Create or overwrite `key`.
    async fn write(&self, key: &str, value: &SecretString) -> Result<()>;

    /// Verify the backend is reachable and the credentials work.
    async fn health_check(&self) -> Result<()>;
}

/// Build the provider selected by `config.backend`.
///
/// Misconfigured or unavailable variants fail here rather than on first use.
pub async fn build_provider(config: &SecretsConfig) -> Result<Arc<dyn BackendProvider>> {
    match config.backend {
        BackendKind::Env => Ok(Arc::new(EnvProvider::new(config.env.clone())?)),
        BackendKind::KvStore => {
            let kv_config = config.kv_store.clone().ok_or_else(|| {
                SecretsError::config_error("backend 'kv-store' requires a [secrets.kv_store] section")
            })?;
            Ok(Arc::new(KvStoreProvider::new(kv_config)?))
        }
        BackendKind::Cloud => {
            let cloud_config = config.cloud.clone().ok_or_else(|| {
                SecretsError::config_error("backend 'cloud' requires a [secrets.cloud] section")
            })?;
            cloud_config.validate()?;
            build_cloud_provider(cloud_config).await
        }
    }
}

#[cfg(feature = "gcp")]
async fn build_cloud_provider(config: CloudProviderConfig) -> Result<Arc<dyn BackendProvider>> {
    Ok(Arc::new(CloudSecretProvider::new(config).await?))
}

#[cfg(not(feature = "gcp"))]
async fn build_cloud_provider(_config: CloudProviderConfig) -> Result<Arc<dyn BackendProvider>> {
    Err(SecretsError::config_error(
        "backend 'cloud' requires keyward to be built with the `gcp` feature",
    ))
}
