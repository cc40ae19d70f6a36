//! KV store provider backed by HashiCorp Vault's KV v2 engine.
//!
//! Each secret lives at `<mount_path>/<key>` as `{"value": "<secret>"}`, so
//! values written by other tooling with the same convention are readable.
//! Construction validates the configuration and builds the HTTP client but
//! performs no I/O; reachability is reported by `health_check`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, error, info, instrument};
use vaultrs::client::{VaultClient, VaultClientSettingsBuilder};
use vaultrs::error::ClientError;
use vaultrs::kv2;

use super::{BackendKind, BackendProvider};
use crate::secrets::error::{Result, SecretsError};
use crate::secrets::types::SecretString;

const VALUE_FIELD: &str = "value";

/// Configuration for the Vault KV v2 backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvStoreConfig {
    /// Vault server address (e.g., "https://vault.example.com:8200")
    pub address: String,

    /// Vault token
    pub token: Option<SecretString>,

    /// Vault namespace (Enterprise multi-tenancy)
    #[serde(default)]
    pub namespace: Option<String>,

    /// KV v2 mount path
    #[serde(default = "default_mount_path")]
    pub mount_path: String,
}

fn default_mount_path() -> String {
    "secret".to_string()
}

impl Default for KvStoreConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8200".to_string(),
            token: None,
            namespace: None,
            mount_path: default_mount_path(),
        }
    }
}

/// Vault KV v2 provider.
pub struct KvStoreProvider {
    client: VaultClient,
    address: String,
    mount_path: String,
}

impl std::fmt::Debug for KvStoreProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStoreProvider")
            .field("address", &self.address)
            .field("mount_path", &self.mount_path)
            .finish()
    }
}

impl KvStoreProvider {
    /// Build a client for the configured Vault server.
    pub fn new(config: KvStoreConfig) -> Result<Self> {
        if config.address.trim().is_empty() {
            return Err(SecretsError::config_error("kv-store address cannot be empty"));
        }
        if config.mount_path.trim().is_empty() {
            return Err(SecretsError::config_error("kv-store mount path cannot be empty"));
        }
        let token = match &config.token {
            Some(token) if !token.is_empty() => token,
            _ => return Err(SecretsError::config_error("kv-store token is required")),
        };

        let mut settings_builder = VaultClientSettingsBuilder::default();
        settings_builder.address(&config.address);
        settings_builder.token(token.expose_secret());
        if let Some(namespace) = config.namespace.clone() {
            settings_builder.namespace(Some(namespace));
        }

        let settings = settings_builder.build().map_err(|e| {
            SecretsError::config_error(format!("Invalid kv-store configuration: {}", e))
        })?;

        let client = VaultClient::new(settings).map_err(|e| {
            SecretsError::config_error(format!("Failed to create kv-store client: {}", e))
        })?;

        info!(address = %config.address, mount_path = %config.mount_path, "Initialized kv-store provider");

        Ok(Self { client, address: config.address, mount_path: config.mount_path })
    }
}

/// Map a Vault client error onto the provider taxonomy.
fn map_client_error(operation: &str, key: &str, err: ClientError) -> SecretsError {
    match err {
        ClientError::APIError { code: 401 | 403, errors } => SecretsError::authentication_failed(
            format!("kv-store denied {} of '{}': {}", operation, key, errors.join(", ")),
        ),
        other => SecretsError::provider_unavailable(
            BackendKind::KvStore.as_str(),
            format!("{} of '{}' failed: {}", operation, key, other),
        ),
    }
}

#[async_trait]
impl BackendProvider for KvStoreProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::KvStore
    }

    #[instrument(skip(self), fields(mount_path = %self.mount_path))]
    async fn fetch(&self, key: &str) -> Result<Option<SecretString>> {
        let result: std::result::Result<HashMap<String, String>, ClientError> =
            kv2::read(&self.client, &self.mount_path, key).await;

        match result {
            Ok(mut data) => match data.remove(VALUE_FIELD) {
                Some(value) => Ok(Some(SecretString::new(value))),
                None => Err(SecretsError::provider_unavailable(
                    BackendKind::KvStore.as_str(),
                    format!("secret '{}' has no '{}' field", key, VALUE_FIELD),
                )),
            },
            Err(ClientError::APIError { code: 404, .. }) => {
                debug!(key = %key, "Secret not present in kv-store");
                Ok(None)
            }
            Err(e) => {
                error!(error = %e, key = %key, "Failed to read secret from kv-store");
                Err(map_client_error("read", key, e))
            }
        }
    }

    #[instrument(skip(self, value), fields(mount_path = %self.mount_path))]
    async fn write(&self, key: &str, value: &SecretString) -> Result<()> {
        let mut data = HashMap::new();
        data.insert(VALUE_FIELD.to_string(), value.expose_secret().to_string());

        kv2::set(&self.client, &self.mount_path, key, &data).await.map_err(|e| {
            error!(error = %e, key = %key, "Failed to write secret to kv-store");
            map_client_error("write", key, e)
        })?;

        debug!(key = %key, "Stored secret in kv-store");
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        vaultrs::sys::health(&self.client).await.map(|_| ()).map_err(|e| {
            SecretsError::provider_unavailable(
                BackendKind::KvStore.as_str(),
                format!("health check against {} failed: {}", self.address, e),
            )
        })
    }
}
