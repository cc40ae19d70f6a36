//! Cloud secret manager provider (GCP Secret Manager).
//!
//! A key maps to the secret id `<secret_prefix><key>` in the configured
//! project. Reads access `versions/latest`; writes add a new version and
//! create the secret with automatic replication on first write.
//!
//! The SDK is only compiled with the `gcp` feature. Without it the provider
//! type does not exist and [`super::build_provider`] rejects a
//! `backend = "cloud"` configuration at startup.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::secrets::error::{Result, SecretsError};

#[cfg(feature = "gcp")]
use super::{BackendKind, BackendProvider};
#[cfg(feature = "gcp")]
use crate::secrets::types::SecretString;
#[cfg(feature = "gcp")]
use async_trait::async_trait;
#[cfg(feature = "gcp")]
use google_secretmanager1::{hyper_rustls, hyper_util, SecretManager};
#[cfg(feature = "gcp")]
use tracing::{debug, error, info};

fn default_secret_prefix() -> String {
    "keyward_".to_string()
}

/// Configuration for the GCP Secret Manager backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudProviderConfig {
    /// GCP project ID
    pub project_id: String,

    /// Prefix for secret ids (GCP allows `[A-Za-z0-9_-]`)
    #[serde(default = "default_secret_prefix")]
    pub secret_prefix: String,

    /// Service account key file; falls back to `GOOGLE_APPLICATION_CREDENTIALS`
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,
}

impl CloudProviderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.project_id.trim().is_empty() {
            return Err(SecretsError::config_error("cloud project_id cannot be empty"));
        }
        if !self.secret_prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(SecretsError::config_error(format!(
                "cloud secret_prefix '{}' may only contain letters, digits, '_' and '-'",
                self.secret_prefix
            )));
        }
        Ok(())
    }

    /// Secret id for `key`, with characters GCP rejects replaced by `_`.
    pub fn secret_id(&self, key: &str) -> String {
        let sanitized: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        format!("{}{}", self.secret_prefix, sanitized)
    }
}

/// GCP Secret Manager provider.
#[cfg(feature = "gcp")]
pub struct CloudSecretProvider {
    hub: SecretManager<
        hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>,
    >,
    config: CloudProviderConfig,
}

#[cfg(feature = "gcp")]
impl std::fmt::Debug for CloudSecretProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudSecretProvider")
            .field("project_id", &self.config.project_id)
            .field("secret_prefix", &self.config.secret_prefix)
            .field("hub", &"[SecretManager]")
            .finish()
    }
}

#[cfg(feature = "gcp")]
impl CloudSecretProvider {
    /// Build an authenticated Secret Manager client.
    pub async fn new(config: CloudProviderConfig) -> Result<Self> {
        config.validate()?;

        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(|e| {
                SecretsError::config_error(format!("Failed to load native TLS roots: {}", e))
            })?
            .https_or_http()
            .enable_http2()
            .build();
        let client =
            hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
                .build(connector);

        let credentials_path = match &config.credentials_path {
            Some(path) => path.clone(),
            None => std::env::var("GOOGLE_APPLICATION_CREDENTIALS").map(PathBuf::from).map_err(
                |_| {
                    SecretsError::config_error(
                        "cloud backend needs credentials_path or GOOGLE_APPLICATION_CREDENTIALS",
                    )
                },
            )?,
        };

        let key = yup_oauth2::read_service_account_key(&credentials_path).await.map_err(|e| {
            SecretsError::config_error(format!(
                "Failed to read GCP credentials from {}: {}",
                credentials_path.display(),
                e
            ))
        })?;
        let auth = yup_oauth2::ServiceAccountAuthenticator::builder(key).build().await.map_err(
            |e| SecretsError::config_error(format!("Failed to build GCP authenticator: {}", e)),
        )?;

        let hub = SecretManager::new(client, auth);

        info!(
            project_id = %config.project_id,
            secret_prefix = %config.secret_prefix,
            "Initialized cloud secret provider"
        );

        Ok(Self { hub, config })
    }

    fn secret_name(&self, key: &str) -> String {
        format!("projects/{}/secrets/{}", self.config.project_id, self.config.secret_id(key))
    }

    async fn create_secret(&self, key: &str) -> Result<()> {
        use google_secretmanager1::api::{Automatic, Replication, Secret};

        let secret = Secret {
            replication: Some(Replication {
                automatic: Some(Automatic::default()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let parent = format!("projects/{}", self.config.project_id);

        self.hub
            .projects()
            .secrets_create(secret, &parent)
            .secret_id(&self.config.secret_id(key))
            .doit()
            .await
            .map_err(|e| map_sdk_error("create", key, &e.to_string()))?;

        info!(key = %key, "Created secret in cloud secret manager");
        Ok(())
    }

    async fn add_version(&self, key: &str, value: &SecretString) -> std::result::Result<(), String> {
        use google_secretmanager1::api::{AddSecretVersionRequest, SecretPayload};

        let request = AddSecretVersionRequest {
            payload: Some(SecretPayload {
                data: Some(value.expose_secret().as_bytes().to_vec()),
                ..Default::default()
            }),
            ..Default::default()
        };

        self.hub
            .projects()
            .secrets_add_version(request, &self.secret_name(key))
            .doit()
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

#[cfg(feature = "gcp")]
fn is_not_found(message: &str) -> bool {
    message.contains("NOT_FOUND") || message.contains("404")
}

#[cfg(feature = "gcp")]
fn map_sdk_error(operation: &str, key: &str, message: &str) -> SecretsError {
    if message.contains("PERMISSION_DENIED") || message.contains("403") {
        SecretsError::authentication_failed(format!(
            "cloud secret manager denied {} of '{}': {}",
            operation, key, message
        ))
    } else {
        SecretsError::provider_unavailable(
            BackendKind::Cloud.as_str(),
            format!("{} of '{}' failed: {}", operation, key, message),
        )
    }
}

#[cfg(feature = "gcp")]
#[async_trait]
impl BackendProvider for CloudSecretProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::Cloud
    }

    async fn fetch(&self, key: &str) -> Result<Option<SecretString>> {
        let resource_name = format!("{}/versions/latest", self.secret_name(key));
        debug!(key = %key, resource_name = %resource_name, "Fetching secret from cloud");

        match self.hub.projects().secrets_versions_access(&resource_name).doit().await {
            Ok((_, response)) => {
                let data = response.payload.and_then(|p| p.data).unwrap_or_default();
                if data.is_empty() {
                    return Ok(None);
                }
                let text = String::from_utf8(data).map_err(|_| {
                    SecretsError::provider_unavailable(
                        BackendKind::Cloud.as_str(),
                        format!("secret '{}' is not valid UTF-8", key),
                    )
                })?;
                Ok(Some(SecretString::new(text)))
            }
            Err(e) => {
                let message = e.to_string();
                if is_not_found(&message) {
                    debug!(key = %key, "Secret not present in cloud secret manager");
                    return Ok(None);
                }
                error!(key = %key, error = %message, "Failed to fetch secret from cloud");
                Err(map_sdk_error("read", key, &message))
            }
        }
    }

    async fn write(&self, key: &str, value: &SecretString) -> Result<()> {
        match self.add_version(key, value).await {
            Ok(()) => Ok(()),
            Err(message) if is_not_found(&message) => {
                self.create_secret(key).await?;
                self.add_version(key, value)
                    .await
                    .map_err(|message| map_sdk_error("write", key, &message))
            }
            Err(message) => {
                error!(key = %key, error = %message, "Failed to write secret to cloud");
                Err(map_sdk_error("write", key, &message))
            }
        }
    }

    async fn health_check(&self) -> Result<()> {
        let parent = format!("projects/{}", self.config.project_id);
        self.hub
            .projects()
            .secrets_list(&parent)
            .page_size(1)
            .doit()
            .await
            .map(|_| ())
            .map_err(|e| {
                SecretsError::provider_unavailable(
                    BackendKind::Cloud.as_str(),
                    format!("health check failed: {}", e),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CloudProviderConfig {
        CloudProviderConfig {
            project_id: "test-project".to_string(),
            secret_prefix: default_secret_prefix(),
            credentials_path: None,
        }
    }

    #[test]
    fn test_secret_id_sanitizes_key() {
        let config = config();
        assert_eq!(config.secret_id("JWT_SECRET"), "keyward_JWT_SECRET");
        assert_eq!(config.secret_id("db.password/main"), "keyward_db_password_main");
    }

    #[test]
    fn test_validate_rejects_bad_config() {
        assert!(config().validate().is_ok());
        assert!(CloudProviderConfig { project_id: String::new(), ..config() }.validate().is_err());
        assert!(CloudProviderConfig { secret_prefix: "bad/".to_string(), ..config() }
            .validate()
            .is_err());
    }

    #[test]
    fn test_config_deserialize_defaults() {
        let parsed: CloudProviderConfig =
            serde_json::from_str(r#"{"project_id": "p"}"#).unwrap();
        assert_eq!(parsed.secret_prefix, "keyward_");
        assert!(parsed.credentials_path.is_none());
    }
}
