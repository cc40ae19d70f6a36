//! Environment variable provider.
//!
//! Reads `<prefix><KEY>` from the process environment. Keys are upper-cased
//! and every character outside `[A-Z0-9_]` becomes `_`.
//!
//! Writes land in a process-local overlay that shadows the environment. When
//! `mirror_file` is configured the overlay is also persisted as a dotenv file
//! and reloaded on the next start. The mirror file holds plaintext and is
//! meant for local development only.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{BackendKind, BackendProvider};
use crate::secrets::error::{Result, SecretsError};
use crate::secrets::types::SecretString;

/// Configuration for the environment provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvProviderConfig {
    /// Prefix prepended to every variable name, e.g. `APP_`.
    #[serde(default)]
    pub prefix: String,

    /// Dev-only plaintext mirror of written values.
    #[serde(default)]
    pub mirror_file: Option<PathBuf>,
}

/// Provider backed by process environment variables.
#[derive(Debug)]
pub struct EnvProvider {
    prefix: String,
    mirror_file: Option<PathBuf>,
    overlay: RwLock<BTreeMap<String, SecretString>>,
}

impl EnvProvider {
    /// Create the provider, loading the mirror file if one exists.
    pub fn new(config: EnvProviderConfig) -> Result<Self> {
        let overlay = match &config.mirror_file {
            Some(path) if path.exists() => {
                let loaded = load_mirror(path)?;
                info!(
                    path = %path.display(),
                    entries = loaded.len(),
                    "Loaded dev-only secret mirror file"
                );
                loaded
            }
            _ => BTreeMap::new(),
        };

        Ok(Self {
            prefix: config.prefix,
            mirror_file: config.mirror_file,
            overlay: RwLock::new(overlay),
        })
    }

    /// Variable name consulted for `key`.
    pub fn env_var_name(&self, key: &str) -> String {
        let normalized: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("{}{}", self.prefix, normalized)
    }

    async fn persist_mirror(
        &self,
        path: &Path,
        entries: &BTreeMap<String, SecretString>,
    ) -> Result<()> {
        let mut contents =
            String::from("# keyward dev-only secret mirror. Plaintext; never commit.\n");
        for (name, value) in entries {
            contents.push_str(&format!("{}='{}'\n", name, value.expose_secret()));
        }

        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, contents.as_bytes()).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
        }
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

fn load_mirror(path: &Path) -> Result<BTreeMap<String, SecretString>> {
    let iter = dotenvy::from_path_iter(path).map_err(|e| {
        SecretsError::config_error(format!("Failed to open mirror file {}: {}", path.display(), e))
    })?;

    let mut entries = BTreeMap::new();
    for item in iter {
        let (name, value) = item.map_err(|e| {
            SecretsError::config_error(format!("Invalid mirror file {}: {}", path.display(), e))
        })?;
        entries.insert(name, SecretString::new(value));
    }
    Ok(entries)
}

#[async_trait]
impl BackendProvider for EnvProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::Env
    }

    async fn fetch(&self, key: &str) -> Result<Option<SecretString>> {
        let name = self.env_var_name(key);

        if let Some(value) = self.overlay.read().await.get(&name) {
            return Ok(Some(value.clone()));
        }

        match std::env::var(&name) {
            Ok(value) if value.is_empty() => Ok(None),
            Ok(value) => Ok(Some(SecretString::new(value))),
            Err(std::env::VarError::NotPresent) => {
                debug!(key = %key, env_var = %name, "Secret not present in environment");
                Ok(None)
            }
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretsError::provider_unavailable(
                BackendKind::Env.as_str(),
                format!("environment variable {} is not valid unicode", name),
            )),
        }
    }

    async fn write(&self, key: &str, value: &SecretString) -> Result<()> {
        if value.expose_secret().contains(|c| matches!(c, '\'' | '\n' | '\r')) {
            return Err(SecretsError::config_error(format!(
                "Secret '{}' contains quote or newline characters and cannot be stored in the environment backend",
                key
            )));
        }

        let name = self.env_var_name(key);
        let mut overlay = self.overlay.write().await;

        // The overlay only changes once the mirror holds the new value.
        if let Some(path) = &self.mirror_file {
            warn!(
                key = %key,
                path = %path.display(),
                "Writing secret to plaintext mirror file (development only, insecure)"
            );
            let mut staged = overlay.clone();
            staged.insert(name.clone(), value.clone());
            self.persist_mirror(path, &staged).await?;
            *overlay = staged;
        } else {
            overlay.insert(name.clone(), value.clone());
        }

        debug!(key = %key, env_var = %name, "Stored secret in process-local overlay");
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(prefix: &str) -> EnvProvider {
        EnvProvider::new(EnvProviderConfig { prefix: prefix.to_string(), mirror_file: None })
            .unwrap()
    }

    #[test]
    fn test_env_var_name_normalization() {
        let prefixed = provider("APP_");
        assert_eq!(prefixed.env_var_name("jwt_secret"), "APP_JWT_SECRET");
        assert_eq!(prefixed.env_var_name("db-password.main"), "APP_DB_PASSWORD_MAIN");
        assert_eq!(provider("").env_var_name("NEW_JWT_SECRET"), "NEW_JWT_SECRET");
    }

    #[tokio::test]
    async fn test_fetch_reads_process_env() {
        std::env::set_var("KWTEST_ENV_FETCH_TOKEN", "from-process-env");
        let provider = provider("KWTEST_ENV_FETCH_");

        let value = provider.fetch("token").await.unwrap();
        assert_eq!(value.unwrap().expose_secret(), "from-process-env");

        std::env::remove_var("KWTEST_ENV_FETCH_TOKEN");
    }

    #[tokio::test]
    async fn test_absent_and_empty_are_none() {
        std::env::set_var("KWTEST_ENV_EMPTY_VALUE", "");
        let provider = provider("KWTEST_ENV_EMPTY_");

        assert!(provider.fetch("value").await.unwrap().is_none());
        assert!(provider.fetch("never_set").await.unwrap().is_none());

        std::env::remove_var("KWTEST_ENV_EMPTY_VALUE");
    }

    #[tokio::test]
    async fn test_write_shadows_process_env() {
        std::env::set_var("KWTEST_ENV_SHADOW_KEY", "original");
        let provider = provider("KWTEST_ENV_SHADOW_");

        provider.write("key", &SecretString::new("overlay-value")).await.unwrap();
        let value = provider.fetch("key").await.unwrap().unwrap();
        assert_eq!(value.expose_secret(), "overlay-value");

        std::env::remove_var("KWTEST_ENV_SHADOW_KEY");
    }

    #[tokio::test]
    async fn test_mirror_file_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.env");
        let config = EnvProviderConfig {
            prefix: "KWTEST_MIRROR_".to_string(),
            mirror_file: Some(path.clone()),
        };

        let first = EnvProvider::new(config.clone()).unwrap();
        first.write("api_key", &SecretString::new("sk-mirrored-value-0123")).await.unwrap();
        assert!(path.exists());

        let second = EnvProvider::new(config).unwrap();
        let value = second.fetch("api_key").await.unwrap().unwrap();
        assert_eq!(value.expose_secret(), "sk-mirrored-value-0123");
    }

    #[tokio::test]
    async fn test_failed_mirror_write_keeps_previous_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("secrets.env");
        let provider = EnvProvider::new(EnvProviderConfig {
            prefix: "KWTEST_MIRROR_FAIL_".to_string(),
            mirror_file: Some(path.clone()),
        })
        .unwrap();

        let err = provider.write("key", &SecretString::new("new-value")).await.unwrap_err();
        assert!(matches!(err, SecretsError::Io { .. }), "unexpected error: {err:?}");
        assert!(provider.fetch("key").await.unwrap().is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_write_rejects_unquotable_values() {
        let provider = provider("KWTEST_QUOTE_");
        let err = provider.write("key", &SecretString::new("it's")).await.unwrap_err();
        assert!(matches!(err, SecretsError::Configuration { .. }));
        assert!(provider.fetch("key").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_health_check_always_ok() {
        assert!(provider("").health_check().await.is_ok());
        assert_eq!(provider("").kind(), BackendKind::Env);
    }
}
