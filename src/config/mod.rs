//! # Configuration Management
//!
//! Configuration is read from an optional file (TOML, YAML or JSON by
//! extension) and then overlaid with `KEYWARD__`-prefixed environment
//! variables, using `__` between path segments:
//!
//! ```text
//! KEYWARD__SECRETS__BACKEND=kv-store
//! KEYWARD__SECRETS__KV_STORE__ADDRESS=https://vault:8200
//! KEYWARD__SECRETS__CRITICAL_SECRETS=JWT_SECRET,ENCRYPTION_KEY
//! ```

pub mod settings;

pub use settings::{
    DatabaseConfig, KeywardConfig, ObservabilityConfig, RotationConfig, SecretsConfig,
    MIN_KEY_SOURCE_LEN,
};

use crate::errors::Result;
use std::path::Path;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "KEYWARD";

impl KeywardConfig {
    /// Load and validate configuration from `path` (if any) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("secrets.critical_secrets"),
        );

        let config: KeywardConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::providers::BackendKind;
    use std::io::Write;

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[secrets]
backend = "kv-store"
default_ttl_seconds = 120
encryption_key_source = "file-enc-source-0123456789abcdefghijk"
audit_key_source = "file-audit-source-0123456789abcdefghij"
critical_secrets = ["JWT_SECRET"]

[secrets.kv_store]
address = "https://vault.internal:8200"
token = "s.token"

[rotation]
backup_window_days = 7
"#
        )
        .unwrap();

        let config = KeywardConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.secrets.backend, BackendKind::KvStore);
        assert_eq!(config.secrets.default_ttl_seconds, 120);
        assert_eq!(config.secrets.critical_secrets, vec!["JWT_SECRET".to_string()]);
        assert_eq!(config.secrets.kv_store.unwrap().mount_path, "secret");
        assert_eq!(config.rotation.backup_window_days, 7);
        assert_eq!(config.rotation.primary_key, "JWT_SECRET");
        assert!(config.database.is_none());
    }

    #[test]
    fn test_missing_file_is_error() {
        let result = KeywardConfig::load(Some(Path::new("/nonexistent/keyward.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_file_fails_validation() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[secrets]
encryption_key_source = "same-source-0123456789abcdefghijklmnop"
audit_key_source = "same-source-0123456789abcdefghijklmnop"
"#
        )
        .unwrap();

        let err = KeywardConfig::load(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }
}
