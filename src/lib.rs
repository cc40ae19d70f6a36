//! # Keyward
//!
//! Keyward fronts a single secret backend (process environment, Vault KV or
//! GCP Secret Manager) with an encrypted, audited cache, and rotates the
//! primary signing and encryption keys without downtime.
//!
//! ## Architecture
//!
//! ```text
//! callers → SecretStore → EncryptedCache → BackendProvider (env | kv-store | cloud)
//!              ↓                ↑
//!        AuditRecorder   BackgroundRefresher
//!
//! RotationScheduler → KeyRotationCoordinator → SecretStore + BackupStore
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use keyward::config::KeywardConfig;
//! use keyward::secrets::{SecretStore, TracingAuditSink, TracingNotifier};
//!
//! #[tokio::main]
//! async fn main() -> keyward::Result<()> {
//!     let config = KeywardConfig::load(None)?;
//!     let store = SecretStore::from_config(
//!         &config.secrets,
//!         Arc::new(TracingAuditSink),
//!         Arc::new(TracingNotifier),
//!     )
//!     .await?;
//!     store.assert_critical_secrets(&config.secrets.critical_secrets).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod errors;
pub mod observability;
pub mod rotation;
pub mod secrets;
pub mod storage;

pub use config::KeywardConfig;
pub use errors::{Error, Result};
pub use rotation::KeyRotationCoordinator;
pub use secrets::{SecretStore, SecretString};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
