//! Cached, audited secret access.
//!
//! # Architecture
//!
//! [`SecretStore`] fronts exactly one [`BackendProvider`]:
//! - **Environment**: process variables plus an optional dev-only mirror file
//! - **KV store**: HashiCorp Vault KV v2
//! - **Cloud**: GCP Secret Manager (`gcp` feature)
//!
//! Reads go through an AES-256-GCM [`EncryptedCache`] and fall back to the
//! environment when the active backend fails. Every fetch and write emits an
//! [`AuditEvent`] carrying a fingerprint and HMAC signature of the value, never
//! the value itself.
//!
//! # Example
//!
//! ```rust,ignore
//! use keyward::secrets::{SecretStore, TracingAuditSink, TracingNotifier};
//! use std::sync::Arc;
//!
//! let store = SecretStore::from_config(
//!     &config.secrets,
//!     Arc::new(TracingAuditSink),
//!     Arc::new(TracingNotifier),
//! )
//! .await?;
//!
//! store.assert_critical_secrets(&config.secrets.critical_secrets).await?;
//! store.start_background_refresh().await;
//!
//! let jwt_secret = store.require("JWT_SECRET").await?;
//! ```

pub mod audit;
pub mod cache;
pub mod cipher;
pub mod error;
pub mod notify;
pub mod providers;
pub mod refresher;
pub mod store;
pub mod strength;
pub mod types;

pub use audit::{AuditAction, AuditEvent, AuditRecorder, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use cache::{CacheEntryInfo, CacheLookup, EncryptedCache};
pub use cipher::SecretCipher;
pub use error::{Result, SecretsError};
pub use notify::{Alert, NotificationConfig, Notifier, Severity, TracingNotifier, WebhookNotifier};
pub use providers::{build_provider, BackendKind, BackendProvider};
pub use refresher::{BackgroundRefresher, RefresherHandle};
pub use store::{GetOptions, ProviderHealth, ReloadSummary, SecretStore, StoreSettings};
pub use types::SecretString;
