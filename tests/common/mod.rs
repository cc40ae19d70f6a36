//! Common test utilities for all integration tests.
//!
//! Provides an in-memory backend with failure injection, a recording
//! notifier and store/coordinator builders.

#![allow(dead_code)]
#![allow(clippy::duplicate_mod)]

use async_trait::async_trait;
use keyward::config::RotationConfig;
use keyward::rotation::{InMemoryBackupStore, KeyRotationCoordinator};
use keyward::secrets::providers::{BackendKind, BackendProvider, EnvProviderConfig};
use keyward::secrets::{
    Alert, MemoryAuditSink, Notifier, Result, SecretStore, SecretString, SecretsError,
    StoreSettings,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const ENCRYPTION_SOURCE: &str = "integration-test-encryption-source-0123456789";
pub const AUDIT_SOURCE: &str = "integration-test-audit-source-abcdefghijklmnop";

/// A strong value accepted by the strength policy.
pub const STRONG_JWT: &str = "Zq4vN8rT2wLx6pK0mB3sH7dF1gJ5cY9eU-aR_oI";
pub const STRONG_ENCRYPTION: &str = "Pf7Qk2Lw9Xz4Rm1Tn6Vb3Hc8Jd5Gs0Ya-Ue_Oi";

/// In-memory backend with a fetch counter, an optional delay and
/// per-key-prefix failure injection.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    values: Mutex<HashMap<String, String>>,
    fetches: AtomicUsize,
    writes: Mutex<Vec<String>>,
    fetch_delay: Mutex<Option<Duration>>,
    fail_fetches: Mutex<bool>,
    fail_writes_with_prefix: Mutex<Option<String>>,
    corrupt_reads_with_prefix: Mutex<Option<String>>,
}

impl MemoryProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_values(values: &[(&str, &str)]) -> Arc<Self> {
        let provider = Self::default();
        {
            let mut map = provider.values.lock().unwrap();
            for (key, value) in values {
                map.insert(key.to_string(), value.to_string());
            }
        }
        Arc::new(provider)
    }

    pub fn set(&self, key: &str, value: &str) {
        self.values.lock().unwrap().insert(key.to_string(), value.to_string());
    }

    pub fn remove(&self, key: &str) {
        self.values.lock().unwrap().remove(key);
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Keys written, in order.
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_fail_fetches(&self, fail: bool) {
        *self.fail_fetches.lock().unwrap() = fail;
    }

    /// Fail every write whose key starts with `prefix`.
    pub fn fail_writes_with_prefix(&self, prefix: &str) {
        *self.fail_writes_with_prefix.lock().unwrap() = Some(prefix.to_string());
    }

    /// Return a different value than stored for keys starting with `prefix`.
    pub fn corrupt_reads_with_prefix(&self, prefix: &str) {
        *self.corrupt_reads_with_prefix.lock().unwrap() = Some(prefix.to_string());
    }
}

fn matches_prefix(slot: &Mutex<Option<String>>, key: &str) -> bool {
    slot.lock().unwrap().as_deref().is_some_and(|prefix| key.starts_with(prefix))
}

#[async_trait]
impl BackendProvider for MemoryProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::KvStore
    }

    async fn fetch(&self, key: &str) -> Result<Option<SecretString>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let delay = *self.fetch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if *self.fail_fetches.lock().unwrap() {
            return Err(SecretsError::provider_unavailable("kv-store", "injected outage"));
        }

        let value = self.values.lock().unwrap().get(key).cloned();
        if matches_prefix(&self.corrupt_reads_with_prefix, key) {
            return Ok(value.map(|v| SecretString::new(format!("{}-tampered", v))));
        }
        Ok(value.map(SecretString::new))
    }

    async fn write(&self, key: &str, value: &SecretString) -> Result<()> {
        if matches_prefix(&self.fail_writes_with_prefix, key) {
            return Err(SecretsError::provider_unavailable("kv-store", "injected write failure"));
        }
        self.writes.lock().unwrap().push(key.to_string());
        self.values.lock().unwrap().insert(key.to_string(), value.expose_secret().to_string());
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        if *self.fail_fetches.lock().unwrap() {
            return Err(SecretsError::provider_unavailable("kv-store", "injected outage"));
        }
        Ok(())
    }
}

/// Notifier that keeps every alert it receives.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn alert(&self, alert: &Alert) -> Result<()> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

/// Everything a test needs to drive a store.
pub struct TestStore {
    pub store: SecretStore,
    pub provider: Arc<MemoryProvider>,
    pub audit: Arc<MemoryAuditSink>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn test_settings() -> StoreSettings {
    let mut settings =
        StoreSettings::new(SecretString::new(ENCRYPTION_SOURCE), SecretString::new(AUDIT_SOURCE));
    settings.provider_timeout = Duration::from_secs(2);
    // No test sets variables under this prefix unless it means to.
    settings.env_fallback = EnvProviderConfig {
        prefix: "KEYWARD_IT_UNUSED_".to_string(),
        mirror_file: None,
    };
    settings
}

pub fn build_store(provider: Arc<MemoryProvider>, settings: StoreSettings) -> TestStore {
    let audit = Arc::new(MemoryAuditSink::new());
    let notifier = RecordingNotifier::new();
    let store = SecretStore::new(provider.clone(), settings, audit.clone(), notifier.clone())
        .expect("store construction");
    TestStore { store, provider, audit, notifier }
}

pub fn test_store(provider: Arc<MemoryProvider>) -> TestStore {
    build_store(provider, test_settings())
}

pub fn coordinator(
    test: &TestStore,
    backups: Arc<InMemoryBackupStore>,
) -> KeyRotationCoordinator {
    KeyRotationCoordinator::new(test.store.clone(), backups, RotationConfig::default())
}
