//! Secret store facade.
//!
//! [`SecretStore`] is the single entry point for reading and writing secrets.
//! A read is served from the encrypted cache when fresh; otherwise the active
//! provider is asked (bounded by the provider timeout), with the environment
//! provider as the terminal fallback when the primary fails. Concurrent
//! reads of the same key share one provider call.
//!
//! The store is a cheap `Clone` handle. Independent stores built from
//! independent settings share nothing.

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use super::audit::{AuditAction, AuditRecorder, AuditSink};
use super::cache::{CacheEntryInfo, CacheLookup, EncryptedCache};
use super::cipher::SecretCipher;
use super::error::{Result, SecretsError};
use super::notify::{Alert, Notifier, Severity};
use super::providers::{build_provider, BackendKind, BackendProvider, EnvProvider, EnvProviderConfig};
use super::refresher::{BackgroundRefresher, RefresherHandle};
use super::strength;
use super::types::SecretString;
use crate::config::SecretsConfig;
use crate::observability::MetricsRecorder;

type FetchFuture = Shared<BoxFuture<'static, Result<Option<SecretString>>>>;

/// Runtime settings for a [`SecretStore`].
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub default_ttl: Duration,
    pub refresh_interval: Duration,
    pub provider_timeout: Duration,
    pub encryption_key_source: SecretString,
    pub audit_key_source: SecretString,
    /// Settings for the environment provider used as read fallback.
    pub env_fallback: EnvProviderConfig,
}

impl StoreSettings {
    /// Default timings with the given key sources.
    pub fn new(encryption_key_source: SecretString, audit_key_source: SecretString) -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            refresh_interval: Duration::from_secs(600),
            provider_timeout: Duration::from_secs(5),
            encryption_key_source,
            audit_key_source,
            env_fallback: EnvProviderConfig::default(),
        }
    }
}

/// Per-call read options.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    /// Bypass the cache and go to the provider.
    pub force_refresh: bool,
    /// TTL for the resulting cache entry instead of the store default.
    pub ttl: Option<Duration>,
}

impl GetOptions {
    pub fn forced() -> Self {
        Self { force_refresh: true, ttl: None }
    }
}

/// Result of [`SecretStore::reload_all`].
#[derive(Debug, Default)]
pub struct ReloadSummary {
    pub refreshed: Vec<String>,
    pub failed: Vec<(String, SecretsError)>,
}

/// Result of [`SecretStore::check_provider_health`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderHealth {
    pub backend: BackendKind,
    pub healthy: bool,
    pub message: Option<String>,
}

struct StoreInner {
    provider: Arc<dyn BackendProvider>,
    fallback: Option<Arc<dyn BackendProvider>>,
    cache: EncryptedCache,
    audit: AuditRecorder,
    notifier: Arc<dyn Notifier>,
    settings: StoreSettings,
    in_flight: DashMap<String, (u64, FetchFuture)>,
    next_fetch_id: AtomicU64,
    rotating: DashSet<String>,
    refresher: Mutex<Option<RefresherHandle>>,
    metrics: MetricsRecorder,
}

/// Cached, audited secret access over one active backend.
#[derive(Clone)]
pub struct SecretStore {
    inner: Arc<StoreInner>,
}

/// Non-owning handle used by background tasks.
#[derive(Clone)]
pub struct WeakSecretStore {
    inner: Weak<StoreInner>,
}

impl WeakSecretStore {
    pub fn upgrade(&self) -> Option<SecretStore> {
        self.inner.upgrade().map(|inner| SecretStore { inner })
    }
}

impl std::fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretStore")
            .field("backend", &self.inner.provider.kind())
            .field("cached", &self.inner.cache.len())
            .field("default_ttl", &self.inner.settings.default_ttl)
            .finish()
    }
}

impl SecretStore {
    /// Build a store around an already constructed provider.
    pub fn new(
        provider: Arc<dyn BackendProvider>,
        settings: StoreSettings,
        audit_sink: Arc<dyn AuditSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let cipher = SecretCipher::from_master(&settings.encryption_key_source)?;
        let audit =
            AuditRecorder::new(&settings.audit_key_source, audit_sink, settings.provider_timeout)?;

        let fallback: Option<Arc<dyn BackendProvider>> = match provider.kind() {
            BackendKind::Env => None,
            _ => Some(Arc::new(EnvProvider::new(settings.env_fallback.clone())?)),
        };

        info!(
            backend = %provider.kind(),
            env_fallback = fallback.is_some(),
            default_ttl_secs = settings.default_ttl.as_secs(),
            provider_timeout_ms = settings.provider_timeout.as_millis() as u64,
            "Initialized secret store"
        );

        Ok(Self {
            inner: Arc::new(StoreInner {
                provider,
                fallback,
                cache: EncryptedCache::new(cipher),
                audit,
                notifier,
                settings,
                in_flight: DashMap::new(),
                next_fetch_id: AtomicU64::new(0),
                rotating: DashSet::new(),
                refresher: Mutex::new(None),
                metrics: MetricsRecorder::new(),
            }),
        })
    }

    /// Build the configured provider and a store around it.
    pub async fn from_config(
        config: &SecretsConfig,
        audit_sink: Arc<dyn AuditSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let provider = build_provider(config).await?;
        Self::new(provider, config.store_settings(), audit_sink, notifier)
    }

    pub fn downgrade(&self) -> WeakSecretStore {
        WeakSecretStore { inner: Arc::downgrade(&self.inner) }
    }

    /// Kind of the active backend.
    pub fn backend(&self) -> BackendKind {
        self.inner.provider.kind()
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.inner.settings
    }

    pub(crate) fn audit(&self) -> &AuditRecorder {
        &self.inner.audit
    }

    /// Read `key` using the default options.
    pub async fn get(&self, key: &str) -> Result<Option<SecretString>> {
        self.get_with(key, GetOptions::default()).await
    }

    /// Read `key`, failing with `MissingSecret` when it is absent.
    pub async fn require(&self, key: &str) -> Result<SecretString> {
        self.get(key).await?.ok_or_else(|| SecretsError::missing_secret(key))
    }

    /// Read `key`, bypassing the cache.
    pub async fn refresh(&self, key: &str) -> Result<Option<SecretString>> {
        self.get_with(key, GetOptions::forced()).await
    }

    #[instrument(skip(self, options), fields(force_refresh = options.force_refresh))]
    pub async fn get_with(&self, key: &str, options: GetOptions) -> Result<Option<SecretString>> {
        let metrics = &self.inner.metrics;

        if options.force_refresh {
            metrics.record_cache_miss("forced");
        } else {
            match self.inner.cache.lookup(key) {
                CacheLookup::Hit(value) => {
                    metrics.record_cache_hit();
                    return Ok(Some(value));
                }
                CacheLookup::Miss => metrics.record_cache_miss("absent"),
                CacheLookup::Expired => metrics.record_cache_miss("expired"),
                CacheLookup::Undecryptable(_) => metrics.record_cache_miss("undecryptable"),
            }
        }

        let ttl = options.ttl.unwrap_or(self.inner.settings.default_ttl);
        self.shared_fetch(key, ttl).await
    }

    /// Join the in-flight fetch for `key`, or start one.
    ///
    /// Forced reads join too: `write` drops the in-flight entry once the
    /// backend accepts a value, so any fetch still registered began after
    /// every completed write and observes it.
    async fn shared_fetch(&self, key: &str, ttl: Duration) -> Result<Option<SecretString>> {
        let fetch = match self.inner.in_flight.entry(key.to_string()) {
            Entry::Occupied(existing) => {
                debug!(key = %key, "Joining in-flight secret fetch");
                existing.get().1.clone()
            }
            Entry::Vacant(vacant) => {
                let id = self.inner.next_fetch_id.fetch_add(1, Ordering::Relaxed);
                let fetch = self.clone().load(key.to_string(), ttl, id).boxed().shared();
                vacant.insert((id, fetch.clone()));
                fetch
            }
        };

        fetch.await
    }

    async fn load(self, key: String, ttl: Duration, id: u64) -> Result<Option<SecretString>> {
        let result = self.load_uncached(&key, ttl, id).await;
        self.inner.in_flight.remove_if(&key, |_, (current, _)| *current == id);
        result
    }

    async fn load_uncached(&self, key: &str, ttl: Duration, id: u64) -> Result<Option<SecretString>> {
        let (result, served_by) = self.fetch_from_providers(key).await;

        match result {
            Ok(Some(value)) => {
                self.cache_if_current(key, &value, ttl, id);

                let event = self.inner.audit.event(
                    AuditAction::SecretRead,
                    key,
                    served_by.as_str(),
                    Some(&value),
                );
                self.inner.audit.record(event).await;
                Ok(Some(value))
            }
            Ok(None) => {
                if self.is_current_fetch(key, id) {
                    self.inner.cache.remove(key);
                }
                debug!(key = %key, backend = %served_by, "Secret not found");
                Ok(None)
            }
            Err(e) => {
                let event = self
                    .inner
                    .audit
                    .event(AuditAction::SecretRead, key, served_by.as_str(), None)
                    .with_error(e.to_string());
                self.inner.audit.record(event).await;
                Err(e)
            }
        }
    }

    fn is_current_fetch(&self, key: &str, id: u64) -> bool {
        self.inner.in_flight.get(key).is_some_and(|entry| entry.0 == id)
    }

    /// Cache a fetched value unless a write superseded this fetch. The
    /// in-flight guard is held across the insert so a concurrent write either
    /// overwrites it or makes it skip.
    fn cache_if_current(&self, key: &str, value: &SecretString, ttl: Duration, id: u64) {
        let Some(entry) = self.inner.in_flight.get(key) else {
            debug!(key = %key, "Fetch superseded, not caching");
            return;
        };
        if entry.0 != id {
            debug!(key = %key, "Fetch superseded, not caching");
            return;
        }

        let (fingerprint, signature) = self.inner.audit.seal_identity(value);
        if let Err(e) = self.inner.cache.insert(key, value, ttl, fingerprint, signature) {
            error!(key = %key, error = %e, "Failed to cache secret; serving uncached");
        }
    }

    /// Ask the primary provider, then the environment fallback on failure.
    /// The primary error wins when the fallback has nothing usable.
    async fn fetch_from_providers(
        &self,
        key: &str,
    ) -> (Result<Option<SecretString>>, BackendKind) {
        let primary = self.inner.provider.as_ref();
        let primary_kind = primary.kind();

        let primary_error = match self.timed_fetch(primary, key).await {
            Ok(value) => return (Ok(value), primary_kind),
            Err(e) if e.is_provider_failure() => e,
            Err(e) => return (Err(e), primary_kind),
        };

        let Some(fallback) = &self.inner.fallback else {
            error!(key = %key, backend = %primary_kind, error = %primary_error, "Secret fetch failed");
            return (Err(primary_error), primary_kind);
        };

        warn!(
            key = %key,
            backend = %primary_kind,
            error = %primary_error,
            "Primary secret provider failed, trying environment fallback"
        );

        match self.timed_fetch(fallback.as_ref(), key).await {
            Ok(Some(value)) => {
                self.inner.metrics.record_fallback(primary_kind.as_str());
                info!(key = %key, "Secret served by environment fallback");
                (Ok(Some(value)), fallback.kind())
            }
            Ok(None) => (Err(primary_error), primary_kind),
            Err(fallback_error) => {
                error!(
                    key = %key,
                    error = %fallback_error,
                    "Environment fallback failed as well"
                );
                (Err(primary_error), primary_kind)
            }
        }
    }

    async fn timed_fetch(
        &self,
        provider: &dyn BackendProvider,
        key: &str,
    ) -> Result<Option<SecretString>> {
        let backend = provider.kind();
        let timeout = self.inner.settings.provider_timeout;
        let started = Instant::now();

        let result = match tokio::time::timeout(timeout, provider.fetch(key)).await {
            Ok(result) => result,
            Err(_) => Err(SecretsError::provider_timeout(
                backend.as_str(),
                "fetch",
                timeout.as_millis() as u64,
            )),
        };

        let outcome = match &result {
            Ok(Some(_)) => "found",
            Ok(None) => "absent",
            Err(SecretsError::ProviderTimeout { .. }) => "timeout",
            Err(_) => "error",
        };
        self.inner.metrics.record_provider_fetch(
            backend.as_str(),
            outcome,
            started.elapsed().as_secs_f64(),
        );

        result
    }

    /// Write `key` to the active backend, refresh the cache and audit the change.
    #[instrument(skip(self, value))]
    pub async fn put(&self, key: &str, value: &SecretString) -> Result<()> {
        self.write(key, value).await?;

        let event =
            self.inner.audit.event(AuditAction::SecretRotated, key, self.backend().as_str(), Some(value));
        self.inner.audit.record(event).await;

        info!(key = %key, backend = %self.backend(), "Stored secret");
        Ok(())
    }

    /// Write without an audit event; the rotation coordinator audits once per key.
    pub(crate) async fn write(&self, key: &str, value: &SecretString) -> Result<()> {
        let backend = self.backend();
        let timeout = self.inner.settings.provider_timeout;

        match tokio::time::timeout(timeout, self.inner.provider.write(key, value)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(key = %key, backend = %backend, error = %e, "Secret write failed");
                return Err(e);
            }
            Err(_) => {
                error!(key = %key, backend = %backend, "Secret write timed out");
                return Err(SecretsError::provider_timeout(
                    backend.as_str(),
                    "write",
                    timeout.as_millis() as u64,
                ));
            }
        }

        // Readers must not join a fetch that started before this write.
        self.inner.in_flight.remove(key);

        let (fingerprint, signature) = self.inner.audit.seal_identity(value);
        let ttl = self.inner.settings.default_ttl;
        if let Err(e) = self.inner.cache.insert(key, value, ttl, fingerprint, signature) {
            // The stale entry must not outlive a successful write.
            self.inner.cache.remove(key);
            error!(key = %key, error = %e, "Failed to cache written secret");
        }
        Ok(())
    }

    /// Refresh every cached key concurrently.
    pub async fn reload_all(&self) -> ReloadSummary {
        let keys = self.inner.cache.keys();
        let results = futures::future::join_all(keys.into_iter().map(|key| async move {
            let result = self.refresh(&key).await;
            (key, result)
        }))
        .await;

        let mut summary = ReloadSummary::default();
        for (key, result) in results {
            match result {
                Ok(_) => summary.refreshed.push(key),
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to reload secret");
                    summary.failed.push((key, e));
                }
            }
        }

        info!(
            refreshed = summary.refreshed.len(),
            failed = summary.failed.len(),
            "Reloaded cached secrets"
        );
        summary
    }

    /// Startup gate: every key must be present and strong.
    ///
    /// Unreadable keys count as missing. On failure a High alert is sent and
    /// `CriticalSecretsUnavailable` lists both groups.
    pub async fn assert_critical_secrets<S: AsRef<str> + Sync>(&self, keys: &[S]) -> Result<()> {
        let results = futures::future::join_all(keys.iter().map(|key| async move {
            let key = key.as_ref();
            (key.to_string(), self.get(key).await)
        }))
        .await;

        let mut missing = Vec::new();
        let mut weak = Vec::new();
        for (key, result) in results {
            match result {
                Ok(Some(value)) => {
                    if let Some(reason) = strength::weakness_reason(value.expose_secret()) {
                        warn!(key = %key, reason = %reason, "Critical secret is weak");
                        weak.push(key);
                    }
                }
                Ok(None) => missing.push(key),
                Err(e) => {
                    warn!(key = %key, error = %e, "Critical secret is unreadable");
                    missing.push(key);
                }
            }
        }

        if missing.is_empty() && weak.is_empty() {
            info!(count = keys.len(), "All critical secrets present");
            return Ok(());
        }

        error!(missing = ?missing, weak = ?weak, "Critical secrets unavailable");
        let alert = Alert::new(
            "Critical secrets unavailable",
            format!(
                "{} missing and {} weak critical secrets on backend {}",
                missing.len(),
                weak.len(),
                self.backend()
            ),
            Severity::High,
            serde_json::json!({ "missing": missing, "weak": weak, "backend": self.backend() }),
        );
        self.send_alert(&alert).await;

        Err(SecretsError::CriticalSecretsUnavailable { missing, weak })
    }

    /// Probe the active backend.
    pub async fn check_provider_health(&self) -> ProviderHealth {
        let backend = self.backend();
        let timeout = self.inner.settings.provider_timeout;

        let result = match tokio::time::timeout(timeout, self.inner.provider.health_check()).await {
            Ok(result) => result,
            Err(_) => Err(SecretsError::provider_timeout(
                backend.as_str(),
                "health_check",
                timeout.as_millis() as u64,
            )),
        };

        match result {
            Ok(()) => ProviderHealth { backend, healthy: true, message: None },
            Err(e) => {
                warn!(backend = %backend, error = %e, "Secret provider unhealthy");
                ProviderHealth { backend, healthy: false, message: Some(e.to_string()) }
            }
        }
    }

    /// Deliver an alert, logging delivery failures.
    pub(crate) async fn send_alert(&self, alert: &Alert) {
        if let Err(e) = self.inner.notifier.alert(alert).await {
            error!(title = %alert.title, error = %e, "Failed to deliver alert");
        }
    }

    /// Drop the cached entry for `key`.
    pub fn invalidate(&self, key: &str) -> bool {
        self.inner.cache.remove(key)
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
        debug!("Cleared secret cache");
    }

    pub fn cache_len(&self) -> usize {
        self.inner.cache.len()
    }

    /// Keys that currently have a cache entry, fresh or expired.
    pub fn cached_keys(&self) -> Vec<String> {
        self.inner.cache.keys()
    }

    /// Fingerprint and signature of the cached entry, if any.
    pub fn cache_entry_info(&self, key: &str) -> Option<CacheEntryInfo> {
        self.inner.cache.info(key)
    }

    /// Whether `key` is flagged by an in-progress rotation.
    pub fn is_rotating(&self, key: &str) -> bool {
        self.inner.rotating.contains(key)
    }

    /// Flag `keys` as rotating until the returned guard is dropped.
    pub(crate) fn mark_rotating(&self, keys: Vec<String>) -> RotationFlags {
        for key in &keys {
            self.inner.rotating.insert(key.clone());
        }
        RotationFlags { store: self.clone(), keys }
    }

    /// Start the periodic refresher. A second call while running is a no-op.
    pub async fn start_background_refresh(&self) {
        let mut refresher = self.inner.refresher.lock().await;
        if refresher.is_some() {
            debug!("Background refresh already running");
            return;
        }
        *refresher = Some(BackgroundRefresher::spawn(self, self.inner.settings.refresh_interval));
    }

    /// Stop the refresher and wait for it to exit.
    pub async fn shutdown(&self) {
        let handle = self.inner.refresher.lock().await.take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
        info!("Secret store shut down");
    }

    #[cfg(test)]
    pub(crate) fn corrupt_cache_entry(&self, key: &str) {
        self.inner.cache.corrupt(key);
    }
}

/// Clears rotation flags on drop.
pub(crate) struct RotationFlags {
    store: SecretStore,
    keys: Vec<String>,
}

impl Drop for RotationFlags {
    fn drop(&mut self) {
        for key in &self.keys {
            self.store.inner.rotating.remove(key);
        }
    }
}
