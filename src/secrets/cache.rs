//! Encrypted in-memory secret cache.
//!
//! Entries hold only AES-256-GCM ciphertext plus audit metadata. The map is a
//! `DashMap`, so readers and writers of different keys never contend on a
//! store-wide lock. Nothing here is ever persisted.

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use std::time::Duration;
use tracing::warn;

use super::cipher::SecretCipher;
use super::error::{Result, SecretsError};
use super::types::SecretString;

/// A cached secret. The plaintext is never stored.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    ciphertext: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
    pub ttl: Duration,
    pub fingerprint: String,
    pub signature: String,
}

impl CacheEntry {
    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = TimeDelta::from_std(self.ttl).unwrap_or(TimeDelta::MAX);
        self.fetched_at.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }
}

/// Metadata about a cached entry, safe to log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntryInfo {
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub fingerprint: String,
    pub signature: String,
}

/// Outcome of a cache lookup.
#[derive(Debug)]
pub enum CacheLookup {
    Hit(SecretString),
    Miss,
    Expired,
    /// The entry failed authentication and has been evicted.
    Undecryptable(SecretsError),
}

/// Concurrent map of key to sealed value.
#[derive(Debug)]
pub struct EncryptedCache {
    entries: DashMap<String, CacheEntry>,
    cipher: SecretCipher,
}

impl EncryptedCache {
    pub fn new(cipher: SecretCipher) -> Self {
        Self { entries: DashMap::new(), cipher }
    }

    /// Seal `value` and insert or replace the entry for `key`.
    pub fn insert(
        &self,
        key: &str,
        value: &SecretString,
        ttl: Duration,
        fingerprint: String,
        signature: String,
    ) -> Result<()> {
        let ciphertext = self.cipher.seal_secret(value)?;
        self.entries.insert(
            key.to_string(),
            CacheEntry { ciphertext, fetched_at: Utc::now(), ttl, fingerprint, signature },
        );
        Ok(())
    }

    pub fn lookup(&self, key: &str) -> CacheLookup {
        self.lookup_at(key, Utc::now())
    }

    fn lookup_at(&self, key: &str, now: DateTime<Utc>) -> CacheLookup {
        // Decrypt under the shard read guard, evict only after it is released.
        let failed_ciphertext = match self.entries.get(key) {
            None => return CacheLookup::Miss,
            Some(entry) if entry.is_expired_at(now) => return CacheLookup::Expired,
            Some(entry) => match self.cipher.open_secret(&entry.ciphertext) {
                Ok(value) => return CacheLookup::Hit(value),
                Err(e) => (entry.ciphertext.clone(), e),
            },
        };

        let (ciphertext, error) = failed_ciphertext;
        warn!(key = %key, error = %error, "Evicting undecryptable cache entry");
        self.entries.remove_if(key, |_, entry| entry.ciphertext == ciphertext);
        CacheLookup::Undecryptable(error)
    }

    pub fn info(&self, key: &str) -> Option<CacheEntryInfo> {
        self.entries.get(key).map(|entry| CacheEntryInfo {
            fetched_at: entry.fetched_at,
            expires_at: entry.expires_at(),
            fingerprint: entry.fingerprint.clone(),
            signature: entry.signature.clone(),
        })
    }

    /// Snapshot of the cached keys.
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn corrupt(&self, key: &str) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            if let Some(last) = entry.ciphertext.last_mut() {
                *last ^= 0xff;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> EncryptedCache {
        let cipher =
            SecretCipher::from_master(&SecretString::new("cache-test-master-material-0123456"))
                .unwrap();
        EncryptedCache::new(cipher)
    }

    fn insert(cache: &EncryptedCache, key: &str, value: &str, ttl: Duration) {
        cache
            .insert(key, &SecretString::new(value), ttl, "fp".to_string(), "sig".to_string())
            .unwrap();
    }

    #[test]
    fn test_insert_and_hit() {
        let cache = cache();
        insert(&cache, "JWT_SECRET", "value-1", Duration::from_secs(60));

        match cache.lookup("JWT_SECRET") {
            CacheLookup::Hit(value) => assert_eq!(value.expose_secret(), "value-1"),
            other => panic!("expected hit, got {:?}", other),
        }
        assert!(matches!(cache.lookup("OTHER"), CacheLookup::Miss));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_entry_is_not_returned() {
        let cache = cache();
        insert(&cache, "JWT_SECRET", "value-1", Duration::from_secs(60));

        let later = Utc::now() + TimeDelta::seconds(61);
        assert!(matches!(cache.lookup_at("JWT_SECRET", later), CacheLookup::Expired));
        // Expired entries stay so the refresher still knows about the key.
        assert!(cache.contains("JWT_SECRET"));
    }

    #[test]
    fn test_replace_overwrites_entry() {
        let cache = cache();
        insert(&cache, "API_KEY", "old", Duration::from_secs(60));
        insert(&cache, "API_KEY", "new", Duration::from_secs(60));

        match cache.lookup("API_KEY") {
            CacheLookup::Hit(value) => assert_eq!(value.expose_secret(), "new"),
            other => panic!("expected hit, got {:?}", other),
        }
    }

    #[test]
    fn test_corrupted_entry_is_evicted() {
        let cache = cache();
        insert(&cache, "API_KEY", "value", Duration::from_secs(60));
        cache.corrupt("API_KEY");

        assert!(matches!(cache.lookup("API_KEY"), CacheLookup::Undecryptable(_)));
        assert!(!cache.contains("API_KEY"));
        assert!(matches!(cache.lookup("API_KEY"), CacheLookup::Miss));
    }

    #[test]
    fn test_info_exposes_metadata_only() {
        let cache = cache();
        insert(&cache, "API_KEY", "value", Duration::from_secs(30));

        let info = cache.info("API_KEY").unwrap();
        assert_eq!(info.fingerprint, "fp");
        assert_eq!(info.signature, "sig");
        assert_eq!(info.expires_at - info.fetched_at, TimeDelta::seconds(30));
    }

    #[test]
    fn test_keys_remove_clear() {
        let cache = cache();
        insert(&cache, "A", "1", Duration::from_secs(30));
        insert(&cache, "B", "2", Duration::from_secs(30));

        let mut keys = cache.keys();
        keys.sort();
        assert_eq!(keys, vec!["A".to_string(), "B".to_string()]);

        assert!(cache.remove("A"));
        assert!(!cache.remove("A"));
        cache.clear();
        assert!(cache.is_empty());
    }
}
