//! In-process backend.
//!
//! `MemoryStore` implements both [`KvStore`] and [`DistributedLock`] over a
//! `DashMap`, with lazy TTL expiry. Locks live in the same keyspace as
//! values, the way they do in Redis. Mutual exclusion only spans the current
//! process, so this backend is meant for tests and single-node deployments.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tollgate_cache::{DistributedCache, MemoryStore};
//!
//! let store = Arc::new(MemoryStore::new());
//! let cache = DistributedCache::from_backend(store, CacheConfig::default());
//! ```

use crate::traits::{BloomFilter, CacheResult, DistributedLock, KvStore, LockToken};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::time::{Duration, Instant};
use tollgate_core::{BloomFilterConfig, CacheError};

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn new(value: &str, ttl: Option<Duration>) -> Self {
        Self {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory key-value store and lock provider.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
    /// Single-key operations take this shared; multi-key operations take it
    /// exclusively so they observe and write all keys atomically.
    batch_gate: RwLock<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries, purging expired ones first.
    pub fn len(&self) -> usize {
        self.purge_expired();
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, v| !v.is_expired(now));
    }

    fn live_value(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, v| v.is_expired(now));
        }
        None
    }

    fn is_live(&self, key: &str) -> bool {
        self.live_value(key).is_some()
    }

    fn insert_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> bool {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(StoredValue::new(value, ttl));
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue::new(value, ttl));
                true
            }
        }
    }

    fn remove_live(&self, key: &str) -> u64 {
        let now = Instant::now();
        match self.entries.remove(key) {
            Some((_, v)) if !v.is_expired(now) => 1,
            _ => 0,
        }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let _gate = self.batch_gate.read();
        Ok(self.live_value(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        let _gate = self.batch_gate.read();
        self.entries
            .insert(key.to_string(), StoredValue::new(value, ttl));
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        let _gate = self.batch_gate.read();
        Ok(self.insert_if_absent(key, value, ttl))
    }

    async fn delete(&self, key: &str) -> CacheResult<u64> {
        let _gate = self.batch_gate.read();
        Ok(self.remove_live(key))
    }

    async fn delete_many(&self, keys: &[String]) -> CacheResult<u64> {
        let _gate = self.batch_gate.write();
        Ok(keys.iter().map(|k| self.remove_live(k)).sum())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let _gate = self.batch_gate.read();
        Ok(self.is_live(key))
    }

    async fn count_existing(&self, keys: &[String]) -> CacheResult<u64> {
        let _gate = self.batch_gate.write();
        Ok(keys.iter().filter(|k| self.is_live(k)).count() as u64)
    }

    async fn put_if_all_absent(
        &self,
        keys: &[String],
        value: &str,
        ttl: Duration,
    ) -> CacheResult<bool> {
        let _gate = self.batch_gate.write();
        if keys.iter().any(|k| self.is_live(k)) {
            return Ok(false);
        }
        for key in keys {
            self.entries
                .insert(key.clone(), StoredValue::new(value, Some(ttl)));
        }
        Ok(true)
    }

    async fn incr_window(&self, key: &str, window: Duration) -> CacheResult<u64> {
        let _gate = self.batch_gate.read();
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) if !occupied.get().is_expired(now) => {
                let current: u64 =
                    occupied
                        .get()
                        .value
                        .parse()
                        .map_err(|_| CacheError::Backend {
                            reason: format!("value at {} is not an integer", key),
                        })?;
                let next = current + 1;
                occupied.get_mut().value = next.to_string();
                Ok(next)
            }
            Entry::Occupied(mut occupied) => {
                occupied.insert(StoredValue::new("1", Some(window)));
                Ok(1)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue::new("1", Some(window)));
                Ok(1)
            }
        }
    }

    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }
}

#[async_trait]
impl DistributedLock for MemoryStore {
    async fn try_lock(&self, name: &str, lease: Duration) -> CacheResult<Option<LockToken>> {
        let _gate = self.batch_gate.read();
        let token = LockToken::new(name);
        if self.insert_if_absent(name, &token.owner, Some(lease)) {
            Ok(Some(token))
        } else {
            Ok(None)
        }
    }

    async fn unlock(&self, token: &LockToken) -> CacheResult<bool> {
        let _gate = self.batch_gate.read();
        let now = Instant::now();
        let removed = self
            .entries
            .remove_if(&token.name, |_, v| !v.is_expired(now) && v.value == token.owner);
        Ok(removed.is_some())
    }

    async fn renew(&self, token: &LockToken, lease: Duration) -> CacheResult<bool> {
        let _gate = self.batch_gate.read();
        let now = Instant::now();
        match self.entries.get_mut(&token.name) {
            Some(mut entry) if !entry.is_expired(now) && entry.value == token.owner => {
                entry.expires_at = Some(now + lease);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// In-process bloom filter backed by the `bloomfilter` crate.
pub struct MemoryBloomFilter {
    name: String,
    bloom: RwLock<bloomfilter::Bloom<String>>,
}

impl MemoryBloomFilter {
    /// Size a new filter from `config`.
    pub fn try_init(config: &BloomFilterConfig) -> CacheResult<Self> {
        let bloom = bloomfilter::Bloom::new_for_fp_rate(
            config.expected_insertions,
            config.false_probability,
        )
        .map_err(|e| CacheError::BloomInit {
            name: config.name.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            name: config.name.clone(),
            bloom: RwLock::new(bloom),
        })
    }
}

impl std::fmt::Debug for MemoryBloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBloomFilter")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BloomFilter for MemoryBloomFilter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn contains(&self, key: &str) -> CacheResult<bool> {
        let guard = self.bloom.read();
        Ok(guard.check(&key.to_string()))
    }

    async fn add(&self, key: &str) -> CacheResult<()> {
        let mut guard = self.bloom.write();
        guard.set(&key.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_core::LockConfig;

    #[tokio::test]
    async fn test_set_get_delete() -> CacheResult<()> {
        let store = MemoryStore::new();
        store.set("k", "v", None).await?;
        assert_eq!(store.get("k").await?, Some("v".to_string()));
        assert!(store.exists("k").await?);
        assert_eq!(store.delete("k").await?, 1);
        assert_eq!(store.delete("k").await?, 0);
        assert_eq!(store.get("k").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_ttl_expiry() -> CacheResult<()> {
        let store = MemoryStore::new();
        store.set("k", "v", Some(Duration::from_millis(20))).await?;
        assert!(store.exists("k").await?);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!store.exists("k").await?);
        assert!(store.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_set_if_absent_respects_live_and_expired() -> CacheResult<()> {
        let store = MemoryStore::new();
        assert!(store.set_if_absent("k", "a", Some(Duration::from_millis(20))).await?);
        assert!(!store.set_if_absent("k", "b", None).await?);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.set_if_absent("k", "c", None).await?);
        assert_eq!(store.get("k").await?, Some("c".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_put_if_all_absent_is_all_or_nothing() -> CacheResult<()> {
        let store = MemoryStore::new();
        store.set("a", "x", None).await?;
        let keys = vec!["a".to_string(), "b".to_string()];
        assert!(!store.put_if_all_absent(&keys, "", Duration::from_secs(5)).await?);
        assert!(!store.exists("b").await?);

        store.delete("a").await?;
        assert!(store.put_if_all_absent(&keys, "", Duration::from_secs(5)).await?);
        assert_eq!(store.count_existing(&keys).await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_incr_window() -> CacheResult<()> {
        let store = MemoryStore::new();
        let window = Duration::from_millis(30);
        assert_eq!(store.incr_window("c", window).await?, 1);
        assert_eq!(store.incr_window("c", window).await?, 2);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.incr_window("c", window).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_lock_exclusive_until_unlocked() -> CacheResult<()> {
        let store = MemoryStore::new();
        let lease = Duration::from_secs(5);
        let token = store.try_lock("lock", lease).await?;
        assert!(token.is_some());
        assert!(store.try_lock("lock", lease).await?.is_none());

        let token = token.ok_or(CacheError::LockNotHeld {
            name: "lock".to_string(),
        })?;
        let stranger = LockToken::new("lock");
        assert!(!store.unlock(&stranger).await?);
        assert!(store.unlock(&token).await?);
        assert!(store.try_lock("lock", lease).await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_blocking_lock_times_out() -> CacheResult<()> {
        let store = MemoryStore::new();
        let config = LockConfig {
            wait_timeout: Duration::from_millis(60),
            lease: Duration::from_secs(5),
            retry_interval: Duration::from_millis(10),
        };
        let _held = store.lock("busy", &config).await?;
        let err = store.lock("busy", &config).await;
        assert!(matches!(err, Err(CacheError::LockTimeout { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_blocking_lock_acquires_after_lease_expiry() -> CacheResult<()> {
        let store = MemoryStore::new();
        store.try_lock("lease", Duration::from_millis(30)).await?;
        let config = LockConfig {
            wait_timeout: Duration::from_secs(1),
            lease: Duration::from_secs(5),
            retry_interval: Duration::from_millis(10),
        };
        let token = store.lock("lease", &config).await?;
        assert_eq!(token.name, "lease");
        Ok(())
    }

    #[tokio::test]
    async fn test_memory_bloom_filter() -> CacheResult<()> {
        let bloom = MemoryBloomFilter::try_init(&BloomFilterConfig::default())?;
        assert_eq!(bloom.name(), "cache_penetration_bloom_filter");
        assert!(!bloom.contains("user:1").await?);
        bloom.add("user:1").await?;
        assert!(bloom.contains("user:1").await?);
        Ok(())
    }
}
