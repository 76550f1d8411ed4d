//! Backend traits for the key-value store, distributed lock and bloom filter.
//!
//! These are the collaborators the cache facade and the idempotency guard
//! are built on. Implementations must be safe to share across tasks; every
//! call is a round-trip to the backing store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tollgate_core::{CacheError, LockConfig};

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// String-keyed store with TTL support.
///
/// Values are opaque strings; JSON encoding is the facade's concern.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Get the raw value stored under `key`.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Store `value` under `key`. `None` TTL means no expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()>;

    /// Store `value` only if `key` is absent. Returns whether the write happened.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> CacheResult<bool>;

    /// Delete one key, returning the number of keys removed.
    async fn delete(&self, key: &str) -> CacheResult<u64>;

    /// Delete several keys, returning the number of keys removed.
    async fn delete_many(&self, keys: &[String]) -> CacheResult<u64>;

    /// Whether `key` exists.
    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// How many of `keys` exist.
    async fn count_existing(&self, keys: &[String]) -> CacheResult<u64>;

    /// Atomically set every key to `value` with `ttl` iff none of them exist.
    ///
    /// No partial claims: either all keys are written or none are.
    async fn put_if_all_absent(
        &self,
        keys: &[String],
        value: &str,
        ttl: Duration,
    ) -> CacheResult<bool>;

    /// Increment a counter, starting a `window` expiry when it is created.
    async fn incr_window(&self, key: &str, window: Duration) -> CacheResult<u64>;

    /// Check the backend is reachable.
    async fn ping(&self) -> CacheResult<()>;
}

/// Proof of a held lock. Serializable so it can travel through the
/// idempotency context between the before and after phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockToken {
    /// Fully qualified lock name as stored in the backend.
    pub name: String,
    /// Random owner id; only the owner may release the lock.
    pub owner: String,
}

impl LockToken {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: uuid::Uuid::new_v4().simple().to_string(),
        }
    }
}

/// Cluster-wide mutual exclusion keyed by name.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Try once to take the lock. `None` if another owner holds it.
    async fn try_lock(&self, name: &str, lease: Duration) -> CacheResult<Option<LockToken>>;

    /// Release a held lock. Returns `false` if the lease already expired or
    /// another owner holds it now.
    async fn unlock(&self, token: &LockToken) -> CacheResult<bool>;

    /// Extend the lease of a held lock to `lease` from now. Returns `false`
    /// if the lock expired or another owner holds it now.
    async fn renew(&self, token: &LockToken, lease: Duration) -> CacheResult<bool>;

    /// Block until the lock is taken or `config.wait_timeout` elapses.
    async fn lock(&self, name: &str, config: &LockConfig) -> CacheResult<LockToken> {
        let started = Instant::now();
        loop {
            if let Some(token) = self.try_lock(name, config.lease).await? {
                return Ok(token);
            }
            if started.elapsed() >= config.wait_timeout {
                return Err(CacheError::LockTimeout {
                    name: name.to_string(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            tokio::time::sleep(config.retry_interval).await;
        }
    }
}

/// Probabilistic membership set. No false negatives, no deletion.
#[async_trait]
pub trait BloomFilter: Send + Sync {
    /// Filter name, used as its storage key.
    fn name(&self) -> &str;

    /// Whether `key` may have been added.
    async fn contains(&self, key: &str) -> CacheResult<bool>;

    /// Add `key` to the filter.
    async fn add(&self, key: &str) -> CacheResult<()>;
}

/// Counters describing cache facade usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the store.
    pub hits: u64,
    /// Lookups that found nothing usable.
    pub misses: u64,
    /// Lookups short-circuited by a bloom filter negative.
    pub bloom_rejections: u64,
    /// Loader invocations.
    pub loads: u64,
}

impl CacheStats {
    /// Hit rate in `[0, 1]`; 0 when nothing was looked up.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Lock-free counters behind [`CacheStats`].
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    bloom_rejections: AtomicU64,
    loads: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn bloom_rejection(&self) {
        self.bloom_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn load(&self) {
        self.loads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            bloom_rejections: self.bloom_rejections.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_lock_tokens_have_distinct_owners() {
        let a = LockToken::new("lock");
        let b = LockToken::new("lock");
        assert_eq!(a.name, b.name);
        assert_ne!(a.owner, b.owner);
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = StatsCounters::default();
        counters.hit();
        counters.hit();
        counters.miss();
        counters.load();
        counters.bloom_rejection();
        let stats = counters.snapshot();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.loads, 1);
        assert_eq!(stats.bloom_rejections, 1);
    }
}
