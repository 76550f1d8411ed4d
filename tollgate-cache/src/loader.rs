//! Cache-aside loading with an optional bloom filter gate.
//!
//! [`DistributedCache::get_or_load`] is a plain read-through: concurrent
//! misses may each run the loader. [`DistributedCache::safe_get`] collapses
//! miss storms with double-checked locking on a distributed mutex, and
//! short-circuits keys a bloom filter has never seen.
//!
//! # Example
//!
//! ```ignore
//! let bloom = MemoryBloomFilter::try_init(&BloomFilterConfig::default())?;
//! let options = SafeGetOptions::new().with_bloom_filter(&bloom);
//! let user: Option<User> = cache
//!     .safe_get("user:42", || async { repo.find(42).await }, options)
//!     .await?;
//! ```

use crate::facade::DistributedCache;
use crate::traits::{BloomFilter, CacheResult};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::time::Duration;
use tollgate_core::{is_blank, CacheError};

/// Prefix of the mutex taken by `safe_get` around a load.
pub const SAFE_GET_LOCK_PREFIX: &str = "safe_get_distributed_lock_get:";

/// Predicate consulted before locking; `true` returns the cached value as is.
pub type CacheCheckFilter<'a> = &'a (dyn Fn(&str) -> bool + Send + Sync);

/// Hook invoked when a locked load still produced nothing.
pub type CacheGetIfAbsent<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// Optional collaborators of [`DistributedCache::safe_get`].
#[derive(Clone, Copy, Default)]
pub struct SafeGetOptions<'a> {
    ttl: Option<Duration>,
    bloom_filter: Option<&'a dyn BloomFilter>,
    cache_check_filter: Option<CacheCheckFilter<'a>>,
    cache_get_if_absent: Option<CacheGetIfAbsent<'a>>,
}

impl<'a> SafeGetOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// TTL of a loaded value. Defaults to the configured value timeout.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_bloom_filter(mut self, bloom_filter: &'a dyn BloomFilter) -> Self {
        self.bloom_filter = Some(bloom_filter);
        self
    }

    pub fn with_cache_check_filter(mut self, filter: CacheCheckFilter<'a>) -> Self {
        self.cache_check_filter = Some(filter);
        self
    }

    pub fn with_cache_get_if_absent(mut self, hook: CacheGetIfAbsent<'a>) -> Self {
        self.cache_get_if_absent = Some(hook);
        self
    }
}

impl std::fmt::Debug for SafeGetOptions<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafeGetOptions")
            .field("ttl", &self.ttl)
            .field("bloom_filter", &self.bloom_filter.map(|b| b.name()))
            .field("cache_check_filter", &self.cache_check_filter.is_some())
            .field("cache_get_if_absent", &self.cache_get_if_absent.is_some())
            .finish()
    }
}

impl DistributedCache {
    async fn cached<T>(&self, key: &str) -> CacheResult<Option<T>>
    where
        T: DeserializeOwned + Serialize,
    {
        let value = self.get::<T>(key).await?.filter(|v| !is_blank(v));
        if value.is_some() {
            self.stats.hit();
        } else {
            self.stats.miss();
        }
        Ok(value)
    }

    /// Read-through get without locking.
    ///
    /// On a miss the loader runs and a non-blank result is stored under
    /// `ttl` (or the configured value timeout).
    pub async fn get_or_load<T, F, Fut, E>(
        &self,
        key: &str,
        loader: F,
        ttl: Option<Duration>,
    ) -> Result<Option<T>, E>
    where
        T: DeserializeOwned + Serialize + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Option<T>, E>> + Send,
        E: From<CacheError>,
    {
        if let Some(value) = self.cached::<T>(key).await? {
            return Ok(Some(value));
        }
        self.stats.load();
        let loaded = loader().await?;
        if let Some(value) = loaded.as_ref().filter(|v| !is_blank(*v)) {
            let ttl = ttl.unwrap_or(self.config().value_timeout);
            self.put(key, value, Some(ttl)).await?;
        }
        Ok(loaded)
    }

    /// Put, then record the key in `bloom_filter` if one is given.
    pub async fn safe_put<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        bloom_filter: Option<&dyn BloomFilter>,
    ) -> CacheResult<()> {
        let ttl = ttl.unwrap_or(self.config().value_timeout);
        self.put(key, value, Some(ttl)).await?;
        if let Some(bloom) = bloom_filter {
            bloom.add(key).await?;
        }
        Ok(())
    }

    /// Read-through get with penetration and breakdown protection.
    ///
    /// 1. A non-blank cached value, a `true` cache-check filter, or a bloom
    ///    filter negative returns immediately without locking.
    /// 2. Otherwise the `safe_get_distributed_lock_get:{key}` mutex is taken
    ///    and the cache checked again; only a second miss runs the loader.
    /// 3. A non-blank result is stored (and added to the bloom filter); a
    ///    blank one fires the `cache_get_if_absent` hook.
    ///
    /// The mutex is released whether or not the loader fails.
    pub async fn safe_get<T, F, Fut, E>(
        &self,
        key: &str,
        loader: F,
        options: SafeGetOptions<'_>,
    ) -> Result<Option<T>, E>
    where
        T: DeserializeOwned + Serialize + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Option<T>, E>> + Send,
        E: From<CacheError>,
    {
        let cached = self.cached::<T>(key).await?;
        if cached.is_some() {
            return Ok(cached);
        }
        if options.cache_check_filter.is_some_and(|filter| filter(key)) {
            return Ok(cached);
        }
        if let Some(bloom) = options.bloom_filter {
            if !bloom.contains(key).await? {
                self.stats.bloom_rejection();
                tracing::debug!(key, bloom = bloom.name(), "Bloom filter negative, skipping load");
                return Ok(cached);
            }
        }

        let lock = self.lock(&format!("{}{}", SAFE_GET_LOCK_PREFIX, key)).await?;
        let result = self.load_locked(key, loader, &options).await;
        if let Err(e) = self.unlock(&lock).await {
            tracing::warn!(key, error = %e, "Failed to release safe_get lock");
        }
        result
    }

    async fn load_locked<T, F, Fut, E>(
        &self,
        key: &str,
        loader: F,
        options: &SafeGetOptions<'_>,
    ) -> Result<Option<T>, E>
    where
        T: DeserializeOwned + Serialize + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Option<T>, E>> + Send,
        E: From<CacheError>,
    {
        if let Some(value) = self.cached::<T>(key).await? {
            return Ok(Some(value));
        }
        self.stats.load();
        let loaded = loader().await?;
        match loaded.as_ref().filter(|v| !is_blank(*v)) {
            Some(value) => {
                self.safe_put(key, value, options.ttl, options.bloom_filter)
                    .await?;
            }
            None => {
                if let Some(hook) = options.cache_get_if_absent {
                    hook(key);
                }
            }
        }
        Ok(loaded)
    }
}
