//! Distributed cache facade.
//!
//! Uniform get/put/delete/exists over a [`KvStore`], with key prefixing and
//! value encoding:
//!
//! - values that serialize to a JSON string are stored verbatim
//! - everything else is stored as JSON
//!
//! Reads decode JSON first and fall back to the verbatim string when the raw
//! value is not JSON, is a quoted JSON literal, or does not fit the
//! requested type.
//!
//! # Example
//!
//! ```ignore
//! let cache = DistributedCache::from_backend(Arc::new(MemoryStore::new()), CacheConfig::default());
//! cache.put("greeting", "hello", Some(Duration::from_secs(1))).await?;
//! let value: Option<String> = cache.get("greeting").await?;
//! ```

use crate::traits::{
    CacheResult, CacheStats, DistributedLock, KvStore, LockToken, StatsCounters,
};
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tollgate_core::{CacheConfig, CacheError, LockConfig};

/// Cache facade over a store and a lock provider.
#[derive(Clone)]
pub struct DistributedCache {
    store: Arc<dyn KvStore>,
    locks: Arc<dyn DistributedLock>,
    config: CacheConfig,
    lock_config: LockConfig,
    /// Lease renewal tasks of locks taken through this facade, by holder.
    watchdogs: Arc<DashMap<String, AbortHandle>>,
    pub(crate) stats: Arc<StatsCounters>,
}

impl std::fmt::Debug for DistributedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedCache")
            .field("config", &self.config)
            .field("lock_config", &self.lock_config)
            .finish_non_exhaustive()
    }
}

pub(crate) fn encode<T: Serialize + ?Sized>(value: &T) -> CacheResult<String> {
    let json = serde_json::to_value(value).map_err(|e| CacheError::Serialization {
        reason: e.to_string(),
    })?;
    match json {
        Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}

pub(crate) fn decode<T: DeserializeOwned>(raw: String) -> CacheResult<T> {
    let parsed = match serde_json::from_str::<Value>(&raw) {
        // `encode` never writes a quoted literal, so this was a verbatim string.
        Ok(Value::String(_)) | Err(_) => None,
        Ok(json) => Some(json),
    };
    let json_error = match parsed.map(serde_json::from_value::<T>) {
        Some(Ok(value)) => return Ok(value),
        Some(Err(e)) => Some(e.to_string()),
        None => None,
    };
    serde_json::from_value::<T>(Value::String(raw)).map_err(|e| CacheError::Serialization {
        reason: json_error.unwrap_or_else(|| e.to_string()),
    })
}

impl DistributedCache {
    /// Build a facade from separate store and lock providers.
    pub fn new(
        store: Arc<dyn KvStore>,
        locks: Arc<dyn DistributedLock>,
        config: CacheConfig,
    ) -> Self {
        Self {
            store,
            locks,
            config,
            lock_config: LockConfig::default(),
            watchdogs: Arc::new(DashMap::new()),
            stats: Arc::new(StatsCounters::default()),
        }
    }

    /// Build a facade from one backend that is both store and lock provider.
    pub fn from_backend<B>(backend: Arc<B>, config: CacheConfig) -> Self
    where
        B: KvStore + DistributedLock + 'static,
    {
        let store: Arc<dyn KvStore> = backend.clone();
        let locks: Arc<dyn DistributedLock> = backend;
        Self::new(store, locks, config)
    }

    pub fn with_lock_config(mut self, lock_config: LockConfig) -> Self {
        self.lock_config = lock_config;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn lock_config(&self) -> &LockConfig {
        &self.lock_config
    }

    /// The underlying store, with no prefixing applied.
    pub fn instance(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Usage counters since construction.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// Key as stored in the backend.
    pub fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    fn full_keys<S: AsRef<str>>(&self, keys: &[S]) -> Vec<String> {
        keys.iter().map(|k| self.full_key(k.as_ref())).collect()
    }

    // ========================================================================
    // VALUES
    // ========================================================================

    /// Read and decode `key`. Absent and blank raw values read as `None`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        match self.store.get(&self.full_key(key)).await? {
            Some(raw) if !raw.trim().is_empty() => decode(raw).map(Some),
            _ => Ok(None),
        }
    }

    /// Store `value`. `None` TTL stores without expiry.
    pub async fn put<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        let encoded = encode(value)?;
        self.store.set(&self.full_key(key), &encoded, ttl).await
    }

    /// Store `value` only if `key` is absent.
    pub async fn set_if_absent<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        let encoded = encode(value)?;
        self.store
            .set_if_absent(&self.full_key(key), &encoded, ttl)
            .await
    }

    /// Claim every key iff none exist, with the configured value timeout.
    pub async fn put_if_all_absent<S: AsRef<str>>(&self, keys: &[S]) -> CacheResult<bool> {
        let keys = self.full_keys(keys);
        self.store
            .put_if_all_absent(&keys, "", self.config.value_timeout)
            .await
    }

    /// Delete a single key or a batch.
    ///
    /// Exactly one of `key` and `keys` is expected. Supplying neither or both
    /// deletes nothing and returns 0.
    pub async fn delete(&self, key: Option<&str>, keys: Option<&[String]>) -> CacheResult<u64> {
        match (key, keys) {
            (Some(key), None) => self.delete_key(key).await,
            (None, Some(keys)) => self.delete_keys(keys).await,
            (Some(_), Some(_)) => {
                tracing::warn!("Cache delete called with both key and keys; nothing deleted");
                Ok(0)
            }
            (None, None) => Ok(0),
        }
    }

    pub async fn delete_key(&self, key: &str) -> CacheResult<u64> {
        self.store.delete(&self.full_key(key)).await
    }

    pub async fn delete_keys<S: AsRef<str>>(&self, keys: &[S]) -> CacheResult<u64> {
        self.store.delete_many(&self.full_keys(keys)).await
    }

    pub async fn has_key(&self, key: &str) -> CacheResult<bool> {
        self.store.exists(&self.full_key(key)).await
    }

    pub async fn count_existing_keys<S: AsRef<str>>(&self, keys: &[S]) -> CacheResult<u64> {
        self.store.count_existing(&self.full_keys(keys)).await
    }

    /// Fixed-window counter; the window starts at the first increment.
    pub async fn incr_window(&self, key: &str, window: Duration) -> CacheResult<u64> {
        self.store.incr_window(&self.full_key(key), window).await
    }

    // ========================================================================
    // LOCKS
    // ========================================================================

    /// Try once to take the lock `name`.
    ///
    /// A taken lock has its lease renewed until [`unlock`](Self::unlock).
    pub async fn try_lock(&self, name: &str) -> CacheResult<Option<LockToken>> {
        let full = self.full_key(name);
        let token = self.locks.try_lock(&full, self.lock_config.lease).await?;
        tracing::debug!(lock = %full, acquired = token.is_some(), "try_lock");
        if let Some(token) = &token {
            self.watch(token);
        }
        Ok(token)
    }

    /// Wait for the lock `name`, up to the configured wait timeout.
    ///
    /// A taken lock has its lease renewed until [`unlock`](Self::unlock).
    pub async fn lock(&self, name: &str) -> CacheResult<LockToken> {
        let full = self.full_key(name);
        let token = self.locks.lock(&full, &self.lock_config).await?;
        tracing::debug!(lock = %full, "lock acquired");
        self.watch(&token);
        Ok(token)
    }

    /// Release a lock taken through this facade.
    pub async fn unlock(&self, token: &LockToken) -> CacheResult<()> {
        if let Some((_, watchdog)) = self.watchdogs.remove(&holder_key(token)) {
            watchdog.abort();
        }
        if self.locks.unlock(token).await? {
            Ok(())
        } else {
            Err(CacheError::LockNotHeld {
                name: token.name.clone(),
            })
        }
    }

    /// Renew the lease of `token` every third of a lease until it is
    /// released or lost.
    fn watch(&self, token: &LockToken) {
        let locks = self.locks.clone();
        let watchdogs = self.watchdogs.clone();
        let lease = self.lock_config.lease;
        let every = (lease / 3).max(Duration::from_millis(1));
        let held = token.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(every).await;
                match locks.renew(&held, lease).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!(lock = %held.name, "Lock lost before release");
                        watchdogs.remove(&holder_key(&held));
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(lock = %held.name, error = %e, "Lock lease renewal failed");
                    }
                }
            }
        });
        self.watchdogs.insert(holder_key(token), task.abort_handle());
    }

    /// Locks currently kept alive by this facade.
    pub fn renewed_locks(&self) -> usize {
        self.watchdogs.len()
    }
}

fn holder_key(token: &LockToken) -> String {
    format!("{}#{}", token.name, token.owner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: u64,
        sku: String,
    }

    fn cache_with_prefix(prefix: &str) -> (Arc<MemoryStore>, DistributedCache) {
        let store = Arc::new(MemoryStore::new());
        let cache = DistributedCache::from_backend(
            store.clone(),
            CacheConfig::default().with_key_prefix(prefix),
        );
        (store, cache)
    }

    #[tokio::test]
    async fn test_strings_stored_verbatim() -> CacheResult<()> {
        let (store, cache) = cache_with_prefix("");
        cache.put("k", "hello", None).await?;
        assert_eq!(store.get("k").await?, Some("hello".to_string()));
        assert_eq!(cache.get::<String>("k").await?, Some("hello".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_structs_stored_as_json() -> CacheResult<()> {
        let (store, cache) = cache_with_prefix("");
        let order = Order {
            id: 7,
            sku: "A-1".to_string(),
        };
        cache.put("order", &order, None).await?;
        assert_eq!(
            store.get("order").await?,
            Some(r#"{"id":7,"sku":"A-1"}"#.to_string())
        );
        assert_eq!(cache.get::<Order>("order").await?, Some(order));
        Ok(())
    }

    #[tokio::test]
    async fn test_numeric_string_reads_back_as_string() -> CacheResult<()> {
        let (_, cache) = cache_with_prefix("");
        cache.put("n", "123", None).await?;
        assert_eq!(cache.get::<String>("n").await?, Some("123".to_string()));
        assert_eq!(cache.get::<u32>("n").await?, Some(123));
        Ok(())
    }

    #[tokio::test]
    async fn test_blank_raw_value_reads_as_none() -> CacheResult<()> {
        let (store, cache) = cache_with_prefix("");
        store.set("blank", "   ", None).await?;
        assert_eq!(cache.get::<String>("blank").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_undecodable_value_is_serialization_error() -> CacheResult<()> {
        let (store, cache) = cache_with_prefix("");
        store.set("bad", "not json", None).await?;
        assert!(matches!(
            cache.get::<Order>("bad").await,
            Err(CacheError::Serialization { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_prefix_applies_to_every_operation() -> CacheResult<()> {
        let (store, cache) = cache_with_prefix("svc:");
        cache.put("a", "1", None).await?;
        assert!(store.exists("svc:a").await?);
        assert!(!store.exists("a").await?);
        assert!(cache.has_key("a").await?);
        assert_eq!(cache.count_existing_keys(&["a", "b"]).await?, 1);
        assert_eq!(cache.delete_key("a").await?, 1);
        assert!(!store.exists("svc:a").await?);

        let token = cache.try_lock("job").await?;
        assert_eq!(token.map(|t| t.name), Some("svc:job".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_requires_exactly_one_argument() -> CacheResult<()> {
        let (_, cache) = cache_with_prefix("");
        cache.put("a", "1", None).await?;
        cache.put("b", "2", None).await?;
        let batch = vec!["a".to_string(), "b".to_string()];

        assert_eq!(cache.delete(None, None).await?, 0);
        assert_eq!(cache.delete(Some("a"), Some(&batch)).await?, 0);
        assert_eq!(cache.delete(Some("a"), None).await?, 1);
        assert_eq!(cache.delete(None, Some(&batch)).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_unlock_of_foreign_token_fails() -> CacheResult<()> {
        let (_, cache) = cache_with_prefix("");
        let token = cache.lock("resource").await?;
        let foreign = LockToken::new(token.name.clone());
        assert!(matches!(
            cache.unlock(&foreign).await,
            Err(CacheError::LockNotHeld { .. })
        ));
        cache.unlock(&token).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_set_if_absent() -> CacheResult<()> {
        let (_, cache) = cache_with_prefix("p:");
        assert!(cache.set_if_absent("once", "0", None).await?);
        assert!(!cache.set_if_absent("once", "1", None).await?);
        assert_eq!(cache.get::<String>("once").await?, Some("0".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_json_values_read_back_as_json() -> CacheResult<()> {
        let (_, cache) = cache_with_prefix("");
        let record = serde_json::json!({"orderId": "abc", "order": {"sku": "B2"}});
        cache.put("o", &record, None).await?;
        assert_eq!(cache.get::<Value>("o").await?, Some(record));

        cache.put("list", &serde_json::json!([]), None).await?;
        assert_eq!(cache.get::<Value>("list").await?, Some(serde_json::json!([])));
        Ok(())
    }

    #[tokio::test]
    async fn test_options_round_trip() -> CacheResult<()> {
        let (_, cache) = cache_with_prefix("");
        cache.put("none", &None::<String>, None).await?;
        assert_eq!(cache.get::<Option<String>>("none").await?, Some(None));

        cache.put("some", &Some("x".to_string()), None).await?;
        assert_eq!(
            cache.get::<Option<String>>("some").await?,
            Some(Some("x".to_string()))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_quoted_string_stays_verbatim() -> CacheResult<()> {
        let (_, cache) = cache_with_prefix("");
        cache.put("q", "\"quoted\"", None).await?;
        assert_eq!(
            cache.get::<String>("q").await?,
            Some("\"quoted\"".to_string())
        );
        assert_eq!(
            cache.get::<Value>("q").await?,
            Some(Value::String("\"quoted\"".to_string()))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_held_lock_outlives_its_lease() -> CacheResult<()> {
        let (_, cache) = cache_with_prefix("");
        let cache = cache.with_lock_config(LockConfig {
            wait_timeout: Duration::from_millis(50),
            lease: Duration::from_millis(100),
            retry_interval: Duration::from_millis(10),
        });
        let token = cache.try_lock("long").await?;
        let token = token.ok_or(CacheError::LockNotHeld {
            name: "long".to_string(),
        })?;
        assert_eq!(cache.renewed_locks(), 1);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(cache.try_lock("long").await?.is_none());

        cache.unlock(&token).await?;
        assert_eq!(cache.renewed_locks(), 0);
        assert!(cache.try_lock("long").await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_unlocked_lease_is_not_renewed() -> CacheResult<()> {
        let (store, cache) = cache_with_prefix("");
        let cache = cache.with_lock_config(LockConfig {
            lease: Duration::from_millis(60),
            ..LockConfig::default()
        });
        let token = cache.lock("short").await?;
        cache.unlock(&token).await?;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!store.renew(&token, Duration::from_secs(1)).await?);
        Ok(())
    }
}
