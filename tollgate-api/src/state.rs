//! Shared application state for Axum routers.

use std::sync::Arc;
use std::time::Instant;

use tollgate_cache::{BloomFilter, DistributedCache, MemoryBloomFilter, MemoryStore};
use tollgate_core::{BloomFilterConfig, TollgateConfig};
use tollgate_idempotent::{HandlerRegistry, IdempotentGuard};

use crate::config::{ApiConfig, StoreBackend};
use crate::error::{ApiError, ApiResult};
use crate::telemetry::MetricsListener;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub cache: DistributedCache,
    /// Guard with the built-in handlers over `cache`, reporting to metrics.
    pub guard: IdempotentGuard,
    /// Penetration filter for cache-aside reads, when enabled.
    pub bloom: Option<Arc<dyn BloomFilter>>,
    pub config: Arc<ApiConfig>,
    pub start_time: Instant,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("cache", &self.cache)
            .field("guard", &self.guard)
            .field("bloom", &self.bloom.as_ref().map(|b| b.name().to_string()))
            .field("config", &self.config)
            .finish()
    }
}

crate::impl_from_ref!(DistributedCache, cache);
crate::impl_from_ref!(IdempotentGuard, guard);
crate::impl_from_ref!(Arc<ApiConfig>, config);

impl AppState {
    /// Wire the guard over an already-built cache.
    pub fn new(
        cache: DistributedCache,
        tollgate: &TollgateConfig,
        config: ApiConfig,
        bloom: Option<Arc<dyn BloomFilter>>,
    ) -> Self {
        let registry = HandlerRegistry::new(cache.clone(), tollgate.token.clone());
        let guard = IdempotentGuard::new(Arc::new(registry)).with_listener(Arc::new(MetricsListener));
        Self {
            cache,
            guard,
            bloom,
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }

    /// Validate configuration, connect the configured backend and wire
    /// everything on top of it.
    pub async fn connect(tollgate: TollgateConfig, config: ApiConfig) -> ApiResult<Self> {
        tollgate.validate()?;

        match config.backend {
            StoreBackend::Memory => {
                let store = Arc::new(MemoryStore::new());
                let cache = DistributedCache::from_backend(store, tollgate.cache.clone())
                    .with_lock_config(tollgate.lock.clone());
                let bloom = memory_bloom(&tollgate.bloom)?;
                Ok(Self::new(cache, &tollgate, config, bloom))
            }
            #[cfg(feature = "redis-backend")]
            StoreBackend::Redis => {
                let store = Arc::new(tollgate_cache::RedisStore::connect(&config.redis_url).await?);
                let bloom: Option<Arc<dyn BloomFilter>> = if tollgate.bloom.enabled {
                    let filter =
                        tollgate_cache::RedisBloomFilter::try_init(&store, &tollgate.bloom).await?;
                    Some(Arc::new(filter))
                } else {
                    None
                };
                let cache = DistributedCache::from_backend(store, tollgate.cache.clone())
                    .with_lock_config(tollgate.lock.clone());
                tracing::info!(redis_url = %config.redis_url, "Connected to Redis");
                Ok(Self::new(cache, &tollgate, config, bloom))
            }
            #[cfg(not(feature = "redis-backend"))]
            StoreBackend::Redis => Err(ApiError::system_error(
                "Redis backend requested but the redis-backend feature is disabled",
            )),
        }
    }
}

fn memory_bloom(config: &BloomFilterConfig) -> ApiResult<Option<Arc<dyn BloomFilter>>> {
    if !config.enabled {
        return Ok(None);
    }
    let filter = MemoryBloomFilter::try_init(config).map_err(ApiError::from)?;
    Ok(Some(Arc::new(filter)))
}
