//! Tollgate Cache - Distributed Cache Facade and Cache-Aside Loading
//!
//! - [`traits`]: store, lock and bloom filter collaborator traits
//! - [`memory`]: in-process backend (DashMap + `bloomfilter`)
//! - `redis_backend`: Redis backend (feature `redis-backend`)
//! - [`facade`]: prefixed, JSON-aware get/put/delete over a store
//! - [`loader`]: read-through and lock-guarded, bloom-gated loading

pub mod facade;
pub mod loader;
pub mod memory;
#[cfg(feature = "redis-backend")]
pub mod redis_backend;
pub mod traits;

pub use facade::DistributedCache;
pub use loader::{CacheCheckFilter, CacheGetIfAbsent, SafeGetOptions, SAFE_GET_LOCK_PREFIX};
pub use memory::{MemoryBloomFilter, MemoryStore};
#[cfg(feature = "redis-backend")]
pub use redis_backend::{RedisBloomFilter, RedisStore};
pub use traits::{BloomFilter, CacheResult, CacheStats, DistributedLock, KvStore, LockToken};
