//! Redis backend.
//!
//! Uses a `ConnectionManager` for automatic reconnection. Multi-key claims,
//! lock release and windowed counters run as Lua scripts so each is atomic
//! on the server. The bloom filter is a plain bitmap addressed by double
//! hashing, with its sizing persisted next to it so every node agrees.

use crate::traits::{BloomFilter, CacheResult, DistributedLock, KvStore, LockToken};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tollgate_core::{BloomFilterConfig, CacheError};

const PUT_IF_ALL_ABSENT_SCRIPT: &str = r#"
for _, key in ipairs(KEYS) do
    if redis.call('EXISTS', key) == 1 then
        return 0
    end
end
for _, key in ipairs(KEYS) do
    redis.call('SET', key, ARGV[1], 'PX', ARGV[2])
end
return 1
"#;

const UNLOCK_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

const RENEW_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

const INCR_WINDOW_SCRIPT: &str = r#"
local current = redis.call('INCR', KEYS[1])
if current == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return current
"#;

fn backend_err(err: redis::RedisError) -> CacheError {
    CacheError::Backend {
        reason: err.to_string(),
    }
}

fn script_err(err: redis::RedisError) -> CacheError {
    CacheError::Script {
        reason: err.to_string(),
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

/// Redis-backed key-value store and lock provider.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> CacheResult<Self> {
        let client = redis::Client::open(url).map_err(backend_err)?;
        let conn = ConnectionManager::new(client).await.map_err(backend_err)?;
        tracing::info!(url = %url, "Connected to Redis");
        Ok(Self { conn })
    }

    /// Wrap an existing connection manager.
    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Clone of the underlying connection, for callers that need raw commands.
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(backend_err)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let _: () = cmd.query_async(&mut conn).await.map_err(backend_err)?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let reply: Option<String> = cmd.query_async(&mut conn).await.map_err(backend_err)?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> CacheResult<u64> {
        let mut conn = self.conn.clone();
        let removed: u64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(backend_err)?;
        Ok(removed)
    }

    async fn delete_many(&self, keys: &[String]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let removed: u64 = redis::cmd("DEL")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(backend_err)?;
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.count_existing(&[key.to_string()]).await? > 0)
    }

    async fn count_existing(&self, keys: &[String]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let count: u64 = redis::cmd("EXISTS")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(backend_err)?;
        Ok(count)
    }

    async fn put_if_all_absent(
        &self,
        keys: &[String],
        value: &str,
        ttl: Duration,
    ) -> CacheResult<bool> {
        if keys.is_empty() {
            return Ok(true);
        }
        let mut conn = self.conn.clone();
        let script = redis::Script::new(PUT_IF_ALL_ABSENT_SCRIPT);
        let claimed: i64 = script
            .key(keys)
            .arg(value)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(script_err)?;
        Ok(claimed == 1)
    }

    async fn incr_window(&self, key: &str, window: Duration) -> CacheResult<u64> {
        let mut conn = self.conn.clone();
        let script = redis::Script::new(INCR_WINDOW_SCRIPT);
        let current: u64 = script
            .key(key)
            .arg(ttl_millis(window))
            .invoke_async(&mut conn)
            .await
            .map_err(script_err)?;
        Ok(current)
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(backend_err)?;
        Ok(())
    }
}

#[async_trait]
impl DistributedLock for RedisStore {
    async fn try_lock(&self, name: &str, lease: Duration) -> CacheResult<Option<LockToken>> {
        let token = LockToken::new(name);
        if self.set_if_absent(name, &token.owner, Some(lease)).await? {
            Ok(Some(token))
        } else {
            Ok(None)
        }
    }

    async fn unlock(&self, token: &LockToken) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        let script = redis::Script::new(UNLOCK_SCRIPT);
        let removed: i64 = script
            .key(&token.name)
            .arg(&token.owner)
            .invoke_async(&mut conn)
            .await
            .map_err(script_err)?;
        Ok(removed == 1)
    }

    async fn renew(&self, token: &LockToken, lease: Duration) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        let script = redis::Script::new(RENEW_SCRIPT);
        let renewed: i64 = script
            .key(&token.name)
            .arg(&token.owner)
            .arg(ttl_millis(lease))
            .invoke_async(&mut conn)
            .await
            .map_err(script_err)?;
        Ok(renewed == 1)
    }
}

// ============================================================================
// BLOOM FILTER
// ============================================================================

/// Optimal bitmap size and hash count for `n` insertions at rate `p`.
pub fn bloom_dimensions(n: usize, p: f64) -> (u64, u32) {
    let n = n.max(1) as f64;
    let ln2 = std::f64::consts::LN_2;
    let bits = (-(n * p.ln()) / (ln2 * ln2)).ceil().max(8.0);
    let hashes = ((bits / n) * ln2).round().max(1.0);
    (bits as u64, hashes as u32)
}

/// Bit offsets of `key` via double hashing over SHA-256.
pub fn bloom_positions(key: &str, bits: u64, hashes: u32) -> Vec<u64> {
    let digest = Sha256::digest(key.as_bytes());
    let mut h1 = [0u8; 8];
    let mut h2 = [0u8; 8];
    h1.copy_from_slice(&digest[0..8]);
    h2.copy_from_slice(&digest[8..16]);
    let h1 = u64::from_le_bytes(h1);
    let h2 = u64::from_le_bytes(h2) | 1;
    (0..hashes as u64)
        .map(|i| h1.wrapping_add(i.wrapping_mul(h2)) % bits)
        .collect()
}

/// Bloom filter stored as a Redis bitmap.
#[derive(Clone)]
pub struct RedisBloomFilter {
    conn: ConnectionManager,
    name: String,
    bits: u64,
    hashes: u32,
}

impl RedisBloomFilter {
    /// Create the filter, or attach to an existing one of the same name.
    ///
    /// An existing filter keeps its original sizing; `config` only applies
    /// the first time the name is initialised anywhere in the cluster.
    pub async fn try_init(store: &RedisStore, config: &BloomFilterConfig) -> CacheResult<Self> {
        config.validate().map_err(|e| CacheError::BloomInit {
            name: config.name.clone(),
            reason: e.to_string(),
        })?;
        let (bits, hashes) = bloom_dimensions(config.expected_insertions, config.false_probability);
        let config_key = format!("{}:config", config.name);
        let mut conn = store.connection();

        let mut init = redis::pipe();
        init.atomic()
            .cmd("HSETNX")
            .arg(&config_key)
            .arg("size")
            .arg(bits)
            .ignore()
            .cmd("HSETNX")
            .arg(&config_key)
            .arg("hashIterations")
            .arg(hashes)
            .ignore();
        let _: () = init.query_async(&mut conn).await.map_err(backend_err)?;

        let (stored_bits, stored_hashes): (Option<u64>, Option<u32>) = redis::cmd("HMGET")
            .arg(&config_key)
            .arg("size")
            .arg("hashIterations")
            .query_async(&mut conn)
            .await
            .map_err(backend_err)?;

        let bits = stored_bits.unwrap_or(bits);
        let hashes = stored_hashes.unwrap_or(hashes);
        tracing::debug!(name = %config.name, bits, hashes, "Bloom filter ready");
        Ok(Self {
            conn,
            name: config.name.clone(),
            bits,
            hashes,
        })
    }
}

impl std::fmt::Debug for RedisBloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBloomFilter")
            .field("name", &self.name)
            .field("bits", &self.bits)
            .field("hashes", &self.hashes)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BloomFilter for RedisBloomFilter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn contains(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for offset in bloom_positions(key, self.bits, self.hashes) {
            pipe.cmd("GETBIT").arg(&self.name).arg(offset);
        }
        let bits: Vec<u8> = pipe.query_async(&mut conn).await.map_err(backend_err)?;
        Ok(bits.iter().all(|b| *b == 1))
    }

    async fn add(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for offset in bloom_positions(key, self.bits, self.hashes) {
            pipe.cmd("SETBIT").arg(&self.name).arg(offset).arg(1).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await.map_err(backend_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bloom_dimensions_for_defaults() {
        let (bits, hashes) = bloom_dimensions(64, 0.03);
        // -64 * ln(0.03) / ln(2)^2 = 467.1
        assert_eq!(bits, 468);
        assert_eq!(hashes, 5);
    }

    #[test]
    fn test_bloom_positions_are_stable_and_in_range() {
        let a = bloom_positions("user:1", 468, 5);
        let b = bloom_positions("user:1", 468, 5);
        assert_eq!(a, b);
        assert_eq!(a.len(), 5);
        assert!(a.iter().all(|p| *p < 468));
        assert_ne!(a, bloom_positions("user:2", 468, 5));
    }
}
