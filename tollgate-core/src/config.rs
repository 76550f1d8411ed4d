//! Configuration types
//!
//! Every section loads from `TOLLGATE_*` environment variables with
//! defaults suitable for local development.

use crate::error::ConfigError;
use std::time::Duration;

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
}

fn require_non_zero(key: &str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

// ============================================================================
// CACHE
// ============================================================================

/// Distributed cache facade settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Prefix applied to every key written to the store.
    pub key_prefix: String,
    /// TTL for `put_if_all_absent` sentinels and default loader TTL.
    pub value_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: String::new(),
            value_timeout: Duration::from_millis(30_000),
        }
    }
}

impl CacheConfig {
    /// Environment variables:
    /// - `TOLLGATE_CACHE_PREFIX` (default: empty)
    /// - `TOLLGATE_CACHE_VALUE_TIMEOUT_MS` (default: 30000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            key_prefix: std::env::var("TOLLGATE_CACHE_PREFIX").unwrap_or(defaults.key_prefix),
            value_timeout: env_parse("TOLLGATE_CACHE_VALUE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.value_timeout),
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_value_timeout(mut self, timeout: Duration) -> Self {
        self.value_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_zero("TOLLGATE_CACHE_VALUE_TIMEOUT_MS", self.value_timeout)
    }
}

// ============================================================================
// BLOOM FILTER
// ============================================================================

/// Penetration-protection bloom filter sizing.
///
/// Sized once at startup; inserting far more than `expected_insertions`
/// degrades the false-positive rate and there is no resize.
#[derive(Debug, Clone, PartialEq)]
pub struct BloomFilterConfig {
    pub enabled: bool,
    pub name: String,
    pub expected_insertions: usize,
    pub false_probability: f64,
}

impl Default for BloomFilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: "cache_penetration_bloom_filter".to_string(),
            expected_insertions: 64,
            false_probability: 0.03,
        }
    }
}

impl BloomFilterConfig {
    /// Environment variables:
    /// - `TOLLGATE_BLOOM_ENABLED` (default: true)
    /// - `TOLLGATE_BLOOM_NAME` (default: cache_penetration_bloom_filter)
    /// - `TOLLGATE_BLOOM_EXPECTED_INSERTIONS` (default: 64)
    /// - `TOLLGATE_BLOOM_FALSE_PROBABILITY` (default: 0.03)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_bool("TOLLGATE_BLOOM_ENABLED").unwrap_or(defaults.enabled),
            name: std::env::var("TOLLGATE_BLOOM_NAME").unwrap_or(defaults.name),
            expected_insertions: env_parse("TOLLGATE_BLOOM_EXPECTED_INSERTIONS")
                .unwrap_or(defaults.expected_insertions),
            false_probability: env_parse("TOLLGATE_BLOOM_FALSE_PROBABILITY")
                .unwrap_or(defaults.false_probability),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.expected_insertions == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TOLLGATE_BLOOM_EXPECTED_INSERTIONS".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if !(self.false_probability > 0.0 && self.false_probability < 1.0) {
            return Err(ConfigError::InvalidValue {
                key: "TOLLGATE_BLOOM_FALSE_PROBABILITY".to_string(),
                reason: format!("{} is not in (0, 1)", self.false_probability),
            });
        }
        if self.name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "TOLLGATE_BLOOM_NAME".to_string(),
                reason: "must not be blank".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// LOCK
// ============================================================================

/// Distributed lock timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockConfig {
    /// Maximum wait of a blocking acquisition before `LockTimeout`.
    pub wait_timeout: Duration,
    /// How long a held lock survives without release.
    pub lease: Duration,
    /// Poll interval while waiting on a contended lock.
    pub retry_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_millis(10_000),
            lease: Duration::from_millis(30_000),
            retry_interval: Duration::from_millis(50),
        }
    }
}

impl LockConfig {
    /// Environment variables:
    /// - `TOLLGATE_LOCK_WAIT_MS` (default: 10000)
    /// - `TOLLGATE_LOCK_LEASE_MS` (default: 30000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            wait_timeout: env_parse("TOLLGATE_LOCK_WAIT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.wait_timeout),
            lease: env_parse("TOLLGATE_LOCK_LEASE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.lease),
            retry_interval: defaults.retry_interval,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_zero("TOLLGATE_LOCK_WAIT_MS", self.wait_timeout)?;
        require_non_zero("TOLLGATE_LOCK_LEASE_MS", self.lease)?;
        require_non_zero("lock retry interval", self.retry_interval)
    }
}

// ============================================================================
// TOKEN
// ============================================================================

/// Idempotency token issuance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenConfig {
    /// Prefix of every issued token.
    pub prefix: String,
    /// Lifetime of an unused token.
    pub timeout: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            prefix: "idempotent:token".to_string(),
            timeout: Duration::from_millis(6_000),
        }
    }
}

impl TokenConfig {
    /// Environment variables:
    /// - `TOLLGATE_TOKEN_PREFIX` (default: idempotent:token)
    /// - `TOLLGATE_TOKEN_TIMEOUT_MS` (default: 6000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            prefix: std::env::var("TOLLGATE_TOKEN_PREFIX")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.prefix),
            timeout: env_parse("TOLLGATE_TOKEN_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_zero("TOLLGATE_TOKEN_TIMEOUT_MS", self.timeout)
    }
}

// ============================================================================
// AGGREGATE
// ============================================================================

/// All library-level settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TollgateConfig {
    pub cache: CacheConfig,
    pub bloom: BloomFilterConfig,
    pub lock: LockConfig,
    pub token: TokenConfig,
}

impl TollgateConfig {
    pub fn from_env() -> Self {
        Self {
            cache: CacheConfig::from_env(),
            bloom: BloomFilterConfig::from_env(),
            lock: LockConfig::from_env(),
            token: TokenConfig::from_env(),
        }
    }

    /// Validate every section. The bloom section is skipped when disabled.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;
        if self.bloom.enabled {
            self.bloom.validate()?;
        }
        self.lock.validate()?;
        self.token.validate()
    }
}
