//! API Configuration Module
//!
//! Bind address, store backend selection, CORS and rate limiting. Loaded
//! from environment variables with defaults for local development.

use std::fmt;
use std::time::Duration;

/// Which store backs the cache facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// In-process store; state is lost on restart and not shared.
    Memory,
    Redis,
}

impl StoreBackend {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Some(StoreBackend::Memory),
            "redis" => Some(StoreBackend::Redis),
            _ => None,
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackend::Memory => write!(f, "memory"),
            StoreBackend::Redis => write!(f, "redis"),
        }
    }
}

// ============================================================================
// API CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_host: String,
    pub port: u16,

    // ========================================================================
    // Store Configuration
    // ========================================================================
    pub backend: StoreBackend,

    /// Redis connection string, used when `backend` is Redis.
    pub redis_url: String,

    // ========================================================================
    // CORS Configuration
    // ========================================================================
    /// Allowed CORS origins (comma-separated in env var).
    /// Empty means allow all origins (dev mode).
    pub cors_origins: Vec<String>,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,

    // ========================================================================
    // Rate Limiting Configuration
    // ========================================================================
    pub rate_limit_enabled: bool,

    /// Requests allowed per client IP in one window.
    pub rate_limit_per_minute: u64,

    pub rate_limit_window: Duration,

    /// Whether `GET /metrics` is exposed.
    pub metrics_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 8080,
            backend: StoreBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            cors_origins: Vec::new(),
            cors_max_age_secs: 86400,
            rate_limit_enabled: true,
            rate_limit_per_minute: 60,
            rate_limit_window: Duration::from_secs(60),
            metrics_enabled: true,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `TOLLGATE_API_BIND`: Bind host (default: 0.0.0.0)
    /// - `PORT` or `TOLLGATE_API_PORT`: Port (default: 8080)
    /// - `TOLLGATE_BACKEND`: "memory" or "redis" (default: memory)
    /// - `TOLLGATE_REDIS_URL`: Redis connection string
    /// - `TOLLGATE_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    /// - `TOLLGATE_RATE_LIMIT_ENABLED`: "true" or "false" (default: true)
    /// - `TOLLGATE_RATE_LIMIT_PER_MINUTE`: Requests per minute per IP (default: 60)
    /// - `TOLLGATE_METRICS_ENABLED`: "true" or "false" (default: true)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let bind_host = std::env::var("TOLLGATE_API_BIND")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.bind_host);

        let port = ["PORT", "TOLLGATE_API_PORT"]
            .iter()
            .find_map(|key| std::env::var(key).ok().and_then(|s| s.trim().parse().ok()))
            .unwrap_or(defaults.port);

        let backend = std::env::var("TOLLGATE_BACKEND")
            .ok()
            .and_then(|s| StoreBackend::parse(&s))
            .unwrap_or(defaults.backend);

        let redis_url = std::env::var("TOLLGATE_REDIS_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.redis_url);

        let cors_origins = std::env::var("TOLLGATE_CORS_ORIGINS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let rate_limit_enabled = std::env::var("TOLLGATE_RATE_LIMIT_ENABLED")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        let rate_limit_per_minute = std::env::var("TOLLGATE_RATE_LIMIT_PER_MINUTE")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n: &u64| *n > 0)
            .unwrap_or(defaults.rate_limit_per_minute);

        let metrics_enabled = std::env::var("TOLLGATE_METRICS_ENABLED")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        Self {
            bind_host,
            port,
            backend,
            redis_url,
            cors_origins,
            cors_max_age_secs: defaults.cors_max_age_secs,
            rate_limit_enabled,
            rate_limit_per_minute,
            rate_limit_window: defaults.rate_limit_window,
            metrics_enabled,
        }
    }

    /// `host:port` to listen on.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }

    /// Check if a given origin is allowed.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.cors_origins.is_empty() {
            return true;
        }
        self.cors_origins.iter().any(|allowed| {
            if allowed == origin {
                return true;
            }
            // Wildcard subdomains: *.example.com
            if let Some(pattern) = allowed.strip_prefix("*.") {
                if let Some(origin_domain) = origin.strip_prefix("https://") {
                    return origin_domain.ends_with(&format!(".{pattern}"));
                }
            }
            false
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    struct EnvVarGuard {
        key: &'static str,
        original: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: Option<&str>) -> Self {
            let original = std::env::var(key).ok();
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
            Self { key, original }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match self.original.as_deref() {
                Some(v) => std::env::set_var(self.key, v),
                None => std::env::remove_var(self.key),
            }
        }
    }

    #[test]
    fn test_default_config() {
        let config = ApiConfig::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
        assert_eq!(config.backend, StoreBackend::Memory);
        assert!(config.rate_limit_enabled);
        assert_eq!(config.rate_limit_per_minute, 60);
        assert_eq!(config.rate_limit_window, Duration::from_secs(60));
        assert!(config.metrics_enabled);
    }

    #[test]
    fn test_from_env_overrides() {
        let _env_lock = ENV_MUTEX.lock().expect("env mutex should not be poisoned");
        let _port = EnvVarGuard::set("PORT", None);
        let _api_port = EnvVarGuard::set("TOLLGATE_API_PORT", Some("9090"));
        let _backend = EnvVarGuard::set("TOLLGATE_BACKEND", Some("Redis"));
        let _limit = EnvVarGuard::set("TOLLGATE_RATE_LIMIT_PER_MINUTE", Some("5"));
        let _metrics = EnvVarGuard::set("TOLLGATE_METRICS_ENABLED", Some("false"));

        let config = ApiConfig::from_env();
        assert_eq!(config.port, 9090);
        assert_eq!(config.backend, StoreBackend::Redis);
        assert_eq!(config.rate_limit_per_minute, 5);
        assert!(!config.metrics_enabled);
    }

    #[test]
    fn test_port_prefers_platform_variable() {
        let _env_lock = ENV_MUTEX.lock().expect("env mutex should not be poisoned");
        let _port = EnvVarGuard::set("PORT", Some("3000"));
        let _api_port = EnvVarGuard::set("TOLLGATE_API_PORT", Some("9090"));

        assert_eq!(ApiConfig::from_env().port, 3000);
    }

    #[test]
    fn test_from_env_ignores_garbage() {
        let _env_lock = ENV_MUTEX.lock().expect("env mutex should not be poisoned");
        let _backend = EnvVarGuard::set("TOLLGATE_BACKEND", Some("etcd"));
        let _limit = EnvVarGuard::set("TOLLGATE_RATE_LIMIT_PER_MINUTE", Some("0"));
        let _port = EnvVarGuard::set("PORT", Some("eighty"));
        let _api_port = EnvVarGuard::set("TOLLGATE_API_PORT", None);

        let config = ApiConfig::from_env();
        assert_eq!(config.backend, StoreBackend::Memory);
        assert_eq!(config.rate_limit_per_minute, 60);
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_origin_allowed() {
        let mut config = ApiConfig::default();
        assert!(config.is_origin_allowed("http://localhost:3000"));

        config.cors_origins = vec!["https://tollgate.run".to_string(), "*.tollgate.run".to_string()];
        assert!(config.is_origin_allowed("https://tollgate.run"));
        assert!(config.is_origin_allowed("https://app.tollgate.run"));
        assert!(!config.is_origin_allowed("https://nottollgate.run"));
        assert!(!config.is_origin_allowed("https://evil.com"));
    }
}
