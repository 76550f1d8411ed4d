//! Tracing Subscriber Initialization
//!
//! Sets up `tracing-subscriber` with an `EnvFilter` and either JSON or
//! human-readable output.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{ApiError, ApiResult};

const DEFAULT_FILTER: &str =
    "tollgate_api=debug,tollgate_idempotent=debug,tollgate_cache=info,tower_http=debug,info";

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup log
    pub service_name: String,
    /// Service version
    pub service_version: String,
    /// Emit JSON log lines instead of plain text
    pub log_json: bool,
    /// Enable metrics collection
    pub metrics_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: std::env::var("TOLLGATE_SERVICE_NAME")
                .unwrap_or_else(|_| "tollgate-api".to_string()),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_json: std::env::var("TOLLGATE_LOG_JSON")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(false),
            metrics_enabled: std::env::var("TOLLGATE_METRICS_ENABLED")
                .map(|s| s != "false" && s != "0")
                .unwrap_or(true),
        }
    }
}

/// Initialize the tracing subscriber.
///
/// Call once at startup before any tracing occurs. `RUST_LOG` overrides the
/// crate-scoped default filter. Fails if a global subscriber is already set.
pub fn init_tracing(config: &TelemetryConfig) -> ApiResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let json_layer = config
        .log_json
        .then(|| tracing_subscriber::fmt::layer().json());
    let plain_layer = (!config.log_json).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(plain_layer)
        .try_init()
        .map_err(|e| ApiError::system_error(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(
        service_name = config.service_name,
        service_version = config.service_version,
        log_json = config.log_json,
        "Telemetry initialized"
    );

    Ok(())
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
    fn test_telemetry_config_default() {
        let _env_lock = ENV_MUTEX.lock().expect("env mutex should not be poisoned");
        let _json = EnvVarGuard::set("TOLLGATE_LOG_JSON", None);
        let _name = EnvVarGuard::set("TOLLGATE_SERVICE_NAME", None);
        let _metrics = EnvVarGuard::set("TOLLGATE_METRICS_ENABLED", None);

        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "tollgate-api");
        assert!(!config.log_json);
        assert!(config.metrics_enabled);
    }

    #[test]
    fn test_telemetry_config_json_toggle() {
        let _env_lock = ENV_MUTEX.lock().expect("env mutex should not be poisoned");
        let _json = EnvVarGuard::set("TOLLGATE_LOG_JSON", Some("1"));
        let _metrics = EnvVarGuard::set("TOLLGATE_METRICS_ENABLED", Some("false"));

        let config = TelemetryConfig::default();
        assert!(config.log_json);
        assert!(!config.metrics_enabled);
    }

    #[test]
    fn test_second_init_fails() {
        let config = TelemetryConfig {
            log_json: false,
            ..TelemetryConfig::default()
        };
        // Whichever call comes first in this process wins; the other must error.
        let first = init_tracing(&config);
        let second = init_tracing(&config);
        assert!(first.is_err() || second.is_err());
    }
}
