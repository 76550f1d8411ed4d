//! Prometheus Metrics Definitions
//!
//! Defines all Tollgate metrics with their labels and types, and exposes a
//! /metrics endpoint for Prometheus scraping.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder,
    HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};
use tollgate_cache::CacheStats;
use tollgate_idempotent::{GuardEvent, GuardListener, Idempotent};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<TollgateMetrics>> = Lazy::new(TollgateMetrics::new);

/// The registered metrics, or `None` if registration failed.
pub fn metrics() -> Option<&'static TollgateMetrics> {
    METRICS.as_ref().ok()
}

/// Container for all Tollgate metrics.
#[derive(Clone)]
pub struct TollgateMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: IntCounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Guarded call outcomes - labels: scene, kind, outcome
    pub idempotency_outcomes_total: IntCounterVec,

    /// Cache facade lookups - labels: result (hit, miss, bloom_reject, loaded)
    pub cache_lookups_total: IntCounterVec,

    /// Requests rejected by the rate limiter
    pub rate_limited_total: IntCounter,
}

fn registration_error(name: &str, e: prometheus::Error) -> ApiError {
    ApiError::system_error(format!("Failed to register {}: {}", name, e))
}

impl TollgateMetrics {
    /// Create and register all metrics with the default registry.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_int_counter_vec!(
                "tollgate_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| registration_error("http_requests_total", e))?,

            http_request_duration_seconds: register_histogram_vec!(
                "tollgate_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| registration_error("http_request_duration_seconds", e))?,

            idempotency_outcomes_total: register_int_counter_vec!(
                "tollgate_idempotency_outcomes_total",
                "Outcomes of idempotency-guarded calls",
                &["scene", "kind", "outcome"]
            )
            .map_err(|e| registration_error("idempotency_outcomes_total", e))?,

            cache_lookups_total: register_int_counter_vec!(
                "tollgate_cache_lookups_total",
                "Cache facade lookups by result",
                &["result"]
            )
            .map_err(|e| registration_error("cache_lookups_total", e))?,

            rate_limited_total: register_int_counter!(
                "tollgate_rate_limited_total",
                "Requests rejected by the rate limiter"
            )
            .map_err(|e| registration_error("rate_limited_total", e))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, status_str.as_str()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// Record one guarded call outcome.
    pub fn record_guard_outcome(&self, scene: &str, kind: &str, outcome: &str) {
        self.idempotency_outcomes_total
            .with_label_values(&[scene, kind, outcome])
            .inc();
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited_total.inc();
    }

    /// Bring the lookup counters up to the facade's running totals.
    ///
    /// The facade counts monotonically, so only the difference since the
    /// last sync is added.
    pub fn sync_cache_stats(&self, stats: &CacheStats) {
        for (result, total) in [
            ("hit", stats.hits),
            ("miss", stats.misses),
            ("bloom_reject", stats.bloom_rejections),
            ("loaded", stats.loads),
        ] {
            let counter = self.cache_lookups_total.with_label_values(&[result]);
            let delta = total.saturating_sub(counter.get());
            if delta > 0 {
                counter.inc_by(delta);
            }
        }
    }
}

/// Feeds guard outcomes into [`TollgateMetrics`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsListener;

impl GuardListener for MetricsListener {
    fn on_outcome(&self, idempotent: &Idempotent, event: GuardEvent) {
        if let Some(m) = metrics() {
            m.record_guard_outcome(
                &idempotent.scene.to_string(),
                &idempotent.kind.to_string(),
                event.as_str(),
            );
        }
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(m) = metrics() {
        m.sync_cache_stats(&state.cache.stats());
    }

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain; charset=utf-8")],
                b"Failed to encode metrics".to_vec(),
            )
        }
    }
}
