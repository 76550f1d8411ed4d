//! Distributed fixed-window rate limiting.
//!
//! Every client IP gets a counter `rate_limit:{ip}` in the shared store. The
//! first request of a window starts its expiry; requests beyond the limit
//! are rejected with `SYSTEM_LIMIT_ERROR` until the counter expires. All
//! instances share the counters, so the limit holds cluster-wide.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header::RETRY_AFTER, HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tollgate_cache::DistributedCache;
use tollgate_core::UserInfo;

use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::telemetry::metrics;

/// Rejection message shown to throttled callers.
pub const RATE_LIMITED_MESSAGE: &str = "请求过于频繁，请稍后再试";

/// Store key prefix of the per-IP counters.
pub const RATE_LIMIT_KEY_PREFIX: &str = "rate_limit:";

/// Shared state for rate limiting.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    cache: DistributedCache,
    config: Arc<ApiConfig>,
}

impl RateLimitState {
    pub fn new(cache: DistributedCache, config: Arc<ApiConfig>) -> Self {
        Self { cache, config }
    }
}

/// Error type for rate limit middleware.
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// Over the limit for the current window.
    #[error("rate limit exceeded, retry after {retry_after}s")]
    Limited {
        /// Seconds until the window resets, at most
        retry_after: u64,
        request_id: Option<String>,
    },
    /// The counter could not be updated.
    #[error("rate limit counter unavailable: {0}")]
    Store(ApiError),
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        match self {
            RateLimitError::Limited {
                retry_after,
                request_id,
            } => {
                let mut error = ApiError::system_limit_error(RATE_LIMITED_MESSAGE);
                if let Some(id) = request_id {
                    error = error.with_request_id(id);
                }
                let mut response = error.into_response();
                response.headers_mut().insert(
                    RETRY_AFTER,
                    HeaderValue::from_str(&retry_after.to_string())
                        .unwrap_or_else(|_| HeaderValue::from_static("60")),
                );
                response
            }
            RateLimitError::Store(error) => error.into_response(),
        }
    }
}

fn usable(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty() && !value.eq_ignore_ascii_case("unknown")).then_some(value)
}

/// Extract client IP, considering proxy headers.
///
/// First `X-Forwarded-For` entry, then `X-Real-IP`, then the socket
/// address. Blank or `unknown` header values are skipped.
pub fn extract_client_ip(headers: &HeaderMap, fallback: Option<SocketAddr>) -> String {
    let header = |name: &str| headers.get(name).and_then(|h| h.to_str().ok());

    if let Some(ip) = header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .and_then(usable)
    {
        return ip.to_string();
    }
    if let Some(ip) = header("x-real-ip").and_then(usable) {
        return ip.to_string();
    }
    fallback
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Rate limiting middleware.
///
/// When rate limited, returns 429 with a `Retry-After` header. A store
/// failure fails the request with `CACHE_ERROR`.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Result<Response, RateLimitError> {
    if !state.config.rate_limit_enabled {
        return Ok(next.run(request).await);
    }

    let ip = extract_client_ip(request.headers(), connect_info.map(|ConnectInfo(addr)| addr));
    let key = format!("{}{}", RATE_LIMIT_KEY_PREFIX, ip);
    let window = state.config.rate_limit_window;

    let count = state
        .cache
        .incr_window(&key, window)
        .await
        .map_err(|e| RateLimitError::Store(e.into()))?;

    if count > state.config.rate_limit_per_minute {
        tracing::warn!(
            client_ip = %ip,
            count,
            limit = state.config.rate_limit_per_minute,
            "Rate limit exceeded"
        );
        if let Some(m) = metrics() {
            m.record_rate_limited();
        }
        let request_id = request
            .extensions()
            .get::<UserInfo>()
            .map(|user| user.request_id.clone());
        return Err(RateLimitError::Limited {
            retry_after: window.as_secs().max(1),
            request_id,
        });
    }

    Ok(next.run(request).await)
}

// ============================================================================
// TESTS
// ============================================================================
