//! REST routes and router assembly.
//!
//! - `GET /token`: issue an idempotency token
//! - `POST /demo/orders`, `GET /demo/orders/:id`, `POST /demo/payments`:
//!   guarded demonstration routes
//! - `GET /health`: liveness plus store ping (not rate limited)
//! - `GET /metrics`: Prometheus exposition (when enabled)

pub mod demo;
pub mod health;
pub mod token;

use std::time::Duration;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::get,
    Router,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::error::{ApiError, ErrorCode};
use crate::middleware::{rate_limit_middleware, user_context_middleware, Caller, RateLimitState};
use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};

// ============================================================================
// CORS LAYER
// ============================================================================

/// Build the CORS layer from ApiConfig.
///
/// In development mode (empty origins), allows all origins.
/// In production mode, only allows configured origins.
fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static("userid"),
            HeaderName::from_static("username"),
            HeaderName::from_static("token"),
            HeaderName::from_static("x-request-id"),
        ])
        .expose_headers([
            HeaderName::from_static("x-request-id"),
            HeaderName::from_static("retry-after"),
        ])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        tracing::info!("CORS: Development mode - allowing all origins");
        cors.allow_origin(Any)
    } else {
        tracing::info!(
            "CORS: Production mode - allowing origins: {:?}",
            config.cors_origins
        );
        let config = config.clone();
        cors.allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _parts: &axum::http::request::Parts| {
                origin
                    .to_str()
                    .map(|o| config.is_origin_allowed(o))
                    .unwrap_or(false)
            },
        ))
    }
}

/// Fallback for unknown routes, in the response envelope.
async fn not_found(caller: Caller) -> ApiError {
    ApiError::from_code(ErrorCode::NotFound).with_request_id(caller.request_id())
}

/// Create the complete API router.
///
/// Layers, outermost first: CORS, HTTP trace, observability, user context,
/// then the rate limiter around the token and demo routes.
pub fn create_api_router(state: AppState) -> Router {
    let config = state.config.clone();
    let rate_limit_state = RateLimitState::new(state.cache.clone(), config.clone());

    let limited = Router::new()
        .merge(token::create_router())
        .merge(demo::create_router())
        .layer(from_fn_with_state(rate_limit_state, rate_limit_middleware));

    let mut router = limited.merge(health::create_router());
    if config.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .fallback(not_found)
        .layer(from_fn(user_context_middleware))
        .layer(from_fn(observability_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(&config))
        .with_state(state)
}
