//! Tollgate API - HTTP Surface
//!
//! Axum service exposing the idempotency guard over HTTP:
//!
//! - Token issuance for the TOKEN strategy
//! - Guarded demonstration routes for the PARAM and TOKEN strategies
//! - A uniform [`CommonResp`] envelope and error-code catalog
//! - Per-request user context and a distributed per-IP rate limiter
//! - Structured logging and Prometheus metrics

pub mod config;
pub mod error;
pub mod macros;
pub mod middleware;
pub mod response;
pub mod routes;
pub mod state;
pub mod telemetry;

pub use config::{ApiConfig, StoreBackend};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use middleware::{
    extract_client_ip, rate_limit_middleware, user_context_middleware, Caller, RateLimitState,
};
pub use response::{CommonResp, SUCCESS_CODE};
pub use routes::create_api_router;
pub use state::AppState;
