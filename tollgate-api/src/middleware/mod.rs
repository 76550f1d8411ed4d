//! Middleware modules for Tollgate API
//!
//! - `user_context`: caller identity and request id
//! - `rate_limit`: distributed per-IP fixed-window limiter
//!
//! # Middleware Order
//!
//! ```ignore
//! Router::new()
//!     .route("/demo/orders", post(handler))
//!     // Innermost: needs the user context for the request id
//!     .layer(middleware::from_fn_with_state(rate_limit_state, rate_limit_middleware))
//!     .layer(middleware::from_fn(user_context_middleware))
//!     // Outermost
//! ```

pub mod rate_limit;
pub mod user_context;

pub use rate_limit::{
    extract_client_ip, rate_limit_middleware, RateLimitError, RateLimitState,
    RATE_LIMITED_MESSAGE, RATE_LIMIT_KEY_PREFIX,
};
pub use user_context::{request_meta, user_context_middleware, Caller};
