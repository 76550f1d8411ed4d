//! Tollgate Idempotent - Idempotency Guard
//!
//! Guards REST calls and message consumption against duplicate execution.
//!
//! - [`spec`]: per call-site configuration and call description
//! - [`context`]: per-call scratch state between the before and after phases
//! - [`expression`]: safe key template evaluation
//! - [`handler`]: token, parameter-fingerprint and expression strategies
//! - [`registry`]: (scene, strategy) to handler resolution
//! - [`guard`]: the before / proceed / after wrapper
//! - [`consume`]: transport-facing outcome of a guarded message delivery

pub mod consume;
pub mod context;
pub mod expression;
pub mod guard;
pub mod handler;
pub mod registry;
pub mod spec;

pub use consume::{consume, ConsumeOutcome};
pub use context::{IdempotentContext, PARAM_LOCK_KEY, SPEL_LOCK_KEY, SPEL_MQ_WRAPPER_KEY};
pub use expression::{evaluate, is_expression, parse_key};
pub use guard::{GuardError, GuardEvent, GuardListener, GuardOutcome, IdempotentGuard};
pub use handler::{
    fingerprint, IdempotentHandler, IdempotentParamWrapper, ParamHandler, SpelMqHandler,
    SpelRestHandler, TokenHandler, TOKEN_DELETE_FAILED_MESSAGE, TOKEN_MISSING_MESSAGE,
    USER_ID_MISSING_MESSAGE,
};
pub use registry::HandlerRegistry;
pub use spec::{Idempotent, Invocation, RequestMeta, DEFAULT_KEY_TIMEOUT, DEFAULT_MESSAGE};
