//! Tollgate Core - Shared Types
//!
//! Errors, strategy enums, key helpers, configuration and caller identity.
//! No I/O lives here; every other Tollgate crate depends on this one.

pub mod config;
pub mod enums;
pub mod error;
pub mod identity;
pub mod keys;

pub use config::{BloomFilterConfig, CacheConfig, LockConfig, TokenConfig, TollgateConfig};
pub use enums::{ConsumeStatus, IdempotentScene, IdempotentType};
pub use error::{
    CacheError, ConfigError, ExpressionError, IdempotencyError, RejectCode, TollgateError,
    TollgateResult,
};
pub use identity::{
    new_request_id, UserInfo, DEFAULT_USER_ID, DEFAULT_USER_NAME, REQUEST_ID_HEADER,
    TOKEN_HEADER, USERNAME_HEADER, USER_ID_HEADER,
};
pub use keys::{build_key, is_blank, is_blank_value, KEY_SEPARATOR};
