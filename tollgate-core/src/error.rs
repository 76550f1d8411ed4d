//! Error types for Tollgate operations

use crate::enums::{ConsumeStatus, IdempotentScene, IdempotentType};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Cache, lock and bloom filter errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache backend failure: {reason}")]
    Backend { reason: String },

    #[error("Cache value serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("构建缓存 key 不允许为空")]
    EmptyKeyPart,

    #[error("Timed out after {waited_ms}ms waiting for lock {name}")]
    LockTimeout { name: String, waited_ms: u64 },

    #[error("Lock {name} is not held by this owner")]
    LockNotHeld { name: String },

    #[error("Server-side script failed: {reason}")]
    Script { reason: String },

    #[error("Bloom filter {name} initialisation failed: {reason}")]
    BloomInit { name: String, reason: String },
}

/// Key template evaluation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExpressionError {
    #[error("Failed to parse expression '{expression}': {reason}")]
    Parse { expression: String, reason: String },

    #[error("Unknown variable '#{name}'")]
    UnknownVariable { name: String },

    #[error("Expression '{expression}' evaluated to null")]
    NullResult { expression: String },

    #[error("Invalid access in '{expression}': {reason}")]
    InvalidAccess { expression: String, reason: String },
}

/// Business rejection codes carried by client-facing idempotency failures.
///
/// The string form matches the error-code catalog used by the HTTP layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectCode {
    /// Generic client-side rejection (A0001)
    ClientError,
    /// Token missing or already consumed (A0301)
    Unauthorized,
    /// Lock held by a concurrent attempt (A0501)
    TooManyRequests,
    /// Caller identity required but absent (A0200)
    UserLoginError,
    /// Same request already processed (A0506)
    RepeatedRequest,
}

impl RejectCode {
    /// Business code string for this rejection.
    pub fn code(&self) -> &'static str {
        match self {
            RejectCode::ClientError => "A0001",
            RejectCode::Unauthorized => "A0301",
            RejectCode::TooManyRequests => "A0501",
            RejectCode::UserLoginError => "A0200",
            RejectCode::RepeatedRequest => "A0506",
        }
    }
}

impl fmt::Display for RejectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Idempotency guard errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdempotencyError {
    /// The caller is rejected; surfaced directly and never retried.
    #[error("[{code}] {message}")]
    Rejected { code: RejectCode, message: String },

    /// Another delivery owns this unit of work. Post and exception
    /// processing must not run for the current attempt.
    #[error("Repeat consumption detected, status {status}")]
    RepeatConsumption { status: ConsumeStatus },

    #[error("Request metadata is required for the {kind} strategy")]
    MissingRequestContext { kind: IdempotentType },

    #[error("No idempotency handler registered for {scene} x {kind}")]
    HandlerNotFound {
        scene: IdempotentScene,
        kind: IdempotentType,
    },

    #[error("Idempotency context is missing entry '{key}'")]
    MissingContextEntry { key: String },
}

impl IdempotencyError {
    /// Create a client rejection.
    pub fn rejected(code: RejectCode, message: impl Into<String>) -> Self {
        IdempotencyError::Rejected {
            code,
            message: message.into(),
        }
    }

    /// True when this is the duplicate-delivery signal rather than a failure.
    pub fn is_repeat_consumption(&self) -> bool {
        matches!(self, IdempotencyError::RepeatConsumption { .. })
    }

    /// True for a duplicate whose first attempt is still running.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            IdempotencyError::RepeatConsumption { status } if status.is_error()
        )
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Unsupported combination: {scene} x {kind}")]
    UnsupportedCombination {
        scene: IdempotentScene,
        kind: IdempotentType,
    },
}

/// Master error type for all Tollgate errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TollgateError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),

    #[error("Idempotency error: {0}")]
    Idempotency(#[from] IdempotencyError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl TollgateError {
    /// Borrow the idempotency error, if this is one.
    pub fn as_idempotency(&self) -> Option<&IdempotencyError> {
        match self {
            TollgateError::Idempotency(err) => Some(err),
            _ => None,
        }
    }
}

/// Result type for Tollgate operations.
pub type TollgateResult<T> = Result<T, TollgateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_display_includes_code() {
        let err = IdempotencyError::rejected(RejectCode::TooManyRequests, "slow down");
        assert_eq!(err.to_string(), "[A0501] slow down");
    }

    #[test]
    fn test_repeat_consumption_in_flight() {
        let consuming = IdempotencyError::RepeatConsumption {
            status: ConsumeStatus::Consuming,
        };
        let consumed = IdempotencyError::RepeatConsumption {
            status: ConsumeStatus::Consumed,
        };
        assert!(consuming.is_repeat_consumption());
        assert!(consuming.is_in_flight());
        assert!(consumed.is_repeat_consumption());
        assert!(!consumed.is_in_flight());
    }

    #[test]
    fn test_master_error_from() {
        let err: TollgateError = CacheError::EmptyKeyPart.into();
        assert!(matches!(err, TollgateError::Cache(CacheError::EmptyKeyPart)));
        assert!(err.as_idempotency().is_none());

        let err: TollgateError = IdempotencyError::rejected(RejectCode::Unauthorized, "x").into();
        assert!(err.as_idempotency().is_some());
    }

    #[test]
    fn test_handler_not_found_display() {
        let err = IdempotencyError::HandlerNotFound {
            scene: IdempotentScene::Mq,
            kind: IdempotentType::Token,
        };
        assert_eq!(
            err.to_string(),
            "No idempotency handler registered for MQ x TOKEN"
        );
    }
}
