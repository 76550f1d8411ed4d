//! Tollgate Test Utilities
//!
//! Shared test infrastructure for the Tollgate workspace:
//! - Fixtures: in-memory caches, guards and call descriptions
//! - Proptest generators for blank and non-blank values, key parts and
//!   literal key templates
//! - Assertions for guard and idempotency results

pub use tollgate_cache::{DistributedCache, MemoryStore};
pub use tollgate_core::{
    CacheConfig, ConsumeStatus, IdempotencyError, LockConfig, RejectCode, TokenConfig,
    TollgateError, TollgateResult,
};
pub use tollgate_idempotent::{
    GuardError, GuardOutcome, HandlerRegistry, Idempotent, IdempotentContext, IdempotentGuard,
    Invocation, RequestMeta,
};

use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures backed by the in-memory store.

    use super::*;
    use serde_json::Value;

    /// Lock timings short enough for contention tests.
    pub fn fast_lock_config() -> LockConfig {
        LockConfig {
            wait_timeout: Duration::from_millis(200),
            lease: Duration::from_secs(30),
            retry_interval: Duration::from_millis(10),
        }
    }

    /// Cache over a fresh in-memory store with default settings.
    pub fn memory_cache() -> DistributedCache {
        memory_cache_with(CacheConfig::default())
    }

    /// Cache over a fresh in-memory store with `config` and fast locks.
    pub fn memory_cache_with(config: CacheConfig) -> DistributedCache {
        DistributedCache::from_backend(Arc::new(MemoryStore::new()), config)
            .with_lock_config(fast_lock_config())
    }

    /// Guard with the built-in handlers over `cache`.
    pub fn guard_over(cache: DistributedCache) -> IdempotentGuard {
        IdempotentGuard::new(Arc::new(HandlerRegistry::new(
            cache,
            TokenConfig::default(),
        )))
    }

    /// Guard over a fresh in-memory cache.
    pub fn memory_guard() -> IdempotentGuard {
        guard_over(memory_cache())
    }

    /// REST call from `user_id` to `path` with one argument.
    pub fn rest_call(path: &str, user_id: &str, name: &str, arg: Value) -> Invocation {
        Invocation::new(path.trim_start_matches('/'))
            .with_param(name, arg)
            .with_request(RequestMeta::new(path).with_user_id(user_id))
    }

    /// REST call carrying an idempotency token header.
    pub fn token_call(path: &str, token: &str) -> Invocation {
        Invocation::new(path.trim_start_matches('/'))
            .with_request(RequestMeta::new(path).with_header("token", token))
    }

    /// Message delivery with one named payload.
    pub fn message(name: &str, payload: Value) -> Invocation {
        Invocation::new("on_message").with_param(name, payload)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Tollgate values.

    use proptest::collection::{btree_map, vec};
    use proptest::prelude::*;
    use serde_json::{Map, Value};

    /// Values the blank check must treat as empty.
    pub fn arb_blank_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            "[ \t\n]{0,8}".prop_map(Value::String),
            Just(Value::Array(Vec::new())),
            Just(Value::Object(Map::new())),
        ]
    }

    /// Scalars that are never blank.
    pub fn arb_non_blank_leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            "[a-zA-Z0-9]{1,12}".prop_map(Value::String),
            any::<i64>().prop_map(Value::from),
            any::<bool>().prop_map(Value::Bool),
        ]
    }

    /// Non-empty strings, arrays or objects, possibly holding blank members.
    pub fn arb_non_blank_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            arb_non_blank_leaf(),
            vec(arb_blank_value(), 1..4).prop_map(Value::Array),
            btree_map("[a-z]{1,6}", arb_non_blank_leaf(), 1..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    }

    /// Non-blank key parts.
    pub fn arb_key_part() -> impl Strategy<Value = String> {
        "[a-z0-9:]{1,16}"
    }

    /// Templates without expression markers; they evaluate to themselves.
    pub fn arb_literal_template() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9:_ .+'-]{0,32}"
    }

    /// Message ids used as dedup keys.
    pub fn arb_message_id() -> impl Strategy<Value = String> {
        "[a-z]{3}-[0-9]{1,6}"
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for guard and idempotency results.

    use super::*;
    use std::fmt::Debug;

    /// Assert the guard rejected the call with `code`.
    #[track_caller]
    pub fn assert_rejected<T: Debug, E: Debug>(
        result: &Result<GuardOutcome<T>, GuardError<E>>,
        code: RejectCode,
    ) {
        match result {
            Err(GuardError::Idempotency(TollgateError::Idempotency(
                IdempotencyError::Rejected { code: got, .. },
            ))) => assert_eq!(*got, code, "Wrong rejection code"),
            other => panic!("Expected {code} rejection, got: {other:?}"),
        }
    }

    /// Assert the guard reported a repeat delivery with `status`.
    #[track_caller]
    pub fn assert_repeat<T: Debug, E: Debug>(
        result: &Result<GuardOutcome<T>, GuardError<E>>,
        status: ConsumeStatus,
    ) {
        match (result, status) {
            (Ok(GuardOutcome::AlreadyConsumed), ConsumeStatus::Consumed) => {}
            (
                Err(GuardError::Idempotency(TollgateError::Idempotency(
                    IdempotencyError::RepeatConsumption { status: got },
                ))),
                _,
            ) => assert_eq!(*got, status, "Wrong consume status"),
            (other, _) => panic!("Expected repeat delivery ({status}), got: {other:?}"),
        }
    }

    /// Assert the guarded operation ran and returned `expected`.
    #[track_caller]
    pub fn assert_proceeded<T: Debug + PartialEq, E: Debug>(
        result: &Result<GuardOutcome<T>, GuardError<E>>,
        expected: T,
    ) {
        match result {
            Ok(GuardOutcome::Proceeded(value)) => assert_eq!(*value, expected),
            other => panic!("Expected the operation to proceed, got: {other:?}"),
        }
    }
}
