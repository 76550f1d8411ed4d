//! Per-call idempotency context.
//!
//! Carries state from a handler's before phase (a lock token, the dedup
//! key) to its after phase. One context belongs to exactly one guarded call
//! and is passed explicitly; it is never shared or stored in ambient state.
//! The guard cleans it on every exit path.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tollgate_core::CacheError;

/// Context key of the lock taken by the parameter strategy.
pub const PARAM_LOCK_KEY: &str = "lock:param:restAPI";

/// Context key of the lock taken by the expression strategy on REST calls.
pub const SPEL_LOCK_KEY: &str = "lock:spEL:restAPI";

/// Context key of the dedup wrapper recorded by the expression strategy on MQ.
pub const SPEL_MQ_WRAPPER_KEY: &str = "wrapper:spEL:MQ";

/// String-keyed scratch space for one guarded call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdempotentContext {
    entries: HashMap<String, Value>,
}

impl IdempotentContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries; empty when nothing was written.
    pub fn get(&self) -> &HashMap<String, Value> {
        &self.entries
    }

    pub fn get_key(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// String form of an entry. Strings come back as is, other values as JSON.
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Decode an entry into a typed value.
    pub fn get_as<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.entries
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn put(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    /// Serialize and store a typed value.
    pub fn put_serialized<T: Serialize + ?Sized>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<(), CacheError> {
        let value = serde_json::to_value(value).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
        self.put(key, value);
        Ok(())
    }

    /// Merge `entries` into the context, overwriting existing keys.
    pub fn put_context(&mut self, entries: Map<String, Value>) {
        self.entries.extend(entries);
    }

    pub fn clean(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
