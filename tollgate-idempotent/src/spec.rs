//! Call-site idempotency configuration and the guarded call description.
//!
//! An [`Idempotent`] value is declared once per guarded operation (strategy,
//! scene, message, key template, prefix, timeout). An [`Invocation`]
//! describes one concrete call: its named arguments and, for REST, the
//! request metadata.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tollgate_core::{IdempotentScene, IdempotentType, TOKEN_HEADER};

/// Default client-facing rejection message.
pub const DEFAULT_MESSAGE: &str = "您操作太快，请稍后再试";

/// Default lifetime of a consumed-message record.
pub const DEFAULT_KEY_TIMEOUT: Duration = Duration::from_secs(3600);

/// Configuration of one guarded operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Idempotent {
    /// Key template for the expression strategy. Literal unless it
    /// contains `#`.
    pub key: String,
    /// Message carried by client rejections.
    pub message: String,
    pub kind: IdempotentType,
    pub scene: IdempotentScene,
    /// Prepended to the evaluated key (expression strategy).
    pub unique_key_prefix: String,
    /// TTL of the dedup record (MQ scene).
    pub key_timeout: Duration,
}

impl Default for Idempotent {
    fn default() -> Self {
        Self {
            key: String::new(),
            message: DEFAULT_MESSAGE.to_string(),
            kind: IdempotentType::Param,
            scene: IdempotentScene::RestApi,
            unique_key_prefix: String::new(),
            key_timeout: DEFAULT_KEY_TIMEOUT,
        }
    }
}

impl Idempotent {
    /// REST call guarded by a single-use token.
    pub fn token() -> Self {
        Self {
            kind: IdempotentType::Token,
            ..Default::default()
        }
    }

    /// REST call guarded by a fingerprint of path, user and arguments.
    pub fn param() -> Self {
        Self::default()
    }

    /// REST call guarded by a lock on an evaluated key.
    pub fn spel(key: impl Into<String>) -> Self {
        Self {
            kind: IdempotentType::Spel,
            key: key.into(),
            ..Default::default()
        }
    }

    /// Message consumption deduplicated on an evaluated key.
    pub fn mq(key: impl Into<String>) -> Self {
        Self {
            scene: IdempotentScene::Mq,
            ..Self::spel(key)
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_unique_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.unique_key_prefix = prefix.into();
        self
    }

    pub fn with_key_timeout(mut self, timeout: Duration) -> Self {
        self.key_timeout = timeout;
        self
    }

    pub fn with_scene(mut self, scene: IdempotentScene) -> Self {
        self.scene = scene;
        self
    }
}

/// HTTP request details needed by the token and parameter strategies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMeta {
    /// Request path, e.g. `/orders`.
    pub path: String,
    /// Authenticated user id.
    pub user_id: Option<String>,
    /// Header values keyed by lowercase name.
    pub headers: HashMap<String, String>,
    /// Query parameters.
    pub query: HashMap<String, String>,
}

impl RequestMeta {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Idempotency token from the `token` header, else the `token` query
    /// parameter. Blank values count as absent.
    pub fn token(&self) -> Option<&str> {
        self.header(TOKEN_HEADER)
            .filter(|t| !t.trim().is_empty())
            .or_else(|| {
                self.query
                    .get(TOKEN_HEADER)
                    .map(String::as_str)
                    .filter(|t| !t.trim().is_empty())
            })
    }
}

/// One concrete guarded call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    /// Operation name, used in logs.
    pub method: String,
    /// Arguments in declaration order, bound by name for key templates.
    pub params: Vec<(String, Value)>,
    /// Present for REST calls.
    pub request: Option<RequestMeta>,
}

impl Invocation {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            ..Default::default()
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    pub fn with_request(mut self, request: RequestMeta) -> Self {
        self.request = Some(request);
        self
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let spec = Idempotent::default();
        assert_eq!(spec.key, "");
        assert_eq!(spec.message, DEFAULT_MESSAGE);
        assert_eq!(spec.kind, IdempotentType::Param);
        assert_eq!(spec.scene, IdempotentScene::RestApi);
        assert_eq!(spec.unique_key_prefix, "");
        assert_eq!(spec.key_timeout, Duration::from_secs(3600));
    }

    #[test]
    fn test_constructors() {
        let mq = Idempotent::mq("#order.id").with_unique_key_prefix("order:");
        assert_eq!(mq.scene, IdempotentScene::Mq);
        assert_eq!(mq.kind, IdempotentType::Spel);
        assert_eq!(mq.key, "#order.id");
        assert_eq!(mq.unique_key_prefix, "order:");
        assert_eq!(Idempotent::token().kind, IdempotentType::Token);
    }

    #[test]
    fn test_token_header_wins_over_query() {
        let meta = RequestMeta::new("/pay")
            .with_header("Token", "from-header")
            .with_query("token", "from-query");
        assert_eq!(meta.token(), Some("from-header"));

        let meta = RequestMeta::new("/pay")
            .with_header("token", " ")
            .with_query("token", "from-query");
        assert_eq!(meta.token(), Some("from-query"));

        assert_eq!(RequestMeta::new("/pay").token(), None);
    }

    #[test]
    fn test_invocation_params() {
        let call = Invocation::new("create_order")
            .with_param("order", json!({"id": 1}))
            .with_param("note", "fast");
        assert_eq!(call.param("note"), Some(&json!("fast")));
        assert_eq!(call.param("order"), Some(&json!({"id": 1})));
        assert_eq!(call.param("missing"), None);
    }
}
