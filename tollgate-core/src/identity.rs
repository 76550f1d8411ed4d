//! Caller identity and request id types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Header carrying the authenticated user id (header names are case-insensitive).
pub const USER_ID_HEADER: &str = "userid";

/// Header carrying the user name.
pub const USERNAME_HEADER: &str = "username";

/// Header or query parameter carrying an idempotency token.
pub const TOKEN_HEADER: &str = "token";

/// Header carrying an upstream request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// User id reported when no identity is attached to a request.
pub const DEFAULT_USER_ID: &str = "9999999999999";

/// User name reported when no identity is attached to a request.
pub const DEFAULT_USER_NAME: &str = "DEFAULT_USER";

/// Generate a request id: a random UUID without dashes.
pub fn new_request_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Identity attached to one inbound request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    /// Authenticated user id; `None` when the caller is anonymous.
    pub user_id: Option<String>,
    pub username: String,
    pub token: Option<String>,
    pub request_id: String,
}

impl Default for UserInfo {
    fn default() -> Self {
        Self {
            user_id: None,
            username: DEFAULT_USER_NAME.to_string(),
            token: None,
            request_id: new_request_id(),
        }
    }
}

impl UserInfo {
    /// Build from a header lookup. Blank values count as absent.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            user_id: get(USER_ID_HEADER),
            username: get(USERNAME_HEADER).unwrap_or_else(|| DEFAULT_USER_NAME.to_string()),
            token: get(TOKEN_HEADER),
            request_id: get(REQUEST_ID_HEADER).unwrap_or_else(new_request_id),
        }
    }

    /// User id for logging and display, falling back to the default id.
    pub fn display_user_id(&self) -> &str {
        self.user_id.as_deref().unwrap_or(DEFAULT_USER_ID)
    }
}
