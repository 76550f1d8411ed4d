//! Per-request user context.
//!
//! [`user_context_middleware`] reads the identity headers into a
//! [`UserInfo`], stores it in the request extensions and echoes the request
//! id in the `X-Request-Id` response header. Handlers pick it up with the
//! [`Caller`] extractor, which also builds the [`RequestMeta`] the
//! idempotency guard needs.

use axum::{
    async_trait,
    extract::{FromRequestParts, Query, Request},
    http::{request::Parts, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use std::convert::Infallible;
use tollgate_core::{UserInfo, REQUEST_ID_HEADER};
use tollgate_idempotent::RequestMeta;
use tracing::{info_span, Instrument};

fn header_lookup(headers: &HeaderMap) -> impl Fn(&str) -> Option<String> + '_ {
    move |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

/// Attach a [`UserInfo`] to every request.
pub async fn user_context_middleware(mut request: Request, next: Next) -> Response {
    let user = UserInfo::from_lookup(header_lookup(request.headers()));
    let request_id = user.request_id.clone();
    let span = info_span!(
        "user_context",
        request_id = %request_id,
        user_id = %user.display_user_id(),
    );
    request.extensions_mut().insert(user);

    let mut response = next.run(request).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Build the guard's view of an HTTP request.
pub fn request_meta(user: &UserInfo, parts: &Parts) -> RequestMeta {
    let mut meta = RequestMeta::new(parts.uri.path());
    if let Some(user_id) = &user.user_id {
        meta = meta.with_user_id(user_id.clone());
    }
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            meta = meta.with_header(name.as_str(), value);
        }
    }
    if let Ok(Query(query)) = Query::<HashMap<String, String>>::try_from_uri(&parts.uri) {
        meta.query = query;
    }
    meta
}

/// The calling user and the request as the guard sees it.
///
/// Falls back to an anonymous [`UserInfo`] when the user context layer is
/// not installed.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user: UserInfo,
    pub meta: RequestMeta,
}

impl Caller {
    pub fn request_id(&self) -> &str {
        &self.user.request_id
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts
            .extensions
            .get::<UserInfo>()
            .cloned()
            .unwrap_or_else(|| UserInfo::from_lookup(header_lookup(&parts.headers)));
        let meta = request_meta(&user, parts);
        Ok(Self { user, meta })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;
    use tollgate_core::{TOKEN_HEADER, USER_ID_HEADER};

    fn parts(uri: &str, headers: &[(&str, &str)]) -> Parts {
        let mut builder = HttpRequest::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (parts, _) = builder.body(()).expect("request should build").into_parts();
        parts
    }

    #[tokio::test]
    async fn test_caller_reads_identity_and_query() {
        let mut parts = parts(
            "/demo/payments?token=idempotent:tokenabc&x=1",
            &[("userId", "42"), ("X-Request-Id", "req-9")],
        );
        let caller = Caller::from_request_parts(&mut parts, &())
            .await
            .expect("infallible");

        assert_eq!(caller.request_id(), "req-9");
        assert_eq!(caller.meta.path, "/demo/payments");
        assert_eq!(caller.meta.user_id.as_deref(), Some("42"));
        assert_eq!(caller.meta.token(), Some("idempotent:tokenabc"));
        assert_eq!(caller.meta.query.get("x").map(String::as_str), Some("1"));
    }

    #[tokio::test]
    async fn test_caller_prefers_extension() {
        let mut parts = parts("/demo/orders", &[(USER_ID_HEADER, "7"), (TOKEN_HEADER, "t")]);
        let user = UserInfo {
            user_id: Some("99".to_string()),
            ..UserInfo::default()
        };
        parts.extensions.insert(user.clone());

        let caller = Caller::from_request_parts(&mut parts, &())
            .await
            .expect("infallible");
        assert_eq!(caller.user, user);
        assert_eq!(caller.meta.user_id.as_deref(), Some("99"));
        assert_eq!(caller.meta.header(TOKEN_HEADER), Some("t"));
    }

    #[tokio::test]
    async fn test_anonymous_caller_has_no_user_id() {
        let mut parts = parts("/demo/orders", &[]);
        let caller = Caller::from_request_parts(&mut parts, &())
            .await
            .expect("infallible");
        assert_eq!(caller.meta.user_id, None);
        assert_eq!(caller.request_id().len(), 32);
    }
}
