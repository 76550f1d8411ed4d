//! Idempotency token issuance.

use axum::{extract::State, routing::get, Router};
use tollgate_idempotent::IdempotentGuard;

use crate::error::{ApiError, ApiResult};
use crate::middleware::Caller;
use crate::response::CommonResp;
use crate::state::AppState;

/// GET /token - Issue a single-use idempotency token.
///
/// The caller echoes it back in the `token` header (or query parameter) of
/// a TOKEN-guarded request; the first such request consumes it.
pub async fn create_token(
    State(guard): State<IdempotentGuard>,
    caller: Caller,
) -> ApiResult<CommonResp<String>> {
    let token = guard
        .registry()
        .token_handler()
        .create_token()
        .await
        .map_err(|e| ApiError::from(e).with_request_id(caller.request_id()))?;
    Ok(CommonResp::success(token).with_request_id(caller.request_id()))
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/token", get(create_token))
}
