//! Guarded demonstration routes.
//!
//! - `POST /demo/orders`: PARAM strategy. Identical concurrent submissions
//!   from one user are rejected while the first is in progress. The order is
//!   stored through the cache facade and recorded in the bloom filter.
//! - `GET /demo/orders/:id`: bloom-gated cache-aside read of a stored order.
//! - `POST /demo/payments`: TOKEN strategy. Each token from `GET /token`
//!   admits exactly one payment.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tollgate_cache::SafeGetOptions;
use tollgate_idempotent::{GuardOutcome, Idempotent, Invocation, RequestMeta};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::middleware::Caller;
use crate::response::CommonResp;
use crate::state::AppState;

/// Store key prefix of demo orders.
pub const ORDER_KEY_PREFIX: &str = "demo:order:";

pub const ORDER_IN_PROGRESS_MESSAGE: &str = "订单正在处理，请勿重复提交";

pub const PAYMENT_REPEATED_MESSAGE: &str = "请勿重复支付";

pub fn order_spec() -> Idempotent {
    Idempotent::param().with_message(ORDER_IN_PROGRESS_MESSAGE)
}

pub fn payment_spec() -> Idempotent {
    Idempotent::token().with_message(PAYMENT_REPEATED_MESSAGE)
}

/// The call `POST /demo/orders` guards.
pub fn order_invocation(meta: RequestMeta, order: Value) -> Invocation {
    Invocation::new("create_order")
        .with_param("order", order)
        .with_request(meta)
}

/// The call `POST /demo/payments` guards.
pub fn payment_invocation(meta: RequestMeta, payment: Value) -> Invocation {
    Invocation::new("create_payment")
        .with_param("payment", payment)
        .with_request(meta)
}

pub fn order_key(order_id: &str) -> String {
    format!("{}{}", ORDER_KEY_PREFIX, order_id)
}

fn respond(outcome: GuardOutcome<Value>, request_id: &str) -> CommonResp<Value> {
    let data = match outcome {
        GuardOutcome::Proceeded(value) => value,
        GuardOutcome::AlreadyConsumed => Value::Null,
    };
    CommonResp::success(data).with_request_id(request_id)
}

// ============================================================================
// HANDLERS
// ============================================================================

/// POST /demo/orders - Create an order at most once per identical submission
pub async fn create_order(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<CommonResp<Value>> {
    let request_id = caller.request_id().to_string();
    let tag = |e: ApiError| e.with_request_id(&request_id);

    let Json(order) = body.map_err(|e| tag(e.into()))?;
    let invocation = order_invocation(caller.meta.clone(), order.clone());
    let cache = &state.cache;
    let bloom = state.bloom.as_deref();

    let outcome = state
        .guard
        .run(&order_spec(), &invocation, || async move {
            let order_id = Uuid::new_v4().simple().to_string();
            let record = json!({ "orderId": order_id, "order": order });
            cache
                .safe_put(&order_key(&order_id), &record, None, bloom)
                .await?;
            tracing::info!(order_id = %order_id, "Demo order stored");
            Ok::<_, ApiError>(record)
        })
        .await
        .map_err(|e| tag(e.into()))?;

    Ok(respond(outcome, &request_id))
}

/// GET /demo/orders/:id - Read a stored order through the bloom gate
pub async fn get_order(
    State(state): State<AppState>,
    caller: Caller,
    Path(order_id): Path<String>,
) -> ApiResult<CommonResp<Value>> {
    let mut options = SafeGetOptions::new();
    if let Some(bloom) = state.bloom.as_deref() {
        options = options.with_bloom_filter(bloom);
    }

    // Orders live only in the cache, so there is nothing to load on a miss.
    let found: Option<Value> = state
        .cache
        .safe_get(
            &order_key(&order_id),
            || async { Ok::<_, ApiError>(None) },
            options,
        )
        .await
        .map_err(|e| e.with_request_id(caller.request_id()))?;

    match found {
        Some(order) => Ok(CommonResp::success(order).with_request_id(caller.request_id())),
        None => Err(ApiError::not_found(format!("Order {} not found", order_id))
            .with_request_id(caller.request_id())),
    }
}

/// POST /demo/payments - Accept a payment once per idempotency token
pub async fn create_payment(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<CommonResp<Value>> {
    let request_id = caller.request_id().to_string();
    let tag = |e: ApiError| e.with_request_id(&request_id);

    let Json(payment) = body.map_err(|e| tag(e.into()))?;
    let invocation = payment_invocation(caller.meta.clone(), payment.clone());

    let outcome = state
        .guard
        .run(&payment_spec(), &invocation, || async move {
            tracing::info!("Demo payment accepted");
            Ok::<_, ApiError>(payment)
        })
        .await
        .map_err(|e| tag(e.into()))?;

    Ok(respond(outcome, &request_id))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/demo/orders", post(create_order))
        .route("/demo/orders/:id", get(get_order))
        .route("/demo/payments", post(create_payment))
}
