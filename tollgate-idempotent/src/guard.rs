//! Guard wrapper running the before / proceed / after protocol.
//!
//! ```text
//! execute ──ok──> operation ──ok──> post_processing      -> Proceeded(value)
//!    │                └─────err──> exception_processing  -> Operation(err)
//!    ├─ RepeatConsumption(CONSUMED)                       -> AlreadyConsumed
//!    └─ any other error                                   -> Idempotency(err)
//! ```
//!
//! The context is cleaned on every path. Failures inside post or exception
//! processing are logged and never replace the operation's own result. If the
//! guarded future is dropped while the operation runs, exception processing
//! is spawned on the current runtime so locks and claims are released.
//!
//! # Example
//!
//! ```ignore
//! let guard = IdempotentGuard::new(Arc::new(HandlerRegistry::new(cache, TokenConfig::default())));
//! let outcome = guard
//!     .run(&Idempotent::param(), &invocation, || async { create_order(order).await })
//!     .await?;
//! ```

use crate::context::IdempotentContext;
use crate::handler::IdempotentHandler;
use crate::registry::HandlerRegistry;
use crate::spec::{Idempotent, Invocation};
use std::future::Future;
use std::sync::Arc;
use tollgate_core::{IdempotencyError, TollgateError};

/// Result of a guarded call that was not rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome<T> {
    /// The operation ran and succeeded.
    Proceeded(T),
    /// A previous delivery already finished this unit of work.
    AlreadyConsumed,
}

impl<T> GuardOutcome<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            GuardOutcome::Proceeded(value) => Some(value),
            GuardOutcome::AlreadyConsumed => None,
        }
    }
}

/// Failure of a guarded call.
#[derive(Debug, thiserror::Error)]
pub enum GuardError<E> {
    /// Rejected, duplicate in flight, or a store/evaluation failure before
    /// the operation ran.
    #[error("{0}")]
    Idempotency(TollgateError),

    /// The operation itself failed; returned unchanged.
    #[error("{0}")]
    Operation(E),
}

impl<E> GuardError<E> {
    pub fn idempotency(&self) -> Option<&IdempotencyError> {
        match self {
            GuardError::Idempotency(err) => err.as_idempotency(),
            GuardError::Operation(_) => None,
        }
    }

    /// True when another delivery is still processing this unit of work.
    pub fn is_in_flight(&self) -> bool {
        self.idempotency().is_some_and(IdempotencyError::is_in_flight)
    }
}

/// Classification of a finished guarded call, reported to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardEvent {
    Proceeded,
    Rejected,
    RepeatInFlight,
    RepeatConsumed,
    Failed,
}

impl GuardEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardEvent::Proceeded => "proceeded",
            GuardEvent::Rejected => "rejected",
            GuardEvent::RepeatInFlight => "repeat_in_flight",
            GuardEvent::RepeatConsumed => "repeat_consumed",
            GuardEvent::Failed => "failed",
        }
    }

    fn of<T, E>(result: &Result<GuardOutcome<T>, GuardError<E>>) -> Self {
        match result {
            Ok(GuardOutcome::Proceeded(_)) => GuardEvent::Proceeded,
            Ok(GuardOutcome::AlreadyConsumed) => GuardEvent::RepeatConsumed,
            Err(err) => match err.idempotency() {
                Some(IdempotencyError::Rejected { .. }) => GuardEvent::Rejected,
                Some(e) if e.is_in_flight() => GuardEvent::RepeatInFlight,
                _ => GuardEvent::Failed,
            },
        }
    }
}

/// Observer of guarded call outcomes (metrics, audit).
pub trait GuardListener: Send + Sync {
    fn on_outcome(&self, idempotent: &Idempotent, event: GuardEvent);
}

/// Runs operations under their configured idempotency strategy.
#[derive(Clone)]
pub struct IdempotentGuard {
    registry: Arc<HandlerRegistry>,
    listeners: Vec<Arc<dyn GuardListener>>,
}

impl std::fmt::Debug for IdempotentGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotentGuard")
            .field("registry", &self.registry)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl IdempotentGuard {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            listeners: Vec::new(),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn GuardListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Guard `operation` with a fresh context.
    pub async fn run<T, E, F, Fut>(
        &self,
        idempotent: &Idempotent,
        invocation: &Invocation,
        operation: F,
    ) -> Result<GuardOutcome<T>, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut ctx = IdempotentContext::new();
        self.run_with_context(idempotent, invocation, &mut ctx, operation)
            .await
    }

    /// Guard `operation` using a caller-owned context. `ctx` is empty when
    /// this returns, whatever the outcome.
    pub async fn run_with_context<T, E, F, Fut>(
        &self,
        idempotent: &Idempotent,
        invocation: &Invocation,
        ctx: &mut IdempotentContext,
        operation: F,
    ) -> Result<GuardOutcome<T>, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let result = match self.registry.resolve(idempotent.scene, idempotent.kind) {
            Ok(handler) => guarded(&handler, idempotent, invocation, ctx, operation).await,
            Err(err) => Err(GuardError::Idempotency(err)),
        };
        ctx.clean();

        let event = GuardEvent::of(&result);
        tracing::debug!(
            method = %invocation.method,
            scene = %idempotent.scene,
            kind = %idempotent.kind,
            outcome = event.as_str(),
            "Guarded call finished"
        );
        for listener in &self.listeners {
            listener.on_outcome(idempotent, event);
        }
        result
    }
}

/// Spawns exception processing when dropped while still armed.
struct ReleaseOnDrop {
    handler: Arc<dyn IdempotentHandler>,
    idempotent: Idempotent,
    method: String,
    ctx: Option<IdempotentContext>,
}

impl ReleaseOnDrop {
    fn disarm(&mut self) {
        self.ctx = None;
    }
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        let Some(mut ctx) = self.ctx.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!(method = %self.method, "Guarded call dropped outside a runtime; nothing released");
            return;
        };
        tracing::warn!(method = %self.method, "Guarded call dropped mid-operation, releasing");
        let handler = self.handler.clone();
        let idempotent = self.idempotent.clone();
        let method = std::mem::take(&mut self.method);
        runtime.spawn(async move {
            if let Err(e) = handler.exception_processing(&idempotent, &mut ctx).await {
                tracing::error!(
                    method = %method,
                    error = %e,
                    "Idempotency exception processing failed"
                );
            }
        });
    }
}

async fn guarded<T, E, F, Fut>(
    handler: &Arc<dyn IdempotentHandler>,
    idempotent: &Idempotent,
    invocation: &Invocation,
    ctx: &mut IdempotentContext,
    operation: F,
) -> Result<GuardOutcome<T>, GuardError<E>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    if let Err(err) = handler.execute(idempotent, invocation, ctx).await {
        return match err.as_idempotency() {
            Some(IdempotencyError::RepeatConsumption { status }) if !status.is_error() => {
                Ok(GuardOutcome::AlreadyConsumed)
            }
            _ => Err(GuardError::Idempotency(err)),
        };
    }

    let mut release = ReleaseOnDrop {
        handler: handler.clone(),
        idempotent: idempotent.clone(),
        method: invocation.method.clone(),
        ctx: Some(ctx.clone()),
    };
    let result = operation().await;
    release.disarm();

    match result {
        Ok(value) => {
            if let Err(e) = handler.post_processing(idempotent, ctx).await {
                tracing::error!(
                    method = %invocation.method,
                    error = %e,
                    "Idempotency post processing failed"
                );
            }
            Ok(GuardOutcome::Proceeded(value))
        }
        Err(op_err) => {
            tracing::debug!(method = %invocation.method, error = %op_err, "Guarded operation failed");
            if let Err(e) = handler.exception_processing(idempotent, ctx).await {
                tracing::error!(
                    method = %invocation.method,
                    error = %e,
                    "Idempotency exception processing failed"
                );
            }
            Err(GuardError::Operation(op_err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::RequestMeta;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tollgate_cache::{DistributedCache, MemoryStore};
    use tollgate_core::{CacheConfig, IdempotentScene, RejectCode, TokenConfig};

    fn guard() -> IdempotentGuard {
        let cache =
            DistributedCache::from_backend(Arc::new(MemoryStore::new()), CacheConfig::default());
        IdempotentGuard::new(Arc::new(HandlerRegistry::new(cache, TokenConfig::default())))
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<GuardEvent>>);

    impl GuardListener for Recorder {
        fn on_outcome(&self, _idempotent: &Idempotent, event: GuardEvent) {
            if let Ok(mut events) = self.0.lock() {
                events.push(event);
            }
        }
    }

    fn order_call() -> Invocation {
        Invocation::new("create_order")
            .with_param("order", json!({"sku": "A-1"}))
            .with_request(RequestMeta::new("/orders").with_user_id("42"))
    }

    #[tokio::test]
    async fn test_success_releases_claim() {
        let guard = guard();
        let spec = Idempotent::param();
        for _ in 0..2 {
            let outcome = guard
                .run(&spec, &order_call(), || async { Ok::<_, String>(7) })
                .await;
            assert_eq!(outcome.ok(), Some(GuardOutcome::Proceeded(7)));
        }
    }

    #[tokio::test]
    async fn test_operation_error_is_returned_unchanged() {
        let guard = guard();
        let spec = Idempotent::param();
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let outcome = guard
            .run(&spec, &order_call(), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("boom".to_string())
            })
            .await;
        assert!(matches!(outcome, Err(GuardError::Operation(ref e)) if e == "boom"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let retry = guard
            .run(&spec, &order_call(), || async { Ok::<_, String>(()) })
            .await;
        assert!(retry.is_ok());
    }

    #[tokio::test]
    async fn test_rejection_skips_operation() {
        let guard = guard();
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let call = Invocation::new("pay").with_request(RequestMeta::new("/pay"));
        let outcome = guard
            .run(&Idempotent::token(), &call, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(())
            })
            .await;
        let code = outcome.err().and_then(|e| match e.idempotency() {
            Some(IdempotencyError::Rejected { code, .. }) => Some(*code),
            _ => None,
        });
        assert_eq!(code, Some(RejectCode::Unauthorized));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unregistered_combination_fails() {
        let guard = guard();
        let spec = Idempotent::param().with_scene(IdempotentScene::Mq);
        let outcome = guard
            .run(&spec, &order_call(), || async { Ok::<_, String>(()) })
            .await;
        assert!(matches!(
            outcome.as_ref().err().and_then(GuardError::idempotency),
            Some(IdempotencyError::HandlerNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_listeners_see_each_outcome() {
        let recorder = Arc::new(Recorder::default());
        let guard = guard().with_listener(recorder.clone());
        let spec = Idempotent::mq("#order.sku");
        let call = order_call();

        let _ = guard.run(&spec, &call, || async { Ok::<_, String>(()) }).await;
        let _ = guard.run(&spec, &call, || async { Ok::<_, String>(()) }).await;
        let _ = guard
            .run(&Idempotent::token(), &call, || async { Ok::<_, String>(()) })
            .await;

        let events = recorder.0.lock().map(|e| e.clone()).unwrap_or_default();
        assert_eq!(
            events,
            vec![
                GuardEvent::Proceeded,
                GuardEvent::RepeatConsumed,
                GuardEvent::Rejected
            ]
        );
    }
}
