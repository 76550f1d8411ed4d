//! Message consumption on top of the guard.
//!
//! Maps guard results onto what a message transport needs to decide:
//! acknowledge, redeliver later, or report a failed attempt.

use crate::guard::{GuardError, GuardOutcome, IdempotentGuard};
use crate::spec::{Idempotent, Invocation};
use std::future::Future;

/// What the transport should do with a delivery.
#[derive(Debug)]
pub enum ConsumeOutcome<E> {
    /// Processed now, or already processed by an earlier delivery.
    Ack,
    /// Another delivery is still processing this message.
    RetryLater,
    /// Processing failed. Any dedup record was deleted, so a redelivery
    /// can claim the message again.
    Failed(GuardError<E>),
}

impl<E> ConsumeOutcome<E> {
    pub fn is_ack(&self) -> bool {
        matches!(self, ConsumeOutcome::Ack)
    }

    pub fn is_retry_later(&self) -> bool {
        matches!(self, ConsumeOutcome::RetryLater)
    }
}

/// Run `handler` for one delivery under `idempotent`.
pub async fn consume<E, F, Fut>(
    guard: &IdempotentGuard,
    idempotent: &Idempotent,
    invocation: &Invocation,
    handler: F,
) -> ConsumeOutcome<E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    match guard.run(idempotent, invocation, handler).await {
        Ok(GuardOutcome::Proceeded(())) | Ok(GuardOutcome::AlreadyConsumed) => ConsumeOutcome::Ack,
        Err(err) if err.is_in_flight() => {
            tracing::info!(method = %invocation.method, "Message still in flight, retry later");
            ConsumeOutcome::RetryLater
        }
        Err(err) => {
            tracing::warn!(method = %invocation.method, error = %err, "Message consumption failed");
            ConsumeOutcome::Failed(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::HandlerRegistry;
    use serde_json::json;
    use std::sync::Arc;
    use tollgate_cache::{DistributedCache, MemoryStore};
    use tollgate_core::{CacheConfig, TokenConfig};
    use tokio::sync::oneshot;

    fn guard() -> IdempotentGuard {
        let cache =
            DistributedCache::from_backend(Arc::new(MemoryStore::new()), CacheConfig::default());
        IdempotentGuard::new(Arc::new(HandlerRegistry::new(cache, TokenConfig::default())))
    }

    fn message(id: &str) -> Invocation {
        Invocation::new("on_order").with_param("msg", json!({"orderId": id}))
    }

    #[tokio::test]
    async fn test_duplicate_while_in_flight_retries_later() {
        let guard = guard();
        let spec = Idempotent::mq("#msg.orderId").with_unique_key_prefix("order:");
        let (release, wait) = oneshot::channel::<()>();
        let (started_tx, started) = oneshot::channel::<()>();

        let first_guard = guard.clone();
        let first_spec = spec.clone();
        let first = tokio::spawn(async move {
            consume(&first_guard, &first_spec, &message("order-123"), move || async move {
                let _ = started_tx.send(());
                let _ = wait.await;
                Ok::<_, String>(())
            })
            .await
        });

        let _ = started.await;
        let second = consume(&guard, &spec, &message("order-123"), || async {
            Ok::<_, String>(())
        })
        .await;
        assert!(second.is_retry_later());

        let _ = release.send(());
        assert!(matches!(first.await, Ok(ConsumeOutcome::Ack)));

        let third = consume(&guard, &spec, &message("order-123"), || async {
            Ok::<_, String>(())
        })
        .await;
        assert!(third.is_ack());
    }

    #[tokio::test]
    async fn test_failure_allows_redelivery() {
        let guard = guard();
        let spec = Idempotent::mq("#msg.orderId");

        let failed = consume(&guard, &spec, &message("o-1"), || async {
            Err::<(), _>("downstream unavailable".to_string())
        })
        .await;
        assert!(matches!(failed, ConsumeOutcome::Failed(GuardError::Operation(_))));

        let retried = consume(&guard, &spec, &message("o-1"), || async {
            Ok::<_, String>(())
        })
        .await;
        assert!(retried.is_ack());
    }

    #[tokio::test]
    async fn test_bad_key_template_fails() {
        let guard = guard();
        let spec = Idempotent::mq("#missing.id");
        let outcome = consume(&guard, &spec, &message("o-2"), || async {
            Ok::<_, String>(())
        })
        .await;
        assert!(matches!(outcome, ConsumeOutcome::Failed(GuardError::Idempotency(_))));
    }
}
