//! Expression strategy for REST calls and message consumption.
//!
//! Both handlers key on `unique_key_prefix + evaluate(key template)`.
//!
//! REST takes a blocking lock on that key, bounded by the lock wait timeout.
//! MQ claims a dedup record instead:
//!
//! ```text
//!   absent --set_if_absent("0")--> CONSUMING --success--> CONSUMED ("1", ttl)
//!                                            \--failure--> absent (deleted)
//! ```
//!
//! A second delivery that finds the record reports its status through
//! [`IdempotencyError::RepeatConsumption`].

use super::{release_lock, IdempotentHandler, IdempotentParamWrapper};
use crate::context::{IdempotentContext, SPEL_LOCK_KEY, SPEL_MQ_WRAPPER_KEY};
use crate::expression;
use crate::spec::{Idempotent, Invocation};
use async_trait::async_trait;
use serde_json::Value;
use tollgate_cache::DistributedCache;
use tollgate_core::{
    CacheError, ConsumeStatus, IdempotencyError, IdempotentScene, IdempotentType, RejectCode,
    TollgateResult,
};

fn evaluated_wrapper<'a>(
    idempotent: &'a Idempotent,
    invocation: &'a Invocation,
) -> TollgateResult<IdempotentParamWrapper<'a>> {
    let key = expression::parse_key(&idempotent.key, &invocation.params)?;
    Ok(IdempotentParamWrapper::new(idempotent, invocation, key))
}

// ============================================================================
// REST
// ============================================================================

/// Locks the evaluated key of a REST call.
#[derive(Debug, Clone)]
pub struct SpelRestHandler {
    cache: DistributedCache,
}

impl SpelRestHandler {
    pub fn new(cache: DistributedCache) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl IdempotentHandler for SpelRestHandler {
    fn scene(&self) -> IdempotentScene {
        IdempotentScene::RestApi
    }

    fn kind(&self) -> IdempotentType {
        IdempotentType::Spel
    }

    fn build_wrapper<'a>(
        &self,
        idempotent: &'a Idempotent,
        invocation: &'a Invocation,
    ) -> TollgateResult<IdempotentParamWrapper<'a>> {
        evaluated_wrapper(idempotent, invocation)
    }

    async fn handler(
        &self,
        wrapper: &IdempotentParamWrapper<'_>,
        ctx: &mut IdempotentContext,
    ) -> TollgateResult<()> {
        let key = wrapper.unique_key();
        let token = match self.cache.lock(&key).await {
            Ok(token) => token,
            Err(CacheError::LockTimeout { waited_ms, .. }) => {
                tracing::warn!(
                    method = %wrapper.invocation.method,
                    lock = %key,
                    waited_ms,
                    "Expression lock not acquired within wait timeout"
                );
                return Err(IdempotencyError::rejected(
                    RejectCode::TooManyRequests,
                    wrapper.idempotent.message.clone(),
                )
                .into());
            }
            Err(e) => return Err(e.into()),
        };
        ctx.put_serialized(SPEL_LOCK_KEY, &token)?;
        Ok(())
    }

    async fn post_processing(
        &self,
        _idempotent: &Idempotent,
        ctx: &mut IdempotentContext,
    ) -> TollgateResult<()> {
        release_lock(&self.cache, ctx, SPEL_LOCK_KEY).await
    }

    async fn exception_processing(
        &self,
        idempotent: &Idempotent,
        ctx: &mut IdempotentContext,
    ) -> TollgateResult<()> {
        self.post_processing(idempotent, ctx).await
    }
}

// ============================================================================
// MQ
// ============================================================================

/// Deduplicates message consumption on the evaluated key.
#[derive(Debug, Clone)]
pub struct SpelMqHandler {
    cache: DistributedCache,
}

impl SpelMqHandler {
    pub fn new(cache: DistributedCache) -> Self {
        Self { cache }
    }

    fn claimed_key(ctx: &IdempotentContext) -> TollgateResult<String> {
        ctx.get_string(SPEL_MQ_WRAPPER_KEY).ok_or_else(|| {
            IdempotencyError::MissingContextEntry {
                key: SPEL_MQ_WRAPPER_KEY.to_string(),
            }
            .into()
        })
    }
}

#[async_trait]
impl IdempotentHandler for SpelMqHandler {
    fn scene(&self) -> IdempotentScene {
        IdempotentScene::Mq
    }

    fn kind(&self) -> IdempotentType {
        IdempotentType::Spel
    }

    fn build_wrapper<'a>(
        &self,
        idempotent: &'a Idempotent,
        invocation: &'a Invocation,
    ) -> TollgateResult<IdempotentParamWrapper<'a>> {
        evaluated_wrapper(idempotent, invocation)
    }

    async fn handler(
        &self,
        wrapper: &IdempotentParamWrapper<'_>,
        ctx: &mut IdempotentContext,
    ) -> TollgateResult<()> {
        let key = wrapper.unique_key();
        let claimed = self
            .cache
            .set_if_absent(
                &key,
                ConsumeStatus::Consuming.code(),
                Some(wrapper.idempotent.key_timeout),
            )
            .await?;

        if !claimed {
            // A record that vanished since the claim attempt is treated as in flight.
            let status = self
                .cache
                .get::<String>(&key)
                .await?
                .map(|code| ConsumeStatus::from_code(&code))
                .unwrap_or(ConsumeStatus::Consuming);
            tracing::warn!(
                method = %wrapper.invocation.method,
                key = %key,
                status = %status,
                "Repeat message consumption detected"
            );
            return Err(IdempotencyError::RepeatConsumption { status }.into());
        }

        ctx.put(SPEL_MQ_WRAPPER_KEY, Value::String(key));
        Ok(())
    }

    async fn post_processing(
        &self,
        idempotent: &Idempotent,
        ctx: &mut IdempotentContext,
    ) -> TollgateResult<()> {
        let key = Self::claimed_key(ctx)?;
        if let Err(e) = self
            .cache
            .put(
                &key,
                ConsumeStatus::Consumed.code(),
                Some(idempotent.key_timeout),
            )
            .await
        {
            tracing::error!(key = %key, error = %e, "Failed to mark message as consumed");
        }
        Ok(())
    }

    async fn exception_processing(
        &self,
        _idempotent: &Idempotent,
        ctx: &mut IdempotentContext,
    ) -> TollgateResult<()> {
        let key = Self::claimed_key(ctx)?;
        if let Err(e) = self.cache.delete_key(&key).await {
            tracing::error!(key = %key, error = %e, "Failed to delete consumption record");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tollgate_cache::MemoryStore;
    use tollgate_core::{CacheConfig, ExpressionError, LockConfig, TollgateError};

    fn cache() -> DistributedCache {
        DistributedCache::from_backend(Arc::new(MemoryStore::new()), CacheConfig::default())
            .with_lock_config(LockConfig {
                wait_timeout: Duration::from_millis(100),
                lease: Duration::from_secs(30),
                retry_interval: Duration::from_millis(10),
            })
    }

    fn order_message(id: &str) -> Invocation {
        Invocation::new("on_order").with_param("order", json!({"id": id}))
    }

    fn repeat_status(err: Option<TollgateError>) -> Option<ConsumeStatus> {
        match err {
            Some(TollgateError::Idempotency(IdempotencyError::RepeatConsumption { status })) => {
                Some(status)
            }
            _ => None,
        }
    }

    #[test]
    fn test_wrapper_applies_prefix() -> TollgateResult<()> {
        let handler = SpelMqHandler::new(cache());
        let spec = Idempotent::mq("#order.id").with_unique_key_prefix("order:");
        let call = order_message("order-123");
        let wrapper = handler.build_wrapper(&spec, &call)?;
        assert_eq!(wrapper.lock_key, "order-123");
        assert_eq!(wrapper.unique_key(), "order:order-123");
        Ok(())
    }

    #[test]
    fn test_evaluation_failure_propagates() {
        let handler = SpelRestHandler::new(cache());
        let spec = Idempotent::spel("#missing.id");
        let err = handler.build_wrapper(&spec, &order_message("1")).err();
        assert_eq!(
            err,
            Some(TollgateError::Expression(ExpressionError::UnknownVariable {
                name: "missing".to_string()
            }))
        );
    }

    #[tokio::test]
    async fn test_mq_state_machine() -> TollgateResult<()> {
        let cache = cache();
        let handler = SpelMqHandler::new(cache.clone());
        let spec = Idempotent::mq("#order.id").with_unique_key_prefix("order:");
        let call = order_message("order-123");

        let mut first = IdempotentContext::new();
        handler.execute(&spec, &call, &mut first).await?;
        assert_eq!(
            cache.get::<String>("order:order-123").await?.as_deref(),
            Some("0")
        );

        let mut dup = IdempotentContext::new();
        let err = handler.execute(&spec, &call, &mut dup).await.err();
        assert_eq!(repeat_status(err), Some(ConsumeStatus::Consuming));

        handler.post_processing(&spec, &mut first).await?;
        assert_eq!(
            cache.get::<String>("order:order-123").await?.as_deref(),
            Some("1")
        );

        let err = handler.execute(&spec, &call, &mut dup).await.err();
        assert_eq!(repeat_status(err), Some(ConsumeStatus::Consumed));
        Ok(())
    }

    #[tokio::test]
    async fn test_mq_failure_deletes_record() -> TollgateResult<()> {
        let cache = cache();
        let handler = SpelMqHandler::new(cache.clone());
        let spec = Idempotent::mq("#order.id");
        let call = order_message("order-9");

        let mut ctx = IdempotentContext::new();
        handler.execute(&spec, &call, &mut ctx).await?;
        handler.exception_processing(&spec, &mut ctx).await?;
        assert!(!cache.has_key("order-9").await?);

        let mut retry = IdempotentContext::new();
        handler.execute(&spec, &call, &mut retry).await
    }

    #[tokio::test]
    async fn test_mq_after_phase_needs_claim() {
        let handler = SpelMqHandler::new(cache());
        let mut ctx = IdempotentContext::new();
        let err = handler
            .post_processing(&Idempotent::mq("k"), &mut ctx)
            .await
            .err();
        assert!(matches!(
            err,
            Some(TollgateError::Idempotency(
                IdempotencyError::MissingContextEntry { .. }
            ))
        ));
    }

    #[tokio::test]
    async fn test_rest_lock_times_out_with_rejection() -> TollgateResult<()> {
        let handler = SpelRestHandler::new(cache());
        let spec = Idempotent::spel("'checkout:' + #order.id");
        let call = order_message("5");

        let mut holder = IdempotentContext::new();
        handler.execute(&spec, &call, &mut holder).await?;

        let mut waiter = IdempotentContext::new();
        let err = handler.execute(&spec, &call, &mut waiter).await.err();
        assert_eq!(
            err,
            Some(TollgateError::Idempotency(IdempotencyError::rejected(
                RejectCode::TooManyRequests,
                spec.message.clone()
            )))
        );

        handler.post_processing(&spec, &mut holder).await?;
        handler.execute(&spec, &call, &mut waiter).await
    }
}
