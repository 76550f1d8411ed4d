//! Idempotency strategy handlers.
//!
//! Every handler runs the same three-phase protocol around a guarded call:
//!
//! 1. [`IdempotentHandler::execute`]: derive the key, then claim it (take a
//!    lock, consume a token, or claim a dedup record). Rejects the call on
//!    failure.
//! 2. The guarded operation runs.
//! 3. Exactly one of [`IdempotentHandler::post_processing`] (success) or
//!    [`IdempotentHandler::exception_processing`] (failure) releases or
//!    finalises the claim.
//!
//! Handlers are stateless; per-call state travels in the
//! [`IdempotentContext`].

mod param;
mod spel;
mod token;

pub use param::{fingerprint, ParamHandler, USER_ID_MISSING_MESSAGE};
pub use spel::{SpelMqHandler, SpelRestHandler};
pub use token::{TokenHandler, TOKEN_DELETE_FAILED_MESSAGE, TOKEN_MISSING_MESSAGE};

use crate::context::IdempotentContext;
use crate::spec::{Idempotent, Invocation};
use async_trait::async_trait;
use tollgate_cache::{DistributedCache, LockToken};
use tollgate_core::{IdempotentScene, IdempotentType, TollgateResult};

/// Everything a handler needs about one call once its key is derived.
#[derive(Debug, Clone)]
pub struct IdempotentParamWrapper<'a> {
    pub idempotent: &'a Idempotent,
    pub invocation: &'a Invocation,
    /// Derived idempotency key (token, fingerprint lock key or evaluated key).
    pub lock_key: String,
}

impl<'a> IdempotentParamWrapper<'a> {
    pub fn new(
        idempotent: &'a Idempotent,
        invocation: &'a Invocation,
        lock_key: impl Into<String>,
    ) -> Self {
        Self {
            idempotent,
            invocation,
            lock_key: lock_key.into(),
        }
    }

    /// Key with the call-site unique prefix applied.
    pub fn unique_key(&self) -> String {
        format!("{}{}", self.idempotent.unique_key_prefix, self.lock_key)
    }
}

/// One idempotency strategy for one scene.
#[async_trait]
pub trait IdempotentHandler: Send + Sync {
    fn scene(&self) -> IdempotentScene;

    fn kind(&self) -> IdempotentType;

    /// Derive the idempotency key for this call.
    fn build_wrapper<'a>(
        &self,
        idempotent: &'a Idempotent,
        invocation: &'a Invocation,
    ) -> TollgateResult<IdempotentParamWrapper<'a>>;

    /// Claim the key, recording whatever the after phase needs in `ctx`.
    async fn handler(
        &self,
        wrapper: &IdempotentParamWrapper<'_>,
        ctx: &mut IdempotentContext,
    ) -> TollgateResult<()>;

    /// Before phase: build the wrapper and claim.
    async fn execute(
        &self,
        idempotent: &Idempotent,
        invocation: &Invocation,
        ctx: &mut IdempotentContext,
    ) -> TollgateResult<()> {
        let wrapper = self.build_wrapper(idempotent, invocation)?;
        self.handler(&wrapper, ctx).await
    }

    /// After phase on success.
    async fn post_processing(
        &self,
        _idempotent: &Idempotent,
        _ctx: &mut IdempotentContext,
    ) -> TollgateResult<()> {
        Ok(())
    }

    /// After phase on failure of the guarded operation.
    async fn exception_processing(
        &self,
        _idempotent: &Idempotent,
        _ctx: &mut IdempotentContext,
    ) -> TollgateResult<()> {
        Ok(())
    }
}

/// Release the lock stored under `context_key`, if any.
pub(crate) async fn release_lock(
    cache: &DistributedCache,
    ctx: &IdempotentContext,
    context_key: &str,
) -> TollgateResult<()> {
    if let Some(token) = ctx.get_as::<LockToken>(context_key) {
        cache.unlock(&token).await?;
        tracing::debug!(lock = %token.name, "Idempotency lock released");
    }
    Ok(())
}
