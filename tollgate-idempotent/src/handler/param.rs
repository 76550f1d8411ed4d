//! Parameter-fingerprint strategy.
//!
//! Lock key: `idempotent:path:{path}:currentUserId:{user}:sha256:{digest}`,
//! where the digest covers the JSON encoding of the call arguments in
//! declaration order. Object fields serialize in sorted order, so equal
//! arguments always produce the same digest.

use super::{release_lock, IdempotentHandler, IdempotentParamWrapper};
use crate::context::{IdempotentContext, PARAM_LOCK_KEY};
use crate::spec::{Idempotent, Invocation};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tollgate_cache::DistributedCache;
use tollgate_core::{
    CacheError, IdempotencyError, IdempotentScene, IdempotentType, RejectCode, TollgateResult,
};

/// Rejection message when the caller has no user id.
pub const USER_ID_MISSING_MESSAGE: &str = "用户ID获取失败, 请登录";

/// Hex SHA-256 of the JSON-encoded arguments.
pub fn fingerprint(invocation: &Invocation) -> Result<String, CacheError> {
    let encoded =
        serde_json::to_vec(&invocation.params).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
    Ok(hex::encode(Sha256::digest(&encoded)))
}

/// Try-locks the argument fingerprint of a REST call.
#[derive(Debug, Clone)]
pub struct ParamHandler {
    cache: DistributedCache,
}

impl ParamHandler {
    pub fn new(cache: DistributedCache) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl IdempotentHandler for ParamHandler {
    fn scene(&self) -> IdempotentScene {
        IdempotentScene::RestApi
    }

    fn kind(&self) -> IdempotentType {
        IdempotentType::Param
    }

    fn build_wrapper<'a>(
        &self,
        idempotent: &'a Idempotent,
        invocation: &'a Invocation,
    ) -> TollgateResult<IdempotentParamWrapper<'a>> {
        let request = invocation
            .request
            .as_ref()
            .ok_or(IdempotencyError::MissingRequestContext {
                kind: IdempotentType::Param,
            })?;
        let user_id = request
            .user_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| {
                IdempotencyError::rejected(RejectCode::UserLoginError, USER_ID_MISSING_MESSAGE)
            })?;

        let lock_key = format!(
            "idempotent:path:{}:currentUserId:{}:sha256:{}",
            request.path,
            user_id,
            fingerprint(invocation)?
        );
        Ok(IdempotentParamWrapper::new(idempotent, invocation, lock_key))
    }

    async fn handler(
        &self,
        wrapper: &IdempotentParamWrapper<'_>,
        ctx: &mut IdempotentContext,
    ) -> TollgateResult<()> {
        let Some(token) = self.cache.try_lock(&wrapper.lock_key).await? else {
            tracing::warn!(
                method = %wrapper.invocation.method,
                lock = %wrapper.lock_key,
                "Duplicate request rejected, fingerprint lock is held"
            );
            return Err(IdempotencyError::rejected(
                RejectCode::TooManyRequests,
                wrapper.idempotent.message.clone(),
            )
            .into());
        };
        ctx.put_serialized(PARAM_LOCK_KEY, &token)?;
        Ok(())
    }

    async fn post_processing(
        &self,
        _idempotent: &Idempotent,
        ctx: &mut IdempotentContext,
    ) -> TollgateResult<()> {
        release_lock(&self.cache, ctx, PARAM_LOCK_KEY).await
    }

    async fn exception_processing(
        &self,
        idempotent: &Idempotent,
        ctx: &mut IdempotentContext,
    ) -> TollgateResult<()> {
        self.post_processing(idempotent, ctx).await
    }
}
