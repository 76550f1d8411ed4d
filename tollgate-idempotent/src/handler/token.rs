//! Token strategy: a pre-issued, single-use ticket.
//!
//! The atomic delete of the token is the whole guard. Deleting 0 keys means
//! the token was already consumed, expired, or never issued. Only keys under
//! the configured token prefix are ever deleted.

use super::{IdempotentHandler, IdempotentParamWrapper};
use crate::context::IdempotentContext;
use crate::spec::{Idempotent, Invocation};
use async_trait::async_trait;
use tollgate_cache::DistributedCache;
use tollgate_core::{
    IdempotencyError, IdempotentScene, IdempotentType, RejectCode, TokenConfig, TollgateResult,
};
use uuid::Uuid;

/// Rejection message when the request carries no token.
pub const TOKEN_MISSING_MESSAGE: &str = "Token状态异常, 请先获取Token";

/// Fallback rejection message when the token cannot be consumed.
pub const TOKEN_DELETE_FAILED_MESSAGE: &str = "幂等Token删除失败, 请先获取Token";

fn invalid_token(idempotent: &Idempotent) -> tollgate_core::TollgateError {
    let message = if idempotent.message.trim().is_empty() {
        TOKEN_DELETE_FAILED_MESSAGE.to_string()
    } else {
        idempotent.message.clone()
    };
    IdempotencyError::rejected(RejectCode::Unauthorized, message).into()
}

/// Issues and consumes idempotency tokens on REST calls.
#[derive(Debug, Clone)]
pub struct TokenHandler {
    cache: DistributedCache,
    config: TokenConfig,
}

impl TokenHandler {
    pub fn new(cache: DistributedCache, config: TokenConfig) -> Self {
        Self { cache, config }
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Whether `token` lies in the issued-token namespace.
    pub fn is_token_key(&self, token: &str) -> bool {
        token
            .strip_prefix(self.config.prefix.as_str())
            .is_some_and(|suffix| !suffix.is_empty())
    }

    /// Issue a fresh token: the configured prefix followed by a UUID, stored
    /// with an empty payload for the configured timeout.
    pub async fn create_token(&self) -> TollgateResult<String> {
        let token = format!("{}{}", self.config.prefix, Uuid::new_v4());
        self.cache.put(&token, "", Some(self.config.timeout)).await?;
        tracing::info!(
            timeout_ms = self.config.timeout.as_millis() as u64,
            "Idempotency token issued"
        );
        Ok(token)
    }
}

#[async_trait]
impl IdempotentHandler for TokenHandler {
    fn scene(&self) -> IdempotentScene {
        IdempotentScene::RestApi
    }

    fn kind(&self) -> IdempotentType {
        IdempotentType::Token
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
                kind: IdempotentType::Token,
            })?;
        let token = request.token().ok_or_else(|| {
            IdempotencyError::rejected(RejectCode::Unauthorized, TOKEN_MISSING_MESSAGE)
        })?;
        if !self.is_token_key(token) {
            tracing::warn!(
                method = %invocation.method,
                "Idempotency token outside the token namespace rejected"
            );
            return Err(invalid_token(idempotent));
        }
        Ok(IdempotentParamWrapper::new(idempotent, invocation, token))
    }

    async fn handler(
        &self,
        wrapper: &IdempotentParamWrapper<'_>,
        _ctx: &mut IdempotentContext,
    ) -> TollgateResult<()> {
        let removed = self.cache.delete_key(&wrapper.lock_key).await?;
        if removed == 0 {
            tracing::warn!(
                method = %wrapper.invocation.method,
                "Idempotency token already consumed or unknown"
            );
            return Err(invalid_token(wrapper.idempotent));
        }
        Ok(())
    }
}
