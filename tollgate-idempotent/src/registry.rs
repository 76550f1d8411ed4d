//! Handler registry keyed by (scene, strategy).

use crate::handler::{
    IdempotentHandler, ParamHandler, SpelMqHandler, SpelRestHandler, TokenHandler,
};
use crate::spec::Idempotent;
use std::collections::HashMap;
use std::sync::Arc;
use tollgate_cache::DistributedCache;
use tollgate_core::{
    ConfigError, IdempotencyError, IdempotentScene, IdempotentType, TokenConfig, TollgateResult,
};

/// Resolves each supported (scene, strategy) pair to exactly one handler.
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<(IdempotentScene, IdempotentType), Arc<dyn IdempotentHandler>>,
    token: Arc<TokenHandler>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("combinations", &self.combinations())
            .finish_non_exhaustive()
    }
}

impl HandlerRegistry {
    /// Register the four built-in handlers:
    /// REST×TOKEN, REST×PARAM, REST×SPEL and MQ×SPEL.
    pub fn new(cache: DistributedCache, token_config: TokenConfig) -> Self {
        let token = Arc::new(TokenHandler::new(cache.clone(), token_config));
        let mut registry = Self {
            handlers: HashMap::new(),
            token: token.clone(),
        };
        registry.register(token);
        registry.register(Arc::new(ParamHandler::new(cache.clone())));
        registry.register(Arc::new(SpelRestHandler::new(cache.clone())));
        registry.register(Arc::new(SpelMqHandler::new(cache)));
        registry
    }

    /// Add or replace the handler for its own (scene, kind).
    pub fn register(
        &mut self,
        handler: Arc<dyn IdempotentHandler>,
    ) -> Option<Arc<dyn IdempotentHandler>> {
        self.handlers
            .insert((handler.scene(), handler.kind()), handler)
    }

    pub fn resolve(
        &self,
        scene: IdempotentScene,
        kind: IdempotentType,
    ) -> TollgateResult<Arc<dyn IdempotentHandler>> {
        self.handlers
            .get(&(scene, kind))
            .cloned()
            .ok_or_else(|| IdempotencyError::HandlerNotFound { scene, kind }.into())
    }

    /// Token issuer shared with the REST×TOKEN handler.
    pub fn token_handler(&self) -> &Arc<TokenHandler> {
        &self.token
    }

    /// Registered pairs, sorted by their display form.
    pub fn combinations(&self) -> Vec<(IdempotentScene, IdempotentType)> {
        let mut pairs: Vec<_> = self.handlers.keys().copied().collect();
        pairs.sort_by_key(|(scene, kind)| format!("{scene}:{kind}"));
        pairs
    }
}

impl Idempotent {
    /// Check this call site against `registry` at wiring time.
    pub fn validate(&self, registry: &HandlerRegistry) -> Result<(), ConfigError> {
        if registry.resolve(self.scene, self.kind).is_err() {
            return Err(ConfigError::UnsupportedCombination {
                scene: self.scene,
                kind: self.kind,
            });
        }
        if self.kind == IdempotentType::Spel && self.key.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "key".to_string(),
                reason: "expression strategy requires a key template".to_string(),
            });
        }
        if self.scene == IdempotentScene::Mq && self.key_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "key_timeout".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tollgate_cache::MemoryStore;
    use tollgate_core::{CacheConfig, TollgateError};

    fn registry() -> HandlerRegistry {
        let cache =
            DistributedCache::from_backend(Arc::new(MemoryStore::new()), CacheConfig::default());
        HandlerRegistry::new(cache, TokenConfig::default())
    }

    #[test]
    fn test_each_type_maps_to_its_own_handler() -> TollgateResult<()> {
        let registry = registry();
        for (scene, kind) in [
            (IdempotentScene::RestApi, IdempotentType::Token),
            (IdempotentScene::RestApi, IdempotentType::Param),
            (IdempotentScene::RestApi, IdempotentType::Spel),
            (IdempotentScene::Mq, IdempotentType::Spel),
        ] {
            let handler = registry.resolve(scene, kind)?;
            assert_eq!((handler.scene(), handler.kind()), (scene, kind));
        }
        assert_eq!(registry.combinations().len(), 4);
        Ok(())
    }

    #[test]
    fn test_mq_only_supports_expressions() {
        let registry = registry();
        for kind in [IdempotentType::Token, IdempotentType::Param] {
            let err = registry.resolve(IdempotentScene::Mq, kind).err();
            assert_eq!(
                err,
                Some(TollgateError::Idempotency(IdempotencyError::HandlerNotFound {
                    scene: IdempotentScene::Mq,
                    kind,
                }))
            );
        }
    }

    #[test]
    fn test_validate_call_sites() {
        let registry = registry();
        assert!(Idempotent::token().validate(&registry).is_ok());
        assert!(Idempotent::mq("#order.id").validate(&registry).is_ok());

        let mq_token = Idempotent::token().with_scene(IdempotentScene::Mq);
        assert_eq!(
            mq_token.validate(&registry),
            Err(ConfigError::UnsupportedCombination {
                scene: IdempotentScene::Mq,
                kind: IdempotentType::Token,
            })
        );

        assert!(Idempotent::spel("  ").validate(&registry).is_err());
        assert!(Idempotent::mq("#id")
            .with_key_timeout(Duration::ZERO)
            .validate(&registry)
            .is_err());
    }
}
