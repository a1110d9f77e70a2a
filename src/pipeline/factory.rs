//! Collaborator factories for the optional pipeline stages.
//!
//! The builder never constructs a stage itself; it asks a [`StageFactory`].
//! Tests swap in factories with stub token validators or injected failures.

use std::sync::Arc;

use crate::config::{Auth0Config, AuthorizationPolicy, CorsPolicy, RateLimitPolicy};
use crate::error::BuildError;
use crate::security::cors::CorsStage;
use crate::security::jwks::JwksTokenValidator;
use crate::security::rate_limit::RateLimiter;
use crate::security::scope::ScopeValidator;
use crate::security::token::TokenValidator;

pub trait StageFactory: Send + Sync {
    /// Builds the validator behind the shared token authenticator.
    fn token_validator(&self, auth0: &Auth0Config) -> Result<Arc<dyn TokenValidator>, BuildError>;

    /// `None` means the factory could not produce a validator; the builder
    /// treats that as a construction failure.
    fn scope_validator(&self, policy: &AuthorizationPolicy) -> Option<ScopeValidator>;

    fn rate_limiter(&self, route: &str, policy: &RateLimitPolicy) -> Result<RateLimiter, BuildError>;

    fn cors(&self, route: &str, policy: &CorsPolicy) -> Result<CorsStage, BuildError>;
}

/// Production factory: JWKS validation, in-memory counters, tower-http CORS.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultStageFactory;

impl StageFactory for DefaultStageFactory {
    fn token_validator(&self, auth0: &Auth0Config) -> Result<Arc<dyn TokenValidator>, BuildError> {
        Ok(Arc::new(JwksTokenValidator::new(auth0)?))
    }

    fn scope_validator(&self, policy: &AuthorizationPolicy) -> Option<ScopeValidator> {
        Some(ScopeValidator::new(policy))
    }

    fn rate_limiter(&self, route: &str, policy: &RateLimitPolicy) -> Result<RateLimiter, BuildError> {
        if policy.period.is_zero() {
            return Err(BuildError::InvalidRateLimit {
                route: route.to_string(),
                reason: "expiration must be greater than zero".to_string(),
            });
        }
        Ok(RateLimiter::from_policy(route, policy))
    }

    fn cors(&self, route: &str, policy: &CorsPolicy) -> Result<CorsStage, BuildError> {
        CorsStage::new(route, policy)
    }
}
