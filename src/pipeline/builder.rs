//! Pipeline assembly.
//!
//! # Responsibilities
//! - Turn a route's optional policies into an ordered list of [`Stage`]s
//! - Fold the stages around the route's forwarder into one [`Pipeline`]
//! - Build the shared token authenticator at most once per gateway
//!
//! # Design Decisions
//! - Order is fixed for every route: call-log, rate limit, CORS,
//!   authentication, scope authorization, compression, forward
//! - Scope authorization only follows authentication, and only when the
//!   route requires at least one scope
//! - Any factory failure aborts the build; there is no degraded pipeline

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{self, Request},
    middleware::from_fn_with_state,
    response::Response,
};
use tower::{util::BoxCloneSyncService, Layer, ServiceExt};
use tower_http::compression::{CompressionBody, CompressionLayer};
use url::Url;

use crate::config::{Auth0Config, RouteSpec};
use crate::error::BuildError;
use crate::http::forwarder::{ReverseProxyForwarder, UpstreamClient};
use crate::pipeline::call_log::log_call;
use crate::pipeline::factory::StageFactory;
use crate::security::cors::{log_preflight, CorsStage};
use crate::security::rate_limit::{rate_limit, RateLimiter};
use crate::security::scope::{require_scopes, ScopeValidator};
use crate::security::token::{authenticate, TokenAuthenticator};

/// A route's complete request handler, shareable across connections.
pub type Pipeline = BoxCloneSyncService<Request<Body>, Response, Infallible>;

/// One interceptor, ready to wrap the rest of the pipeline.
#[derive(Clone)]
pub enum Stage {
    CallLog(Arc<str>),
    RateLimit(RateLimiter),
    Cors(CorsStage),
    Authenticate(TokenAuthenticator),
    Authorize(ScopeValidator),
    Compress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    CallLog,
    RateLimit,
    Cors,
    Authenticate,
    Authorize,
    Compress,
}

impl Stage {
    pub fn kind(&self) -> StageKind {
        match self {
            Stage::CallLog(_) => StageKind::CallLog,
            Stage::RateLimit(_) => StageKind::RateLimit,
            Stage::Cors(_) => StageKind::Cors,
            Stage::Authenticate(_) => StageKind::Authenticate,
            Stage::Authorize(_) => StageKind::Authorize,
            Stage::Compress => StageKind::Compress,
        }
    }

    /// Puts this stage in front of `inner`.
    pub fn wrap(self, inner: Pipeline) -> Pipeline {
        match self {
            Stage::CallLog(route) => {
                BoxCloneSyncService::new(from_fn_with_state(route, log_call).layer(inner))
            }
            Stage::RateLimit(limiter) => {
                BoxCloneSyncService::new(from_fn_with_state(limiter, rate_limit).layer(inner))
            }
            Stage::Cors(cors) => {
                let debug = cors.debug();
                let route = cors.route();
                let pipeline = BoxCloneSyncService::new(cors.layer().clone().layer(inner));
                if debug {
                    BoxCloneSyncService::new(from_fn_with_state(route, log_preflight).layer(pipeline))
                } else {
                    pipeline
                }
            }
            Stage::Authenticate(auth) => {
                BoxCloneSyncService::new(from_fn_with_state(auth, authenticate).layer(inner))
            }
            Stage::Authorize(validator) => {
                BoxCloneSyncService::new(from_fn_with_state(validator, require_scopes).layer(inner))
            }
            Stage::Compress => BoxCloneSyncService::new(
                CompressionLayer::new()
                    .layer(inner)
                    .map_response(|response: http::Response<CompressionBody<Body>>| {
                        response.map(Body::new)
                    }),
            ),
        }
    }
}

/// Builds pipelines for every route of one gateway.
pub struct PipelineBuilder {
    factory: Arc<dyn StageFactory>,
    auth0: Auth0Config,
    log_calls: bool,
    client: UpstreamClient,
    authenticator: Option<TokenAuthenticator>,
}

impl PipelineBuilder {
    pub fn new(
        factory: Arc<dyn StageFactory>,
        auth0: Auth0Config,
        log_calls: bool,
        client: UpstreamClient,
    ) -> Self {
        Self {
            factory,
            auth0,
            log_calls,
            client,
            authenticator: None,
        }
    }

    fn authenticator(&mut self) -> Result<TokenAuthenticator, BuildError> {
        if let Some(auth) = &self.authenticator {
            return Ok(auth.clone());
        }

        let validator = self.factory.token_validator(&self.auth0)?;
        let auth = TokenAuthenticator::new(validator);
        self.authenticator = Some(auth.clone());
        Ok(auth)
    }

    /// Interceptors for `route`, outermost first.
    pub fn stages(&mut self, route: &RouteSpec) -> Result<Vec<Stage>, BuildError> {
        let mut stages = Vec::new();

        if self.log_calls {
            stages.push(Stage::CallLog(Arc::from(route.name.as_str())));
        }

        if let Some(policy) = &route.rate_limit {
            stages.push(Stage::RateLimit(self.factory.rate_limiter(&route.name, policy)?));
        }

        if let Some(policy) = &route.cors {
            stages.push(Stage::Cors(self.factory.cors(&route.name, policy)?));
        }

        if let Some(policy) = &route.authorization {
            stages.push(Stage::Authenticate(self.authenticator()?));

            if !policy.required_scopes.is_empty() {
                let validator = self.factory.scope_validator(policy).ok_or_else(|| {
                    BuildError::MissingScopeValidator {
                        route: route.name.clone(),
                    }
                })?;
                stages.push(Stage::Authorize(validator));
            }
        }

        if route.compress {
            stages.push(Stage::Compress);
        }

        Ok(stages)
    }

    /// Full pipeline for `route`, terminated by a forwarder to `target`.
    pub fn build(&mut self, route: &RouteSpec, target: Url) -> Result<Pipeline, BuildError> {
        let stages = self.stages(route)?;

        let forwarder = ReverseProxyForwarder::new(&route.name, target, self.client.clone());
        let pipeline = stages
            .into_iter()
            .rev()
            .fold(BoxCloneSyncService::new(forwarder), |inner, stage| stage.wrap(inner));

        Ok(pipeline)
    }
}
