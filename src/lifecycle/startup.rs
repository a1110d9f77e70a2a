//! Startup orchestration.
//!
//! # Responsibilities
//! - Assemble the gateway from a loaded configuration
//! - Start the metrics exporter when configured
//! - Bind the listener and serve until shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::io;
use std::sync::Arc;

use crate::config::{ConfigError, GatewayConfig};
use crate::error::BuildError;
use crate::http::{upstream_client, HttpServer, UpstreamClient};
use crate::lifecycle::Shutdown;
use crate::net::{self, ListenerError};
use crate::observability::metrics;
use crate::pipeline::{DefaultStageFactory, PipelineBuilder, StageFactory};
use crate::routing::{GatewayRouter, RouteTable};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("server error: {0}")]
    Serve(#[from] io::Error),
}

/// Builds every configured route. Any failing route aborts the whole build.
pub fn build_gateway(
    config: &GatewayConfig,
    factory: Arc<dyn StageFactory>,
    client: UpstreamClient,
) -> Result<GatewayRouter, BuildError> {
    if config.server.log_calls {
        tracing::info!("Logging API calls is enabled");
    }

    let builder = PipelineBuilder::new(factory, config.auth0.clone(), config.server.log_calls, client);
    let table = config
        .subrouters
        .iter()
        .try_fold(RouteTable::new(builder), |table, route| table.add(route))?;

    tracing::info!(routes = table.len(), "Gateway built");
    Ok(table.into_router())
}

/// Serves `config` until `shutdown` fires.
pub async fn run(config: GatewayConfig, shutdown: &Shutdown) -> Result<(), StartupError> {
    if let Some(address) = &config.server.metrics_address {
        metrics::init_metrics(address)?;
    }

    let router = build_gateway(&config, Arc::new(DefaultStageFactory), upstream_client())?;
    let listener = net::bind(&config.server.address).await?;

    HttpServer::new(config.server, router)
        .run(listener, shutdown.subscribe())
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthorizationPolicy, RouteSpec};

    fn config(routes: Vec<RouteSpec>) -> GatewayConfig {
        GatewayConfig {
            server: Default::default(),
            auth0: Default::default(),
            subrouters: routes,
        }
    }

    #[test]
    fn builds_all_routes() {
        let router = build_gateway(
            &config(vec![
                RouteSpec::new("a", "http://127.0.0.1:1", "/a"),
                RouteSpec::new("b", "http://127.0.0.1:1/base", "/b"),
            ]),
            Arc::new(DefaultStageFactory),
            upstream_client(),
        )
        .unwrap();
        assert_eq!(router.routes().len(), 2);
    }

    #[test]
    fn invalid_issuer_aborts_build() {
        let mut route = RouteSpec::new("secure", "http://127.0.0.1:1", "/secure");
        route.authorization = Some(AuthorizationPolicy::default());
        let mut config = config(vec![route]);
        config.auth0.domain = "bad domain".to_string();

        let err = build_gateway(&config, Arc::new(DefaultStageFactory), upstream_client())
            .err()
            .unwrap();
        assert!(matches!(err, BuildError::Authenticator(_)));
    }

    #[tokio::test]
    async fn run_fails_before_serving_on_bad_route() {
        let mut config = config(vec![RouteSpec::new("bad", "not a url", "/bad")]);
        config.server.address = "127.0.0.1:0".to_string();

        let err = run(config, &Shutdown::new()).await.unwrap_err();
        assert!(matches!(err, StartupError::Build(BuildError::InvalidTargetUrl { .. })));
    }
}
