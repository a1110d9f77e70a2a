//! Shared utilities for gateway integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use api_gateway::config::{
    Auth0Config, AuthorizationPolicy, CorsPolicy, GatewayConfig, RateLimitPolicy, RouteSpec,
};
use api_gateway::error::BuildError;
use api_gateway::http::{upstream_client, HttpServer};
use api_gateway::lifecycle::{build_gateway, Shutdown};
use api_gateway::net;
use api_gateway::pipeline::{DefaultStageFactory, StageFactory};
use api_gateway::security::cors::CorsStage;
use api_gateway::security::rate_limit::RateLimiter;
use api_gateway::security::scope::ScopeValidator;
use api_gateway::security::token::{TokenError, TokenValidator, ValidatedClaims};
use async_trait::async_trait;
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request, StatusCode},
    response::Response,
    Json, Router,
};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Mock backend that echoes what it received as JSON.
pub struct Backend {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl Backend {
    pub fn url(&self, base: &str) -> String {
        format!("http://{}{}", self.addr, base)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn echo(State(hits): State<Arc<AtomicUsize>>, request: Request<Body>) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);

    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX).await.unwrap_or_default();
    let headers: BTreeMap<String, String> = parts
        .headers
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();

    Json(json!({
        "method": parts.method.as_str(),
        "path": parts.uri.path(),
        "query": parts.uri.query().unwrap_or(""),
        "headers": headers,
        "body": String::from_utf8_lossy(&body),
    }))
}

pub async fn start_echo_backend() -> Backend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));

    let app = Router::new().fallback(echo).with_state(Arc::clone(&hits));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Backend { addr, hits }
}

/// Accepts any protocol upgrade and echoes the upgraded byte stream.
async fn upgrade_echo(State(hits): State<Arc<AtomicUsize>>, mut request: Request<Body>) -> Response {
    hits.fetch_add(1, Ordering::SeqCst);

    let protocol = request
        .headers()
        .get(header::UPGRADE)
        .cloned()
        .unwrap_or(HeaderValue::from_static("echo"));
    let on_upgrade = hyper::upgrade::on(&mut request);
    tokio::spawn(async move {
        if let Ok(upgraded) = on_upgrade.await {
            let (mut reader, mut writer) = tokio::io::split(TokioIo::new(upgraded));
            let _ = tokio::io::copy(&mut reader, &mut writer).await;
        }
    });

    Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(header::CONNECTION, "upgrade")
        .header(header::UPGRADE, protocol)
        .body(Body::empty())
        .unwrap()
}

pub async fn start_upgrade_backend() -> Backend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));

    let app = Router::new().fallback(upgrade_echo).with_state(Arc::clone(&hits));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Backend { addr, hits }
}

/// Writes `request` verbatim and reads the response head, leaving the rest
/// of the stream unread. No client-side path normalization happens.
pub async fn send_raw(addr: SocketAddr, request: &str) -> (TcpStream, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut head = Vec::new();
    while !head.ends_with(b"\r\n\r\n") {
        let byte = stream.read_u8().await.unwrap();
        head.push(byte);
    }
    (stream, String::from_utf8_lossy(&head).to_ascii_lowercase())
}

/// Address that refuses connections.
pub fn closed_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

/// Accepts `good:<scope list>` bearer tokens.
pub struct StubValidator;

#[async_trait]
impl TokenValidator for StubValidator {
    async fn validate(&self, token: &str) -> Result<ValidatedClaims, TokenError> {
        match token.strip_prefix("good:") {
            Some(scope) => Ok(ValidatedClaims::from_payload(
                json!({ "sub": "user-1", "scope": scope }),
            )),
            None => Err(TokenError::Invalid("token is malformed".into())),
        }
    }
}

/// Default factory with the stub token validator.
pub struct StubFactory;

impl StageFactory for StubFactory {
    fn token_validator(&self, _auth0: &Auth0Config) -> Result<Arc<dyn TokenValidator>, BuildError> {
        Ok(Arc::new(StubValidator))
    }

    fn scope_validator(&self, policy: &AuthorizationPolicy) -> Option<ScopeValidator> {
        DefaultStageFactory.scope_validator(policy)
    }

    fn rate_limiter(&self, route: &str, policy: &RateLimitPolicy) -> Result<RateLimiter, BuildError> {
        DefaultStageFactory.rate_limiter(route, policy)
    }

    fn cors(&self, route: &str, policy: &CorsPolicy) -> Result<CorsStage, BuildError> {
        DefaultStageFactory.cors(route, policy)
    }
}

/// A running gateway; shuts down on drop.
pub struct Gateway {
    pub addr: SocketAddr,
    shutdown: Shutdown,
}

impl Gateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub fn config(routes: Vec<RouteSpec>) -> GatewayConfig {
    GatewayConfig {
        server: Default::default(),
        auth0: Default::default(),
        subrouters: routes,
    }
}

pub async fn spawn_gateway(config: GatewayConfig) -> Result<Gateway, BuildError> {
    let router = build_gateway(&config, Arc::new(StubFactory), upstream_client())?;
    let listener = net::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config.server, router);
    tokio::spawn(server.run(listener, shutdown.subscribe()));

    Ok(Gateway { addr, shutdown })
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}
