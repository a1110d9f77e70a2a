//! Call-log stage, enabled by `server.logCalls`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::Response,
};

/// Emits one `info` event per call with the path and remote address.
pub async fn log_call(
    State(route): State<Arc<str>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default();

    tracing::info!(
        route = %route,
        method = %request.method(),
        path = %request.uri().path(),
        remote_addr = %remote_addr,
        "API call"
    );

    next.run(request).await
}
