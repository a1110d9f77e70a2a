//! Terminal pipeline stage: forwards a request to the route's upstream.
//!
//! # Responsibilities
//! - Rewrite the request URI onto the target base (see `path.rs`)
//! - Copy method, headers, and body; pin an empty User-Agent when absent
//! - Stream the upstream response back without buffering
//! - Tunnel protocol upgrades (WebSocket and the like) once the upstream
//!   answers 101 Switching Protocols
//!
//! # Design Decisions
//! - No retries: upstream calls are not assumed idempotent
//! - Connection failures become 502 Bad Gateway
//! - Dropping the response future (client went away) drops the upstream
//!   request, which releases its connection

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    body::{Body, HttpBody},
    extract::ConnectInfo,
    http::{header, HeaderValue, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use hyper::{body::Incoming, upgrade::OnUpgrade};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::{TokioExecutor, TokioIo},
};
use tower::Service;
use url::Url;

use crate::http::path;
use crate::observability::metrics;
use crate::security::headers::{
    announce_upgrade, append_forwarded_for, strip_hop_by_hop, upgrade_protocol,
};

/// Shared client for upstream traffic; speaks plain HTTP and HTTPS.
pub type UpstreamClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Builds the pooled client every forwarder of a gateway shares.
pub fn upstream_client() -> UpstreamClient {
    // more than one rustls provider may be compiled in; pin ring
    let _ = rustls::crypto::ring::default_provider().install_default();

    let mut http = HttpConnector::new();
    http.enforce_http(false);

    let connector = HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .wrap_connector(http);
    Client::builder(TokioExecutor::new()).build(connector)
}

/// Streams requests to a single upstream base URL.
#[derive(Clone)]
pub struct ReverseProxyForwarder {
    route: Arc<str>,
    target: Arc<Url>,
    client: UpstreamClient,
}

impl ReverseProxyForwarder {
    pub fn new(route: &str, target: Url, client: UpstreamClient) -> Self {
        Self {
            route: Arc::from(route),
            target: Arc::new(target),
            client,
        }
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    /// Absolute upstream URI for an incoming (possibly prefix-stripped) URI.
    pub fn upstream_uri(&self, incoming: &Uri) -> Result<Uri, axum::http::uri::InvalidUri> {
        let (path, query) = path::join(&self.target, incoming.path(), incoming.query().unwrap_or(""));

        let mut upstream = format!(
            "{}://{}{}",
            self.target.scheme(),
            authority(&self.target),
            path
        );
        if !query.is_empty() {
            upstream.push('?');
            upstream.push_str(&query);
        }
        upstream.parse()
    }

    pub async fn forward(&self, mut request: Request<Body>) -> Response {
        let client_ip = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        let upgrade = upgrade_protocol(request.headers())
            .map(|protocol| (protocol, hyper::upgrade::on(&mut request)));

        let (mut parts, body) = request.into_parts();

        let uri = match self.upstream_uri(&parts.uri) {
            Ok(uri) => uri,
            Err(e) => {
                tracing::warn!(route = %self.route, uri = %parts.uri, error = %e, "Cannot rewrite request URI");
                return StatusCode::BAD_REQUEST.into_response();
            }
        };

        strip_hop_by_hop(&mut parts.headers);
        if let Some((protocol, _)) = &upgrade {
            announce_upgrade(&mut parts.headers, protocol.clone());
        }
        if !parts.headers.contains_key(header::USER_AGENT) {
            // keep the client library from announcing itself
            parts.headers.insert(header::USER_AGENT, HeaderValue::from_static(""));
        }
        if let Some(ip) = client_ip {
            append_forwarded_for(&mut parts.headers, ip);
        }

        let body = if body.is_end_stream() { Body::empty() } else { body };

        let mut outbound = Request::new(body);
        *outbound.method_mut() = parts.method;
        *outbound.uri_mut() = uri;
        *outbound.headers_mut() = parts.headers;

        tracing::debug!(
            route = %self.route,
            method = %outbound.method(),
            upstream = %outbound.uri(),
            "Forwarding request"
        );

        match self.client.request(outbound).await {
            Ok(response) if response.status() == StatusCode::SWITCHING_PROTOCOLS => {
                self.switch_protocols(response, upgrade)
            }
            Ok(response) => {
                let (mut parts, body) = response.into_parts();
                strip_hop_by_hop(&mut parts.headers);
                Response::from_parts(parts, Body::new(body))
            }
            Err(e) => {
                tracing::error!(route = %self.route, target = %self.target, error = %e, "Upstream error");
                metrics::record_upstream_error(&self.route);
                StatusCode::BAD_GATEWAY.into_response()
            }
        }
    }

    /// Hands the 101 back to the client and splices both upgraded
    /// connections together in the background.
    fn switch_protocols(
        &self,
        mut response: hyper::Response<Incoming>,
        requested: Option<(HeaderValue, OnUpgrade)>,
    ) -> Response {
        let accepted = upgrade_protocol(response.headers());
        let (protocol, client) = match (requested, accepted) {
            (Some((requested, client)), Some(accepted))
                if requested.as_bytes().eq_ignore_ascii_case(accepted.as_bytes()) =>
            {
                (accepted, client)
            }
            (requested, accepted) => {
                tracing::warn!(
                    route = %self.route,
                    requested = ?requested.map(|(protocol, _)| protocol),
                    accepted = ?accepted,
                    "Upstream switched to an unrequested protocol"
                );
                metrics::record_upstream_error(&self.route);
                return StatusCode::BAD_GATEWAY.into_response();
            }
        };

        let upstream = hyper::upgrade::on(&mut response);
        let (mut parts, _) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        announce_upgrade(&mut parts.headers, protocol);

        tokio::spawn(tunnel(Arc::clone(&self.route), client, upstream));
        Response::from_parts(parts, Body::empty())
    }
}

async fn tunnel(route: Arc<str>, client: OnUpgrade, upstream: OnUpgrade) {
    let (client, upstream) = match tokio::try_join!(client, upstream) {
        Ok(pair) => pair,
        Err(e) => {
            tracing::warn!(route = %route, error = %e, "Protocol upgrade failed");
            return;
        }
    };

    let mut client = TokioIo::new(client);
    let mut upstream = TokioIo::new(upstream);
    match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
        Ok((sent, received)) => {
            tracing::debug!(route = %route, sent, received, "Upgraded connection closed")
        }
        Err(e) => tracing::debug!(route = %route, error = %e, "Upgraded connection aborted"),
    }
}

fn authority(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

impl Service<Request<Body>> for ReverseProxyForwarder {
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let forwarder = self.clone();
        Box::pin(async move { Ok(forwarder.forward(request).await) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forwarder(target: &str) -> ReverseProxyForwarder {
        ReverseProxyForwarder::new("test", Url::parse(target).unwrap(), upstream_client())
    }

    #[tokio::test]
    async fn rewrites_onto_target_base() {
        let fwd = forwarder("http://backend.local:8080/base?target=param");
        let uri: Uri = "/endpoint?req=param".parse().unwrap();

        let upstream = fwd.upstream_uri(&uri).unwrap();
        assert_eq!(
            upstream.to_string(),
            "http://backend.local:8080/base/endpoint?target=param&req=param"
        );
    }

    #[tokio::test]
    async fn keeps_https_scheme_and_port() {
        let fwd = forwarder("https://api.example.com:8443/v1");
        let uri: Uri = "/users".parse().unwrap();

        let upstream = fwd.upstream_uri(&uri).unwrap();
        assert_eq!(upstream.to_string(), "https://api.example.com:8443/v1/users");
    }

    #[tokio::test]
    async fn keeps_encoded_slash() {
        let fwd = forwarder("http://backend.local/api/v1/");
        let uri: Uri = "/foo%2Fbar/".parse().unwrap();

        let upstream = fwd.upstream_uri(&uri).unwrap();
        assert_eq!(upstream.path(), "/api/v1/foo%2Fbar");
    }

    #[tokio::test]
    async fn unreachable_upstream_is_bad_gateway() {
        let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = closed.local_addr().unwrap();
        drop(closed);

        let fwd = forwarder(&format!("http://{}", addr));
        let response = fwd
            .forward(Request::get("/anything").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
