//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Build one pipeline per configured route ([`RouteTable`], building phase)
//! - Freeze the table into an immutable [`GatewayRouter`] (serving phase)
//! - Dispatch each request to the longest matching prefix, or 404
//! - Redirect non-canonical paths (`..`, `//`) before any route sees them
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) path prefix scan (acceptable for typical route counts)
//! - `add` consumes the table, so a failed build leaves nothing behind

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::{
    body::Body,
    http::{header, uri::PathAndQuery, HeaderValue, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use tower::{Service, ServiceExt};
use url::Url;

use crate::config::RouteSpec;
use crate::error::BuildError;
use crate::http::path;
use crate::observability::metrics;
use crate::pipeline::{Pipeline, PipelineBuilder};
use crate::routing::matcher::PathPrefixMatcher;

/// Metrics label for requests no route matched.
const UNMATCHED: &str = "unmatched";

/// Metrics label for requests redirected to their canonical path.
const REDIRECTED: &str = "redirect";

/// A compiled route.
pub struct RouteEntry {
    name: Arc<str>,
    matcher: PathPrefixMatcher,
    strip_prefix: bool,
    pipeline: Pipeline,
}

impl RouteEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> &str {
        self.matcher.prefix()
    }

    pub fn strips_prefix(&self) -> bool {
        self.strip_prefix
    }
}

/// Parses a route's `targetURL`. Only `http`/`https` upstreams with a host are accepted.
pub fn parse_target(route: &RouteSpec) -> Result<Url, BuildError> {
    let invalid = |reason: String| BuildError::InvalidTargetUrl {
        route: route.name.clone(),
        url: route.target_url.clone(),
        reason,
    };

    let url = Url::parse(route.target_url.trim()).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

/// Route table in the building phase.
pub struct RouteTable {
    builder: PipelineBuilder,
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    pub fn new(builder: PipelineBuilder) -> Self {
        Self {
            builder,
            entries: Vec::new(),
        }
    }

    /// Compiles `route` and appends it.
    pub fn add(mut self, route: &RouteSpec) -> Result<Self, BuildError> {
        let target = parse_target(route)?;
        let pipeline = self.builder.build(route, target)?;

        self.entries.push(RouteEntry {
            name: Arc::from(route.name.as_str()),
            matcher: PathPrefixMatcher::new(route.path_prefix.as_str()),
            strip_prefix: route.strip_prefix,
            pipeline,
        });

        tracing::info!(
            route = %route.name,
            prefix = %route.path_prefix,
            target = %route.target_url,
            "Subrouter setup complete"
        );
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freezes the table. Longer prefixes are tried first; the sort is
    /// stable, so equal prefixes keep declaration order.
    pub fn into_router(self) -> GatewayRouter {
        let mut entries = self.entries;
        entries.sort_by_key(|entry| std::cmp::Reverse(entry.matcher.specificity()));
        GatewayRouter {
            routes: entries.into(),
        }
    }
}

/// Immutable dispatcher shared by every connection.
#[derive(Clone)]
pub struct GatewayRouter {
    routes: Arc<[RouteEntry]>,
}

impl GatewayRouter {
    pub fn routes(&self) -> &[RouteEntry] {
        &self.routes
    }

    /// Route with the longest prefix matching `path`.
    pub fn match_route(&self, path: &str) -> Option<&RouteEntry> {
        self.routes.iter().find(|entry| entry.matcher.matches(path))
    }

    pub async fn dispatch(&self, mut request: Request<Body>) -> Response {
        let started = Instant::now();
        let path = request.uri().path().to_string();

        if path.starts_with('/') {
            let cleaned = path::clean(&path);
            if cleaned != path {
                tracing::debug!(path = %path, cleaned = %cleaned, "Redirecting to canonical path");
                let response = redirect(request.uri(), &cleaned);
                metrics::record_request(REDIRECTED, response.status().as_u16(), started);
                return response;
            }
        }

        let Some(entry) = self.match_route(&path) else {
            tracing::debug!(path = %path, "No route matched");
            metrics::record_request(UNMATCHED, StatusCode::NOT_FOUND.as_u16(), started);
            return StatusCode::NOT_FOUND.into_response();
        };

        if entry.strip_prefix {
            let rewritten = entry
                .matcher
                .strip(&path)
                .and_then(|stripped| with_path(request.uri(), &stripped));
            match rewritten {
                Some(uri) => *request.uri_mut() = uri,
                None => {
                    tracing::warn!(route = %entry.name, path = %path, "Cannot strip route prefix");
                    return StatusCode::BAD_REQUEST.into_response();
                }
            }
        }

        let response = match entry.pipeline.clone().oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        };

        metrics::record_request(&entry.name, response.status().as_u16(), started);
        response
    }
}

/// 301 to `path`, keeping the query.
fn redirect(uri: &Uri, path: &str) -> Response {
    let location = match uri.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path.to_string(),
    };

    match HeaderValue::from_str(&location) {
        Ok(location) => (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response(),
        Err(_) => StatusCode::BAD_REQUEST.into_response(),
    }
}

/// `uri` with its path replaced and its query kept.
fn with_path(uri: &Uri, path: &str) -> Option<Uri> {
    let path_and_query = match uri.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path.to_string(),
    };

    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(PathAndQuery::try_from(path_and_query).ok()?);
    Uri::from_parts(parts).ok()
}

impl Service<Request<Body>> for GatewayRouter {
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let router = self.clone();
        Box::pin(async move { Ok(router.dispatch(request).await) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Auth0Config;
    use crate::http::forwarder::upstream_client;
    use crate::pipeline::DefaultStageFactory;

    fn table() -> RouteTable {
        RouteTable::new(PipelineBuilder::new(
            Arc::new(DefaultStageFactory),
            Auth0Config::default(),
            false,
            upstream_client(),
        ))
    }

    fn build(routes: &[RouteSpec]) -> Result<GatewayRouter, BuildError> {
        routes
            .iter()
            .try_fold(table(), |table, route| table.add(route))
            .map(RouteTable::into_router)
    }

    #[test]
    fn picks_longest_aligned_prefix() {
        let router = build(&[
            RouteSpec::new("root", "http://127.0.0.1:1", "/"),
            RouteSpec::new("api", "http://127.0.0.1:1", "/api"),
            RouteSpec::new("users", "http://127.0.0.1:1", "/api/users"),
        ])
        .unwrap();

        let name = |path: &str| router.match_route(path).map(RouteEntry::name);
        assert_eq!(name("/api/users/7"), Some("users"));
        assert_eq!(name("/api/usersx"), Some("api"));
        assert_eq!(name("/api"), Some("api"));
        assert_eq!(name("/apix"), Some("root"));
        assert_eq!(name("/"), Some("root"));
    }

    #[test]
    fn equal_prefixes_keep_declaration_order() {
        let router = build(&[
            RouteSpec::new("first", "http://127.0.0.1:1", "/svc"),
            RouteSpec::new("second", "http://127.0.0.1:1", "/svc/"),
        ])
        .unwrap();

        assert_eq!(router.match_route("/svc/x").map(RouteEntry::name), Some("first"));
    }

    #[test]
    fn invalid_target_fails_whole_table() {
        let err = build(&[
            RouteSpec::new("good", "http://127.0.0.1:1", "/good"),
            RouteSpec::new("bad", "://nope", "/bad"),
        ])
        .err()
        .unwrap();

        assert!(matches!(err, BuildError::InvalidTargetUrl { ref route, .. } if route == "bad"));
    }

    #[test]
    fn accepts_http_and_https_targets_only() {
        let tls = RouteSpec::new("tls", "https://api.example.com/v1", "/tls");
        assert_eq!(parse_target(&tls).unwrap().as_str(), "https://api.example.com/v1");
        assert!(build(&[tls]).is_ok());

        let ftp = RouteSpec::new("ftp", "ftp://backend.example", "/ftp");
        assert!(matches!(
            parse_target(&ftp),
            Err(BuildError::InvalidTargetUrl { ref reason, .. }) if reason.contains("ftp")
        ));

        let no_host = RouteSpec::new("file", "file:///tmp/x", "/file");
        assert!(parse_target(&no_host).is_err());
    }

    #[test]
    fn rewrites_path_and_keeps_query() {
        let uri: Uri = "/api/users?page=2".parse().unwrap();
        assert_eq!(with_path(&uri, "/users").unwrap().to_string(), "/users?page=2");
    }

    #[tokio::test]
    async fn unmatched_path_is_not_found() {
        let router = build(&[RouteSpec::new("api", "http://127.0.0.1:1", "/api")]).unwrap();

        let response = router
            .oneshot(Request::get("/other").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn dot_segments_are_redirected_before_matching() {
        let router = build(&[
            RouteSpec::new("public", "http://127.0.0.1:1", "/public"),
            RouteSpec::new("private", "http://127.0.0.1:1", "/private"),
        ])
        .unwrap();

        for (raw, location) in [
            ("/public/../private/secret", "/private/secret"),
            ("/public/%2e%2e/private/secret?x=1", "/private/secret?x=1"),
            ("/public//a", "/public/a"),
        ] {
            let response = router
                .clone()
                .oneshot(Request::get(raw).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY, "{}", raw);
            assert_eq!(response.headers()[header::LOCATION], location, "{}", raw);
        }
    }

    #[test]
    fn empty_table_builds_router() {
        let table = table();
        assert!(table.is_empty());
        assert!(table.into_router().routes().is_empty());
    }
}
