//! Per-route CORS stage built on `tower_http::cors`.
//!
//! Empty lists fall back to the permissive-but-simple defaults: any origin,
//! `GET`/`HEAD`/`POST`, and the CORS-safelisted request headers. A `*`
//! entry combined with credentials mirrors the request instead, since a
//! literal wildcard is not valid alongside `Access-Control-Allow-Credentials`.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderName, HeaderValue, Method, Request},
    middleware::Next,
    response::Response,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer, ExposeHeaders};

use crate::config::CorsPolicy;
use crate::error::BuildError;

const DEFAULT_METHODS: [Method; 3] = [Method::GET, Method::HEAD, Method::POST];

const DEFAULT_HEADERS: [HeaderName; 4] = [
    header::ACCEPT,
    header::ACCEPT_LANGUAGE,
    header::CONTENT_LANGUAGE,
    header::ORIGIN,
];

/// Configured CORS layer plus the route's preflight logging switch.
#[derive(Clone)]
pub struct CorsStage {
    route: Arc<str>,
    layer: CorsLayer,
    debug: bool,
}

impl CorsStage {
    pub fn new(route: &str, policy: &CorsPolicy) -> Result<Self, BuildError> {
        let invalid = |reason: String| BuildError::InvalidCors {
            route: route.to_string(),
            reason,
        };
        let credentials = policy.allow_credentials;

        let origins = if policy.allowed_origins.is_empty() || has_star(&policy.allowed_origins) {
            if credentials {
                AllowOrigin::mirror_request()
            } else {
                AllowOrigin::any()
            }
        } else {
            let origins = policy
                .allowed_origins
                .iter()
                .map(|origin| {
                    HeaderValue::from_str(origin.trim())
                        .map_err(|_| invalid(format!("invalid origin '{}'", origin)))
                })
                .collect::<Result<Vec<_>, _>>()?;
            AllowOrigin::list(origins)
        };

        let methods = if policy.allowed_methods.is_empty() {
            AllowMethods::list(DEFAULT_METHODS)
        } else if has_star(&policy.allowed_methods) {
            if credentials {
                AllowMethods::mirror_request()
            } else {
                AllowMethods::any()
            }
        } else {
            let methods = policy
                .allowed_methods
                .iter()
                .map(|method| {
                    Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
                        .map_err(|_| invalid(format!("invalid method '{}'", method)))
                })
                .collect::<Result<Vec<_>, _>>()?;
            AllowMethods::list(methods)
        };

        let headers = if policy.allowed_headers.is_empty() {
            AllowHeaders::list(DEFAULT_HEADERS)
        } else if has_star(&policy.allowed_headers) {
            if credentials {
                AllowHeaders::mirror_request()
            } else {
                AllowHeaders::any()
            }
        } else {
            AllowHeaders::list(header_names(&policy.allowed_headers).map_err(invalid)?)
        };

        let mut layer = CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(headers)
            .allow_credentials(credentials);

        if has_star(&policy.exposed_headers) {
            if credentials {
                return Err(invalid(
                    "wildcard exposed headers cannot be combined with credentials".to_string(),
                ));
            }
            layer = layer.expose_headers(ExposeHeaders::any());
        } else if !policy.exposed_headers.is_empty() {
            layer = layer.expose_headers(header_names(&policy.exposed_headers).map_err(invalid)?);
        }

        if policy.max_age_seconds > 0 {
            layer = layer.max_age(Duration::from_secs(policy.max_age_seconds));
        }

        Ok(Self {
            route: Arc::from(route),
            layer,
            debug: policy.debug,
        })
    }

    pub fn layer(&self) -> &CorsLayer {
        &self.layer
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn route(&self) -> Arc<str> {
        Arc::clone(&self.route)
    }
}

fn has_star(values: &[String]) -> bool {
    values.iter().any(|value| value.trim() == "*")
}

fn header_names(values: &[String]) -> Result<Vec<HeaderName>, String> {
    values
        .iter()
        .map(|name| {
            HeaderName::from_bytes(name.trim().as_bytes())
                .map_err(|_| format!("invalid header name '{}'", name))
        })
        .collect()
}

fn is_preflight(request: &Request<Body>) -> bool {
    request.method() == Method::OPTIONS
        && request.headers().contains_key(header::ORIGIN)
        && request
            .headers()
            .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD)
}

/// Logs preflight requests and the CORS verdict. Sits outside the CORS layer.
pub async fn log_preflight(
    State(route): State<Arc<str>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !is_preflight(&request) {
        return next.run(request).await;
    }

    let origin = request.headers().get(header::ORIGIN).cloned();
    let requested_method = request
        .headers()
        .get(header::ACCESS_CONTROL_REQUEST_METHOD)
        .cloned();

    let response = next.run(request).await;

    tracing::debug!(
        route = %route,
        origin = ?origin,
        requested_method = ?requested_method,
        allowed_origin = ?response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN),
        status = %response.status(),
        "CORS preflight"
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};
    use tower::ServiceExt;

    fn app(policy: &CorsPolicy) -> Router {
        let stage = CorsStage::new("cors", policy).unwrap();
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(stage.layer().clone())
    }

    fn preflight(origin: &str) -> Request<Body> {
        Request::options("/")
            .header(header::ORIGIN, origin)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn defaults_allow_any_origin_and_simple_methods() {
        let response = app(&CorsPolicy::default())
            .oneshot(preflight("https://app.example"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        let methods = headers[header::ACCESS_CONTROL_ALLOW_METHODS].to_str().unwrap();
        for method in ["GET", "HEAD", "POST"] {
            assert!(methods.contains(method), "{} missing from {}", method, methods);
        }
        assert!(!methods.contains("DELETE"));
    }

    #[tokio::test]
    async fn credentials_with_wildcard_mirror_origin() {
        let policy = CorsPolicy {
            allowed_origins: vec!["*".into()],
            allow_credentials: true,
            ..Default::default()
        };
        let response = app(&policy).oneshot(preflight("https://app.example")).await.unwrap();

        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://app.example");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    }

    #[tokio::test]
    async fn unlisted_origin_gets_no_allow_header() {
        let policy = CorsPolicy {
            allowed_origins: vec!["https://trusted.example".into()],
            max_age_seconds: 600,
            ..Default::default()
        };

        let denied = app(&policy).oneshot(preflight("https://evil.example")).await.unwrap();
        assert!(denied.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());

        let allowed = app(&policy).oneshot(preflight("https://trusted.example")).await.unwrap();
        assert_eq!(
            allowed.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://trusted.example"
        );
        assert_eq!(allowed.headers()[header::ACCESS_CONTROL_MAX_AGE], "600");
    }

    #[tokio::test]
    async fn exposes_configured_headers_on_actual_requests() {
        let policy = CorsPolicy {
            exposed_headers: vec!["X-RateLimit-Remaining".into()],
            ..Default::default()
        };
        let response = app(&policy)
            .oneshot(
                Request::get("/")
                    .header(header::ORIGIN, "https://app.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_EXPOSE_HEADERS],
            "x-ratelimit-remaining"
        );
    }

    #[test]
    fn rejects_unparseable_values() {
        let bad_method = CorsPolicy {
            allowed_methods: vec!["GE T".into()],
            ..Default::default()
        };
        assert!(matches!(
            CorsStage::new("r", &bad_method),
            Err(BuildError::InvalidCors { .. })
        ));

        let bad_header = CorsPolicy {
            allowed_headers: vec!["bad header".into()],
            ..Default::default()
        };
        assert!(CorsStage::new("r", &bad_header).is_err());
    }

    #[test]
    fn rejects_wildcard_exposure_with_credentials() {
        let policy = CorsPolicy {
            exposed_headers: vec!["*".into()],
            allow_credentials: true,
            ..Default::default()
        };
        assert!(CorsStage::new("r", &policy).is_err());
    }
}
