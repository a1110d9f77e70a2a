//! Bearer-token authentication stage.
//!
//! The actual signature/issuer/audience checks are delegated to a
//! [`TokenValidator`]; this stage only extracts the token, calls it, and
//! attaches the resulting [`ValidatedClaims`] to the request.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use serde::Deserialize;

use crate::security::{json_message, CANNOT_ACCESS_TOKEN};

/// Request-time token failure reported by a validator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("{0}")]
    Invalid(String),
    #[error("no signing key found for kid {0:?}")]
    UnknownKey(Option<String>),
    #[error("signing keys unavailable: {0}")]
    KeySource(String),
}

/// Verifies a raw bearer token.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<ValidatedClaims, TokenError>;
}

/// Decoded, verified token payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedClaims {
    pub subject: Option<String>,
    /// Full claim set as issued.
    pub payload: serde_json::Value,
}

impl ValidatedClaims {
    pub fn from_payload(payload: serde_json::Value) -> Self {
        let subject = payload
            .get("sub")
            .and_then(|sub| sub.as_str())
            .map(str::to_owned);
        Self { subject, payload }
    }

    /// The gateway's own claims. `None` when they have the wrong shape.
    pub fn custom_claims(&self) -> Option<Claims> {
        Claims::deserialize(&self.payload).ok()
    }
}

/// Custom claims the gateway authorizes on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Claims {
    /// Space-separated scope list.
    #[serde(default)]
    pub scope: String,
}

impl Claims {
    pub fn new(scope: impl Into<String>) -> Self {
        Self { scope: scope.into() }
    }
}

/// Shared authenticator state; one instance serves every protected route.
#[derive(Clone)]
pub struct TokenAuthenticator {
    validator: Arc<dyn TokenValidator>,
}

impl TokenAuthenticator {
    pub fn new(validator: Arc<dyn TokenValidator>) -> Self {
        Self { validator }
    }
}

/// Extracts the token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

pub async fn authenticate(
    State(auth): State<TokenAuthenticator>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let token = match bearer_token(request.headers()) {
        Some(token) => token.to_owned(),
        None => return json_message(StatusCode::BAD_REQUEST, CANNOT_ACCESS_TOKEN),
    };

    match auth.validator.validate(&token).await {
        Ok(claims) => {
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Err(e) => {
            tracing::warn!(path = %request.uri().path(), error = %e, "Token rejected");
            json_message(
                StatusCode::UNAUTHORIZED,
                &format!("Failed to validate JWT: {}", e),
            )
        }
    }
}
