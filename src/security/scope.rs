//! Scope authorization.
//!
//! Runs after the token stage and checks the token's `scope` claim against
//! the route's required scopes.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::config::AuthorizationPolicy;
use crate::security::token::{Claims, ValidatedClaims};
use crate::security::{json_message, CANNOT_ACCESS_TOKEN, INSUFFICIENT_PRIVILEGES, INVALID_CLAIMS};

/// True iff every required scope is granted verbatim.
///
/// Granted scopes are split on runs of ASCII spaces only; a tab is part of
/// a token. No required scopes always authorizes.
pub fn authorize<S: AsRef<str>>(claims: &Claims, required: &[S]) -> bool {
    if required.is_empty() {
        return true;
    }

    let granted: HashSet<&str> = claims
        .scope
        .split(' ')
        .filter(|scope| !scope.is_empty())
        .collect();

    required
        .iter()
        .all(|scope| granted.contains(scope.as_ref()))
}

/// Why a request failed scope authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeRejection {
    MissingClaims,
    InvalidClaims,
    InsufficientScope,
}

impl ScopeRejection {
    pub fn status(self) -> StatusCode {
        match self {
            ScopeRejection::MissingClaims | ScopeRejection::InvalidClaims => StatusCode::BAD_REQUEST,
            ScopeRejection::InsufficientScope => StatusCode::FORBIDDEN,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            ScopeRejection::MissingClaims => CANNOT_ACCESS_TOKEN,
            ScopeRejection::InvalidClaims => INVALID_CLAIMS,
            ScopeRejection::InsufficientScope => INSUFFICIENT_PRIVILEGES,
        }
    }
}

/// Per-route scope check.
#[derive(Debug, Clone)]
pub struct ScopeValidator {
    required: Arc<[String]>,
}

impl ScopeValidator {
    pub fn new(policy: &AuthorizationPolicy) -> Self {
        Self {
            required: policy.required_scopes.iter().cloned().collect(),
        }
    }

    pub fn required_scopes(&self) -> &[String] {
        &self.required
    }

    pub fn check(&self, claims: Option<&ValidatedClaims>) -> Result<(), ScopeRejection> {
        let claims = claims.ok_or(ScopeRejection::MissingClaims)?;
        let custom = claims.custom_claims().ok_or(ScopeRejection::InvalidClaims)?;

        if authorize(&custom, &self.required[..]) {
            Ok(())
        } else {
            Err(ScopeRejection::InsufficientScope)
        }
    }
}

pub async fn require_scopes(
    State(validator): State<ScopeValidator>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let verdict = validator.check(request.extensions().get::<ValidatedClaims>());
    match verdict {
        Ok(()) => next.run(request).await,
        Err(rejection) => {
            tracing::debug!(
                path = %request.uri().path(),
                required = ?validator.required_scopes(),
                reason = ?rejection,
                "Scope check failed"
            );
            json_message(rejection.status(), rejection.message())
        }
    }
}
