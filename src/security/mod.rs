//! Security subsystem: the request-guarding pipeline stages.
//!
//! # Data Flow
//! ```text
//! Matched request:
//!     → rate_limit.rs (per-client fixed window)
//!     → cors.rs (preflight + response headers)
//!     → token.rs (bearer token → ValidatedClaims in extensions)
//!     → scope.rs (claims.scope ⊇ required scopes)
//!     → forwarder (headers.rs strips hop-by-hop)
//! ```
//!
//! # Design Decisions
//! - Fail closed: reject on any security check failure
//! - Claims travel in the request's typed extension map, never in globals
//! - Rejections use a fixed JSON shape: `{"message": "..."}`

pub mod cors;
pub mod headers;
pub mod jwks;
pub mod rate_limit;
pub mod scope;
pub mod token;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

pub const CANNOT_ACCESS_TOKEN: &str = "Cannot access token.";
pub const INVALID_CLAIMS: &str = "Invalid claims in token.";
pub const INSUFFICIENT_PRIVILEGES: &str = "Insufficient access privileges.";

/// `{"message": ...}` rejection with a JSON content type.
pub fn json_message(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "message": message }))).into_response()
}
