//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, header buffer size)
//! - Detect conflicting routes (duplicate prefixes)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Target URLs are checked when the gateway is built, not here

use std::collections::HashSet;
use std::fmt;

use crate::config::schema::GatewayConfig;

/// Smallest head buffer hyper accepts.
pub const MIN_HEADER_BYTES: usize = 8192;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EmptyRouteName { index: usize },
    PrefixNotRooted { route: String, prefix: String },
    DuplicatePrefix { route: String, prefix: String },
    ZeroTimeout { field: &'static str },
    HeaderLimitTooSmall { value: usize },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyRouteName { index } => {
                write!(f, "subrouter #{} has an empty name", index)
            }
            ValidationError::PrefixNotRooted { route, prefix } => {
                write!(f, "prefix '{}' of subrouter '{}' must start with '/'", prefix, route)
            }
            ValidationError::DuplicatePrefix { route, prefix } => {
                write!(f, "prefix '{}' of subrouter '{}' is already in use", prefix, route)
            }
            ValidationError::ZeroTimeout { field } => write!(f, "server.{} must be positive", field),
            ValidationError::HeaderLimitTooSmall { value } => write!(
                f,
                "server.maxHeaderBytes must be at least {} (got {})",
                MIN_HEADER_BYTES, value
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let server = &config.server;
    for (field, value) in [
        ("readTimeout", server.read_timeout),
        ("writeTimeout", server.write_timeout),
        ("idleTimeout", server.idle_timeout),
    ] {
        if value.is_zero() {
            errors.push(ValidationError::ZeroTimeout { field });
        }
    }
    if server.max_header_bytes < MIN_HEADER_BYTES {
        errors.push(ValidationError::HeaderLimitTooSmall {
            value: server.max_header_bytes,
        });
    }

    let mut seen = HashSet::new();
    for (index, route) in config.subrouters.iter().enumerate() {
        if route.name.trim().is_empty() {
            errors.push(ValidationError::EmptyRouteName { index });
        }
        if !route.path_prefix.starts_with('/') {
            errors.push(ValidationError::PrefixNotRooted {
                route: route.name.clone(),
                prefix: route.path_prefix.clone(),
            });
        }
        // `/svc` and `/svc/` are the same dispatch key
        if !seen.insert(route.path_prefix.trim_end_matches('/')) {
            errors.push(ValidationError::DuplicatePrefix {
                route: route.name.clone(),
                prefix: route.path_prefix.clone(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
