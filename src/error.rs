//! Construction-time errors.
//!
//! Any of these aborts gateway assembly; request-time failures never use
//! this type and are turned into responses by the stage that hit them.

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("failed to parse target API URL '{url}' of subrouter '{route}': {reason}")]
    InvalidTargetUrl {
        route: String,
        url: String,
        reason: String,
    },

    #[error("failed to set up token validator middleware: {0}")]
    Authenticator(String),

    #[error("failed to create scope validator for subrouter '{route}'")]
    MissingScopeValidator { route: String },

    #[error("invalid CORS configuration of subrouter '{route}': {reason}")]
    InvalidCors { route: String, reason: String },

    #[error("invalid rate limit of subrouter '{route}': {reason}")]
    InvalidRateLimit { route: String, reason: String },

    #[error("failed to start metrics exporter: {0}")]
    Metrics(String),
}
