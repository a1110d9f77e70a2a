//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (YAML/TOML)
//!     → loader.rs (parse & deserialize, strict keys)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → handed to lifecycle::startup to assemble the gateway
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no reload
//! - Server and issuer blocks have defaults, routes do not
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    Auth0Config, AuthorizationPolicy, CorsPolicy, GatewayConfig, RateLimitPolicy, RouteSpec,
    ServerConfig,
};
