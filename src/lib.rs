//! HTTP API gateway.
//!
//! Terminates client connections, authenticates and authorizes requests
//! against externally issued bearer tokens, and forwards traffic to backend
//! APIs by path prefix with per-route rate limiting, CORS, and compression.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──▶ net::listener ──▶ http::server ──▶ routing::GatewayRouter
//!                                                  │ longest prefix
//!                                                  ▼
//!                                          pipeline::Pipeline
//!          call_log → rate_limit → cors → authenticate → authorize → compress
//!                                                  │
//!                                                  ▼
//!     Client Response ◀── stream ◀── http::forwarder ──▶ Backend API
//!
//!     Cross-cutting: config, security, observability, lifecycle
//! ```

// Core subsystems
pub mod config;
pub mod error;
pub mod http;
pub mod net;
pub mod pipeline;
pub mod routing;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::schema::GatewayConfig;
pub use error::BuildError;
pub use http::HttpServer;
pub use lifecycle::{build_gateway, Shutdown};
pub use routing::GatewayRouter;
