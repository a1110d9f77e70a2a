//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper connection, timeouts, trace span)
//!     → [routing layer picks the route pipeline]
//!     → forwarder.rs (rewrite via path.rs, stream to upstream)
//!     → Stream response to client
//! ```

pub mod forwarder;
pub mod path;
pub mod server;

pub use forwarder::{upstream_client, ReverseProxyForwarder, UpstreamClient};
pub use server::HttpServer;
