//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (bind, accept)
//!     → connection.rs (lifecycle tracking for draining)
//!     → Hand off to HTTP layer (http/server.rs)
//!
//! Connection States:
//!     Active → Draining → Closed
//! ```
//!
//! # Design Decisions
//! - Each connection tracked for graceful shutdown
//! - Go-style `:port` addresses bind on all interfaces

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{bind, Listener, ListenerError};
