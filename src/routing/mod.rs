//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route Compilation (at startup):
//!     RouteSpec[]
//!     → RouteTable::add (parse target, build pipeline per route)
//!     → RouteTable::into_router (sort by prefix length, freeze)
//!     → GatewayRouter
//!
//! Incoming Request (path):
//!     → router.rs (longest matching prefix)
//!     → matcher.rs (`/`-aligned prefix test, optional strip)
//!     → matched route's Pipeline, or 404
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: longest prefix wins, declaration order breaks ties
//! - One failing route aborts the whole table

pub mod matcher;
pub mod router;

pub use matcher::PathPrefixMatcher;
pub use router::{GatewayRouter, RouteEntry, RouteTable};
