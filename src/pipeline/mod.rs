//! Per-route middleware pipelines.
//!
//! # Data Flow
//! ```text
//! RouteSpec + StageFactory (factory.rs)
//!     → builder.rs (select stages, fixed order)
//!     → Pipeline: call_log → rate_limit → cors → authenticate → authorize → compress → forwarder
//! ```
//!
//! # Design Decisions
//! - Stages come from a closed set; absent policies add nothing
//! - One token authenticator per gateway, built on first use
//! - Pipelines are built once and never mutated while serving

pub mod builder;
pub mod call_log;
pub mod factory;

pub use builder::{Pipeline, PipelineBuilder, Stage, StageKind};
pub use factory::{DefaultStageFactory, StageFactory};
