//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (request counters and latency histograms)
//!
//! Consumers:
//!     → stderr (local, human-readable) or stdout (JSON lines)
//!     → Prometheus scrape endpoint, when `metricsAddress` is set
//! ```
//!
//! # Design Decisions
//! - JSON logs everywhere except the `local` release stage
//! - `RUST_LOG` overrides the configured level
//! - Metric recording is a no-op until an exporter is installed

pub mod logging;
pub mod metrics;
