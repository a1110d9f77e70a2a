//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by route, status
//! - `gateway_request_duration_seconds` (histogram): latency by route
//! - `gateway_rate_limited_total` (counter): 429s by route
//! - `gateway_upstream_errors_total` (counter): failed upstream calls by route
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - The Prometheus exporter serves its own listener, separate from the
//!   gateway's

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::BuildError;

pub const REQUESTS_TOTAL: &str = "gateway_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "gateway_request_duration_seconds";
pub const RATE_LIMITED_TOTAL: &str = "gateway_rate_limited_total";
pub const UPSTREAM_ERRORS_TOTAL: &str = "gateway_upstream_errors_total";

/// Starts the Prometheus scrape endpoint on `address`.
///
/// Must run inside a Tokio runtime.
pub fn init_metrics(address: &str) -> Result<(), BuildError> {
    let addr: SocketAddr = address
        .parse()
        .map_err(|e| BuildError::Metrics(format!("invalid metrics address '{}': {}", address, e)))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| BuildError::Metrics(e.to_string()))?;

    metrics::describe_counter!(REQUESTS_TOTAL, "Requests dispatched, by route and status");
    metrics::describe_histogram!(REQUEST_DURATION_SECONDS, "End-to-end request latency");
    metrics::describe_counter!(RATE_LIMITED_TOTAL, "Requests rejected by the rate limiter");
    metrics::describe_counter!(UPSTREAM_ERRORS_TOTAL, "Upstream calls that failed");

    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_request(route: &str, status: u16, started: Instant) {
    metrics::counter!(
        REQUESTS_TOTAL,
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!(REQUEST_DURATION_SECONDS, "route" => route.to_string())
        .record(started.elapsed().as_secs_f64());
}

pub fn record_rate_limited(route: &str) {
    metrics::counter!(RATE_LIMITED_TOTAL, "route" => route.to_string()).increment(1);
}

pub fn record_upstream_error(route: &str) {
    metrics::counter!(UPSTREAM_ERRORS_TOTAL, "route" => route.to_string()).increment(1);
}
