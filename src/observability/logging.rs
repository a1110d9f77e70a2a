//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global `tracing` subscriber once at startup
//! - Pick the output format from the release stage
//! - Derive the default filter from the configured log level
//!
//! # Design Decisions
//! - `local` gets the compact human format on stderr, every other stage
//!   gets one JSON object per line on stdout
//! - An unknown level name falls back to `info` rather than failing startup

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ServerConfig;

pub const LOCAL_STAGE: &str = "local";

/// Filter directive for a configured level name.
pub fn level_directive(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" | "fatal" | "panic" => "error",
        _ => "info",
    }
}

fn filter(config: &ServerConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = level_directive(&config.log_level);
        EnvFilter::new(format!("{level},hyper_util=warn,tower_http={level}"))
    })
}

/// Installs the global subscriber. Safe to call more than once; later calls
/// leave the first subscriber in place.
pub fn init_logging(config: &ServerConfig) {
    let registry = tracing_subscriber::registry().with(filter(config));

    let installed = if config.release_stage == LOCAL_STAGE {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_writer(std::io::stdout),
            )
            .try_init()
    };

    if installed.is_ok() {
        tracing::debug!(
            release_stage = %config.release_stage,
            level = level_directive(&config.log_level),
            "Logging initialized"
        );
    }
}
