use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use api_gateway::config::load_config;
use api_gateway::lifecycle::{self, signals, Shutdown};
use api_gateway::observability::logging;

/// HTTP API gateway.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the YAML or TOML configuration file.
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load config from {}: {}", cli.config.display(), e);
            return ExitCode::FAILURE;
        }
    };

    logging::init_logging(&config.server);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        routes = config.subrouters.len(),
        "api-gateway starting"
    );

    let shutdown = Shutdown::new();
    signals::spawn_signal_listener(&shutdown);

    match lifecycle::run(config, &shutdown).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Gateway failed");
            ExitCode::FAILURE
        }
    }
}
