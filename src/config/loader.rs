//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unsupported config file extension: {0:?}")]
    UnsupportedFormat(Option<String>),
    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a YAML or TOML file.
///
/// The format is picked from the file extension.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    let config = match extension.as_deref() {
        Some("yaml") | Some("yml") => parse_yaml(&content)?,
        Some("toml") => parse_toml(&content)?,
        _ => return Err(ConfigError::UnsupportedFormat(extension)),
    };

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

pub fn parse_yaml(content: &str) -> Result<GatewayConfig, ConfigError> {
    Ok(serde_yaml::from_str(content)?)
}

pub fn parse_toml(content: &str) -> Result<GatewayConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}
