//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use crate::config::schema::ServiceConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable naming the deployment environment.
pub const ENV_ENVIRONMENT: &str = "ENV";
/// Environment variable holding the metric name prefix.
pub const ENV_METRICS_NAMESPACE: &str = "HTTP_METRICS_NAMESPACE";

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file, with environment
/// overrides applied.
pub fn load_config(path: &Path) -> Result<ServiceConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: ServiceConfig = toml::from_str(&content)?;
    finish(config, |key| std::env::var(key).ok())
}

/// Defaults plus environment overrides, validated.
pub fn from_env() -> Result<ServiceConfig, ConfigError> {
    finish(ServiceConfig::default(), |key| std::env::var(key).ok())
}

fn finish(
    mut config: ServiceConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ServiceConfig, ConfigError> {
    apply_env_overrides(&mut config, lookup);
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Overwrite fields that the process environment sets.
pub fn apply_env_overrides(config: &mut ServiceConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(env) = lookup(ENV_ENVIRONMENT).filter(|v| !v.is_empty()) {
        config.observability.environment = env;
    }
    if let Some(ns) = lookup(ENV_METRICS_NAMESPACE) {
        config.observability.metrics_namespace = ns;
    }
}
