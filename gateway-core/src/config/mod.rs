//! Configuration for the gateway client
//!
//! Loads a [`GatewayConfig`] from YAML or JSON, interpolating `${VAR}`
//! references from the environment before parsing and validating the result.

mod env;
mod error;
mod schema;
mod secrets;
mod validator;

pub use env::interpolate_env_vars;
pub use error::{ConfigError, ConfigResult, ValidationError, ValidationErrorKind};
pub use schema::{
    ConnectionConfig, GatewayConfig, GatewaySettings, CONFIG_VERSION, DEFAULT_VALIDATION_MODEL,
};
pub use secrets::{SafeLogging, SecretString};
pub use validator::ConfigValidator;

use std::fs;
use std::path::Path;

/// Load a configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> ConfigResult<GatewayConfig> {
    let path = path.as_ref();
    let content = read(path)?;
    parse_yaml(&content, &path.to_string_lossy())
}

/// Load a configuration from a JSON file
pub fn load_from_json<P: AsRef<Path>>(path: P) -> ConfigResult<GatewayConfig> {
    let path = path.as_ref();
    let content = read(path)?;
    parse_json(&content, &path.to_string_lossy())
}

/// Parse and validate a YAML configuration held in memory
pub fn parse_yaml(content: &str, origin: &str) -> ConfigResult<GatewayConfig> {
    let interpolated = env::interpolate_env_vars(content)?;

    let config: GatewayConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::ParseError {
            path: origin.to_string(),
            line: e.location().map(|l| l.line()),
            column: e.location().map(|l| l.column()),
            message: e.to_string(),
        })?;

    ConfigValidator::new().validate(&config)?;
    Ok(config)
}

/// Parse and validate a JSON configuration held in memory
pub fn parse_json(content: &str, origin: &str) -> ConfigResult<GatewayConfig> {
    let interpolated = env::interpolate_env_vars(content)?;

    let config: GatewayConfig =
        serde_json::from_str(&interpolated).map_err(|e| ConfigError::ParseError {
            path: origin.to_string(),
            line: Some(e.line()),
            column: Some(e.column()),
            message: e.to_string(),
        })?;

    ConfigValidator::new().validate(&config)?;
    Ok(config)
}

fn read(path: &Path) -> ConfigResult<String> {
    fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: path.to_string_lossy().to_string(),
        source: e,
    })
}
