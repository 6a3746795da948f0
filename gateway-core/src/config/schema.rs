//! Configuration schema structures with serde support

use super::error::ValidationError;
use super::secrets::{SafeLogging, SecretString};
use crate::capabilities::ModelDescriptor;
use crate::http::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Supported configuration schema version
pub const CONFIG_VERSION: &str = "0.1";

/// Model used by the credential probe when none is configured
pub const DEFAULT_VALIDATION_MODEL: &str = "deepseek-v3";

/// Root configuration of a gateway client
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Schema version (required - no default)
    pub version: String,

    /// Gateway endpoint and credentials
    pub gateway: GatewaySettings,

    /// HTTP connection settings
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Retry policy for transient failures
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Model table; entries override built-in descriptors of the same id
    #[serde(default)]
    pub models: Vec<ModelDescriptor>,

    /// Model identifier used by the credential probe
    #[serde(default = "default_validation_model")]
    pub validation_model: String,
}

/// Gateway endpoint and credentials
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewaySettings {
    /// Base URL; the model identifier is appended as the last path segment
    pub base_url: String,

    /// Bearer credential (supports environment variable interpolation)
    pub api_key: SecretString,

    /// Name of an extra header sent with every request
    #[serde(default)]
    pub custom_header_name: Option<String>,

    /// Value of the extra header
    #[serde(default)]
    pub custom_header_value: Option<SecretString>,
}

impl GatewaySettings {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<SecretString>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            custom_header_name: None,
            custom_header_value: None,
        }
    }

    /// Attach a custom header
    pub fn with_custom_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<SecretString>,
    ) -> Self {
        self.custom_header_name = Some(name.into());
        self.custom_header_value = Some(value.into());
        self
    }

    /// The custom header, when both name and value are non-empty
    pub fn custom_header(&self) -> Option<(&str, &str)> {
        let name = self.custom_header_name.as_deref()?.trim();
        let value = self.custom_header_value.as_ref()?;
        if name.is_empty() || value.is_empty() {
            return None;
        }
        Some((name, value.expose_secret().trim()))
    }
}

impl SafeLogging for GatewaySettings {
    fn safe_for_logging(&self) -> String {
        match self.custom_header() {
            Some((name, _)) => format!(
                "base_url={}, api_key={}, custom_header={}",
                self.base_url,
                self.api_key.partial_redact(),
                name
            ),
            None => format!(
                "base_url={}, api_key={}",
                self.base_url,
                self.api_key.partial_redact()
            ),
        }
    }
}

/// Connection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Whole-attempt timeout for non-streaming requests, in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Time to wait for response headers on streaming requests
    #[serde(default = "default_header_timeout")]
    pub header_timeout_ms: u64,

    /// Maximum silence between stream chunks; resets on every chunk
    #[serde(default = "default_stream_idle_timeout")]
    pub stream_idle_timeout_ms: u64,

    /// Maximum idle connections per host
    #[serde(default = "default_max_idle")]
    pub max_idle_per_host: usize,

    /// Keep-alive timeout in seconds
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,

    /// User-Agent header
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            request_timeout_ms: default_request_timeout(),
            header_timeout_ms: default_header_timeout(),
            stream_idle_timeout_ms: default_stream_idle_timeout(),
            max_idle_per_host: default_max_idle(),
            keepalive_secs: default_keepalive(),
            user_agent: default_user_agent(),
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn header_timeout(&self) -> Duration {
        Duration::from_millis(self.header_timeout_ms)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_idle_timeout_ms)
    }
}

// Default value functions for serde
fn default_validation_model() -> String { DEFAULT_VALIDATION_MODEL.to_string() }
fn default_connect_timeout() -> u64 { 10_000 }
fn default_request_timeout() -> u64 { 120_000 }
fn default_header_timeout() -> u64 { 60_000 }
fn default_stream_idle_timeout() -> u64 { 60_000 }
fn default_max_idle() -> usize { 10 }
fn default_keepalive() -> u64 { 90 }
fn default_user_agent() -> String { format!("gateway-core/{}", env!("CARGO_PKG_VERSION")) }

impl GatewayConfig {
    /// Minimal configuration for a gateway endpoint
    pub fn new(gateway: GatewaySettings) -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            gateway,
            connection: ConnectionConfig::default(),
            retry: RetryPolicy::default(),
            models: Vec::new(),
            validation_model: default_validation_model(),
        }
    }

    /// Structural validation
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.version.is_empty() {
            return Err(ValidationError::required("version"));
        }

        if self.version != CONFIG_VERSION {
            return Err(ValidationError::invalid_version(CONFIG_VERSION, &self.version));
        }

        self.gateway.validate("gateway")?;
        self.connection.validate("connection")?;
        self.retry.validate("retry")?;

        let mut seen_model_ids = HashSet::new();
        for (i, model) in self.models.iter().enumerate() {
            let model_path = format!("models[{}]", i);

            if model.id.trim().is_empty() {
                return Err(ValidationError::required(format!("{}.id", model_path)));
            }

            if !seen_model_ids.insert(&model.id) {
                return Err(ValidationError::duplicate_model(
                    format!("{}.id", model_path),
                    &model.id,
                ));
            }

            validate_model(model, &model_path)?;
        }

        if self.validation_model.trim().is_empty() {
            return Err(ValidationError::required("validation_model"));
        }

        Ok(())
    }
}

impl GatewaySettings {
    /// Validate endpoint and credentials
    pub fn validate(&self, path: &str) -> Result<(), ValidationError> {
        if self.api_key.is_empty() {
            return Err(ValidationError::required(format!("{}.api_key", path)));
        }

        if self.base_url.is_empty() {
            return Err(ValidationError::required(format!("{}.base_url", path)));
        }

        match url::Url::parse(&self.base_url) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::invalid_url(
                        format!("{}.base_url", path),
                        format!("URL scheme must be http or https, got: {}", url.scheme()),
                    ));
                }
            }
            Err(e) => {
                return Err(ValidationError::invalid_url(
                    format!("{}.base_url", path),
                    e.to_string(),
                ));
            }
        }

        // A header name without a value (or the reverse) is a configuration
        // mistake, not a request to skip the header.
        let has_name = self
            .custom_header_name
            .as_deref()
            .is_some_and(|name| !name.trim().is_empty());
        let has_value = self
            .custom_header_value
            .as_ref()
            .is_some_and(|value| !value.is_empty());
        if has_name != has_value {
            return Err(ValidationError::incompatible(
                format!("{}.custom_header_name", path),
                "custom_header_name and custom_header_value must be set together",
            ));
        }

        Ok(())
    }
}

impl ConnectionConfig {
    /// Validate timeouts and pool settings
    pub fn validate(&self, path: &str) -> Result<(), ValidationError> {
        for (field, value) in [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("request_timeout_ms", self.request_timeout_ms),
            ("header_timeout_ms", self.header_timeout_ms),
            ("stream_idle_timeout_ms", self.stream_idle_timeout_ms),
        ] {
            if value == 0 {
                return Err(ValidationError::out_of_range(
                    format!("{}.{}", path, field),
                    "Must be greater than 0",
                ));
            }
        }

        if self.user_agent.trim().is_empty() {
            return Err(ValidationError::required(format!("{}.user_agent", path)));
        }

        Ok(())
    }
}

fn validate_model(model: &ModelDescriptor, path: &str) -> Result<(), ValidationError> {
    if model.context_window == 0 {
        return Err(ValidationError::out_of_range(
            format!("{}.context_window", path),
            "Must be greater than 0",
        ));
    }

    if let Some(max_output) = model.limits.max_output_tokens {
        if max_output == 0 {
            return Err(ValidationError::out_of_range(
                format!("{}.limits.max_output_tokens", path),
                "Must be greater than 0",
            ));
        }

        if max_output > model.context_window {
            return Err(ValidationError::incompatible(
                format!("{}.limits.max_output_tokens", path),
                "Cannot exceed context_window",
            ));
        }
    }

    if let Some(pricing) = &model.pricing {
        if pricing.input < 0.0 || pricing.output < 0.0 {
            return Err(ValidationError::out_of_range(
                format!("{}.pricing", path),
                "Prices must be non-negative",
            ));
        }

        if pricing.unit == 0 {
            return Err(ValidationError::out_of_range(
                format!("{}.pricing.unit", path),
                "Must be greater than 0",
            ));
        }
    }

    for (field, range) in [
        ("temperature", model.limits.temperature),
        ("top_p", model.limits.top_p),
    ] {
        if range.min > range.max {
            return Err(ValidationError::incompatible(
                format!("{}.limits.{}", path, field),
                "min must not exceed max",
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValidationErrorKind;

    fn config() -> GatewayConfig {
        GatewayConfig::new(GatewaySettings::new("https://gateway.internal/v1", "sk-test"))
    }

    #[test]
    fn test_minimal_config_is_valid() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        let mut config = config();
        config.gateway.base_url = "ftp://gateway.internal".to_string();
        let err = config.validate().unwrap_err();
        assert_eq!(err.field_path, "gateway.base_url");
    }

    #[test]
    fn test_custom_header_requires_both_parts() {
        let mut config = config();
        config.gateway.custom_header_name = Some("X-Tenant".to_string());
        let err = config.validate().unwrap_err();
        assert_eq!(err.field_path, "gateway.custom_header_name");

        config.gateway.custom_header_value = Some("acme".into());
        assert!(config.validate().is_ok());
        assert_eq!(config.gateway.custom_header(), Some(("X-Tenant", "acme")));
    }

    #[test]
    fn test_duplicate_model_ids_rejected() {
        let mut config = config();
        config.models = vec![
            ModelDescriptor::synthesized("m1"),
            ModelDescriptor::synthesized("m1"),
        ];
        let err = config.validate().unwrap_err();
        assert!(matches!(err.kind, ValidationErrorKind::DuplicateValue { .. }));
    }

    #[test]
    fn test_safe_logging_hides_key() {
        let settings = GatewaySettings::new("https://g", "sk-abcdefghijkl");
        let line = settings.safe_for_logging();
        assert!(!line.contains("sk-abcdefghijkl"));
        assert!(line.contains("sk-...ijkl"));
    }
}
