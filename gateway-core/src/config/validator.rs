//! Configuration validation beyond structural checks

use super::env;
use super::error::ValidationError;
use super::schema::GatewayConfig;
use crate::capabilities::catalog;
use regex::Regex;
use tracing::warn;

/// Configuration validator with additional validation rules
pub struct ConfigValidator {
    /// RFC 7230 token characters
    header_name_pattern: Option<Regex>,
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigValidator {
    pub fn new() -> Self {
        Self {
            header_name_pattern: Regex::new(r"^[!#$%&'*+.^_`|~0-9A-Za-z-]+$").ok(),
        }
    }

    /// Validate a configuration with extended rules
    pub fn validate(&self, config: &GatewayConfig) -> Result<(), ValidationError> {
        config.validate()?;

        self.validate_custom_header(config)?;
        self.warn_on_unresolved_placeholders(config);
        self.warn_on_unknown_validation_model(config);

        Ok(())
    }

    fn validate_custom_header(&self, config: &GatewayConfig) -> Result<(), ValidationError> {
        let Some((name, value)) = config.gateway.custom_header() else {
            return Ok(());
        };

        if let Some(pattern) = &self.header_name_pattern {
            if !pattern.is_match(name) {
                return Err(ValidationError::invalid_header(
                    "gateway.custom_header_name",
                    format!("'{}' is not a valid header name", name),
                ));
            }
        }

        if value.chars().any(|c| c.is_control()) {
            return Err(ValidationError::invalid_header(
                "gateway.custom_header_value",
                "value contains control characters",
            ));
        }

        if is_reserved_header(name) {
            return Err(ValidationError::invalid_header(
                "gateway.custom_header_name",
                format!("'{}' is set by the client and cannot be overridden", name),
            ));
        }

        Ok(())
    }

    fn warn_on_unresolved_placeholders(&self, config: &GatewayConfig) {
        for var in env::placeholders(config.gateway.api_key.expose_secret()) {
            warn!("gateway.api_key still references ${{{}}} after interpolation", var);
        }
        for var in env::placeholders(&config.gateway.base_url) {
            warn!("gateway.base_url still references ${{{}}} after interpolation", var);
        }
    }

    fn warn_on_unknown_validation_model(&self, config: &GatewayConfig) {
        let model = config.validation_model.as_str();
        let configured = config.models.iter().any(|m| m.id == model);
        let curated = catalog::builtin_ids().any(|id| id == model);
        if !configured && !curated {
            warn!(
                "validation_model '{}' has no descriptor; the probe will use synthesized defaults",
                model
            );
        }
    }
}

fn is_reserved_header(name: &str) -> bool {
    ["authorization", "content-type", "x-request-id", "content-length"]
        .iter()
        .any(|reserved| name.eq_ignore_ascii_case(reserved))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewaySettings;

    fn config_with_header(name: &str, value: &str) -> GatewayConfig {
        GatewayConfig::new(
            GatewaySettings::new("https://gateway.internal", "sk-test")
                .with_custom_header(name, value),
        )
    }

    #[test]
    fn test_valid_custom_header() {
        let validator = ConfigValidator::new();
        assert!(validator.validate(&config_with_header("X-Tenant-Id", "acme")).is_ok());
    }

    #[test]
    fn test_rejects_header_name_with_spaces() {
        let validator = ConfigValidator::new();
        let err = validator
            .validate(&config_with_header("X Tenant", "acme"))
            .unwrap_err();
        assert_eq!(err.field_path, "gateway.custom_header_name");
    }

    #[test]
    fn test_rejects_reserved_header() {
        let validator = ConfigValidator::new();
        assert!(validator
            .validate(&config_with_header("Authorization", "Basic abc"))
            .is_err());
    }
}
