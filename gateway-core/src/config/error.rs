//! Errors raised while loading and checking a gateway configuration

use crate::error::GatewayError;
use thiserror::Error;

/// Failure to produce a [`GatewayConfig`](super::GatewayConfig) from a file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read gateway config '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse gateway config '{path}' at line {}, column {}: {message}",
            .line.unwrap_or(0), .column.unwrap_or(0))]
    ParseError {
        path: String,
        line: Option<usize>,
        column: Option<usize>,
        message: String,
    },

    #[error(transparent)]
    ValidationError(#[from] ValidationError),

    #[error("Environment variable '{var}' referenced by the config is not set")]
    EnvVarNotFound { var: String },

    #[error("Environment interpolation failed: {message}")]
    Interpolation { message: String },
}

/// A configuration value the gateway client cannot work with
///
/// `field_path` points at the offending entry, e.g. `models[2].pricing.input`
/// or `gateway.custom_header_name`.
#[derive(Debug, Error)]
#[error("Invalid gateway config at '{field_path}': {kind}")]
pub struct ValidationError {
    pub field_path: String,
    pub kind: ValidationErrorKind,
}

#[derive(Debug, Error)]
pub enum ValidationErrorKind {
    #[error("required field is missing")]
    RequiredFieldMissing,

    #[error("value out of range: {message}")]
    OutOfRange { message: String },

    #[error("model id '{value}' is declared more than once")]
    DuplicateValue { value: String },

    #[error("incompatible settings: {message}")]
    Incompatible { message: String },

    #[error("invalid base URL: {message}")]
    InvalidUrl { message: String },

    #[error("invalid header: {message}")]
    InvalidHeader { message: String },

    #[error("unsupported config version {actual} (expected {expected})")]
    InvalidVersion { expected: String, actual: String },
}

impl ValidationError {
    pub fn new(field_path: impl Into<String>, kind: ValidationErrorKind) -> Self {
        Self {
            field_path: field_path.into(),
            kind,
        }
    }

    pub fn required(field_path: impl Into<String>) -> Self {
        Self::new(field_path, ValidationErrorKind::RequiredFieldMissing)
    }

    pub fn out_of_range(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            field_path,
            ValidationErrorKind::OutOfRange {
                message: message.into(),
            },
        )
    }

    pub fn incompatible(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            field_path,
            ValidationErrorKind::Incompatible {
                message: message.into(),
            },
        )
    }

    pub fn invalid_header(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            field_path,
            ValidationErrorKind::InvalidHeader {
                message: message.into(),
            },
        )
    }

    pub fn invalid_url(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            field_path,
            ValidationErrorKind::InvalidUrl {
                message: message.into(),
            },
        )
    }

    pub fn invalid_version(expected: &str, actual: &str) -> Self {
        Self::new(
            "version",
            ValidationErrorKind::InvalidVersion {
                expected: expected.to_string(),
                actual: actual.to_string(),
            },
        )
    }

    /// A model id declared twice in the `models` table
    pub fn duplicate_model(field_path: impl Into<String>, model_id: &str) -> Self {
        Self::new(
            field_path,
            ValidationErrorKind::DuplicateValue {
                value: model_id.to_string(),
            },
        )
    }
}

/// A client built from a bad configuration fails like a malformed invocation
impl From<ValidationError> for GatewayError {
    fn from(error: ValidationError) -> Self {
        GatewayError::invalid_parameter(error.to_string())
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
