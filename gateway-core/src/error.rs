//! Gateway error types
//!
//! Every stage of the pipeline (translation, transport, decoding, accounting)
//! reports failures through [`GatewayError`], so callers handle one taxonomy
//! regardless of which stage raised it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Stable classification of gateway failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Credential rejected (401/403 or an auth-failure body)
    Auth,
    /// Too many requests (429)
    RateLimited,
    /// Unknown model or endpoint (404 or a "model not found" body)
    NotFound,
    /// Malformed invocation, locally or as reported by the gateway (400)
    InvalidParameter,
    /// 5xx, connection refused, DNS failure or timeout
    UpstreamUnavailable,
    /// Stream ended without the terminal sentinel
    Truncated,
    /// Anything unmatched
    Unknown,
}

impl ErrorKind {
    /// Whether this kind can ever be retried
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited | Self::UpstreamUnavailable)
    }

    /// Short stable name, used in log lines
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::RateLimited => "rate_limited",
            Self::NotFound => "not_found",
            Self::InvalidParameter => "invalid_parameter",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::Truncated => "truncated",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified gateway failure
///
/// `retriable` tells the caller whether re-issuing the whole invocation is
/// safe. It is only ever true for [`ErrorKind::RateLimited`] and
/// [`ErrorKind::UpstreamUnavailable`] raised before any response bytes were
/// delivered.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct GatewayError {
    /// Classified kind
    pub kind: ErrorKind,

    /// Human-readable message
    pub message: String,

    /// Whether the caller may safely retry the whole invocation
    pub retriable: bool,

    /// HTTP status, when the failure came from a response
    pub status: Option<u16>,

    /// Server-suggested delay before retrying (Retry-After)
    pub retry_after: Option<Duration>,
}

impl GatewayError {
    /// Create an error whose retriability follows its kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retriable: kind.is_transient(),
            status: None,
            retry_after: None,
        }
    }

    /// Local precondition failure; never retried
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParameter, message)
    }

    /// Stream closed without the terminal sentinel
    pub fn truncated(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Truncated, message)
    }

    /// Gateway or network unavailable
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamUnavailable, message)
    }

    /// Anything that does not fit the taxonomy
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    /// The caller abandoned the invocation
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Unknown, "invocation cancelled")
    }

    /// Attach the HTTP status this error was classified from
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach a server-suggested retry delay
    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Override the retriable flag
    pub fn with_retriable(mut self, retriable: bool) -> Self {
        self.retriable = retriable;
        self
    }

    /// Mark the error as raised after response bytes reached the caller.
    ///
    /// Once part of a response has been delivered, re-running the invocation
    /// transparently would duplicate output, so the error is never retriable.
    pub fn after_delivery(mut self) -> Self {
        self.retriable = false;
        self
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::unknown(format!("Failed to parse gateway response: {}", err))
    }
}
