//! HTTP layer for talking to the gateway
//!
//! This module implements the transport side of the pipeline, handling:
//! - Connection pooling and client management
//! - Per-attempt timeouts and cancellation
//! - Error classification and retry hints
//! - Request ID generation and correlation

pub mod client;
pub mod error;
pub mod retry;

pub use client::{HttpClient, MAX_RESPONSE_SIZE};
pub use retry::{RetryExecutor, RetryOutcome, RetryPolicy};

use crate::error::GatewayResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Headers whose values never appear in Debug output
const SENSITIVE_HEADERS: [&str; 2] = ["authorization", "proxy-authorization"];

/// Fully-formed HTTP request for one invocation
#[derive(Clone, PartialEq)]
pub struct WireRequest {
    /// HTTP method (always POST for chat completions)
    pub method: reqwest::Method,

    /// Target endpoint: base URL + "/" + model identifier
    pub url: String,

    /// Headers in insertion order
    pub headers: Vec<(String, String)>,

    /// JSON body
    pub body: Value,

    /// Whether the response is expected as an event stream
    pub stream: bool,
}

impl WireRequest {
    /// Value of the first header named `name` (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

impl fmt::Debug for WireRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<(&str, &str)> = self
            .headers
            .iter()
            .map(|(key, value)| {
                let redacted = SENSITIVE_HEADERS
                    .iter()
                    .any(|sensitive| key.eq_ignore_ascii_case(sensitive));
                (key.as_str(), if redacted { "[REDACTED]" } else { value.as_str() })
            })
            .collect();

        f.debug_struct("WireRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &headers)
            .field("body", &self.body)
            .field("stream", &self.stream)
            .finish()
    }
}

/// Options for an HTTP request
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Unique request ID for correlation
    pub request_id: Uuid,

    /// Whole-attempt timeout for non-streaming requests
    pub timeout: Duration,

    /// Time to wait for response headers on streaming requests
    pub header_timeout: Duration,

    /// Maximum silence between stream chunks
    pub idle_timeout: Duration,

    /// Abandons the request (and any retry) when cancelled
    pub cancellation: Option<CancellationToken>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            timeout: Duration::from_secs(120),
            header_timeout: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(60),
            cancellation: None,
        }
    }
}

impl RequestOptions {
    /// Create new request options with a generated request ID
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the non-streaming timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the header timeout for streaming requests
    pub fn with_header_timeout(mut self, timeout: Duration) -> Self {
        self.header_timeout = timeout;
        self
    }

    /// Set the stream idle timeout
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Attach a cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Whether the caller has already abandoned the request
    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

/// Raw body chunks of a streaming response
pub type ByteStream = BoxStream<'static, GatewayResult<Bytes>>;

/// Open streaming response whose headers have arrived
pub struct StreamResponse {
    /// Content-Type of the response, lowercased
    pub content_type: Option<String>,

    /// Body chunks as they arrive
    pub body: ByteStream,
}

impl StreamResponse {
    /// Whether the gateway answered with server-sent events
    pub fn is_event_stream(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("text/event-stream"))
    }
}

impl fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamResponse")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// One HTTP attempt against the gateway
///
/// Implementations perform exactly one attempt and classify any failure;
/// retrying is the caller's concern.
#[async_trait]
pub trait HttpExecutor: Send + Sync {
    /// Execute a request and read the whole JSON body
    async fn execute_json(
        &self,
        request: &WireRequest,
        options: &RequestOptions,
    ) -> GatewayResult<Value>;

    /// Execute a request and return once response headers arrive
    async fn execute_stream(
        &self,
        request: &WireRequest,
        options: &RequestOptions,
    ) -> GatewayResult<StreamResponse>;
}
