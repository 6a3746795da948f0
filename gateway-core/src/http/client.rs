//! HTTP client implementation using reqwest

use crate::config::ConnectionConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::http::error::{classify_status, classify_transport};
use crate::http::{HttpExecutor, RequestOptions, StreamResponse, WireRequest};
use async_trait::async_trait;
use futures::{StreamExt, TryFutureExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, ClientBuilder, RequestBuilder, Response};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Maximum non-streaming response size (10 MiB)
pub const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024;

/// Shared HTTP client with connection pooling
#[derive(Clone)]
pub struct HttpClient {
    /// The underlying reqwest client
    client: Arc<Client>,

    /// Maximum response size to prevent OOM
    max_response_size: usize,
}

impl HttpClient {
    /// Create a new HTTP client with default connection settings
    pub fn new() -> GatewayResult<Self> {
        Self::with_config(&ConnectionConfig::default())
    }

    /// Create a new HTTP client from connection settings
    ///
    /// No client-wide request timeout is set: a long but actively streaming
    /// response must not be cut off. Non-streaming attempts get a
    /// per-request timeout instead.
    pub fn with_config(config: &ConnectionConfig) -> GatewayResult<Self> {
        let client = ClientBuilder::new()
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(config.keepalive_secs))
            .connect_timeout(config.connect_timeout())
            .user_agent(config.user_agent.as_str())
            .gzip(true)
            .build()
            .map_err(|e| {
                GatewayError::invalid_parameter(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client: Arc::new(client),
            max_response_size: MAX_RESPONSE_SIZE,
        })
    }

    /// Override the response size limit
    pub fn with_max_response_size(mut self, max_response_size: usize) -> Self {
        self.max_response_size = max_response_size;
        self
    }

    fn build(&self, request: &WireRequest) -> RequestBuilder {
        let mut builder = self.client.request(request.method.clone(), &request.url);

        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        if request.stream {
            builder = builder.header(ACCEPT, "text/event-stream");
        }

        // Content-Type is already set from the wire headers
        builder.json(&request.body)
    }

    /// Send the request, giving up promptly if the caller cancels
    async fn send(
        &self,
        builder: RequestBuilder,
        options: &RequestOptions,
    ) -> GatewayResult<Response> {
        let request_id = options.request_id;
        let send = builder.send().map_err(move |e| {
            if e.is_timeout() {
                warn!("Request timeout [request_id: {}]", request_id);
            } else {
                error!("Request error [request_id: {}]: {}", request_id, e);
            }
            classify_transport(&e, request_id)
        });

        cancellable(options, send).await
    }

    /// Turn a non-success response into a classified error
    async fn error_from_response(response: Response, options: &RequestOptions) -> GatewayError {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.ok();

        warn!(
            "Request failed with status {} [request_id: {}]",
            status, options.request_id
        );

        classify_status(
            status.as_u16(),
            Some(&headers),
            body.as_deref(),
            options.request_id,
        )
    }

    fn check_content_length(&self, response: &Response, options: &RequestOptions) -> GatewayResult<()> {
        if let Some(content_length) = response.content_length() {
            if content_length > self.max_response_size as u64 {
                return Err(self.too_large(content_length, options));
            }
        }
        Ok(())
    }

    /// Read a complete body, giving up once it passes the size limit
    ///
    /// Chunked responses carry no Content-Length, so the limit is enforced
    /// while reading.
    async fn read_body(&self, response: Response, options: &RequestOptions) -> GatewayResult<Vec<u8>> {
        let request_id = options.request_id;
        let mut chunks = response.bytes_stream();
        let mut body = Vec::new();

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| classify_transport(&e, request_id))?;
            let size = body.len() + chunk.len();
            if size > self.max_response_size {
                warn!("Response body over size limit [request_id: {}]", request_id);
                return Err(self.too_large(size as u64, options));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body)
    }

    fn too_large(&self, size: u64, options: &RequestOptions) -> GatewayError {
        GatewayError::unknown(format!(
            "Response size {} exceeds maximum {} [request_id: {}]",
            size, self.max_response_size, options.request_id
        ))
    }
}

#[async_trait]
impl HttpExecutor for HttpClient {
    async fn execute_json(
        &self,
        request: &WireRequest,
        options: &RequestOptions,
    ) -> GatewayResult<Value> {
        let request_id = options.request_id;
        if options.is_cancelled() {
            return Err(GatewayError::cancelled());
        }

        info!("Executing request to {} [request_id: {}]", request.url, request_id);

        let builder = self.build(request).timeout(options.timeout);
        let response = self.send(builder, options).await?;

        let status = response.status();
        debug!("Response status: {} [request_id: {}]", status, request_id);

        if !status.is_success() {
            return Err(Self::error_from_response(response, options).await);
        }

        self.check_content_length(&response, options)?;

        if let Some(content_type) = response.headers().get(CONTENT_TYPE) {
            let content_type = content_type.to_str().unwrap_or_default();
            if !content_type.contains("json") {
                debug!(
                    "Unexpected content type '{}', parsing as JSON anyway [request_id: {}]",
                    content_type, request_id
                );
            }
        }

        let body = cancellable(options, self.read_body(response, options)).await?;

        let json: Value = serde_json::from_slice(&body).map_err(|e| {
            error!("Failed to parse response [request_id: {}]: {}", request_id, e);
            GatewayError::unknown(format!(
                "Invalid response format: {} [request_id: {}]",
                e, request_id
            ))
        })?;

        info!("Request completed [request_id: {}]", request_id);
        Ok(json)
    }

    async fn execute_stream(
        &self,
        request: &WireRequest,
        options: &RequestOptions,
    ) -> GatewayResult<StreamResponse> {
        let request_id = options.request_id;
        if options.is_cancelled() {
            return Err(GatewayError::cancelled());
        }

        info!(
            "Opening stream to {} [request_id: {}]",
            request.url, request_id
        );

        let builder = self.build(request);
        let response = tokio::time::timeout(options.header_timeout, self.send(builder, options))
            .await
            .map_err(|_| {
                warn!("Timed out waiting for response headers [request_id: {}]", request_id);
                GatewayError::upstream(format!(
                    "Timed out waiting for response headers [request_id: {}]",
                    request_id
                ))
            })??;

        let status = response.status();
        debug!("Stream response status: {} [request_id: {}]", status, request_id);

        if !status.is_success() {
            return Err(Self::error_from_response(response, options).await);
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_lowercase);

        // Headers have reached the caller; failures from here on are final.
        let body = response
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|e| {
                    warn!("Stream read failed [request_id: {}]: {}", request_id, e);
                    classify_transport(&e, request_id).after_delivery()
                })
            })
            .boxed();

        Ok(StreamResponse { content_type, body })
    }
}

/// Race `future` against the caller's cancellation token
async fn cancellable<T, F>(options: &RequestOptions, future: F) -> GatewayResult<T>
where
    F: Future<Output = GatewayResult<T>>,
{
    match &options.cancellation {
        Some(token) => tokio::select! {
            _ = token.cancelled() => {
                debug!("Request cancelled [request_id: {}]", options.request_id);
                Err(GatewayError::cancelled())
            }
            result = future => result,
        },
        None => future.await,
    }
}
