//! Gateway client facade
//!
//! [`GatewayClient`] composes the pipeline: resolve the model descriptor,
//! translate the invocation, run the transport under the retry policy, then
//! either account for a complete body or hand back an [`InvocationStream`].

use super::accounting::TokenAccountant;
use super::streaming::{decode_response, DecodeOptions, StreamEvents};
use super::translator::translate;
use super::types::{WireChatResponse, WireUsage};
use crate::capabilities::{ModelDescriptor, ModelResolver};
use crate::config::{
    ConfigValidator, ConnectionConfig, GatewayConfig, GatewaySettings, SafeLogging,
};
use crate::error::{GatewayError, GatewayResult};
use crate::http::error::classify_in_band;
use crate::http::{
    HttpClient, HttpExecutor, RequestOptions, RetryExecutor, RetryPolicy, WireRequest,
};
use crate::protocol::{
    enforce_stop_sequences, ChatInvocation, ChatResult, FinishReason, Message, MessageBuilder,
    MessageRole, StreamEvent, ToolCall, ToolSpec, UsageRecord,
};
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Timeout of the credential probe
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// `max_tokens` of the credential probe
pub const PROBE_MAX_TOKENS: u32 = 10;

/// Client for one configured gateway
pub struct GatewayClient {
    settings: GatewaySettings,
    connection: ConnectionConfig,
    retry: RetryPolicy,
    validation_model: String,
    executor: Arc<dyn HttpExecutor>,
    resolver: Arc<ModelResolver>,
    accountant: TokenAccountant,
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("settings", &self.settings)
            .field("retry", &self.retry)
            .field("validation_model", &self.validation_model)
            .finish_non_exhaustive()
    }
}

/// Result of [`GatewayClient::invoke`], shaped by the invocation's stream flag
#[derive(Debug)]
pub enum InvocationOutcome {
    Complete(ChatResult),
    Stream(InvocationStream),
}

impl GatewayClient {
    /// Client with default connection, retry and model settings
    pub fn new(settings: GatewaySettings) -> GatewayResult<Self> {
        Self::from_config(&GatewayConfig::new(settings))
    }

    /// Client from a full configuration; the configuration is validated first
    pub fn from_config(config: &GatewayConfig) -> GatewayResult<Self> {
        ConfigValidator::new().validate(config)?;

        let executor = HttpClient::with_config(&config.connection)?;
        info!("Gateway client configured: {}", config.gateway.safe_for_logging());

        Ok(Self {
            settings: config.gateway.clone(),
            connection: config.connection.clone(),
            retry: config.retry.clone(),
            validation_model: config.validation_model.clone(),
            executor: Arc::new(executor),
            resolver: Arc::new(ModelResolver::with_models(config.models.iter().cloned())),
            accountant: TokenAccountant::new(),
        })
    }

    /// Replace the transport (mainly for tests)
    pub fn with_executor(mut self, executor: Arc<dyn HttpExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// Share a descriptor cache with other clients
    pub fn with_resolver(mut self, resolver: Arc<ModelResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn resolver(&self) -> &ModelResolver {
        &self.resolver
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Request options carrying the configured timeouts and a fresh request ID
    pub fn request_options(&self) -> RequestOptions {
        RequestOptions::new()
            .with_timeout(self.connection.request_timeout())
            .with_header_timeout(self.connection.header_timeout())
            .with_idle_timeout(self.connection.stream_idle_timeout())
    }

    /// Invoke `model_id`, returning a complete result or a stream according
    /// to `invocation.stream`
    pub async fn invoke(
        &self,
        model_id: &str,
        invocation: &ChatInvocation,
    ) -> GatewayResult<InvocationOutcome> {
        let options = self.request_options();
        if invocation.stream {
            self.stream_with_options(model_id, invocation, options)
                .await
                .map(InvocationOutcome::Stream)
        } else {
            self.complete_with_options(model_id, invocation, options)
                .await
                .map(InvocationOutcome::Complete)
        }
    }

    /// Run an invocation to completion
    pub async fn complete(
        &self,
        model_id: &str,
        invocation: &ChatInvocation,
    ) -> GatewayResult<ChatResult> {
        self.complete_with_options(model_id, invocation, self.request_options())
            .await
    }

    /// Run an invocation to completion with explicit request options
    ///
    /// A streaming invocation is streamed and collected.
    pub async fn complete_with_options(
        &self,
        model_id: &str,
        invocation: &ChatInvocation,
        options: RequestOptions,
    ) -> GatewayResult<ChatResult> {
        if invocation.stream {
            return self
                .stream_with_options(model_id, invocation, options)
                .await?
                .collect_result()
                .await;
        }

        let started = Instant::now();
        let descriptor = self.resolver.resolve(model_id);
        let request = translate(
            invocation,
            model_id,
            &descriptor,
            &self.settings,
            options.request_id,
        )?;

        info!(
            "Invoking model '{}' [request_id: {}]",
            descriptor.id, options.request_id
        );

        let body = self.execute_json(&request, &options).await?;
        let response: WireChatResponse = serde_json::from_value(body).map_err(|e| {
            GatewayError::unknown(format!(
                "Invalid response format: {} [request_id: {}]",
                e, options.request_id
            ))
        })?;
        let completion = response.into_completion().ok_or_else(|| {
            GatewayError::unknown(format!(
                "Response contained no choices [request_id: {}]",
                options.request_id
            ))
        })?;

        let text = match invocation.sampling.stop.as_deref() {
            Some(stops) if !stops.is_empty() => enforce_stop_sequences(&completion.text, stops),
            _ => completion.text,
        };

        let usage = self.accountant.record(
            &descriptor,
            completion.usage.as_ref().and_then(WireUsage::counts),
            &invocation.messages,
            &invocation.tools,
            &text,
            &completion.tool_calls,
            Some(started.elapsed()),
        );

        debug!(
            "Invocation finished: {} prompt + {} completion tokens in {:?} [request_id: {}]",
            usage.prompt_tokens,
            usage.completion_tokens,
            usage.latency.unwrap_or_default(),
            options.request_id
        );

        Ok(ChatResult {
            model: descriptor.id.clone(),
            message: assistant_message(text, completion.tool_calls),
            finish_reason: completion.finish_reason,
            usage,
            system_fingerprint: completion.system_fingerprint,
        })
    }

    /// Start a streamed invocation
    pub async fn stream(
        &self,
        model_id: &str,
        invocation: &ChatInvocation,
    ) -> GatewayResult<InvocationStream> {
        self.stream_with_options(model_id, invocation, self.request_options())
            .await
    }

    /// Start a streamed invocation with explicit request options
    ///
    /// The invocation is streamed even when its own flag is off. Retries only
    /// happen until response headers arrive.
    pub async fn stream_with_options(
        &self,
        model_id: &str,
        invocation: &ChatInvocation,
        options: RequestOptions,
    ) -> GatewayResult<InvocationStream> {
        let started = Instant::now();
        let descriptor = self.resolver.resolve(model_id);

        let mut streaming = invocation.clone();
        streaming.stream = true;
        let request = translate(
            &streaming,
            model_id,
            &descriptor,
            &self.settings,
            options.request_id,
        )?;

        info!(
            "Streaming model '{}' [request_id: {}]",
            descriptor.id, options.request_id
        );

        let executor = &self.executor;
        let outcome = RetryExecutor::new(self.retry.clone())
            .with_cancellation(options.cancellation.clone())
            .execute(|attempt| {
                let request = &request;
                let options = &options;
                async move {
                    if attempt > 1 {
                        debug!(
                            "Stream attempt {} [request_id: {}]",
                            attempt, options.request_id
                        );
                    }
                    executor.execute_stream(request, options).await
                }
            })
            .await;
        let response = outcome.into_result()?;

        let events = decode_response(response, DecodeOptions::from(&options));
        Ok(InvocationStream::new(
            events,
            StreamTally::new(
                descriptor,
                streaming,
                self.accountant,
                started,
                options.cancellation,
            ),
        ))
    }

    /// Probe the configured validation model
    pub async fn validate_credentials(&self) -> GatewayResult<()> {
        self.validate_credentials_for(&self.validation_model).await
    }

    /// Probe `model_id` with a minimal invocation
    ///
    /// Goes through the same transport, retry and classification as a real
    /// invocation, so failures carry the same kinds.
    pub async fn validate_credentials_for(&self, model_id: &str) -> GatewayResult<()> {
        let descriptor = self.resolver.resolve(model_id);
        let invocation = ChatInvocation::new(vec![Message::user("hello")])
            .with_max_tokens(PROBE_MAX_TOKENS)
            .with_temperature(0.1);
        let options = self.request_options().with_timeout(PROBE_TIMEOUT);
        let request = translate(
            &invocation,
            model_id,
            &descriptor,
            &self.settings,
            options.request_id,
        )?;

        info!(
            "Validating credentials against '{}' [request_id: {}]",
            descriptor.id, options.request_id
        );

        let body = self.execute_json(&request, &options).await.map_err(|e| {
            warn!("Credential validation failed: {}", e);
            e
        })?;

        if body.get("choices").and_then(Value::as_array).is_none() {
            return Err(GatewayError::unknown(format!(
                "Credential probe response has no choices [request_id: {}]",
                options.request_id
            )));
        }

        info!("Credentials accepted [request_id: {}]", options.request_id);
        Ok(())
    }

    /// Non-streaming attempt loop; in-band errors count as failed attempts
    async fn execute_json(
        &self,
        request: &WireRequest,
        options: &RequestOptions,
    ) -> GatewayResult<Value> {
        let executor = &self.executor;
        let outcome = RetryExecutor::new(self.retry.clone())
            .with_cancellation(options.cancellation.clone())
            .execute(|attempt| async move {
                if attempt > 1 {
                    debug!("Attempt {} [request_id: {}]", attempt, options.request_id);
                }
                let body = executor.execute_json(request, options).await?;
                match classify_in_band(&body) {
                    Some(error) => Err(error),
                    None => Ok(body),
                }
            })
            .await;

        if outcome.attempts > 1 {
            debug!(
                "Finished after {} attempts [request_id: {}]",
                outcome.attempts, options.request_id
            );
        }
        outcome.into_result()
    }
}

fn assistant_message(text: String, tool_calls: Vec<ToolCall>) -> Message {
    let builder = MessageBuilder::new(MessageRole::Assistant, text);
    if tool_calls.is_empty() {
        builder.build()
    } else {
        builder.with_tool_calls(tool_calls).build()
    }
}

/// Running account of what a stream has delivered
#[derive(Debug)]
struct StreamTally {
    descriptor: Arc<ModelDescriptor>,
    messages: Vec<Message>,
    tools: Vec<ToolSpec>,
    stop: Option<Vec<String>>,
    accountant: TokenAccountant,
    started: Instant,
    cancellation: Option<CancellationToken>,
    text: String,
    tool_calls: Vec<ToolCall>,
    finish_reason: Option<FinishReason>,
    reported: Option<(u32, u32)>,
    error: Option<GatewayError>,
}

impl StreamTally {
    fn new(
        descriptor: Arc<ModelDescriptor>,
        invocation: ChatInvocation,
        accountant: TokenAccountant,
        started: Instant,
        cancellation: Option<CancellationToken>,
    ) -> Self {
        Self {
            descriptor,
            messages: invocation.messages,
            tools: invocation.tools,
            stop: invocation.sampling.stop,
            accountant,
            started,
            cancellation,
            text: String::new(),
            tool_calls: Vec::new(),
            finish_reason: None,
            reported: None,
            error: None,
        }
    }

    fn observe(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::ContentDelta(text) => self.text.push_str(text),
            StreamEvent::ToolCallDelta { .. } => {}
            StreamEvent::ToolCallComplete { call, .. } => self.tool_calls.push(call.clone()),
            StreamEvent::FinishReason(reason) => self.finish_reason = Some(reason.clone()),
            StreamEvent::Usage {
                prompt_tokens,
                completion_tokens,
            } => self.reported = Some((*prompt_tokens, *completion_tokens)),
            StreamEvent::Error(error) => self.error = Some(error.clone()),
        }
    }

    fn usage(&self) -> UsageRecord {
        self.accountant.record(
            &self.descriptor,
            self.reported,
            &self.messages,
            &self.tools,
            &self.text,
            &self.tool_calls,
            Some(self.started.elapsed()),
        )
    }
}

/// Lazy, finite sequence of [`StreamEvent`]s for one invocation
///
/// Each event is yielded exactly once. The stream keeps a tally of what it
/// delivered, so usage and the assembled result are available once it ends.
pub struct InvocationStream {
    events: StreamEvents,
    tally: StreamTally,
    finished: bool,
}

impl std::fmt::Debug for InvocationStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationStream")
            .field("model", &self.tally.descriptor.id)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl InvocationStream {
    fn new(events: StreamEvents, tally: StreamTally) -> Self {
        Self {
            events,
            tally,
            finished: false,
        }
    }

    /// Whether the sequence has ended
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Descriptor the invocation was translated with
    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.tally.descriptor
    }

    /// Usage of what has been delivered so far
    ///
    /// Counts the gateway reported are authoritative; otherwise the prompt
    /// and the text received so far are estimated.
    pub fn usage(&self) -> UsageRecord {
        self.tally.usage()
    }

    /// Drain the stream into a complete result
    pub async fn collect_result(mut self) -> GatewayResult<ChatResult> {
        while let Some(event) = self.next().await {
            if let StreamEvent::Error(error) = event {
                return Err(error);
            }
        }

        if self
            .tally
            .cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
        {
            return Err(GatewayError::cancelled());
        }

        let usage = self.tally.usage();
        let tally = self.tally;
        let text = match tally.stop.as_deref() {
            Some(stops) if !stops.is_empty() => enforce_stop_sequences(&tally.text, stops),
            _ => tally.text,
        };

        Ok(ChatResult {
            model: tally.descriptor.id.clone(),
            message: assistant_message(text, tally.tool_calls),
            finish_reason: tally.finish_reason,
            usage,
            system_fingerprint: None,
        })
    }
}

impl Stream for InvocationStream {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        match this.events.poll_next_unpin(cx) {
            Poll::Ready(Some(event)) => {
                this.tally.observe(&event);
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                this.finished = true;
                if let Some(error) = &this.tally.error {
                    debug!("Stream ended with error: {}", error);
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
