//! Streaming Decoder
//!
//! Turns the gateway's server-sent event stream into a lazy, finite sequence
//! of [`StreamEvent`]s. Frame reassembly across network reads is done by
//! `eventsource-stream`; [`StreamDecoder`] interprets one frame at a time and
//! owns the [`ToolCallAccumulator`] for the decode.
//!
//! The sequence ends after the `[DONE]` sentinel, after a terminal
//! [`StreamEvent::Error`], or silently when the caller cancels. A transport
//! that closes before the sentinel yields a `Truncated` error.

use super::accumulator::{ToolCallAccumulator, ToolFragment};
use super::types::{WireChatResponse, WireStreamChunk, WireUsage};
use crate::error::GatewayError;
use crate::http::error::classify_in_band;
use crate::http::{ByteStream, RequestOptions, StreamResponse, MAX_RESPONSE_SIZE};
use crate::protocol::{FinishReason, StreamEvent};
use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// End-of-stream sentinel
pub const DONE_SENTINEL: &str = "[DONE]";

/// Decoded events of one streamed invocation
pub type StreamEvents = BoxStream<'static, StreamEvent>;

/// Settings for one decode
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Request ID for log correlation
    pub request_id: Uuid,

    /// Maximum silence between chunks; resets on every chunk
    pub idle_timeout: Duration,

    /// Ends the sequence without further events when cancelled
    pub cancellation: Option<CancellationToken>,

    /// Size limit for a JSON body replayed as events
    pub max_body_size: usize,
}

impl From<&RequestOptions> for DecodeOptions {
    fn from(options: &RequestOptions) -> Self {
        Self {
            request_id: options.request_id,
            idle_timeout: options.idle_timeout,
            cancellation: options.cancellation.clone(),
            max_body_size: MAX_RESPONSE_SIZE,
        }
    }
}

impl DecodeOptions {
    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

/// Frame-level decoder state
#[derive(Debug, Default)]
pub struct StreamDecoder {
    accumulator: ToolCallAccumulator,
    current_choice: Option<usize>,
    done: bool,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the terminal sentinel was seen
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Interpret the data of one complete frame
    pub fn decode(&mut self, data: &str) -> Vec<StreamEvent> {
        let data = data.trim();
        if self.done || data.is_empty() {
            return Vec::new();
        }

        if data == DONE_SENTINEL {
            self.done = true;
            if self.accumulator.is_empty() {
                return Vec::new();
            }
            let open = self.accumulator.open_indices();
            return vec![StreamEvent::Error(GatewayError::truncated(format!(
                "stream ended with unfinished tool calls at indices {:?}",
                open
            )))];
        }

        let value: Value = match serde_json::from_str(data) {
            Ok(value) => value,
            Err(e) => return self.fail(format!("Malformed stream frame: {}", e)),
        };

        if let Some(error) = classify_in_band(&value) {
            return vec![StreamEvent::Error(error.after_delivery())];
        }

        let chunk: WireStreamChunk = match serde_json::from_value(value) {
            Ok(chunk) => chunk,
            Err(e) => return self.fail(format!("Unrecognised stream frame: {}", e)),
        };

        let mut events = Vec::new();
        for choice in chunk.choices {
            if self
                .current_choice
                .is_some_and(|current| current != choice.index)
            {
                events.extend(self.accumulator.finish());
            }
            self.current_choice = Some(choice.index);

            let delta = choice.delta;
            if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                events.push(StreamEvent::ContentDelta(content));
            }

            for call in delta.tool_calls.unwrap_or_default() {
                let function = call.function.unwrap_or_default();
                events.push(self.accumulator.push(ToolFragment {
                    index: call.index,
                    id: call.id,
                    name: function.name,
                    arguments: function.arguments.unwrap_or_default(),
                }));
            }

            if let Some(function) = delta.function_call {
                events.push(self.accumulator.push(ToolFragment {
                    index: Some(0),
                    id: None,
                    name: function.name,
                    arguments: function.arguments.unwrap_or_default(),
                }));
            }

            if let Some(reason) = choice.finish_reason.filter(|r| !r.is_empty()) {
                events.extend(self.accumulator.finish());
                events.push(StreamEvent::FinishReason(FinishReason::from(reason.as_str())));
            }
        }

        if let Some((prompt_tokens, completion_tokens)) =
            chunk.usage.as_ref().and_then(WireUsage::counts)
        {
            events.push(StreamEvent::Usage {
                prompt_tokens,
                completion_tokens,
            });
        }

        events
    }

    /// A frame that cannot be interpreted ends the stream; the content it
    /// carried is lost
    fn fail(&mut self, message: String) -> Vec<StreamEvent> {
        warn!("{}", message);
        self.done = true;
        vec![StreamEvent::Error(
            GatewayError::unknown(message).after_delivery(),
        )]
    }

    /// The transport closed; report truncation unless the sentinel was seen
    pub fn finish(&mut self) -> Option<StreamEvent> {
        if self.done {
            return None;
        }
        self.done = true;
        Some(StreamEvent::Error(GatewayError::truncated(
            "stream closed before the end-of-stream marker",
        )))
    }
}

/// Decode an open streaming response
///
/// A gateway that ignores `stream=true` and answers with a JSON body gets its
/// body replayed as events.
pub fn decode_response(response: StreamResponse, options: DecodeOptions) -> StreamEvents {
    let is_json = response
        .content_type
        .as_deref()
        .is_some_and(|ct| ct.contains("json"));

    if is_json && !response.is_event_stream() {
        debug!(
            "Gateway answered a stream request with JSON, replaying [request_id: {}]",
            options.request_id
        );
        replay_json_body(response.body, options)
    } else {
        decode_event_stream(response.body, options)
    }
}

type RawEvents = BoxStream<'static, Result<Event, EventStreamError<GatewayError>>>;

enum Pull {
    Frame(Event),
    Failed(GatewayError),
    Ended,
    Cancelled,
}

struct DecodeState {
    frames: RawEvents,
    decoder: StreamDecoder,
    pending: VecDeque<StreamEvent>,
    options: DecodeOptions,
    closed: bool,
}

impl DecodeState {
    async fn pull(&mut self) -> Pull {
        let next = self.frames.next();
        let result = match self.options.cancellation.clone() {
            Some(token) => tokio::select! {
                _ = token.cancelled() => return Pull::Cancelled,
                result = next => result,
            },
            None => next.await,
        };

        match result {
            None => Pull::Ended,
            Some(Ok(frame)) => Pull::Frame(frame),
            Some(Err(EventStreamError::Transport(error))) => Pull::Failed(error),
            Some(Err(other)) => Pull::Failed(GatewayError::unknown(format!(
                "Malformed event stream: {}",
                other
            ))),
        }
    }
}

/// Fail `body` when no chunk arrives within the idle timeout
///
/// The timer runs on raw chunks, so SSE comments and keep-alive lines reset
/// it even though they never surface as frames.
fn idle_guarded(body: ByteStream, options: &DecodeOptions) -> ByteStream {
    let idle_timeout = options.idle_timeout;
    let request_id = options.request_id;

    stream::unfold(Some(body), move |body| async move {
        let mut body = body?;
        match tokio::time::timeout(idle_timeout, body.next()).await {
            Ok(Some(chunk)) => Some((chunk, Some(body))),
            Ok(None) => None,
            Err(_) => {
                warn!(
                    "No stream data for {:?} [request_id: {}]",
                    idle_timeout, request_id
                );
                let error = GatewayError::upstream(format!(
                    "no stream data received for {:?} [request_id: {}]",
                    idle_timeout, request_id
                ));
                Some((Err(error), None))
            }
        }
    })
    .boxed()
}

/// Decode a server-sent event body
pub fn decode_event_stream(body: ByteStream, options: DecodeOptions) -> StreamEvents {
    let state = DecodeState {
        frames: idle_guarded(body, &options).eventsource().boxed(),
        decoder: StreamDecoder::new(),
        pending: VecDeque::new(),
        options,
        closed: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if state.options.is_cancelled() {
                debug!("Stream cancelled [request_id: {}]", state.options.request_id);
                return None;
            }

            if let Some(event) = state.pending.pop_front() {
                if event.is_terminal() {
                    state.closed = true;
                    state.pending.clear();
                }
                return Some((event, state));
            }

            if state.closed {
                return None;
            }

            match state.pull().await {
                Pull::Frame(frame) => {
                    let events = state.decoder.decode(&frame.data);
                    state.pending.extend(events);
                    if state.decoder.is_done() {
                        debug!("Stream completed [request_id: {}]", state.options.request_id);
                        state.closed = true;
                    }
                }
                Pull::Ended => {
                    state.closed = true;
                    if let Some(event) = state.decoder.finish() {
                        warn!(
                            "Stream closed without end marker [request_id: {}]",
                            state.options.request_id
                        );
                        state.pending.push_back(event);
                    }
                }
                Pull::Failed(error) => {
                    state
                        .pending
                        .push_back(StreamEvent::Error(error.after_delivery()));
                }
                Pull::Cancelled => {
                    debug!("Stream cancelled [request_id: {}]", state.options.request_id);
                    return None;
                }
            }
        }
    })
    .boxed()
}

/// Read a whole JSON body and replay it as events
pub fn replay_json_body(body: ByteStream, options: DecodeOptions) -> StreamEvents {
    stream::once(async move { read_json_events(body, options).await })
        .flat_map(stream::iter)
        .boxed()
}

async fn read_json_events(mut body: ByteStream, options: DecodeOptions) -> Vec<StreamEvent> {
    let mut buffer: Vec<u8> = Vec::new();
    loop {
        let next = tokio::time::timeout(options.idle_timeout, body.next());
        let result = match options.cancellation.clone() {
            Some(token) => tokio::select! {
                _ = token.cancelled() => return Vec::new(),
                result = next => result,
            },
            None => next.await,
        };

        match result {
            Err(_) => {
                return vec![StreamEvent::Error(
                    GatewayError::upstream(format!(
                        "no response data received for {:?} [request_id: {}]",
                        options.idle_timeout, options.request_id
                    ))
                    .after_delivery(),
                )]
            }
            Ok(None) => break,
            Ok(Some(Err(error))) => return vec![StreamEvent::Error(error.after_delivery())],
            Ok(Some(Ok(chunk))) => {
                if buffer.len() + chunk.len() > options.max_body_size {
                    return vec![StreamEvent::Error(
                        GatewayError::unknown(format!(
                            "Response exceeds maximum {} bytes [request_id: {}]",
                            options.max_body_size, options.request_id
                        ))
                        .after_delivery(),
                    )];
                }
                buffer.extend_from_slice(&chunk);
            }
        }
    }

    let value: Value = match serde_json::from_slice(&buffer) {
        Ok(value) => value,
        Err(e) => {
            return vec![StreamEvent::Error(
                GatewayError::unknown(format!(
                    "Invalid response format: {} [request_id: {}]",
                    e, options.request_id
                ))
                .after_delivery(),
            )]
        }
    };

    replay_value(value)
}

/// Events equivalent to a complete JSON response
pub fn replay_value(value: Value) -> Vec<StreamEvent> {
    if let Some(error) = classify_in_band(&value) {
        return vec![StreamEvent::Error(error.after_delivery())];
    }

    let completion = serde_json::from_value::<WireChatResponse>(value)
        .ok()
        .and_then(WireChatResponse::into_completion);
    let Some(completion) = completion else {
        return vec![StreamEvent::Error(
            GatewayError::unknown("response contained no choices").after_delivery(),
        )];
    };

    let mut events = Vec::new();
    if !completion.text.is_empty() {
        events.push(StreamEvent::ContentDelta(completion.text));
    }
    for (index, call) in completion.tool_calls.into_iter().enumerate() {
        events.push(StreamEvent::ToolCallComplete { index, call });
    }
    events.push(StreamEvent::FinishReason(
        completion.finish_reason.unwrap_or(FinishReason::Stop),
    ));
    if let Some((prompt_tokens, completion_tokens)) =
        completion.usage.as_ref().and_then(WireUsage::counts)
    {
        events.push(StreamEvent::Usage {
            prompt_tokens,
            completion_tokens,
        });
    }
    events
}
