//! Core protocol types for gateway invocations
//!
//! These are the caller-facing shapes. The design prioritizes:
//! - Type safety through enums and strong typing
//! - One contract for both complete and streamed responses
//! - Immutability once an invocation is built

use crate::error::GatewayError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System instructions that guide the model's behavior
    System,
    /// User input message
    User,
    /// Assistant (model) response
    Assistant,
    /// Tool result correlated to an earlier tool call
    Tool,
}

impl MessageRole {
    /// Wire name of the role
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }
}

/// Content of a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text content
    Text(String),
    /// Structured content parts
    Parts(Vec<ContentPart>),
}

/// Individual content part for structured messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text content part
    Text { text: String },
    /// Image referenced by URL (or data URL)
    ImageUrl {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender
    pub role: MessageRole,

    /// Content of the message
    pub content: MessageContent,

    /// Optional name for the message sender
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Tool calls made by an assistant message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// Tool call ID (for tool result messages)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// Function call information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Name of the function to call
    pub name: String,

    /// Arguments to the function (JSON text)
    pub arguments: String,
}

/// A completed tool call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this tool call
    pub id: String,

    /// Type of tool (usually "function")
    #[serde(rename = "type")]
    pub tool_type: String,

    /// Function information
    pub function: FunctionCall,
}

impl ToolCall {
    /// Create a function tool call
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            tool_type: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    /// Parse the accumulated arguments as JSON
    pub fn parsed_arguments(&self) -> Result<Value, serde_json::Error> {
        if self.function.arguments.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(&self.function.arguments)
    }
}

/// Tool made available to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Function name
    pub name: String,

    /// Function description
    #[serde(default)]
    pub description: String,

    /// Parameters schema (JSON Schema)
    #[serde(default)]
    pub parameters: Value,
}

impl ToolSpec {
    /// Create a tool spec
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Tool choice configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    /// auto, none, required
    Mode(String),
    /// Specific function
    Function {
        #[serde(rename = "type")]
        choice_type: String,
        function: FunctionChoice,
    },
}

impl ToolChoice {
    /// Let the model decide
    pub fn auto() -> Self {
        ToolChoice::Mode("auto".to_string())
    }

    /// Force a specific function
    pub fn function(name: impl Into<String>) -> Self {
        ToolChoice::Function {
            choice_type: "function".to_string(),
            function: FunctionChoice { name: name.into() },
        }
    }
}

/// Function choice specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionChoice {
    /// Name of the function to use
    pub name: String,
}

/// Response format hint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Plain text response
    Text,
    /// JSON mode
    JsonObject,
    /// JSON constrained by a schema
    JsonSchema {
        #[serde(skip_serializing_if = "Option::is_none")]
        json_schema: Option<Value>,
    },
}

impl FromStr for ResponseFormat {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "text" => Ok(ResponseFormat::Text),
            "json_object" => Ok(ResponseFormat::JsonObject),
            "json_schema" => Ok(ResponseFormat::JsonSchema { json_schema: None }),
            other => Err(GatewayError::invalid_parameter(format!(
                "Unknown response_format '{}'",
                other
            ))),
        }
    }
}

/// Sampling parameters for an invocation
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Nucleus sampling parameter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    /// Maximum tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Presence penalty (-2.0 to 2.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,

    /// Frequency penalty (-2.0 to 2.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,

    /// Stop sequences
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,

    /// Response format hint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,

    /// Seed for deterministic generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
}

/// One logical chat-completion request
///
/// Built once by the caller and only read by the pipeline.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChatInvocation {
    /// Messages in the conversation, in order
    pub messages: Vec<Message>,

    /// Tools offered to the model
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,

    /// Tool choice configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,

    /// Sampling parameters
    #[serde(default)]
    pub sampling: SamplingParams,

    /// Whether the response should be streamed
    #[serde(default)]
    pub stream: bool,

    /// End-user identifier forwarded to the gateway
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Additional model parameters forwarded verbatim
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl ChatInvocation {
    /// Create a new invocation from messages
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    /// Enable or disable streaming
    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Offer tools to the model
    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    /// Set tool choice
    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }

    /// Set temperature
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.sampling.temperature = Some(temperature);
        self
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.sampling.max_tokens = Some(max_tokens);
        self
    }

    /// Set top_p for nucleus sampling
    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.sampling.top_p = Some(top_p);
        self
    }

    /// Set stop sequences
    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.sampling.stop = Some(stop);
        self
    }

    /// Set the response format hint
    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.sampling.response_format = Some(format);
        self
    }

    /// Set the end-user identifier
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Forward an additional model parameter
    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Why the model stopped generating
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    /// Any reason the gateway reports that is not listed above
    Other(String),
}

impl FinishReason {
    /// Wire name of the reason
    pub fn as_str(&self) -> &str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::ContentFilter => "content_filter",
            FinishReason::Other(reason) => reason,
        }
    }
}

impl From<&str> for FinishReason {
    fn from(value: &str) -> Self {
        match value {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            // Legacy function-calling backends still report this
            "tool_calls" | "function_call" => FinishReason::ToolCalls,
            "content_filter" => FinishReason::ContentFilter,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for FinishReason {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FinishReason {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(FinishReason::from(value.as_str()))
    }
}

/// One normalized event of a streamed response
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Incremental assistant text
    ContentDelta(String),
    /// Incremental tool-call fragment
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
    /// A tool call whose arguments are fully accumulated
    ToolCallComplete { index: usize, call: ToolCall },
    /// The turn closed
    FinishReason(FinishReason),
    /// Authoritative counts reported by the gateway
    Usage {
        prompt_tokens: u32,
        completion_tokens: u32,
    },
    /// Terminal failure; nothing follows it
    Error(GatewayError),
}

impl StreamEvent {
    /// Whether this event ends the sequence
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Error(_))
    }
}

/// How the token counts of a usage record were obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageSource {
    /// Reported by the gateway
    Authoritative,
    /// Counted with a BPE tokenizer
    Tokenizer,
    /// Estimated from character counts
    Heuristic,
}

impl UsageSource {
    /// Whether the counts are estimates
    pub fn is_estimate(&self) -> bool {
        !matches!(self, UsageSource::Authoritative)
    }
}

/// Monetary cost of an invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cost {
    /// Cost of the prompt tokens
    pub input: f64,
    /// Cost of the completion tokens
    pub output: f64,
    /// Sum of input and output cost
    pub total: f64,
    /// Currency code (e.g., "USD")
    pub currency: String,
}

/// Token usage and cost of one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Tokens in the prompt
    pub prompt_tokens: u32,

    /// Tokens in the completion
    pub completion_tokens: u32,

    /// Total tokens used
    pub total_tokens: u32,

    /// Computed cost; `None` when the model's pricing is unknown
    pub cost: Option<Cost>,

    /// Where the token counts came from
    pub source: UsageSource,

    /// Wall-clock latency of the invocation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<Duration>,
}

/// Complete (non-streamed) invocation result
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResult {
    /// Model identifier the invocation targeted
    pub model: String,

    /// Assistant message, including any tool calls
    pub message: Message,

    /// Why generation stopped
    pub finish_reason: Option<FinishReason>,

    /// Usage and cost
    pub usage: UsageRecord,

    /// System fingerprint reported by the gateway
    pub system_fingerprint: Option<String>,
}

impl ChatResult {
    /// Text of the assistant message
    pub fn text(&self) -> &str {
        self.message.content.as_text().unwrap_or_default()
    }

    /// Tool calls of the assistant message
    pub fn tool_calls(&self) -> &[ToolCall] {
        self.message.tool_calls.as_deref().unwrap_or_default()
    }
}

// ============================================================================
// Builder and convenience constructors
// ============================================================================

/// Builder for constructing messages
pub struct MessageBuilder {
    role: MessageRole,
    content: MessageContent,
    name: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
    tool_call_id: Option<String>,
}

impl MessageBuilder {
    /// Create a new message builder with role and text content
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(content.into()),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Create a new message builder with role and structured parts
    pub fn with_parts(role: MessageRole, parts: Vec<ContentPart>) -> Self {
        Self {
            role,
            content: MessageContent::Parts(parts),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Set the name field
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach tool calls (assistant messages)
    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = Some(tool_calls);
        self
    }

    /// Correlate with a tool call (tool messages)
    pub fn with_tool_call_id(mut self, id: impl Into<String>) -> Self {
        self.tool_call_id = Some(id.into());
        self
    }

    /// Build the message
    pub fn build(self) -> Message {
        Message {
            role: self.role,
            content: self.content,
            name: self.name,
            tool_calls: self.tool_calls,
            tool_call_id: self.tool_call_id,
        }
    }
}

impl Message {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        MessageBuilder::new(MessageRole::System, content).build()
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        MessageBuilder::new(MessageRole::User, content).build()
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        MessageBuilder::new(MessageRole::Assistant, content).build()
    }

    /// Create a tool result message
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        MessageBuilder::new(MessageRole::Tool, content)
            .with_tool_call_id(tool_call_id)
            .build()
    }
}

impl MessageContent {
    /// Check if content is empty
    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(s) => s.is_empty(),
            MessageContent::Parts(parts) => parts.is_empty(),
        }
    }

    /// Get text representation
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(s) => Some(s.as_str()),
            MessageContent::Parts(_) => None,
        }
    }

    /// Concatenated text of all text parts
    pub fn text_content(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

/// Truncate `text` at the first occurrence of any stop sequence
///
/// For backends that ignore the `stop` parameter.
pub fn enforce_stop_sequences(text: &str, stops: &[String]) -> String {
    let cut = stops
        .iter()
        .filter(|stop| !stop.is_empty())
        .filter_map(|stop| text.find(stop.as_str()))
        .min();

    match cut {
        Some(position) => text[..position].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_reason_round_trip_names() {
        assert_eq!(FinishReason::from("stop"), FinishReason::Stop);
        assert_eq!(FinishReason::from("function_call"), FinishReason::ToolCalls);
        assert_eq!(
            FinishReason::from("eos"),
            FinishReason::Other("eos".to_string())
        );
        assert_eq!(FinishReason::ToolCalls.as_str(), "tool_calls");
    }

    #[test]
    fn test_response_format_from_str() {
        assert_eq!("json_object".parse::<ResponseFormat>().unwrap(), ResponseFormat::JsonObject);
        assert_eq!("text".parse::<ResponseFormat>().unwrap(), ResponseFormat::Text);
        assert!("yaml".parse::<ResponseFormat>().is_err());
    }

    #[test]
    fn test_enforce_stop_sequences_uses_earliest() {
        let stops = vec!["END".to_string(), "\n\n".to_string()];
        assert_eq!(enforce_stop_sequences("one\n\ntwo END", &stops), "one");
        assert_eq!(enforce_stop_sequences("no stops here", &stops), "no stops here");
        assert_eq!(enforce_stop_sequences("abc", &[]), "abc");
    }

    #[test]
    fn test_tool_call_parsed_arguments() {
        let call = ToolCall::function("call_1", "lookup", r#"{"q":"rust"}"#);
        assert_eq!(call.parsed_arguments().unwrap()["q"], "rust");

        let empty = ToolCall::function("call_2", "ping", "");
        assert!(empty.parsed_arguments().unwrap().is_object());
    }

    #[test]
    fn test_text_content_joins_text_parts() {
        let content = MessageContent::Parts(vec![
            ContentPart::Text { text: "a".into() },
            ContentPart::ImageUrl { url: "https://x/y.png".into(), detail: None },
            ContentPart::Text { text: "b".into() },
        ]);
        assert_eq!(content.text_content(), "ab");
    }
}
