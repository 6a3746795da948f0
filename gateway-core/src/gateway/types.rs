//! Gateway wire types
//!
//! These types match the OpenAI-compatible chat-completion format the gateway
//! speaks. The model is addressed by path, so requests carry no `model`
//! field. Response types are lenient: backends behind the gateway omit
//! different fields, so nearly everything defaults.

use crate::protocol::{FinishReason, ToolCall};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Chat completion request body
#[derive(Debug, Clone, Default, Serialize)]
pub struct WireChatRequest {
    pub messages: Vec<WireMessage>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<WireTool>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,

    /// Only sent when true
    #[serde(skip_serializing_if = "is_false")]
    pub stream: bool,

    /// Additional model parameters
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Message format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<WireContent>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<WireToolCall>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// Content (can be string or array of parts)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireContent {
    Text(String),
    Parts(Vec<WireContentPart>),
}

impl WireContent {
    /// Concatenated text of the content
    pub fn into_text(self) -> String {
        match self {
            WireContent::Text(text) => text,
            WireContent::Parts(parts) => parts
                .into_iter()
                .filter_map(|part| match part {
                    WireContentPart::Text { text } => Some(text),
                    WireContentPart::ImageUrl { .. } => None,
                })
                .collect(),
        }
    }
}

/// Content part for multimodal messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireContentPart {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "image_url")]
    ImageUrl { image_url: WireImageUrl },
}

/// Image URL format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireImageUrl {
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Function call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFunctionCall {
    #[serde(default)]
    pub name: String,

    /// Some backends return arguments as a JSON object instead of a string
    #[serde(default, deserialize_with = "string_or_json")]
    pub arguments: String,
}

/// Tool call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireToolCall {
    #[serde(default)]
    pub id: String,

    #[serde(rename = "type", default = "function_type")]
    pub tool_type: String,

    pub function: WireFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

/// Tool definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireTool {
    #[serde(rename = "type")]
    pub tool_type: String,

    pub function: WireFunction,
}

/// Function definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFunction {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// Chat completion response
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireChatResponse {
    pub id: Option<String>,
    pub model: Option<String>,
    pub choices: Vec<WireChoice>,
    pub usage: Option<WireUsage>,
    pub system_fingerprint: Option<String>,
}

/// Response choice
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireChoice {
    pub index: usize,
    pub message: WireResponseMessage,
    pub finish_reason: Option<String>,
}

/// Assistant message of a response
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireResponseMessage {
    pub role: Option<String>,
    pub content: Option<WireContent>,
    pub tool_calls: Option<Vec<WireToolCall>>,
    /// Legacy single function call
    pub function_call: Option<WireFunctionCall>,
}

/// Usage information
///
/// Backends differ in which counts they fill in, so every field is optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WireUsage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

impl WireUsage {
    /// Prompt and completion counts, when the gateway reported both
    pub fn counts(&self) -> Option<(u32, u32)> {
        Some((self.prompt_tokens?, self.completion_tokens?))
    }
}

/// Streaming chunk
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireStreamChunk {
    pub id: Option<String>,
    pub model: Option<String>,
    pub choices: Vec<WireStreamChoice>,
    pub usage: Option<WireUsage>,
}

/// Streaming choice
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireStreamChoice {
    pub index: usize,
    pub delta: WireDelta,
    pub finish_reason: Option<String>,
}

/// Delta for streaming
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireDelta {
    pub role: Option<String>,
    pub content: Option<String>,
    pub tool_calls: Option<Vec<WireToolCallDelta>>,
    /// Legacy single function call fragment
    pub function_call: Option<WireFunctionDelta>,
}

/// Tool call fragment
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireToolCallDelta {
    pub index: Option<usize>,
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub tool_type: Option<String>,
    pub function: Option<WireFunctionDelta>,
}

/// Function call fragment
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireFunctionDelta {
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// First choice of a complete response, in protocol terms
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<WireUsage>,
    pub model: Option<String>,
    pub system_fingerprint: Option<String>,
}

impl WireChatResponse {
    /// Take the first choice; `None` when the response has no choices
    pub fn into_completion(self) -> Option<Completion> {
        let choice = self.choices.into_iter().min_by_key(|choice| choice.index)?;
        let message = choice.message;

        let mut tool_calls: Vec<ToolCall> = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(i, call)| {
                let id = if call.id.is_empty() {
                    format!("call_{}", i)
                } else {
                    call.id
                };
                ToolCall::function(id, call.function.name, call.function.arguments)
            })
            .collect();

        if tool_calls.is_empty() {
            if let Some(call) = message.function_call {
                tool_calls.push(ToolCall::function("call_0", call.name, call.arguments));
            }
        }

        Some(Completion {
            text: message.content.map(WireContent::into_text).unwrap_or_default(),
            tool_calls,
            finish_reason: choice
                .finish_reason
                .filter(|reason| !reason.is_empty())
                .map(|reason| FinishReason::from(reason.as_str())),
            usage: self.usage,
            model: self.model,
            system_fingerprint: self.system_fingerprint,
        })
    }
}

fn string_or_json<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stream_flag_only_serialized_when_true() {
        let request = WireChatRequest {
            messages: vec![WireMessage {
                role: "user".into(),
                content: Some(WireContent::Text("hello".into())),
                name: None,
                tool_calls: None,
                tool_call_id: None,
            }],
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"messages": [{"role": "user", "content": "hello"}]})
        );

        let streaming = WireChatRequest { stream: true, ..request };
        assert_eq!(serde_json::to_value(&streaming).unwrap()["stream"], json!(true));
    }

    #[test]
    fn test_object_arguments_become_text() {
        let call: WireToolCall = serde_json::from_value(json!({
            "id": "call_1",
            "function": {"name": "lookup", "arguments": {"q": "rust"}}
        }))
        .unwrap();
        assert_eq!(call.tool_type, "function");
        assert_eq!(call.function.arguments, r#"{"q":"rust"}"#);
    }

    #[test]
    fn test_into_completion() {
        let response: WireChatResponse = serde_json::from_value(json!({
            "model": "qwen-plus",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{"id": "", "type": "function", "function": {"name": "f", "arguments": "{}"}}]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 7}
        }))
        .unwrap();

        let completion = response.into_completion().unwrap();
        assert_eq!(completion.text, "");
        assert_eq!(completion.tool_calls[0].id, "call_0");
        assert_eq!(completion.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(completion.usage.unwrap().counts(), Some((5, 7)));
        assert!(WireChatResponse::default().into_completion().is_none());
    }

    #[test]
    fn test_lenient_response() {
        let response: WireChatResponse = serde_json::from_value(json!({
            "choices": [{"message": {"content": "hi"}}]
        }))
        .unwrap();
        assert_eq!(response.choices.len(), 1);
        assert!(response.usage.is_none());
    }
}
