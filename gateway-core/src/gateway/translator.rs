//! Request Translator
//!
//! Turns a [`ChatInvocation`] into the [`WireRequest`] for one model behind
//! the gateway, shaping parameters to what the model's descriptor allows.

use super::types::{
    WireChatRequest, WireContent, WireContentPart, WireFunction, WireFunctionCall,
    WireImageUrl, WireMessage, WireTool, WireToolCall,
};
use crate::capabilities::ModelDescriptor;
use crate::config::GatewaySettings;
use crate::error::{GatewayError, GatewayResult};
use crate::http::WireRequest;
use crate::protocol::{
    ChatInvocation, ContentPart, Message, MessageContent, MessageRole, ResponseFormat, ToolCall,
    ToolChoice, ToolSpec,
};
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

/// Body keys owned by typed fields; `extra` may not override them
const RESERVED_KEYS: [&str; 15] = [
    "messages",
    "model",
    "stream",
    "tools",
    "tool_choice",
    "temperature",
    "top_p",
    "max_tokens",
    "presence_penalty",
    "frequency_penalty",
    "stop",
    "response_format",
    "seed",
    "user",
    "functions",
];

/// Build the wire request for `invocation` against `model_id`
pub fn translate(
    invocation: &ChatInvocation,
    model_id: &str,
    descriptor: &ModelDescriptor,
    settings: &GatewaySettings,
    request_id: Uuid,
) -> GatewayResult<WireRequest> {
    let model_id = model_id.trim();
    if model_id.is_empty() {
        return Err(GatewayError::invalid_parameter("model identifier is required"));
    }

    if settings.base_url.trim().is_empty() {
        return Err(GatewayError::invalid_parameter("gateway base URL is required"));
    }

    if settings.api_key.is_empty() {
        return Err(GatewayError::invalid_parameter("gateway credential is required"));
    }

    let body = build_body(invocation, descriptor)?;
    let body = serde_json::to_value(&body).map_err(|e| {
        GatewayError::invalid_parameter(format!("Failed to serialize request: {}", e))
    })?;

    let mut headers = vec![
        (
            "Authorization".to_string(),
            format!("Bearer {}", settings.api_key.expose_secret().trim()),
        ),
        ("Content-Type".to_string(), "application/json".to_string()),
        ("X-Request-ID".to_string(), request_id.to_string()),
    ];
    if let Some((name, value)) = settings.custom_header() {
        headers.push((name.to_string(), value.to_string()));
    }

    Ok(WireRequest {
        method: reqwest::Method::POST,
        url: endpoint(&settings.base_url, model_id),
        headers,
        body,
        stream: invocation.stream,
    })
}

/// `{base_url}/{model_id}` without doubled slashes
pub fn endpoint(base_url: &str, model_id: &str) -> String {
    format!("{}/{}", base_url.trim().trim_end_matches('/'), model_id)
}

/// Build the JSON body for `invocation`, shaped by `descriptor`
pub fn build_body(
    invocation: &ChatInvocation,
    descriptor: &ModelDescriptor,
) -> GatewayResult<WireChatRequest> {
    if invocation.messages.is_empty() {
        return Err(GatewayError::invalid_parameter(
            "invocation must contain at least one message",
        ));
    }

    let messages = invocation
        .messages
        .iter()
        .enumerate()
        .map(|(i, message)| to_wire_message(i, message))
        .collect::<GatewayResult<Vec<_>>>()?;

    let sampling = &invocation.sampling;
    let limits = &descriptor.limits;

    let ceiling = descriptor.max_tokens_ceiling();
    let max_tokens = sampling.max_tokens.map(|requested| {
        if requested > ceiling {
            debug!(
                "Clamping max_tokens {} to {} for model '{}'",
                requested, ceiling, descriptor.id
            );
            ceiling
        } else {
            requested
        }
    });

    let temperature = sampling.temperature.map(|t| limits.temperature.clamp(t));
    let top_p = sampling.top_p.map(|p| limits.top_p.clamp(p));

    let (tools, tool_choice) = if invocation.tools.is_empty() {
        (None, None)
    } else if descriptor.supports_tools() {
        let tools = invocation.tools.iter().map(to_wire_tool).collect();
        let choice = invocation
            .tool_choice
            .clone()
            .unwrap_or_else(ToolChoice::auto);
        (Some(tools), Some(tool_choice_value(&choice)))
    } else {
        warn!(
            "Model '{}' does not advertise tool calling; omitting {} tool(s)",
            descriptor.id,
            invocation.tools.len()
        );
        (None, None)
    };

    let mut extra = invocation.extra.clone();
    extra.retain(|key, _| {
        let reserved = RESERVED_KEYS.contains(&key.as_str());
        if reserved {
            warn!("Ignoring extra parameter '{}' that shadows a typed field", key);
        }
        !reserved
    });

    Ok(WireChatRequest {
        messages,
        temperature,
        top_p,
        max_tokens,
        presence_penalty: sampling.presence_penalty,
        frequency_penalty: sampling.frequency_penalty,
        stop: sampling.stop.clone().filter(|stop| !stop.is_empty()),
        response_format: sampling.response_format.as_ref().map(response_format_value),
        seed: sampling.seed,
        user: invocation.user.clone(),
        tools,
        tool_choice,
        stream: invocation.stream,
        extra,
    })
}

fn to_wire_message(index: usize, message: &Message) -> GatewayResult<WireMessage> {
    let tool_call_id = match message.role {
        MessageRole::Tool => match message.tool_call_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => Some(id.to_string()),
            _ => {
                return Err(GatewayError::invalid_parameter(format!(
                    "tool message at index {} has no tool_call_id",
                    index
                )))
            }
        },
        _ => None,
    };

    let tool_calls = match message.role {
        MessageRole::Assistant => message
            .tool_calls
            .as_ref()
            .filter(|calls| !calls.is_empty())
            .map(|calls| calls.iter().map(to_wire_tool_call).collect()),
        _ => None,
    };

    // Assistant turns that only carry tool calls have no content
    let content = if tool_calls.is_some() && message.content.is_empty() {
        None
    } else {
        Some(to_wire_content(&message.content))
    };

    let name = match message.role {
        MessageRole::Tool => None,
        _ => message.name.clone(),
    };

    Ok(WireMessage {
        role: message.role.as_str().to_string(),
        content,
        name,
        tool_calls,
        tool_call_id,
    })
}

fn to_wire_content(content: &MessageContent) -> WireContent {
    match content {
        MessageContent::Text(text) => WireContent::Text(text.clone()),
        MessageContent::Parts(parts) => match parts.as_slice() {
            [ContentPart::Text { text }] => WireContent::Text(text.clone()),
            parts => WireContent::Parts(parts.iter().map(to_wire_part).collect()),
        },
    }
}

fn to_wire_part(part: &ContentPart) -> WireContentPart {
    match part {
        ContentPart::Text { text } => WireContentPart::Text { text: text.clone() },
        ContentPart::ImageUrl { url, detail } => WireContentPart::ImageUrl {
            image_url: WireImageUrl {
                url: url.clone(),
                detail: detail.clone(),
            },
        },
    }
}

fn to_wire_tool(tool: &ToolSpec) -> WireTool {
    WireTool {
        tool_type: "function".to_string(),
        function: WireFunction {
            name: tool.name.clone(),
            description: Some(tool.description.clone()).filter(|d| !d.is_empty()),
            parameters: match &tool.parameters {
                Value::Null => Some(json!({"type": "object", "properties": {}})),
                schema => Some(schema.clone()),
            },
        },
    }
}

fn to_wire_tool_call(call: &ToolCall) -> WireToolCall {
    WireToolCall {
        id: call.id.clone(),
        tool_type: call.tool_type.clone(),
        function: WireFunctionCall {
            name: call.function.name.clone(),
            arguments: call.function.arguments.clone(),
        },
    }
}

fn tool_choice_value(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Mode(mode) => Value::String(mode.clone()),
        ToolChoice::Function { function, .. } => json!({
            "type": "function",
            "function": {"name": function.name},
        }),
    }
}

fn response_format_value(format: &ResponseFormat) -> Value {
    match format {
        ResponseFormat::Text => json!({"type": "text"}),
        ResponseFormat::JsonObject => json!({"type": "json_object"}),
        ResponseFormat::JsonSchema { json_schema } => match json_schema {
            Some(schema) => json!({"type": "json_schema", "json_schema": schema}),
            None => json!({"type": "json_schema"}),
        },
    }
}
