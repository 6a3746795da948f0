//! Error Classifier
//!
//! Maps transport failures, HTTP statuses and gateway error bodies onto the
//! stable [`ErrorKind`] taxonomy. Every error surfaced by the pipeline passes
//! through here.

use crate::error::{ErrorKind, GatewayError};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

/// Statuses that are safe to retry before any body byte was delivered
const TRANSIENT_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Longest slice of an unrecognised body quoted in an error message
const BODY_EXCERPT_CHARS: usize = 200;

/// Classify an HTTP error response
pub fn classify_status(
    status: u16,
    headers: Option<&HeaderMap>,
    body: Option<&str>,
    request_id: Uuid,
) -> GatewayError {
    let json = body.and_then(|b| serde_json::from_str::<Value>(b).ok());
    let shape = json.as_ref().and_then(classify_body_shape);

    let kind = match status {
        401 | 403 => ErrorKind::Auth,
        429 => ErrorKind::RateLimited,
        500..=599 => ErrorKind::UpstreamUnavailable,
        _ => match shape {
            Some(kind) => kind,
            None => match status {
                404 => ErrorKind::NotFound,
                400 | 413 | 415 | 422 => ErrorKind::InvalidParameter,
                _ => ErrorKind::Unknown,
            },
        },
    };

    let message = extract_error_message(status, json.as_ref(), body);
    let retry_after = headers
        .and_then(|h| h.get(RETRY_AFTER))
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);

    GatewayError::new(kind, format!("{} [request_id: {}]", message, request_id))
        .with_status(status)
        .with_retriable(kind.is_transient() && TRANSIENT_STATUSES.contains(&status))
        .with_retry_after(retry_after)
}

/// Classify a reqwest failure raised before any response byte was read
pub fn classify_transport(err: &reqwest::Error, request_id: Uuid) -> GatewayError {
    if err.is_builder() {
        return GatewayError::invalid_parameter(format!(
            "Failed to build request: {} [request_id: {}]",
            err, request_id
        ));
    }

    if err.is_timeout() {
        return GatewayError::upstream(format!(
            "Request timed out [request_id: {}]",
            request_id
        ));
    }

    if err.is_connect() {
        return GatewayError::upstream(format!(
            "Connection failed: {} [request_id: {}]",
            err, request_id
        ));
    }

    if err.is_decode() {
        return GatewayError::unknown(format!(
            "Failed to decode response: {} [request_id: {}]",
            err, request_id
        ));
    }

    // Resets and other I/O failures before the body arrived
    GatewayError::upstream(format!("{} [request_id: {}]", err, request_id))
}

/// Detect an error carried inside an otherwise successful JSON response
pub fn classify_in_band(json: &Value) -> Option<GatewayError> {
    let error = json.get("error")?;
    if error.is_null() {
        return None;
    }

    let kind = classify_body_shape(json).unwrap_or(ErrorKind::Unknown);
    let message = message_from_json(json)
        .unwrap_or_else(|| format!("Gateway reported an error: {}", error));

    Some(GatewayError::new(kind, message))
}

/// Recognise well-known error body shapes
///
/// Looks at `error.type`, `error.code`, `error.message`, a string `error`
/// and a top-level `message`.
pub fn classify_body_shape(json: &Value) -> Option<ErrorKind> {
    let mut haystack = String::new();
    match json.get("error") {
        Some(Value::Object(error)) => {
            for key in ["type", "code", "message"] {
                if let Some(value) = error.get(key) {
                    match value {
                        Value::String(s) => haystack.push_str(s),
                        other => haystack.push_str(&other.to_string()),
                    }
                    haystack.push(' ');
                }
            }
        }
        Some(Value::String(s)) => {
            haystack.push_str(s);
            haystack.push(' ');
        }
        _ => {}
    }
    if let Some(message) = json.get("message").and_then(Value::as_str) {
        haystack.push_str(message);
    }

    let haystack = haystack.to_lowercase();
    if haystack.trim().is_empty() {
        return None;
    }

    let has = |needles: &[&str]| needles.iter().any(|needle| haystack.contains(needle));

    if has(&["invalid_api_key", "unauthorized", "authentication", "invalid api key", "permission_denied", "forbidden"]) {
        Some(ErrorKind::Auth)
    } else if has(&["model_not_found", "does not exist", "unknown model", "no such model"])
        || (haystack.contains("model") && haystack.contains("not found"))
    {
        Some(ErrorKind::NotFound)
    } else if has(&["rate_limit", "rate limit", "too many requests", "insufficient_quota"]) {
        Some(ErrorKind::RateLimited)
    } else if has(&["invalid_request", "invalid_parameter", "invalid parameter", "bad request", "malformed", "context_length_exceeded"]) {
        Some(ErrorKind::InvalidParameter)
    } else if has(&["server_error", "overloaded", "service unavailable", "upstream"]) {
        Some(ErrorKind::UpstreamUnavailable)
    } else {
        None
    }
}

/// Human-readable message for an error response
///
/// Prefers `error.message`, then a string `error`, then a top-level
/// `message`; otherwise quotes the start of the raw body.
pub fn extract_error_message(status: u16, json: Option<&Value>, body: Option<&str>) -> String {
    if let Some(message) = json.and_then(message_from_json) {
        return message;
    }

    match body.map(str::trim).filter(|b| !b.is_empty()) {
        Some(body) => {
            let excerpt: String = body.chars().take(BODY_EXCERPT_CHARS).collect();
            format!("HTTP {}: {}", status, excerpt)
        }
        None => format!("HTTP {}", status),
    }
}

fn message_from_json(json: &Value) -> Option<String> {
    if let Some(message) = json
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
    {
        return Some(message.to_string());
    }

    if let Some(error) = json.get("error").and_then(Value::as_str) {
        return Some(error.to_string());
    }

    json.get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Parse a `Retry-After` header given in seconds
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let value = header_value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    // Some gateways send fractional seconds
    value
        .parse::<f64>()
        .ok()
        .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
        .map(Duration::from_secs_f64)
}
