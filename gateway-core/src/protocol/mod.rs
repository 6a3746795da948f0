//! Protocol module for invocation and result structures
//!
//! This module defines the caller-facing data model of the gateway client.
//! These structures are:
//! - Backend-agnostic
//! - Shared by the streaming and non-streaming paths
//! - Type-safe and serializable

pub mod types;

pub use types::{
    enforce_stop_sequences, ChatInvocation, ChatResult, ContentPart, Cost, FinishReason,
    FunctionCall, FunctionChoice, Message, MessageBuilder, MessageContent, MessageRole,
    ResponseFormat, SamplingParams, StreamEvent, ToolCall, ToolChoice, ToolSpec, UsageRecord,
    UsageSource,
};
