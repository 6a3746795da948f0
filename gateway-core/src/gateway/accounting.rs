//! Token Accountant
//!
//! Produces the [`UsageRecord`] of an invocation. Counts reported by the
//! gateway are used as-is; otherwise the accountant counts locally with the
//! model's BPE encoding, or falls back to a character heuristic. The record's
//! [`UsageSource`] tells the three apart.

use crate::capabilities::{ModelDescriptor, Pricing, TokenEncoding};
use crate::protocol::{
    ContentPart, Cost, Message, MessageContent, ToolCall, ToolSpec, UsageRecord, UsageSource,
};
use std::sync::LazyLock;
use std::time::Duration;
use tiktoken_rs::CoreBPE;
use tracing::{debug, warn};

/// Tokens framing every message
const TOKENS_PER_MESSAGE: u32 = 3;

/// Extra token when a message carries a `name`
const TOKENS_PER_NAME: u32 = 1;

/// Tokens priming the assistant reply
const REPLY_PRIMING_TOKENS: u32 = 3;

/// Flat charge for an image part
const TOKENS_PER_IMAGE: u32 = 85;

/// Characters per token for the heuristic
const CHARS_PER_TOKEN: u32 = 4;

static CL100K: LazyLock<Option<CoreBPE>> = LazyLock::new(|| match tiktoken_rs::cl100k_base() {
    Ok(bpe) => Some(bpe),
    Err(e) => {
        warn!("cl100k_base encoding unavailable, using heuristic: {}", e);
        None
    }
});

static O200K: LazyLock<Option<CoreBPE>> = LazyLock::new(|| match tiktoken_rs::o200k_base() {
    Ok(bpe) => Some(bpe),
    Err(e) => {
        warn!("o200k_base encoding unavailable, using heuristic: {}", e);
        None
    }
});

/// Counts text either with a BPE encoding or by characters
#[derive(Clone, Copy)]
enum Counter {
    Bpe(&'static CoreBPE),
    Heuristic,
}

impl Counter {
    fn for_encoding(encoding: Option<TokenEncoding>) -> Self {
        let bpe = match encoding {
            Some(TokenEncoding::Cl100kBase) => CL100K.as_ref(),
            Some(TokenEncoding::O200kBase) => O200K.as_ref(),
            None => None,
        };
        bpe.map_or(Counter::Heuristic, Counter::Bpe)
    }

    fn source(&self) -> UsageSource {
        match self {
            Counter::Bpe(_) => UsageSource::Tokenizer,
            Counter::Heuristic => UsageSource::Heuristic,
        }
    }

    fn count(&self, text: &str) -> u32 {
        if text.is_empty() {
            return 0;
        }
        match self {
            Counter::Bpe(bpe) => saturating_u32(bpe.encode_with_special_tokens(text).len()),
            Counter::Heuristic => heuristic_tokens(text),
        }
    }
}

/// Character-count estimate, rounded up
pub fn heuristic_tokens(text: &str) -> u32 {
    let chars = saturating_u32(text.chars().count());
    chars.div_ceil(CHARS_PER_TOKEN)
}

fn saturating_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// Local token estimate with its provenance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenEstimate {
    pub tokens: u32,
    pub source: UsageSource,
}

/// Stateless usage and cost calculator
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenAccountant;

impl TokenAccountant {
    pub fn new() -> Self {
        Self
    }

    /// Estimate prompt tokens for a message set and its tool definitions
    pub fn estimate_prompt(
        &self,
        descriptor: &ModelDescriptor,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> TokenEstimate {
        let counter = Counter::for_encoding(descriptor.encoding);

        let mut tokens = REPLY_PRIMING_TOKENS;
        for message in messages {
            tokens = tokens
                .saturating_add(TOKENS_PER_MESSAGE)
                .saturating_add(counter.count(message.role.as_str()))
                .saturating_add(count_content(&counter, &message.content));

            if let Some(name) = &message.name {
                tokens = tokens
                    .saturating_add(TOKENS_PER_NAME)
                    .saturating_add(counter.count(name));
            }
            if let Some(calls) = &message.tool_calls {
                tokens = tokens.saturating_add(count_tool_calls(&counter, calls));
            }
            if let Some(id) = &message.tool_call_id {
                tokens = tokens.saturating_add(counter.count(id));
            }
        }

        for tool in tools {
            tokens = tokens
                .saturating_add(counter.count(&tool.name))
                .saturating_add(counter.count(&tool.description))
                .saturating_add(counter.count(&tool.parameters.to_string()));
        }

        TokenEstimate {
            tokens,
            source: counter.source(),
        }
    }

    /// Estimate completion tokens for generated text and tool calls
    pub fn estimate_completion(
        &self,
        descriptor: &ModelDescriptor,
        text: &str,
        tool_calls: &[ToolCall],
    ) -> TokenEstimate {
        let counter = Counter::for_encoding(descriptor.encoding);
        TokenEstimate {
            tokens: counter
                .count(text)
                .saturating_add(count_tool_calls(&counter, tool_calls)),
            source: counter.source(),
        }
    }

    /// Cost of `prompt_tokens` + `completion_tokens`; `None` without pricing
    pub fn cost(
        &self,
        prompt_tokens: u32,
        completion_tokens: u32,
        pricing: Option<&Pricing>,
    ) -> Option<Cost> {
        let pricing = pricing?;
        let unit = f64::from(pricing.unit.max(1));
        let input = f64::from(prompt_tokens) * pricing.input / unit;
        let output = f64::from(completion_tokens) * pricing.output / unit;
        Some(Cost {
            input,
            output,
            total: input + output,
            currency: pricing.currency.clone(),
        })
    }

    /// Build the usage record of a finished invocation
    ///
    /// `reported` holds the gateway's (prompt, completion) counts when it sent
    /// them; otherwise both sides are estimated.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        descriptor: &ModelDescriptor,
        reported: Option<(u32, u32)>,
        messages: &[Message],
        tools: &[ToolSpec],
        completion_text: &str,
        tool_calls: &[ToolCall],
        latency: Option<Duration>,
    ) -> UsageRecord {
        let (prompt_tokens, completion_tokens, source) = match reported {
            Some((prompt, completion)) => (prompt, completion, UsageSource::Authoritative),
            None => {
                let prompt = self.estimate_prompt(descriptor, messages, tools);
                let completion = self.estimate_completion(descriptor, completion_text, tool_calls);
                debug!(
                    "Estimated usage for '{}': {} prompt, {} completion ({:?})",
                    descriptor.id, prompt.tokens, completion.tokens, prompt.source
                );
                (prompt.tokens, completion.tokens, prompt.source)
            }
        };

        let cost = self.cost(prompt_tokens, completion_tokens, descriptor.pricing.as_ref());
        if cost.is_none() {
            debug!("No pricing for model '{}'; cost unavailable", descriptor.id);
        }

        UsageRecord {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
            cost,
            source,
            latency,
        }
    }
}

fn count_content(counter: &Counter, content: &MessageContent) -> u32 {
    match content {
        MessageContent::Text(text) => counter.count(text),
        MessageContent::Parts(parts) => parts.iter().fold(0u32, |sum, part| {
            sum.saturating_add(match part {
                ContentPart::Text { text } => counter.count(text),
                ContentPart::ImageUrl { .. } => TOKENS_PER_IMAGE,
            })
        }),
    }
}

fn count_tool_calls(counter: &Counter, calls: &[ToolCall]) -> u32 {
    calls.iter().fold(0u32, |sum, call| {
        sum.saturating_add(counter.count(&call.function.name))
            .saturating_add(counter.count(&call.function.arguments))
    })
}
