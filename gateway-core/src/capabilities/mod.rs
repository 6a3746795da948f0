//! Model capability descriptors
//!
//! A [`ModelDescriptor`] is the resolved capability and pricing profile of one
//! model identifier behind the gateway: context window, advertised features,
//! parameter bounds and per-token pricing. Descriptors come from the built-in
//! [`catalog`], from the configured model table, or are synthesized with
//! conservative defaults by the [`ModelResolver`].

use serde::{Deserialize, Serialize};

pub mod catalog;
pub mod resolver;

pub use resolver::ModelResolver;

/// Context window assumed for models nothing is known about
pub const DEFAULT_CONTEXT_WINDOW: u32 = 4096;

/// Resolved capability profile for a model identifier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelDescriptor {
    /// Model identifier (also the last path segment of the endpoint)
    pub id: String,

    /// Maximum context window (input + output)
    #[serde(default = "default_context_window")]
    pub context_window: u32,

    /// Advertised features
    #[serde(default)]
    pub features: ModelFeatures,

    /// Parameter bounds
    #[serde(default)]
    pub limits: ParameterLimits,

    /// Pricing; `None` when unknown
    #[serde(default)]
    pub pricing: Option<Pricing>,

    /// Tokenizer used for local estimates; `None` falls back to the heuristic
    #[serde(default)]
    pub encoding: Option<TokenEncoding>,

    /// Where this descriptor came from
    #[serde(default = "DescriptorOrigin::configured")]
    pub origin: DescriptorOrigin,
}

fn default_context_window() -> u32 {
    DEFAULT_CONTEXT_WINDOW
}

/// Features a model advertises
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelFeatures {
    /// Function/tool calling support
    pub tool_calling: bool,

    /// Tool-call fragments are delivered incrementally when streaming
    pub stream_tool_calling: bool,

    /// Image content parts are accepted
    pub vision: bool,

    /// JSON mode for structured output
    pub json_mode: bool,
}

/// Bounds applied to sampling parameters before they go on the wire
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ParameterLimits {
    /// Ceiling for `max_tokens`; the context window when absent
    pub max_output_tokens: Option<u32>,

    /// Accepted temperature range
    pub temperature: ParameterRange,

    /// Accepted top_p range
    pub top_p: ParameterRange,
}

impl Default for ParameterLimits {
    fn default() -> Self {
        Self {
            max_output_tokens: None,
            temperature: ParameterRange::new(0.0, 2.0),
            top_p: ParameterRange::new(0.0, 1.0),
        }
    }
}

/// Inclusive numeric range
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ParameterRange {
    pub min: f64,
    pub max: f64,
}

impl ParameterRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Clamp `value` into the range
    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.min).min(self.max)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Pricing information
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pricing {
    /// Price per `unit` input tokens
    pub input: f64,

    /// Price per `unit` output tokens
    pub output: f64,

    /// Currency code (e.g., "USD")
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Number of tokens the prices refer to
    #[serde(default = "default_price_unit")]
    pub unit: u32,
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_price_unit() -> u32 {
    1000
}

impl Pricing {
    /// Prices per 1K tokens in USD
    pub fn per_thousand_usd(input: f64, output: f64) -> Self {
        Self {
            input,
            output,
            currency: default_currency(),
            unit: default_price_unit(),
        }
    }
}

/// BPE encodings the accountant can count with
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TokenEncoding {
    Cl100kBase,
    O200kBase,
}

/// Source of a descriptor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorOrigin {
    /// Built-in catalog entry
    Curated,
    /// Supplied by the configuration's model table
    Configured,
    /// Conservative defaults for an unknown identifier
    Synthesized,
}

impl DescriptorOrigin {
    fn configured() -> Self {
        DescriptorOrigin::Configured
    }
}

impl ModelDescriptor {
    /// Conservative descriptor for an identifier nothing is known about:
    /// default context window, no advanced features, unknown pricing.
    pub fn synthesized(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            context_window: DEFAULT_CONTEXT_WINDOW,
            features: ModelFeatures::default(),
            limits: ParameterLimits::default(),
            pricing: None,
            encoding: None,
            origin: DescriptorOrigin::Synthesized,
        }
    }

    /// Effective `max_tokens` ceiling
    pub fn max_tokens_ceiling(&self) -> u32 {
        self.limits
            .max_output_tokens
            .unwrap_or(self.context_window)
            .min(self.context_window)
    }

    pub fn supports_tools(&self) -> bool {
        self.features.tool_calling
    }

    pub fn is_synthesized(&self) -> bool {
        self.origin == DescriptorOrigin::Synthesized
    }
}
