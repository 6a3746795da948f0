//! Built-in catalog of models known to sit behind the gateway

use super::{
    DescriptorOrigin, ModelDescriptor, ModelFeatures, ParameterLimits, Pricing, TokenEncoding,
};

struct CatalogEntry {
    id: &'static str,
    context_window: u32,
    max_output_tokens: u32,
    features: ModelFeatures,
    input_per_1k: f64,
    output_per_1k: f64,
}

const CHAT_WITH_TOOLS: ModelFeatures = ModelFeatures {
    tool_calling: true,
    stream_tool_calling: true,
    vision: false,
    json_mode: true,
};

const CHAT_ONLY: ModelFeatures = ModelFeatures {
    tool_calling: false,
    stream_tool_calling: false,
    vision: false,
    json_mode: false,
};

const ENTRIES: &[CatalogEntry] = &[
    CatalogEntry {
        id: "gpt4-128k",
        context_window: 128_000,
        max_output_tokens: 4096,
        features: ModelFeatures {
            vision: true,
            ..CHAT_WITH_TOOLS
        },
        input_per_1k: 0.01,
        output_per_1k: 0.03,
    },
    CatalogEntry {
        id: "qwen-plus",
        context_window: 131_072,
        max_output_tokens: 8192,
        features: CHAT_WITH_TOOLS,
        input_per_1k: 0.008,
        output_per_1k: 0.02,
    },
    CatalogEntry {
        id: "qwen-turbo",
        context_window: 131_072,
        max_output_tokens: 8192,
        features: CHAT_WITH_TOOLS,
        input_per_1k: 0.003,
        output_per_1k: 0.008,
    },
    CatalogEntry {
        id: "deepseek-v3",
        context_window: 65_536,
        max_output_tokens: 8192,
        features: CHAT_WITH_TOOLS,
        input_per_1k: 0.0014,
        output_per_1k: 0.0028,
    },
    CatalogEntry {
        id: "deepseek-coder",
        context_window: 16_384,
        max_output_tokens: 4096,
        features: CHAT_ONLY,
        input_per_1k: 0.0014,
        output_per_1k: 0.0028,
    },
    CatalogEntry {
        id: "doubao-pro",
        context_window: 32_768,
        max_output_tokens: 4096,
        features: CHAT_WITH_TOOLS,
        input_per_1k: 0.005,
        output_per_1k: 0.015,
    },
    CatalogEntry {
        id: "doubao-lite",
        context_window: 32_768,
        max_output_tokens: 4096,
        features: CHAT_ONLY,
        input_per_1k: 0.0007,
        output_per_1k: 0.001,
    },
];

impl CatalogEntry {
    fn descriptor(&self) -> ModelDescriptor {
        ModelDescriptor {
            id: self.id.to_string(),
            context_window: self.context_window,
            features: self.features,
            limits: ParameterLimits {
                max_output_tokens: Some(self.max_output_tokens),
                ..ParameterLimits::default()
            },
            pricing: Some(Pricing::per_thousand_usd(
                self.input_per_1k,
                self.output_per_1k,
            )),
            encoding: Some(TokenEncoding::Cl100kBase),
            origin: DescriptorOrigin::Curated,
        }
    }
}

/// All curated descriptors
pub fn builtin_models() -> Vec<ModelDescriptor> {
    ENTRIES.iter().map(CatalogEntry::descriptor).collect()
}

/// Identifiers of all curated models
pub fn builtin_ids() -> impl Iterator<Item = &'static str> {
    ENTRIES.iter().map(|entry| entry.id)
}
