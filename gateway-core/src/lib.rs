//! Gateway Core Library
//!
//! Client pipeline for an internal, OpenAI-compatible LLM gateway: model
//! descriptor resolution, request translation, transport with bounded retry,
//! streaming decode with tool-call reassembly, token accounting and error
//! classification.

pub mod capabilities;
pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod protocol;

pub use capabilities::{ModelDescriptor, ModelResolver};
pub use config::{GatewayConfig, GatewaySettings};
pub use error::{ErrorKind, GatewayError, GatewayResult};
pub use gateway::{GatewayClient, InvocationOutcome, InvocationStream};
pub use http::RetryPolicy;
pub use protocol::{ChatInvocation, ChatResult, Message, StreamEvent, UsageRecord};

/// Returns the version of the gateway core library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
