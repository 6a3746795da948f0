//! Gateway client pipeline
//!
//! Translation, decoding and accounting are plain functions and small state
//! machines; [`GatewayClient`] composes them with the transport.

pub mod accounting;
pub mod accumulator;
pub mod client;
pub mod streaming;
pub mod translator;
pub mod types;

pub use accounting::{heuristic_tokens, TokenAccountant, TokenEstimate};
pub use accumulator::{ToolCallAccumulator, ToolFragment};
pub use client::{GatewayClient, InvocationOutcome, InvocationStream};
pub use streaming::{decode_event_stream, decode_response, DecodeOptions, StreamDecoder, StreamEvents};
pub use translator::{build_body, endpoint, translate};
