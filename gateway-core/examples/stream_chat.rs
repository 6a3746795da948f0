//! Streaming chat against a configured gateway
//!
//! Loads a gateway configuration, validates the credential, then streams one
//! reply and prints its usage.
//!
//! Run with: cargo run --example stream_chat -- gateway.yaml qwen-plus "Tell me a joke"

use futures::StreamExt;
use gateway_core::config::load_from_yaml;
use gateway_core::gateway::GatewayClient;
use gateway_core::protocol::{ChatInvocation, Message, StreamEvent};
use std::io::Write;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let config_path = args.next().unwrap_or_else(|| "gateway.yaml".to_string());
    let model = args.next().unwrap_or_else(|| "deepseek-v3".to_string());
    let prompt = args.next().unwrap_or_else(|| "hello".to_string());

    let config = match load_from_yaml(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {}", config_path, e);
            std::process::exit(1);
        }
    };

    let client = match GatewayClient::from_config(&config) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = client.validate_credentials().await {
        eprintln!("Credential check failed ({}): {}", e.kind, e.message);
        std::process::exit(1);
    }

    let invocation = ChatInvocation::new(vec![
        Message::system("You are a concise assistant."),
        Message::user(prompt),
    ])
    .with_streaming(true);

    let mut stream = match client.stream(&model, &invocation).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("Invocation failed ({}): {}", e.kind, e.message);
            std::process::exit(1);
        }
    };

    let mut stdout = std::io::stdout();
    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::ContentDelta(text) => {
                print!("{}", text);
                let _ = stdout.flush();
            }
            StreamEvent::ToolCallComplete { call, .. } => {
                println!("\n[tool call] {}({})", call.function.name, call.function.arguments);
            }
            StreamEvent::FinishReason(reason) => println!("\n[finish] {}", reason),
            StreamEvent::Error(e) => eprintln!("\n[error] {}", e),
            StreamEvent::ToolCallDelta { .. } | StreamEvent::Usage { .. } => {}
        }
    }

    let usage = stream.usage();
    println!(
        "tokens: {} prompt + {} completion ({:?})",
        usage.prompt_tokens, usage.completion_tokens, usage.source
    );
    if let Some(cost) = usage.cost {
        println!("cost: {:.6} {}", cost.total, cost.currency);
    }
}
