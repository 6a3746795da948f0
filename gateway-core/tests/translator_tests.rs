//! Request translation and model resolution tests

use gateway_core::capabilities::{catalog, DescriptorOrigin, ModelDescriptor, ModelResolver};
use gateway_core::config::GatewaySettings;
use gateway_core::error::ErrorKind;
use gateway_core::gateway::{build_body, translate, TokenAccountant};
use gateway_core::protocol::{
    ChatInvocation, ContentPart, Message, MessageBuilder, MessageRole, ResponseFormat, ToolCall,
    ToolChoice, ToolSpec,
};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

fn settings() -> GatewaySettings {
    GatewaySettings::new("https://llm-gateway.internal/v1", "sk-test")
}

fn body_of(invocation: &ChatInvocation, descriptor: &ModelDescriptor) -> Value {
    serde_json::to_value(build_body(invocation, descriptor).unwrap()).unwrap()
}

#[test]
fn test_minimal_body() {
    let resolver = ModelResolver::new();
    let invocation = ChatInvocation::new(vec![Message::user("hello")]);
    let request = translate(
        &invocation,
        "gpt4-128k",
        &resolver.resolve("gpt4-128k"),
        &settings(),
        Uuid::new_v4(),
    )
    .unwrap();

    assert_eq!(request.url, "https://llm-gateway.internal/v1/gpt4-128k");
    assert_eq!(request.method, reqwest::Method::POST);
    assert_eq!(request.body, json!({"messages": [{"role": "user", "content": "hello"}]}));
    assert!(!request.stream);
}

#[test]
fn test_preconditions() {
    let resolver = ModelResolver::new();
    let descriptor = resolver.resolve("qwen-plus");

    let empty = ChatInvocation::new(Vec::new());
    let error = translate(&empty, "qwen-plus", &descriptor, &settings(), Uuid::nil()).unwrap_err();
    assert_eq!(error.kind, ErrorKind::InvalidParameter);
    assert!(!error.retriable);

    let hello = ChatInvocation::new(vec![Message::user("hello")]);
    let error = translate(&hello, "  ", &descriptor, &settings(), Uuid::nil()).unwrap_err();
    assert_eq!(error.kind, ErrorKind::InvalidParameter);
}

#[test]
fn test_full_conversation_with_tools() {
    let resolver = ModelResolver::new();
    let descriptor = resolver.resolve("qwen-plus");
    let call = ToolCall::function("call_9", "weather", r#"{"city":"Oslo"}"#);
    let invocation = ChatInvocation::new(vec![
        Message::system("be brief"),
        Message::user("weather in Oslo?"),
        MessageBuilder::new(MessageRole::Assistant, "")
            .with_tool_calls(vec![call])
            .build(),
        Message::tool("call_9", "-3C, snow"),
    ])
    .with_tools(vec![ToolSpec::new(
        "weather",
        "Current weather",
        json!({"type": "object", "properties": {"city": {"type": "string"}}}),
    )])
    .with_tool_choice(ToolChoice::function("weather"))
    .with_temperature(0.2)
    .with_response_format(ResponseFormat::JsonObject)
    .with_streaming(true);

    let body = body_of(&invocation, &descriptor);

    assert_eq!(body["messages"][2], json!({
        "role": "assistant",
        "tool_calls": [{"id": "call_9", "type": "function", "function": {"name": "weather", "arguments": "{\"city\":\"Oslo\"}"}}]
    }));
    assert_eq!(body["messages"][3], json!({"role": "tool", "content": "-3C, snow", "tool_call_id": "call_9"}));
    assert_eq!(body["tools"][0]["type"], "function");
    assert_eq!(body["tools"][0]["function"]["name"], "weather");
    assert_eq!(body["tool_choice"], json!({"type": "function", "function": {"name": "weather"}}));
    assert_eq!(body["temperature"], json!(0.2));
    assert_eq!(body["response_format"], json!({"type": "json_object"}));
    assert_eq!(body["stream"], json!(true));
}

#[test]
fn test_default_tool_choice_is_auto() {
    let descriptor = ModelResolver::new().resolve("deepseek-v3");
    let invocation = ChatInvocation::new(vec![Message::user("hi")])
        .with_tools(vec![ToolSpec::new("f", "", Value::Null)]);
    let body = body_of(&invocation, &descriptor);
    assert_eq!(body["tool_choice"], "auto");
    assert_eq!(body["tools"][0]["function"]["parameters"], json!({"type": "object", "properties": {}}));
    assert!(body["tools"][0]["function"].get("description").is_none());
}

#[test]
fn test_image_parts_preserved() {
    let descriptor = ModelResolver::new().resolve("gpt4-128k");
    let message = MessageBuilder::with_parts(
        MessageRole::User,
        vec![
            ContentPart::Text { text: "describe".into() },
            ContentPart::ImageUrl { url: "https://img.internal/cat.png".into(), detail: Some("low".into()) },
        ],
    )
    .build();
    let body = body_of(&ChatInvocation::new(vec![message]), &descriptor);
    assert_eq!(
        body["messages"][0]["content"],
        json!([
            {"type": "text", "text": "describe"},
            {"type": "image_url", "image_url": {"url": "https://img.internal/cat.png", "detail": "low"}}
        ])
    );
}

#[test]
fn test_resolver_caches_and_synthesizes() {
    let resolver = ModelResolver::new();
    let first = resolver.resolve("brand-new-model");
    let second = resolver.resolve("brand-new-model");

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.origin, DescriptorOrigin::Synthesized);
    assert!(first.pricing.is_none());
    assert!(!resolver.is_known("brand-new-model"));

    for id in catalog::builtin_ids() {
        assert!(resolver.is_known(id));
        assert_eq!(resolver.resolve(id).origin, DescriptorOrigin::Curated);
    }
}

#[test]
fn test_replacement_leaves_old_descriptor_intact() {
    let resolver = ModelResolver::new();
    let old = resolver.resolve("qwen-turbo");

    let mut newer = (*old).clone();
    newer.context_window = 1024;
    resolver.replace(newer);

    assert_eq!(old.context_window, 131072);
    assert_eq!(resolver.resolve("qwen-turbo").context_window, 1024);
}

#[test]
fn test_unknown_model_cost_unavailable() {
    let resolver = ModelResolver::new();
    let accountant = TokenAccountant::new();
    let record = accountant.record(
        &resolver.resolve("mystery"),
        Some((100, 50)),
        &[],
        &[],
        "",
        &[],
        None,
    );
    assert_eq!(record.total_tokens, 150);
    assert_eq!(record.cost, None);
}

proptest! {
    #[test]
    fn prop_max_tokens_never_exceeds_ceiling(
        requested in 1u32..1_000_000,
        model in prop::sample::select(vec![
            "gpt4-128k", "qwen-plus", "qwen-turbo", "deepseek-v3",
            "deepseek-coder", "doubao-pro", "doubao-lite", "unknown-model",
        ]),
    ) {
        let descriptor = ModelResolver::new().resolve(model);
        let invocation = ChatInvocation::new(vec![Message::user("hi")]).with_max_tokens(requested);
        let body = build_body(&invocation, &descriptor).unwrap();

        let sent = body.max_tokens.unwrap();
        prop_assert!(sent <= descriptor.max_tokens_ceiling());
        prop_assert_eq!(sent, requested.min(descriptor.max_tokens_ceiling()));
    }

    #[test]
    fn prop_sampling_clamped_into_range(
        temperature in -10.0f64..10.0,
        top_p in -2.0f64..2.0,
    ) {
        let descriptor = ModelDescriptor::synthesized("m");
        let invocation = ChatInvocation::new(vec![Message::user("hi")])
            .with_temperature(temperature)
            .with_top_p(top_p);
        let body = build_body(&invocation, &descriptor).unwrap();

        prop_assert!(descriptor.limits.temperature.contains(body.temperature.unwrap()));
        prop_assert!(descriptor.limits.top_p.contains(body.top_p.unwrap()));
    }

    #[test]
    fn prop_cost_matches_rates(prompt in 0u32..2_000_000, completion in 0u32..2_000_000) {
        let accountant = TokenAccountant::new();
        let descriptor = ModelResolver::new().resolve("doubao-pro");
        let pricing = descriptor.pricing.clone().unwrap();

        let record = accountant.record(&descriptor, Some((prompt, completion)), &[], &[], "", &[], None);
        let cost = record.cost.unwrap();
        prop_assert_eq!(cost.input, f64::from(prompt) * pricing.input / 1000.0);
        prop_assert_eq!(cost.output, f64::from(completion) * pricing.output / 1000.0);
        prop_assert_eq!(record.total_tokens, prompt + completion);
    }
}
