//! Tests for the retry engine against a mock gateway

use gateway_core::error::{ErrorKind, GatewayError};
use gateway_core::http::error::classify_status;
use gateway_core::http::{HttpClient, HttpExecutor, RequestOptions, RetryExecutor, RetryPolicy, WireRequest};
use proptest::prelude::*;
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn policy(max_attempts: u32, jitter_factor: f64) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_delay_ms: 2,
        max_delay_ms: 20,
        exponential_base: 2.0,
        jitter_factor,
        respect_retry_after: true,
    }
}

fn wire_request(url: String) -> WireRequest {
    WireRequest {
        method: reqwest::Method::POST,
        url,
        headers: vec![
            ("Authorization".to_string(), "Bearer sk-test".to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ],
        body: json!({"messages": [{"role": "user", "content": "hello"}]}),
        stream: false,
    }
}

fn rate_limited() -> GatewayError {
    classify_status(429, None, Some(r#"{"error":{"message":"slow down"}}"#), Uuid::nil())
}

#[test]
fn test_backoff_doubles_and_caps() {
    let policy = policy(10, 0.0);
    let error = rate_limited();
    let delays: Vec<u64> = (0..6)
        .map(|retry| policy.calculate_delay(retry, &error).as_millis() as u64)
        .collect();
    assert_eq!(delays, vec![2, 4, 8, 16, 20, 20]);
}

#[test]
fn test_retry_after_is_a_floor() {
    let policy = policy(3, 0.0);
    let error = rate_limited().with_retry_after(Some(Duration::from_millis(15)));
    assert_eq!(policy.calculate_delay(0, &error), Duration::from_millis(15));

    let huge = rate_limited().with_retry_after(Some(Duration::from_secs(60)));
    assert_eq!(policy.calculate_delay(0, &huge), Duration::from_millis(20));
}

#[tokio::test]
async fn test_rate_limits_then_success_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({"error": {"message": "Rate limit"}})))
        .up_to_n_times(3)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let client = HttpClient::new().unwrap();
    let request = wire_request(format!("{}/qwen-plus", server.uri()));
    let options = RequestOptions::new();

    let outcome = RetryExecutor::new(policy(5, 0.0))
        .execute(|_| client.execute_json(&request, &options))
        .await;

    assert_eq!(outcome.attempts, 4);
    assert_eq!(outcome.delays.len(), 3);
    assert!(outcome.delays.windows(2).all(|w| w[0] <= w[1]));
    assert!(outcome.result.is_ok());
}

#[tokio::test]
async fn test_attempt_bound_respected_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let client = HttpClient::new().unwrap();
    let request = wire_request(format!("{}/qwen-plus", server.uri()));
    let options = RequestOptions::new();

    let outcome = RetryExecutor::new(policy(3, 0.0))
        .execute(|_| client.execute_json(&request, &options))
        .await;

    assert_eq!(outcome.attempts, 3);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
    let error = outcome.into_result().unwrap_err();
    assert_eq!(error.kind, ErrorKind::RateLimited);
    assert!(error.retriable);
}

#[tokio::test]
async fn test_bad_request_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"error": {"message": "messages: field required"}})),
        )
        .mount(&server)
        .await;

    let client = HttpClient::new().unwrap();
    let request = wire_request(format!("{}/qwen-plus", server.uri()));
    let options = RequestOptions::new();

    let outcome = RetryExecutor::new(policy(3, 0.0))
        .execute(|_| client.execute_json(&request, &options))
        .await;

    assert_eq!(outcome.attempts, 1);
    let error = outcome.into_result().unwrap_err();
    assert_eq!(error.kind, ErrorKind::InvalidParameter);
    assert_eq!(error.status, Some(400));
}

#[tokio::test]
async fn test_connection_refused_is_upstream() {
    // Bind and drop to get a port nothing listens on
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let client = HttpClient::new().unwrap();
    let request = wire_request(format!("http://127.0.0.1:{}/qwen-plus", port));
    let error = client
        .execute_json(&request, &RequestOptions::new())
        .await
        .unwrap_err();

    assert_eq!(error.kind, ErrorKind::UpstreamUnavailable);
    assert!(error.retriable);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_rate_limit_sequence(failures in 0u32..8, max_attempts in 1u32..6, jitter in 0.0f64..1.0) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let outcome = runtime.block_on(
            RetryExecutor::new(policy(max_attempts, jitter)).execute(|attempt| async move {
                if attempt <= failures {
                    Err(rate_limited())
                } else {
                    Ok(attempt)
                }
            }),
        );

        prop_assert!(outcome.attempts <= max_attempts);
        prop_assert!(outcome.delays.windows(2).all(|w| w[0] <= w[1]));
        prop_assert_eq!(outcome.delays.len() as u32, outcome.attempts - 1);
        prop_assert_eq!(outcome.result.is_ok(), failures < max_attempts);
    }
}
