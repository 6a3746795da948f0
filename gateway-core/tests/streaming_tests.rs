//! Streaming decoder tests over raw byte streams

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use gateway_core::error::{ErrorKind, GatewayError, GatewayResult};
use gateway_core::gateway::{decode_event_stream, DecodeOptions};
use gateway_core::http::{ByteStream, MAX_RESPONSE_SIZE};
use gateway_core::protocol::{FinishReason, StreamEvent};
use proptest::prelude::*;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn options() -> DecodeOptions {
    DecodeOptions {
        request_id: Uuid::new_v4(),
        idle_timeout: Duration::from_secs(5),
        cancellation: None,
        max_body_size: MAX_RESPONSE_SIZE,
    }
}

fn body_from(chunks: Vec<Vec<u8>>) -> ByteStream {
    let chunks: Vec<GatewayResult<Bytes>> = chunks.into_iter().map(|c| Ok(Bytes::from(c))).collect();
    stream::iter(chunks).boxed()
}

/// Split `bytes` at the given cut points
fn split_at_points(bytes: &[u8], mut cuts: Vec<usize>) -> Vec<Vec<u8>> {
    cuts.retain(|cut| *cut > 0 && *cut < bytes.len());
    cuts.sort_unstable();
    cuts.dedup();

    let mut chunks = Vec::new();
    let mut start = 0;
    for cut in cuts {
        chunks.push(bytes[start..cut].to_vec());
        start = cut;
    }
    chunks.push(bytes[start..].to_vec());
    chunks
}

fn decode_blocking(chunks: Vec<Vec<u8>>) -> Vec<StreamEvent> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(decode_event_stream(body_from(chunks), options()).collect())
}

fn tool_call_stream(fragments: &[String]) -> String {
    let mut body = String::new();
    body.push_str(
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"type\":\"function\",\"function\":{\"name\":\"search\",\"arguments\":\"\"}}]}}]}\n\n",
    );
    for fragment in fragments {
        let frame = serde_json::json!({
            "choices": [{"index": 0, "delta": {"tool_calls": [{"index": 0, "function": {"arguments": fragment}}]}}]
        });
        body.push_str(&format!("data: {}\n\n", frame));
    }
    body.push_str("data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n");
    body.push_str("data: [DONE]\n\n");
    body
}

fn completed_arguments(events: &[StreamEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            StreamEvent::ToolCallComplete { call, .. } => Some(call.function.arguments.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_frames_split_across_reads() {
    let body = "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choi";
    let rest = "ces\":[{\"index\":0,\"delta\":{\"content\":\"lo\"}}]}\n\ndata: [DO";
    let tail = "NE]\n\n";

    let events: Vec<StreamEvent> = decode_event_stream(
        body_from(vec![body.into(), rest.into(), tail.into()]),
        options(),
    )
    .collect()
    .await;

    assert_eq!(
        events,
        vec![
            StreamEvent::ContentDelta("Hel".into()),
            StreamEvent::ContentDelta("lo".into()),
        ]
    );
}

#[tokio::test]
async fn test_nothing_after_sentinel() {
    let body = "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"length\"}]}\n\ndata: [DONE]\n\ndata: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"late\"}}]}\n\n";
    let events: Vec<StreamEvent> = decode_event_stream(body_from(vec![body.into()]), options())
        .collect()
        .await;
    assert_eq!(events, vec![StreamEvent::FinishReason(FinishReason::Length)]);
}

#[tokio::test]
async fn test_transport_error_is_terminal() {
    let chunks: Vec<GatewayResult<Bytes>> = vec![
        Ok(Bytes::from_static(b"data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"a\"}}]}\n\n")),
        Err(GatewayError::upstream("connection reset")),
        Ok(Bytes::from_static(b"data: [DONE]\n\n")),
    ];
    let events: Vec<StreamEvent> = decode_event_stream(stream::iter(chunks).boxed(), options())
        .collect()
        .await;

    assert_eq!(events.len(), 2);
    match &events[1] {
        StreamEvent::Error(error) => {
            assert_eq!(error.kind, ErrorKind::UpstreamUnavailable);
            assert!(!error.retriable);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_idle_timeout() {
    let first: GatewayResult<Bytes> = Ok(Bytes::from_static(
        b"data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"a\"}}]}\n\n",
    ));
    let body: ByteStream = stream::iter(vec![first]).chain(stream::pending()).boxed();
    let options = DecodeOptions {
        idle_timeout: Duration::from_millis(50),
        ..options()
    };

    let events: Vec<StreamEvent> = decode_event_stream(body, options).collect().await;
    assert_eq!(events[0], StreamEvent::ContentDelta("a".into()));
    match &events[1] {
        StreamEvent::Error(error) => assert_eq!(error.kind, ErrorKind::UpstreamUnavailable),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_keep_alive_comments_reset_idle_timeout() {
    // Eight heartbeats 40ms apart outlast a 100ms idle timeout in total, but
    // no single gap does.
    let mut chunks: Vec<&'static [u8]> = vec![&b": keep-alive\n\n"[..]; 8];
    chunks.push(&b"data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"late\"},\"finish_reason\":\"stop\"}]}\n\n"[..]);
    chunks.push(&b"data: [DONE]\n\n"[..]);

    let body: ByteStream = stream::iter(chunks)
        .then(|chunk| async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            Ok::<_, GatewayError>(Bytes::from_static(chunk))
        })
        .boxed();
    let options = DecodeOptions {
        idle_timeout: Duration::from_millis(100),
        ..options()
    };

    let events: Vec<StreamEvent> = decode_event_stream(body, options).collect().await;
    assert_eq!(
        events,
        vec![
            StreamEvent::ContentDelta("late".into()),
            StreamEvent::FinishReason(FinishReason::Stop),
        ]
    );
}

#[tokio::test]
async fn test_broken_frame_ends_stream_with_error() {
    let body = concat!(
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );
    let events: Vec<StreamEvent> = decode_event_stream(body_from(vec![body.into()]), options())
        .collect()
        .await;

    assert_eq!(events.len(), 2);
    assert_eq!(events[0], StreamEvent::ContentDelta("Hel".into()));
    match &events[1] {
        StreamEvent::Error(error) => {
            assert_eq!(error.kind, ErrorKind::Unknown);
            assert!(!error.retriable);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_cancellation_ends_silently() {
    let first: GatewayResult<Bytes> = Ok(Bytes::from_static(
        b"data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"a\"}}]}\n\n",
    ));
    let body: ByteStream = stream::iter(vec![first]).chain(stream::pending()).boxed();
    let token = CancellationToken::new();
    let options = DecodeOptions {
        cancellation: Some(token.clone()),
        ..options()
    };

    let mut events = decode_event_stream(body, options);
    assert_eq!(events.next().await, Some(StreamEvent::ContentDelta("a".into())));
    token.cancel();
    assert_eq!(events.next().await, None);
}

#[test]
fn test_open_tool_call_at_sentinel_is_truncated() {
    let body = "data: {\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"c\",\"function\":{\"name\":\"f\",\"arguments\":\"{\"}}]}}]}\n\ndata: [DONE]\n\n";
    let events = decode_blocking(vec![body.as_bytes().to_vec()]);
    assert!(completed_arguments(&events).is_empty());
    match events.last() {
        Some(StreamEvent::Error(error)) => assert_eq!(error.kind, ErrorKind::Truncated),
        other => panic!("unexpected {:?}", other),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_tool_arguments_independent_of_chunking(
        fragments in prop::collection::vec("[a-z0-9 {}:,\"]{0,12}", 1..8),
        cuts in prop::collection::vec(0usize..2048, 0..24),
    ) {
        let body = tool_call_stream(&fragments);
        let expected: String = fragments.concat();

        let whole = decode_blocking(vec![body.as_bytes().to_vec()]);
        let split = decode_blocking(split_at_points(body.as_bytes(), cuts));

        prop_assert_eq!(completed_arguments(&whole), vec![expected.clone()]);
        prop_assert_eq!(completed_arguments(&split), vec![expected]);
        prop_assert_eq!(whole, split);
    }

    #[test]
    fn prop_unterminated_stream_always_truncated(
        texts in prop::collection::vec("[a-zA-Z ]{1,10}", 0..6),
        cuts in prop::collection::vec(0usize..1024, 0..12),
    ) {
        let body: String = texts
            .iter()
            .map(|text| {
                let frame = serde_json::json!({"choices": [{"index": 0, "delta": {"content": text}}]});
                format!("data: {}\n\n", frame)
            })
            .collect();

        let events = decode_blocking(split_at_points(body.as_bytes(), cuts));
        prop_assert_eq!(events.len(), texts.len() + 1);
        match events.last() {
            Some(StreamEvent::Error(error)) => prop_assert_eq!(error.kind, ErrorKind::Truncated),
            other => prop_assert!(false, "expected truncation, got {:?}", other),
        }
    }
}
