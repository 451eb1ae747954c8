//! 上游中继适配器的集成测试
//!
//! 用 wiremock 模拟三种上游形态，校验统一事件序列的生命周期

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sticky_relay::cache::InterruptionSink;
use sticky_relay::relay::events::{RelayEvent, RelayEventSender};
use sticky_relay::relay::interruption::NoopInterruptionSink;
use sticky_relay::relay::payload::create_claude_test_payload;
use sticky_relay::relay::upstream::{
    RelayRequest, relay_claude_stream, relay_codex_stream, relay_gemini_json,
};

fn relay_request(url: String, provider: &str) -> RelayRequest {
    RelayRequest {
        url,
        authorization: "cr_test_key_123".to_string(),
        payload: create_claude_test_payload("claude-sonnet-4-5-20250929", true),
        timeout: Duration::from_secs(5),
        extra_headers: Vec::new(),
        provider: provider.to_string(),
    }
}

fn noop_sink() -> Arc<dyn InterruptionSink> {
    Arc::new(NoopInterruptionSink)
}

async fn drain_events(mut rx: mpsc::Receiver<RelayEvent>) -> Vec<RelayEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn sse_body(frames: &[serde_json::Value]) -> String {
    let mut body = String::new();
    for frame in frames {
        body.push_str(&format!("data: {frame}\n\n"));
    }
    body
}

#[tokio::test]
async fn test_claude_stream_success_sequence() {
    let server = MockServer::start().await;
    let body = sse_body(&[
        json!({"type": "message_start"}),
        json!({"type": "content_block_delta", "delta": {"type": "text_delta", "text": "He"}}),
        json!({"type": "content_block_delta", "delta": {"text": "llo"}}),
        json!({"type": "message_stop"}),
    ]);

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let request = relay_request(format!("{}/v1/messages", server.uri()), "claude");
    let (tx, rx) = mpsc::channel(32);
    let mut events = RelayEventSender::new(tx);
    let sink = noop_sink();

    relay_claude_stream(&client, &request, &mut events, &sink).await;
    drop(events);

    assert_eq!(
        drain_events(rx).await,
        vec![
            RelayEvent::test_start(),
            RelayEvent::Content {
                text: "He".to_string()
            },
            RelayEvent::Content {
                text: "llo".to_string()
            },
            RelayEvent::MessageStop,
            RelayEvent::TestComplete {
                success: true,
                error: None
            },
        ]
    );
}

#[tokio::test]
async fn test_claude_stream_synthesizes_message_stop() {
    let server = MockServer::start().await;
    // 上游干净结束但没有发送 message_stop
    let body = sse_body(&[
        json!({"type": "content_block_delta", "delta": {"text": "hi"}}),
    ]);

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let request = relay_request(format!("{}/v1/messages", server.uri()), "claude");
    let (tx, rx) = mpsc::channel(32);
    let mut events = RelayEventSender::new(tx);
    let sink = noop_sink();

    relay_claude_stream(&client, &request, &mut events, &sink).await;
    drop(events);

    assert_eq!(
        drain_events(rx).await,
        vec![
            RelayEvent::test_start(),
            RelayEvent::Content {
                text: "hi".to_string()
            },
            RelayEvent::MessageStop,
            RelayEvent::TestComplete {
                success: true,
                error: None
            },
        ]
    );
}

#[tokio::test]
async fn test_claude_non_2xx_folds_error_into_stream() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(
            ResponseTemplate::new(401).set_body_raw(
                r#"{"error":{"message":"bad key"}}"#,
                "application/json",
            ),
        )
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let request = relay_request(format!("{}/v1/messages", server.uri()), "claude");
    let (tx, rx) = mpsc::channel(32);
    let mut events = RelayEventSender::new(tx);
    let sink = noop_sink();

    relay_claude_stream(&client, &request, &mut events, &sink).await;
    drop(events);

    // 头已发出（事件流视角），失败只折叠进终结事件
    assert_eq!(
        drain_events(rx).await,
        vec![
            RelayEvent::test_start(),
            RelayEvent::TestComplete {
                success: false,
                error: Some("bad key".to_string())
            },
        ]
    );
}

#[tokio::test]
async fn test_claude_error_frame_does_not_terminate_stream() {
    let server = MockServer::start().await;
    let body = sse_body(&[
        json!({"type": "error", "error": {"message": "overloaded"}}),
        json!({"type": "content_block_delta", "delta": {"text": "still here"}}),
        json!({"type": "message_stop"}),
    ]);

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let request = relay_request(format!("{}/v1/messages", server.uri()), "claude");
    let (tx, rx) = mpsc::channel(32);
    let mut events = RelayEventSender::new(tx);
    let sink = noop_sink();

    relay_claude_stream(&client, &request, &mut events, &sink).await;
    drop(events);

    assert_eq!(
        drain_events(rx).await,
        vec![
            RelayEvent::test_start(),
            RelayEvent::Error {
                error: "overloaded".to_string()
            },
            RelayEvent::Content {
                text: "still here".to_string()
            },
            RelayEvent::MessageStop,
            RelayEvent::TestComplete {
                success: true,
                error: None
            },
        ]
    );
}

#[tokio::test]
async fn test_codex_stream_success_with_done_marker() {
    let server = MockServer::start().await;
    let mut body = sse_body(&[
        json!({"type": "response.created"}),
        json!({"type": "response.output_text.delta", "delta": "Hel"}),
        json!({"type": "response.output_text.delta", "delta": "lo"}),
    ]);
    body.push_str("data: [DONE]\n\n");

    Mock::given(method("POST"))
        .and(path("/v1/responses"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let request = relay_request(format!("{}/v1/responses", server.uri()), "openai");
    let (tx, rx) = mpsc::channel(32);
    let mut events = RelayEventSender::new(tx);
    let sink = noop_sink();

    relay_codex_stream(&client, &request, &mut events, &sink).await;
    drop(events);

    assert_eq!(
        drain_events(rx).await,
        vec![
            RelayEvent::test_start(),
            RelayEvent::Content {
                text: "Hel".to_string()
            },
            RelayEvent::Content {
                text: "lo".to_string()
            },
            RelayEvent::MessageStop,
            RelayEvent::TestComplete {
                success: true,
                error: None
            },
        ]
    );
}

#[tokio::test]
async fn test_codex_stream_synthesizes_stop_without_completion_frame() {
    let server = MockServer::start().await;
    let body = sse_body(&[
        json!({"type": "response.output_text.delta", "delta": "hi"}),
    ]);

    Mock::given(method("POST"))
        .and(path("/v1/responses"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let request = relay_request(format!("{}/v1/responses", server.uri()), "openai");
    let (tx, rx) = mpsc::channel(32);
    let mut events = RelayEventSender::new(tx);
    let sink = noop_sink();

    relay_codex_stream(&client, &request, &mut events, &sink).await;
    drop(events);

    assert_eq!(
        drain_events(rx).await,
        vec![
            RelayEvent::test_start(),
            RelayEvent::Content {
                text: "hi".to_string()
            },
            RelayEvent::MessageStop,
            RelayEvent::TestComplete {
                success: true,
                error: None
            },
        ]
    );
}

#[tokio::test]
async fn test_codex_error_frames_fail_with_first_error() {
    let server = MockServer::start().await;
    let body = sse_body(&[
        json!({"error": {"message": "quota exceeded"}}),
        json!({"type": "response.output_text.delta", "delta": "partial"}),
        json!({"error": {"message": "second error"}}),
    ]);

    Mock::given(method("POST"))
        .and(path("/v1/responses"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let request = relay_request(format!("{}/v1/responses", server.uri()), "openai");
    let (tx, rx) = mpsc::channel(32);
    let mut events = RelayEventSender::new(tx);
    let sink = noop_sink();

    relay_codex_stream(&client, &request, &mut events, &sink).await;
    drop(events);

    // 错误帧不终结流（继续排空），结束时以首个错误终结失败
    assert_eq!(
        drain_events(rx).await,
        vec![
            RelayEvent::test_start(),
            RelayEvent::Error {
                error: "quota exceeded".to_string()
            },
            RelayEvent::Content {
                text: "partial".to_string()
            },
            RelayEvent::Error {
                error: "second error".to_string()
            },
            RelayEvent::TestComplete {
                success: false,
                error: Some("quota exceeded".to_string())
            },
        ]
    );
}

#[tokio::test]
async fn test_gemini_json_success_sequence() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.5-pro:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"parts": [{"text": "hi"}]}}]
        })))
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let request = relay_request(
        format!(
            "{}/v1beta/models/gemini-2.5-pro:generateContent",
            server.uri()
        ),
        "gemini",
    );
    let (tx, rx) = mpsc::channel(32);
    let mut events = RelayEventSender::new(tx);
    let sink = noop_sink();

    relay_gemini_json(&client, &request, &mut events, &sink).await;
    drop(events);

    assert_eq!(
        drain_events(rx).await,
        vec![
            RelayEvent::test_start(),
            RelayEvent::Content {
                text: "hi".to_string()
            },
            RelayEvent::MessageStop,
            RelayEvent::TestComplete {
                success: true,
                error: None
            },
        ]
    );
}

#[tokio::test]
async fn test_gemini_empty_candidates_still_succeeds() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.5-pro:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"candidates": []})))
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let request = relay_request(
        format!(
            "{}/v1beta/models/gemini-2.5-pro:generateContent",
            server.uri()
        ),
        "gemini",
    );
    let (tx, rx) = mpsc::channel(32);
    let mut events = RelayEventSender::new(tx);
    let sink = noop_sink();

    relay_gemini_json(&client, &request, &mut events, &sink).await;
    drop(events);

    // 空内容不发 content 事件，但仍然 message_stop + 成功终结
    assert_eq!(
        drain_events(rx).await,
        vec![
            RelayEvent::test_start(),
            RelayEvent::MessageStop,
            RelayEvent::TestComplete {
                success: true,
                error: None
            },
        ]
    );
}

#[tokio::test]
async fn test_gemini_non_json_2xx_body_treated_as_empty_text() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.5-pro:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("OK", "text/plain"))
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let request = relay_request(
        format!(
            "{}/v1beta/models/gemini-2.5-pro:generateContent",
            server.uri()
        ),
        "gemini",
    );
    let (tx, rx) = mpsc::channel(32);
    let mut events = RelayEventSender::new(tx);
    let sink = noop_sink();

    relay_gemini_json(&client, &request, &mut events, &sink).await;
    drop(events);

    // 2xx 但响应体不是 JSON：按空文本宽容处理，仍然成功终结
    assert_eq!(
        drain_events(rx).await,
        vec![
            RelayEvent::test_start(),
            RelayEvent::MessageStop,
            RelayEvent::TestComplete {
                success: true,
                error: None
            },
        ]
    );
}

#[tokio::test]
async fn test_transport_error_terminates_with_failure() {
    // 不可达的地址，连接立刻被拒绝
    let client = reqwest::Client::new();
    let request = relay_request("http://127.0.0.1:9/v1/messages".to_string(), "claude");
    let (tx, rx) = mpsc::channel(32);
    let mut events = RelayEventSender::new(tx);
    let sink = noop_sink();

    relay_claude_stream(&client, &request, &mut events, &sink).await;
    drop(events);

    let events = drain_events(rx).await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], RelayEvent::test_start());
    match &events[1] {
        RelayEvent::TestComplete { success, error } => {
            assert!(!success);
            assert!(error.is_some());
        }
        other => panic!("期望终结事件，实际是 {other:?}"),
    }
}
