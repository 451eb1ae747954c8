//! # 上游中继适配器
//!
//! 每种上游线形一个入口，共享统一的输出契约：发出 `test_start`，
//! 中途的任何失败折叠进事件流，所有退出路径都保证到达终结事件。

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{
    ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, USER_AGENT,
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::InterruptionSink;
use crate::relay::codec::{
    ClaudeFrame, CodexFrame, SSE_DONE_MARKER, SseLineFeed, decode_claude_frame, decode_codex_frame,
    extract_error_message_from_body, extract_gemini_text, sse_payload,
};
use crate::relay::events::{RelayEvent, RelayEventSender};
use crate::relay::interruption::{StreamInterruptionReason, record_interruption_detached};

/// Anthropic 式上游的版本头
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// Claude 流式测试的 User-Agent
const CLAUDE_USER_AGENT: &str = "claude-cli/2.0.52 (external, cli)";
/// Codex 流式测试的 User-Agent
const CODEX_USER_AGENT: &str = "codex_cli_rs/0.50.0 (crs-api-key-test)";
/// 单次 JSON 测试的 User-Agent
const JSON_USER_AGENT: &str = "crs-api-key-test/1.0";

/// 一次中继调用的请求参数
#[derive(Debug, Clone)]
pub struct RelayRequest {
    /// 上游地址
    pub url: String,
    /// Authorization 头的值
    pub authorization: String,
    /// 请求体
    pub payload: Value,
    /// 整次调用的超时期限
    pub timeout: Duration,
    /// 额外请求头，键冲突时覆盖静态默认头
    pub extra_headers: Vec<(String, String)>,
    /// 统计归类用的 provider 名称
    pub provider: String,
}

/// 合并静态默认头、授权头与调用方额外头；调用方的头在键冲突时获胜
fn build_headers(
    defaults: &[(HeaderName, &'static str)],
    authorization: &str,
    extra_headers: &[(String, String)],
) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for (name, value) in defaults {
        headers.insert(name.clone(), HeaderValue::from_static(value));
    }

    match HeaderValue::from_str(authorization) {
        Ok(value) => {
            headers.insert(AUTHORIZATION, value);
        }
        Err(_) => warn!("authorization 头包含非法字符，已跳过"),
    }

    for (name, value) in extra_headers {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            warn!(header = name.as_str(), "额外请求头名称非法，已跳过");
            continue;
        };
        let Ok(value) = HeaderValue::from_str(value) else {
            warn!(header = name.as_str(), "额外请求头值非法，已跳过");
            continue;
        };
        headers.insert(name, value);
    }

    headers
}

/// 发出上游调用
async fn send_upstream(
    client: &reqwest::Client,
    request: &RelayRequest,
    headers: HeaderMap,
) -> reqwest::Result<reqwest::Response> {
    client
        .post(&request.url)
        .headers(headers)
        .timeout(request.timeout)
        .json(&request.payload)
        .send()
        .await
}

/// 传输层失败：分类、后台记录，并把消息折叠进事件流
async fn fail_with_transport_error(
    err: &reqwest::Error,
    request: &RelayRequest,
    events: &mut RelayEventSender,
    sink: &Arc<dyn InterruptionSink>,
) {
    let reason = StreamInterruptionReason::from_reqwest(
        err,
        StreamInterruptionReason::UpstreamStreamError,
    );
    record_interruption_detached(sink.clone(), reason, &request.provider);
    events.finish(false, Some(err.to_string())).await;
}

/// 消费端若在中继期间断开，记一次 client_abort
fn record_client_abort_if_disconnected(
    events: &RelayEventSender,
    request: &RelayRequest,
    sink: &Arc<dyn InterruptionSink>,
) {
    if events.is_closed() {
        record_interruption_detached(
            sink.clone(),
            StreamInterruptionReason::ClientAbort,
            &request.provider,
        );
    }
}

/// 非 2xx 响应：缓冲整个错误体并提取人可读消息后终结失败
async fn fail_with_error_body(
    response: reqwest::Response,
    request: &RelayRequest,
    events: &mut RelayEventSender,
    sink: &Arc<dyn InterruptionSink>,
) {
    let status = response.status().as_u16();
    match response.text().await {
        Ok(body) => {
            events
                .finish(false, Some(extract_error_message_from_body(&body, status)))
                .await;
        }
        Err(err) => fail_with_transport_error(&err, request, events, sink).await,
    }
}

/// Anthropic 式 SSE 中继
///
/// content_block_delta 产出内容事件；message_stop 产出停止事件；
/// 带错误的帧产出错误事件但不终结流。干净结束且上游从未发送
/// message_stop 时补发一个，再终结成功。
pub async fn relay_claude_stream(
    client: &reqwest::Client,
    request: &RelayRequest,
    events: &mut RelayEventSender,
    sink: &Arc<dyn InterruptionSink>,
) {
    events.send(RelayEvent::test_start()).await;

    let headers = build_headers(
        &[
            (CONTENT_TYPE, "application/json"),
            (HeaderName::from_static("anthropic-version"), ANTHROPIC_VERSION),
            (USER_AGENT, CLAUDE_USER_AGENT),
        ],
        &request.authorization,
        &request.extra_headers,
    );

    let response = match send_upstream(client, request, headers).await {
        Ok(response) => response,
        Err(err) => {
            fail_with_transport_error(&err, request, events, sink).await;
            return;
        }
    };

    debug!(status = response.status().as_u16(), "Claude 流式测试响应状态");

    if !response.status().is_success() {
        fail_with_error_body(response, request, events, sink).await;
        return;
    }

    let mut stream = response.bytes_stream();
    let mut feed = SseLineFeed::new();
    let mut saw_message_stop = false;

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                fail_with_transport_error(&err, request, events, sink).await;
                return;
            }
        };

        for line in feed.push(&chunk) {
            let Some(data) = sse_payload(&line) else {
                continue;
            };
            if data.is_empty() || data == SSE_DONE_MARKER {
                continue;
            }
            let Ok(frame) = serde_json::from_str::<Value>(data) else {
                continue;
            };

            match decode_claude_frame(&frame) {
                ClaudeFrame::ContentDelta(text) => {
                    events.send(RelayEvent::Content { text }).await;
                }
                ClaudeFrame::MessageStop => {
                    saw_message_stop = true;
                    events.send(RelayEvent::MessageStop).await;
                }
                ClaudeFrame::Error(error) => {
                    events.send(RelayEvent::Error { error }).await;
                }
                ClaudeFrame::Ignored => {}
            }
        }
    }

    if !saw_message_stop {
        events.send(RelayEvent::MessageStop).await;
    }
    events.finish(true, None).await;
    record_client_abort_if_disconnected(events, request, sink);
}

/// Codex 式 SSE 中继
///
/// 任一带错误的帧把流标记为失败、记住首个错误消息并继续排空；
/// 流结束时：见过错误则以首个错误终结失败，否则在缺少完成帧时
/// 补发 message_stop 再终结成功。
pub async fn relay_codex_stream(
    client: &reqwest::Client,
    request: &RelayRequest,
    events: &mut RelayEventSender,
    sink: &Arc<dyn InterruptionSink>,
) {
    events.send(RelayEvent::test_start()).await;

    let headers = build_headers(
        &[
            (CONTENT_TYPE, "application/json"),
            (ACCEPT, "text/event-stream"),
            (USER_AGENT, CODEX_USER_AGENT),
        ],
        &request.authorization,
        &request.extra_headers,
    );

    let response = match send_upstream(client, request, headers).await {
        Ok(response) => response,
        Err(err) => {
            fail_with_transport_error(&err, request, events, sink).await;
            return;
        }
    };

    let status = response.status().as_u16();
    debug!(status, "Codex 流式测试响应状态");

    if !response.status().is_success() {
        fail_with_error_body(response, request, events, sink).await;
        return;
    }

    let mut stream = response.bytes_stream();
    let mut feed = SseLineFeed::new();
    let mut saw_message_stop = false;
    let mut has_error = false;
    let mut first_error: Option<String> = None;

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                fail_with_transport_error(&err, request, events, sink).await;
                return;
            }
        };

        for line in feed.push(&chunk) {
            let Some(data) = sse_payload(&line) else {
                continue;
            };
            if data.is_empty() {
                continue;
            }
            if data == SSE_DONE_MARKER {
                saw_message_stop = true;
                events.send(RelayEvent::MessageStop).await;
                continue;
            }
            let Ok(frame) = serde_json::from_str::<Value>(data) else {
                continue;
            };

            match decode_codex_frame(&frame, status) {
                CodexFrame::Error(error) => {
                    has_error = true;
                    if first_error.is_none() {
                        first_error = Some(error.clone());
                    }
                    events.send(RelayEvent::Error { error }).await;
                }
                CodexFrame::ContentDelta(text) => {
                    events.send(RelayEvent::Content { text }).await;
                }
                CodexFrame::Completed => {
                    saw_message_stop = true;
                    events.send(RelayEvent::MessageStop).await;
                }
                CodexFrame::Ignored => {}
            }
        }
    }

    if has_error {
        let message = first_error.unwrap_or_else(|| "Codex stream test failed".to_string());
        events.finish(false, Some(message)).await;
    } else {
        if !saw_message_stop {
            events.send(RelayEvent::MessageStop).await;
        }
        events.finish(true, None).await;
    }
    record_client_abort_if_disconnected(events, request, sink);
}

/// Gemini 式单次 JSON 中继
///
/// 2xx 时取第一个 candidate 的 parts 文本按换行拼接；非空则先发
/// 内容事件，随后 message_stop 与终结成功。
pub async fn relay_gemini_json(
    client: &reqwest::Client,
    request: &RelayRequest,
    events: &mut RelayEventSender,
    sink: &Arc<dyn InterruptionSink>,
) {
    events.send(RelayEvent::test_start()).await;

    let headers = build_headers(
        &[
            (CONTENT_TYPE, "application/json"),
            (USER_AGENT, JSON_USER_AGENT),
        ],
        &request.authorization,
        &request.extra_headers,
    );

    let response = match send_upstream(client, request, headers).await {
        Ok(response) => response,
        Err(err) => {
            fail_with_transport_error(&err, request, events, sink).await;
            return;
        }
    };

    let status = response.status().as_u16();
    debug!(status, "JSON 测试响应状态");

    if !response.status().is_success() {
        fail_with_error_body(response, request, events, sink).await;
        return;
    }

    let body = match response.text().await {
        Ok(body) => body,
        Err(err) => {
            fail_with_transport_error(&err, request, events, sink).await;
            return;
        }
    };

    // 2xx 但响应体不是 JSON 时按空文本宽容处理，仍然走成功终结
    let text = match serde_json::from_str::<Value>(&body) {
        Ok(parsed) => extract_gemini_text(&parsed),
        Err(_) => String::new(),
    };
    if !text.is_empty() {
        events.send(RelayEvent::Content { text }).await;
    }

    events.send(RelayEvent::MessageStop).await;
    events.finish(true, None).await;
    record_client_abort_if_disconnected(events, request, sink);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_headers_win_on_collision() {
        let headers = build_headers(
            &[(USER_AGENT, CLAUDE_USER_AGENT)],
            "Bearer token",
            &[("user-agent".to_string(), "custom/1.0".to_string())],
        );

        assert_eq!(headers.get(USER_AGENT).unwrap(), "custom/1.0");
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer token");
    }

    #[test]
    fn test_invalid_extra_header_is_skipped() {
        let headers = build_headers(
            &[(CONTENT_TYPE, "application/json")],
            "key",
            &[("bad header\n".to_string(), "x".to_string())],
        );

        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
    }
}
