//! # 上游帧解码
//!
//! SSE 行切分（跨块保留未完成行）、各上游帧形态到封闭事件集的
//! 显式解码，以及错误消息提取

use serde_json::Value;

/// SSE 数据行前缀
const SSE_DATA_PREFIX: &str = "data:";
/// 内容阶段结束标记
pub const SSE_DONE_MARKER: &str = "[DONE]";

/// 跨块的 SSE 行切分器
///
/// 每次中继调用独占一个实例，跨块保留最后一行未完成的内容。
/// 缓冲以原始字节保留，解码推迟到整行完成之后，被块边界拆开的
/// 多字节字符不会损坏。
#[derive(Debug, Default)]
pub struct SseLineFeed {
    carry: Vec<u8>,
}

impl SseLineFeed {
    /// 创建切分器
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 喂入一个字节块，返回其中完整的行
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.carry.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.carry.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.carry.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            lines.push(line.trim_end_matches(['\n', '\r']).to_string());
        }
        lines
    }
}

/// 提取一行 SSE 的数据载荷；非数据行返回 None
#[must_use]
pub fn sse_payload(line: &str) -> Option<&str> {
    line.strip_prefix(SSE_DATA_PREFIX).map(str::trim)
}

/// Anthropic 式上游帧解码结果
#[derive(Debug, Clone, PartialEq)]
pub enum ClaudeFrame {
    /// 一段增量文本
    ContentDelta(String),
    /// 内容阶段结束
    MessageStop,
    /// 带错误的帧，本身不终结流
    Error(String),
    /// 无法识别，忽略
    Ignored,
}

/// 解码一帧 Anthropic 式上游 JSON
#[must_use]
pub fn decode_claude_frame(frame: &Value) -> ClaudeFrame {
    let frame_type = frame.get("type").and_then(Value::as_str);

    if frame_type == Some("content_block_delta") {
        if let Some(text) = frame
            .pointer("/delta/text")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
        {
            return ClaudeFrame::ContentDelta(text.to_string());
        }
    }

    if frame_type == Some("message_stop") {
        return ClaudeFrame::MessageStop;
    }

    // type == "error" 或任何携带 error 字段的帧都按错误处理
    if frame_type == Some("error") || frame.get("error").is_some() {
        let message = frame
            .pointer("/error/message")
            .and_then(Value::as_str)
            .or_else(|| frame.get("message").and_then(Value::as_str))
            .or_else(|| frame.get("error").and_then(Value::as_str))
            .unwrap_or("Unknown error");
        return ClaudeFrame::Error(message.to_string());
    }

    ClaudeFrame::Ignored
}

/// Codex 式上游帧解码结果
#[derive(Debug, Clone, PartialEq)]
pub enum CodexFrame {
    /// 一段增量文本
    ContentDelta(String),
    /// 逻辑完成帧
    Completed,
    /// 带错误的帧：标记流失败、记住首个错误、继续排空
    Error(String),
    /// 无法识别，忽略
    Ignored,
}

/// 解码一帧 Codex 式上游 JSON
#[must_use]
pub fn decode_codex_frame(frame: &Value, status: u16) -> CodexFrame {
    let frame_type = frame.get("type").and_then(Value::as_str);

    if frame_type == Some("error") || frame.get("error").is_some() {
        return CodexFrame::Error(extract_error_message(Some(frame), status));
    }

    if let Some(delta) = extract_codex_stream_delta(frame) {
        return CodexFrame::ContentDelta(delta);
    }

    if frame_type == Some("response.completed") || frame_type == Some("message_stop") {
        return CodexFrame::Completed;
    }

    CodexFrame::Ignored
}

/// 共享的 Codex 增量文本提取
///
/// 标准形态是 `response.output_text.delta`；为兼容保留
/// `content_block_delta` 与裸 `text` 字段两种旧形态。
#[must_use]
pub fn extract_codex_stream_delta(frame: &Value) -> Option<String> {
    let frame_type = frame.get("type").and_then(Value::as_str);

    if frame_type == Some("response.output_text.delta") {
        if let Some(delta) = frame.get("delta").and_then(Value::as_str) {
            return non_empty(delta);
        }
    }

    if frame_type == Some("content_block_delta") {
        if let Some(text) = frame.pointer("/delta/text").and_then(Value::as_str) {
            return non_empty(text);
        }
    }

    frame
        .get("text")
        .and_then(Value::as_str)
        .and_then(non_empty)
}

fn non_empty(text: &str) -> Option<String> {
    (!text.is_empty()).then(|| text.to_string())
}

/// 从上游错误体提取人可读的错误消息
///
/// 优先级：字符串 `message` → 字符串 `error` → 嵌套 `error.message`，
/// 都没有时回退为 `API Error: {status}`。
#[must_use]
pub fn extract_error_message(error_data: Option<&Value>, status: u16) -> String {
    let fallback = format!("API Error: {status}");

    let Some(error_data) = error_data else {
        return fallback;
    };

    if let Some(text) = error_data.as_str() {
        let text = text.trim();
        if !text.is_empty() {
            return text.to_string();
        }
        return fallback;
    }

    if error_data.is_object() {
        if let Some(message) = error_data
            .get("message")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|m| !m.is_empty())
        {
            return message.to_string();
        }

        if let Some(error) = error_data
            .get("error")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|m| !m.is_empty())
        {
            return error.to_string();
        }

        if let Some(message) = error_data
            .pointer("/error/message")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|m| !m.is_empty())
        {
            return message.to_string();
        }
    }

    fallback
}

/// 从非 2xx 响应体提取错误消息
///
/// 先尝试 JSON 解析走结构化提取；解析失败时，短于 200 字符的
/// 原始响应体直接透出，否则回退为通用消息。
#[must_use]
pub fn extract_error_message_from_body(body: &str, status: u16) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(parsed) => extract_error_message(Some(&parsed), status),
        Err(_) => {
            let trimmed = body.trim();
            if !trimmed.is_empty() && trimmed.len() < 200 {
                trimmed.to_string()
            } else {
                format!("API Error: {status}")
            }
        }
    }
}

/// 从 Gemini 式单次 JSON 响应提取生成文本
///
/// 取第一个 candidate 的 content.parts 中的全部文本，按换行拼接。
#[must_use]
pub fn extract_gemini_text(response: &Value) -> String {
    let Some(parts) = response
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
    else {
        return String::new();
    };

    parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_line_feed_carries_partial_lines() {
        let mut feed = SseLineFeed::new();

        let lines = feed.push(b"data: {\"a\":1}\ndata: {\"b\"");
        assert_eq!(lines, vec!["data: {\"a\":1}".to_string()]);

        let lines = feed.push(b":2}\n\n");
        assert_eq!(lines, vec!["data: {\"b\":2}".to_string(), String::new()]);
    }

    #[test]
    fn test_line_feed_strips_carriage_returns() {
        let mut feed = SseLineFeed::new();
        let lines = feed.push(b"data: x\r\n");
        assert_eq!(lines, vec!["data: x".to_string()]);
    }

    #[test]
    fn test_line_feed_survives_multibyte_char_split_across_chunks() {
        let mut feed = SseLineFeed::new();
        let bytes = "data: 你好\n".as_bytes();

        // 在 "你"（3 字节）中间切开
        let lines = feed.push(&bytes[..8]);
        assert!(lines.is_empty());

        let lines = feed.push(&bytes[8..]);
        assert_eq!(lines, vec!["data: 你好".to_string()]);
    }

    #[test]
    fn test_sse_payload() {
        assert_eq!(sse_payload("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(sse_payload("data:[DONE]"), Some("[DONE]"));
        assert_eq!(sse_payload("event: message_stop"), None);
        assert_eq!(sse_payload(""), None);
    }

    #[test]
    fn test_decode_claude_frames() {
        let frame = json!({"type": "content_block_delta", "delta": {"text": "He"}});
        assert_eq!(
            decode_claude_frame(&frame),
            ClaudeFrame::ContentDelta("He".to_string())
        );

        assert_eq!(
            decode_claude_frame(&json!({"type": "message_stop"})),
            ClaudeFrame::MessageStop
        );

        let frame = json!({"type": "error", "error": {"message": "overloaded"}});
        assert_eq!(
            decode_claude_frame(&frame),
            ClaudeFrame::Error("overloaded".to_string())
        );

        // 无 type 但携带 error 字段的帧同样按错误处理
        let frame = json!({"error": "rate limited"});
        assert_eq!(
            decode_claude_frame(&frame),
            ClaudeFrame::Error("rate limited".to_string())
        );

        assert_eq!(
            decode_claude_frame(&json!({"type": "message_delta"})),
            ClaudeFrame::Ignored
        );
    }

    #[test]
    fn test_decode_codex_frames() {
        let frame = json!({"type": "response.output_text.delta", "delta": "Hel"});
        assert_eq!(
            decode_codex_frame(&frame, 200),
            CodexFrame::ContentDelta("Hel".to_string())
        );

        // 兼容 Anthropic 形态的增量帧
        let frame = json!({"type": "content_block_delta", "delta": {"text": "lo"}});
        assert_eq!(
            decode_codex_frame(&frame, 200),
            CodexFrame::ContentDelta("lo".to_string())
        );

        assert_eq!(
            decode_codex_frame(&json!({"type": "response.completed"}), 200),
            CodexFrame::Completed
        );
        assert_eq!(
            decode_codex_frame(&json!({"type": "message_stop"}), 200),
            CodexFrame::Completed
        );

        let frame = json!({"type": "error", "error": {"message": "quota exceeded"}});
        assert_eq!(
            decode_codex_frame(&frame, 200),
            CodexFrame::Error("quota exceeded".to_string())
        );

        assert_eq!(
            decode_codex_frame(&json!({"type": "response.created"}), 200),
            CodexFrame::Ignored
        );
    }

    #[test]
    fn test_extract_error_message_precedence() {
        assert_eq!(
            extract_error_message(Some(&json!({"message": "top"})), 500),
            "top"
        );
        assert_eq!(
            extract_error_message(Some(&json!({"error": "plain"})), 500),
            "plain"
        );
        assert_eq!(
            extract_error_message(Some(&json!({"error": {"message": "nested"}})), 500),
            "nested"
        );
        assert_eq!(extract_error_message(Some(&json!({})), 502), "API Error: 502");
        assert_eq!(extract_error_message(None, 503), "API Error: 503");
        assert_eq!(extract_error_message(Some(&json!("  raw  ")), 500), "raw");
    }

    #[test]
    fn test_extract_error_message_from_body() {
        assert_eq!(
            extract_error_message_from_body(r#"{"error":{"message":"bad key"}}"#, 401),
            "bad key"
        );
        assert_eq!(
            extract_error_message_from_body("upstream exploded", 500),
            "upstream exploded"
        );

        let long_body = "x".repeat(300);
        assert_eq!(
            extract_error_message_from_body(&long_body, 500),
            "API Error: 500"
        );
        assert_eq!(extract_error_message_from_body("", 404), "API Error: 404");
    }

    #[test]
    fn test_extract_gemini_text() {
        let response = json!({
            "candidates": [{"content": {"parts": [{"text": "hi"}]}}]
        });
        assert_eq!(extract_gemini_text(&response), "hi");

        let response = json!({
            "candidates": [{"content": {"parts": [
                {"text": "first"},
                {"inlineData": {}},
                {"text": "second"}
            ]}}]
        });
        assert_eq!(extract_gemini_text(&response), "first\nsecond");

        assert_eq!(extract_gemini_text(&json!({"candidates": []})), "");
        assert_eq!(extract_gemini_text(&json!({})), "");
    }
}
