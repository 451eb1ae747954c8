//! # 测试请求体构造
//!
//! 为三种上游形态构造最小可用的测试请求体

use rand::RngCore;
use serde_json::{Value, json};
use uuid::Uuid;

/// 生成随机十六进制字符串
#[must_use]
pub fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// 生成 Claude Code 风格的会话字符串
///
/// 格式: `user_{64位hex}_account__session_{uuid}`
#[must_use]
pub fn generate_session_string() -> String {
    let hex64 = random_hex(32);
    let uuid = Uuid::new_v4();
    format!("user_{hex64}_account__session_{uuid}")
}

/// 构造 Claude 测试请求体
#[must_use]
pub fn create_claude_test_payload(model: &str, stream: bool) -> Value {
    let mut payload = json!({
        "model": model,
        "messages": [
            {
                "role": "user",
                "content": [
                    {
                        "type": "text",
                        "text": "hi",
                        "cache_control": { "type": "ephemeral" }
                    }
                ]
            }
        ],
        "system": [
            {
                "type": "text",
                "text": "You are Claude Code, Anthropic's official CLI for Claude.",
                "cache_control": { "type": "ephemeral" }
            }
        ],
        "metadata": {
            "user_id": generate_session_string()
        },
        "max_tokens": 21333,
        "temperature": 1
    });

    if stream {
        payload["stream"] = json!(true);
    }

    payload
}

/// 构造 Gemini 测试请求体
#[must_use]
pub fn create_gemini_test_payload() -> Value {
    json!({
        "contents": [
            {
                "role": "user",
                "parts": [{ "text": "hi" }]
            }
        ],
        "generationConfig": {
            "temperature": 0.2,
            "maxOutputTokens": 128
        }
    })
}

/// Codex 测试请求体的可选项
#[derive(Debug, Default)]
pub struct CodexPayloadOptions {
    /// 是否流式
    pub stream: bool,
    /// 自定义提示词
    pub prompt: Option<String>,
    /// 系统指令
    pub instructions: Option<String>,
}

/// 构造 Codex 测试请求体
#[must_use]
pub fn create_codex_test_payload(model: &str, options: &CodexPayloadOptions) -> Value {
    let prompt = options.prompt.as_deref().unwrap_or("你好");

    let mut payload = json!({
        "model": model,
        "input": [
            {
                "type": "message",
                "role": "user",
                "content": [
                    {
                        "type": "input_text",
                        "text": prompt
                    }
                ]
            }
        ],
        "parallel_tool_calls": false,
        "reasoning": {
            "effort": "xhigh",
            "summary": "auto"
        },
        "stream": options.stream
    });

    if let Some(instructions) = options
        .instructions
        .as_deref()
        .map(str::trim)
        .filter(|i| !i.is_empty())
    {
        payload["instructions"] = json!(instructions);
    }

    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_hex_length() {
        assert_eq!(random_hex(32).len(), 64);
        assert_eq!(random_hex(4).len(), 8);
    }

    #[test]
    fn test_session_string_shape() {
        let session = generate_session_string();
        assert!(session.starts_with("user_"));
        assert!(session.contains("_account__session_"));
        // user_ + 64 hex + _account__session_ + 36 uuid
        assert_eq!(session.len(), 5 + 64 + 18 + 36);
    }

    #[test]
    fn test_claude_payload_stream_flag() {
        let payload = create_claude_test_payload("claude-sonnet-4-5-20250929", true);
        assert_eq!(payload["stream"], serde_json::json!(true));
        assert_eq!(payload["max_tokens"], serde_json::json!(21333));

        let payload = create_claude_test_payload("claude-sonnet-4-5-20250929", false);
        assert!(payload.get("stream").is_none());
    }

    #[test]
    fn test_codex_payload_instructions_trimmed() {
        let options = CodexPayloadOptions {
            stream: true,
            prompt: None,
            instructions: Some("  你是一个AI助手  ".to_string()),
        };
        let payload = create_codex_test_payload("gpt-5.2-codex", &options);
        assert_eq!(payload["instructions"], serde_json::json!("你是一个AI助手"));
        assert_eq!(payload["stream"], serde_json::json!(true));

        let options = CodexPayloadOptions {
            instructions: Some("   ".to_string()),
            ..CodexPayloadOptions::default()
        };
        let payload = create_codex_test_payload("gpt-5.2-codex", &options);
        assert!(payload.get("instructions").is_none());
    }

    #[test]
    fn test_gemini_payload_shape() {
        let payload = create_gemini_test_payload();
        assert_eq!(
            payload["contents"][0]["parts"][0]["text"],
            serde_json::json!("hi")
        );
        assert_eq!(
            payload["generationConfig"]["maxOutputTokens"],
            serde_json::json!(128)
        );
    }
}
