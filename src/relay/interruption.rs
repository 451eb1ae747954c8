//! # 流中断分类
//!
//! 将各类失败原因归一到封闭的枚举，并尽力而为地记录统计。
//! 记录失败只打 debug 日志，绝不影响主响应路径。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::InterruptionSink;

/// 可识别为超时的错误码集合
const TIMEOUT_ERROR_CODES: [&str; 2] = ["ETIMEDOUT", "ECONNABORTED"];

/// 流中断原因（封闭枚举）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamInterruptionReason {
    /// 上游流错误（默认值）
    UpstreamStreamError,
    /// 超时
    Timeout,
    /// 客户端主动断开
    ClientAbort,
}

impl StreamInterruptionReason {
    /// 转换为字符串表示
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UpstreamStreamError => "upstream_stream_error",
            Self::Timeout => "timeout",
            Self::ClientAbort => "client_abort",
        }
    }

    /// 全函数式解析：未知、空白输入一律归一为 `upstream_stream_error`
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::UpstreamStreamError;
        };

        match raw.trim().to_lowercase().as_str() {
            "timeout" => Self::Timeout,
            "client_abort" => Self::ClientAbort,
            _ => Self::UpstreamStreamError,
        }
    }

    /// 从错误的机器码和消息推断中断原因
    ///
    /// 错误码命中超时码集合，或消息包含 "timeout"/"timed out"
    /// （大小写不敏感）时判定为超时，否则返回归一化后的回退值。
    #[must_use]
    pub fn from_error_parts(code: Option<&str>, message: &str, fallback: Self) -> Self {
        let normalized_code = code.map(|c| c.trim().to_uppercase()).unwrap_or_default();
        let normalized_message = message.trim().to_lowercase();

        if TIMEOUT_ERROR_CODES.contains(&normalized_code.as_str())
            || normalized_message.contains("timeout")
            || normalized_message.contains("timed out")
        {
            return Self::Timeout;
        }

        fallback
    }

    /// 从 reqwest 错误推断中断原因
    #[must_use]
    pub fn from_reqwest(error: &reqwest::Error, fallback: Self) -> Self {
        if error.is_timeout() {
            return Self::Timeout;
        }

        Self::from_error_parts(None, &error.to_string(), fallback)
    }
}

impl std::fmt::Display for StreamInterruptionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 归一化 provider 名称：裁剪、小写，空白回退为 "unknown"
fn normalize_provider(provider: &str) -> String {
    let trimmed = provider.trim();
    if trimmed.is_empty() {
        "unknown".to_string()
    } else {
        trimmed.to_lowercase()
    }
}

/// 记录一次流中断统计
///
/// 落盘失败被吞掉并只打 debug 日志。
pub async fn record_interruption(
    sink: &dyn InterruptionSink,
    reason: StreamInterruptionReason,
    provider: &str,
) {
    let provider = normalize_provider(provider);

    if let Err(err) = sink
        .record_stream_interruption(reason.as_str(), &provider)
        .await
    {
        debug!(provider, reason = reason.as_str(), error = %err, "记录流中断统计失败");
    }
}

/// 后台记录一次流中断统计
///
/// 派生一个独立任务，永不 join 回调用方的错误路径。
pub fn record_interruption_detached(
    sink: Arc<dyn InterruptionSink>,
    reason: StreamInterruptionReason,
    provider: &str,
) {
    let provider = provider.to_string();
    tokio::spawn(async move {
        record_interruption(sink.as_ref(), reason, &provider).await;
    });
}

/// 空的统计落盘实现，供不需要统计的调用场景和测试使用
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInterruptionSink;

#[async_trait::async_trait]
impl InterruptionSink for NoopInterruptionSink {
    async fn record_stream_interruption(&self, _reason: &str, _provider: &str) -> crate::Result<()> {
        Ok(())
    }
}
