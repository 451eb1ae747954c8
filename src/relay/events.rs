//! # 中继事件
//!
//! 单次中继调用对外发布的统一事件序列及其发送端

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// 中继事件
///
/// 生命周期：恰好一个 `test_start` 开头；零或多个 `content`；
/// 至多一个 `message_stop`（上游缺失时补发）；恰好一个终结的
/// `test_complete`，之后流关闭。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayEvent {
    /// 测试开始
    TestStart { message: String },
    /// 一段上游生成的文本
    Content { text: String },
    /// 上游内容阶段结束
    MessageStop,
    /// 上游报告的错误，本身不终结流
    Error { error: String },
    /// 终结事件
    TestComplete {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl RelayEvent {
    /// 测试开始事件
    #[must_use]
    pub fn test_start() -> Self {
        Self::TestStart {
            message: "Test started".to_string(),
        }
    }

    /// 编码为一帧 SSE 数据
    #[must_use]
    pub fn to_sse_frame(&self) -> String {
        // 自有枚举的序列化不会失败
        let json = serde_json::to_string(self).unwrap_or_default();
        format!("data: {json}\n\n")
    }
}

/// 中继事件发送端
///
/// 包装一个 mpsc 通道：消费端断开后的写入静默丢弃，
/// `finish` 之后的一切写入同样丢弃。每次中继调用独占一个实例。
pub struct RelayEventSender {
    tx: mpsc::Sender<RelayEvent>,
    closed: bool,
    finished: bool,
}

impl RelayEventSender {
    /// 创建发送端
    #[must_use]
    pub const fn new(tx: mpsc::Sender<RelayEvent>) -> Self {
        Self {
            tx,
            closed: false,
            finished: false,
        }
    }

    /// 消费端是否已断开
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// 是否已发送终结事件
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    /// 发送一个事件；断开或已终结时静默丢弃
    pub async fn send(&mut self, event: RelayEvent) {
        if self.closed || self.finished {
            return;
        }

        if self.tx.send(event).await.is_err() {
            debug!("中继事件消费端已断开，丢弃后续事件");
            self.closed = true;
        }
    }

    /// 发送终结事件并关闭；幂等
    pub async fn finish(&mut self, success: bool, error: Option<String>) {
        if self.finished {
            return;
        }

        self.send(RelayEvent::TestComplete { success, error }).await;
        self.finished = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_frame_encoding() {
        let frame = RelayEvent::Content {
            text: "hi".to_string(),
        }
        .to_sse_frame();
        assert_eq!(frame, "data: {\"type\":\"content\",\"text\":\"hi\"}\n\n");

        let frame = RelayEvent::TestComplete {
            success: true,
            error: None,
        }
        .to_sse_frame();
        // error 为 None 时不序列化
        assert_eq!(frame, "data: {\"type\":\"test_complete\",\"success\":true}\n\n");
    }

    #[tokio::test]
    async fn test_sender_drops_events_after_finish() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut sender = RelayEventSender::new(tx);

        sender.finish(true, None).await;
        sender
            .send(RelayEvent::Content {
                text: "late".to_string(),
            })
            .await;
        sender.finish(false, Some("again".to_string())).await;
        drop(sender);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![RelayEvent::TestComplete {
                success: true,
                error: None
            }]
        );
    }

    #[tokio::test]
    async fn test_sender_swallows_disconnected_receiver() {
        let (tx, rx) = mpsc::channel(8);
        drop(rx);

        let mut sender = RelayEventSender::new(tx);
        sender.send(RelayEvent::test_start()).await;
        assert!(sender.is_closed());

        // 断开后的写入不会 panic 也不会报错
        sender.finish(true, None).await;
        assert!(sender.is_finished());
    }
}
