//! # 上游中继模块
//!
//! 将三种结构不同的上游响应（Anthropic 式 SSE、Codex 式 SSE、
//! Gemini 式单次 JSON）适配为统一的调用方事件流，并对失败做
//! 可观测性分类

pub mod codec;
pub mod events;
pub mod interruption;
pub mod payload;
pub mod upstream;

pub use events::{RelayEvent, RelayEventSender};
pub use interruption::{StreamInterruptionReason, record_interruption, record_interruption_detached};
pub use upstream::{RelayRequest, relay_claude_stream, relay_codex_stream, relay_gemini_json};
