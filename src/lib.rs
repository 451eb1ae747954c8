//! # Sticky Relay 子系统库
//!
//! AI 服务代理的粘性会话诊断与中继测试核心库

pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod management;
pub mod relay;
pub mod session;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{ProxyError, Result};
