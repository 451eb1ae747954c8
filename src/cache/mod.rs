//! # 缓存模块
//!
//! Redis 缓存客户端以及会话存储、统计落盘的抽象接口

pub mod client;
pub mod store;

pub use client::{CacheClient, RedisConfig};
pub use store::{InterruptionSink, SessionStore};
