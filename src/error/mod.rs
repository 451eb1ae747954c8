//! # 错误处理模块
//!
//! 统一的错误类型定义和结果别名

mod types;

pub use types::ProxyError;

/// 统一结果类型
pub type Result<T> = std::result::Result<T, ProxyError>;
