//! # 请求处理器模块

pub mod api_stats;
