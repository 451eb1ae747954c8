//! # 管理接口模块
//!
//! Axum HTTP 服务器，提供 API Key 自助诊断与连通性测试接口

pub mod handlers;
pub mod response;
pub mod routes;
pub mod server;

pub use server::AppState;
