//! # API 响应结构
//!
//! 定义标准的 JSON API 响应格式，包括成功与失败响应

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ProxyError;

/// # 标准成功响应
#[derive(Debug, Serialize)]
pub struct SuccessResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
    pub timestamp: DateTime<Utc>,
}

/// # 标准错误信息
#[derive(Debug, Serialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

/// # 标准错误响应
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorInfo,
    pub timestamp: DateTime<Utc>,
}

/// 构建成功响应
pub fn success<T: Serialize>(data: T) -> Response {
    (
        StatusCode::OK,
        Json(SuccessResponse {
            success: true,
            data,
            timestamp: Utc::now(),
        }),
    )
        .into_response()
}

/// 构建错误响应
pub fn error(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            success: false,
            error: ErrorInfo {
                code: code.to_string(),
                message: message.to_string(),
            },
            timestamp: Utc::now(),
        }),
    )
        .into_response()
}

/// 将应用错误转换为错误响应
///
/// 对外只透出粗粒度消息，详细原因由调用方在服务端日志记录。
pub fn app_error(err: &ProxyError) -> Response {
    let (status, code) = err.to_http_response_parts();
    let message = match err {
        ProxyError::Cache { .. } | ProxyError::Internal { .. } => "Internal server error",
        ProxyError::Auth { .. } => "Invalid API key",
        _ => "Request failed",
    };
    error(status, code, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_masks_cache_details() {
        let response = app_error(&ProxyError::cache("redis://internal-host 连接失败"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_auth_error_maps_to_401() {
        let response = app_error(&ProxyError::auth("无效密钥"));
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
