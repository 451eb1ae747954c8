//! # 路由配置
//!
//! 定义所有API路由和路由组织

use axum::Router;
use axum::routing::post;

use crate::management::server::AppState;

/// 创建所有路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        // API Key 自助诊断与测试路由
        .nest("/api-key", api_key_routes())
        .with_state(state)
}

/// API Key 自助路由
fn api_key_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/get-key-id",
            post(crate::management::handlers::api_stats::get_key_id),
        )
        .route(
            "/sticky-diagnostics",
            post(crate::management::handlers::api_stats::sticky_diagnostics),
        )
        .route(
            "/test",
            post(crate::management::handlers::api_stats::api_key_test),
        )
}
