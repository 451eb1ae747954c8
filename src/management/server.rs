//! # 管理服务器
//!
//! Axum HTTP 服务器的应用状态与启动入口

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::ApiKeyService;
use crate::cache::{CacheClient, InterruptionSink, SessionStore};
use crate::config::AppConfig;
use crate::error::{ProxyError, Result};
use crate::management::routes::create_routes;

/// 管理服务器应用状态
#[derive(Clone)]
pub struct AppState {
    /// 应用配置
    pub config: Arc<AppConfig>,
    /// Redis 客户端
    pub cache: CacheClient,
    /// API Key 校验服务
    pub api_keys: Arc<ApiKeyService>,
    /// 出站 HTTP 客户端
    pub http: reqwest::Client,
}

impl AppState {
    /// 构建应用状态
    pub fn new(config: Arc<AppConfig>, cache: CacheClient) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProxyError::internal_with_source("创建 HTTP 客户端失败", e))?;

        let store: Arc<dyn SessionStore> = Arc::new(cache.clone());
        let api_keys = Arc::new(ApiKeyService::new(store));

        Ok(Self {
            config,
            cache,
            api_keys,
            http,
        })
    }

    /// 会话存储视图
    #[must_use]
    pub fn session_store(&self) -> Arc<dyn SessionStore> {
        Arc::new(self.cache.clone())
    }

    /// 统计落盘视图
    #[must_use]
    pub fn interruption_sink(&self) -> Arc<dyn InterruptionSink> {
        Arc::new(self.cache.clone())
    }
}

/// 启动管理服务器
pub async fn run_management_server(state: AppState) -> Result<()> {
    let addr = format!(
        "{}:{}",
        state.config.server.host, state.config.server.port
    );

    let router = create_routes(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| ProxyError::internal_with_source(format!("绑定监听地址失败: {addr}"), e))?;

    info!("管理服务器启动: http://{addr}");

    axum::serve(listener, router)
        .await
        .map_err(|e| ProxyError::internal_with_source("管理服务器运行失败", e))?;

    Ok(())
}
