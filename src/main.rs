//! # Sticky Relay 服务入口
//!
//! 加载配置、初始化日志、建立 Redis 连接并启动管理服务器

use std::sync::Arc;

use sticky_relay::cache::CacheClient;
use sticky_relay::config::load_config;
use sticky_relay::logging::init_logging;
use sticky_relay::management::server::{AppState, run_management_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(load_config()?);

    init_logging(config.log_level.as_deref());

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        "Sticky Relay 服务启动中"
    );

    let cache = CacheClient::new(config.redis.clone()).await?;
    cache.ping().await?;

    let state = AppState::new(config, cache)?;
    run_management_server(state).await?;

    Ok(())
}
