//! # 配置管理模块
//!
//! 处理应用配置加载、验证和管理

mod app_config;

pub use app_config::{AppConfig, RelayTestConfig, ServerConfig, SessionConfig};

use std::env;
use std::path::Path;

/// 加载配置文件
pub fn load_config() -> crate::error::Result<AppConfig> {
    let env = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
    let config_file = format!("config/config.{env}.toml");

    if !Path::new(&config_file).exists() {
        return Err(crate::error::ProxyError::config(format!(
            "配置文件不存在: {config_file}"
        )));
    }

    let config_content = std::fs::read_to_string(&config_file).map_err(|e| {
        crate::error::ProxyError::config_with_source(format!("读取配置文件失败: {config_file}"), e)
    })?;

    let config: AppConfig = toml::from_str(&config_content)?;

    // 验证配置的有效性
    validate_config(&config)?;

    Ok(config)
}

/// 验证配置有效性
fn validate_config(config: &AppConfig) -> crate::error::Result<()> {
    if config.server.port == 0 {
        return Err(crate::error::ProxyError::config(format!(
            "无效的服务器端口: {}",
            config.server.port
        )));
    }

    if config.relay_test.timeout_ms == 0 {
        return Err(crate::error::ProxyError::config(
            "中继测试超时时间必须大于 0",
        ));
    }

    Ok(())
}
