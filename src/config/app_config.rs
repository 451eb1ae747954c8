//! # 应用配置结构
//!
//! 定义服务器、Redis、粘性会话和中继测试的配置项

use serde::{Deserialize, Serialize};

use crate::cache::RedisConfig;

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务器配置
    pub server: ServerConfig,
    /// Redis 配置
    #[serde(default)]
    pub redis: RedisConfig,
    /// 粘性会话配置
    #[serde(default)]
    pub session: SessionConfig,
    /// 中继测试配置
    #[serde(default)]
    pub relay_test: RelayTestConfig,
    /// 日志级别
    #[serde(default)]
    pub log_level: Option<String>,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    pub host: String,
    /// 监听端口，中继测试会回环访问该端口
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// 粘性会话配置
///
/// 三个可识别选项与网关配置保持一致：TTL 小时数、禁用自动续期、
/// 显式续期提醒窗口（分钟）。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// 会话映射过期时间（小时），非正数或缺省时回退为 1 小时
    #[serde(default)]
    pub sticky_ttl_hours: Option<f64>,
    /// 完全禁用自动续期
    #[serde(default)]
    pub disable_auto_renewal: bool,
    /// 显式续期提醒窗口（分钟）
    #[serde(default)]
    pub renewal_threshold_minutes: Option<f64>,
}

/// 中继测试配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayTestConfig {
    /// 单次中继调用的超时时间（毫秒）
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Claude 测试默认模型
    #[serde(default = "default_claude_model")]
    pub claude_model: String,
    /// Gemini 测试默认模型
    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,
    /// Codex 测试默认模型
    #[serde(default = "default_codex_model")]
    pub codex_model: String,
}

impl Default for RelayTestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            claude_model: default_claude_model(),
            gemini_model: default_gemini_model(),
            codex_model: default_codex_model(),
        }
    }
}

const fn default_timeout_ms() -> u64 {
    60_000
}

fn default_claude_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}

fn default_gemini_model() -> String {
    "gemini-2.5-pro".to_string()
}

fn default_codex_model() -> String {
    "gpt-5.2-codex".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_test_config_defaults() {
        let config = RelayTestConfig::default();
        assert_eq!(config.timeout_ms, 60_000);
        assert_eq!(config.claude_model, "claude-sonnet-4-5-20250929");
    }

    #[test]
    fn test_session_config_from_toml() {
        let config: SessionConfig = toml::from_str(
            r#"
            sticky_ttl_hours = 2.5
            disable_auto_renewal = false
            "#,
        )
        .expect("解析会话配置失败");

        assert_eq!(config.sticky_ttl_hours, Some(2.5));
        assert!(!config.disable_auto_renewal);
        assert!(config.renewal_threshold_minutes.is_none());
    }
}
