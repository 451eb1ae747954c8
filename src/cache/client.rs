//! # Redis 缓存客户端
//!
//! 提供 Redis 连接管理和本子系统消费的基础操作

use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::store::{InterruptionSink, SessionStore};
use crate::error::{ProxyError, Result};

/// Redis 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis 服务器地址
    pub host: String,
    /// Redis 服务器端口
    pub port: u16,
    /// 数据库编号
    pub database: u8,
    /// 连接密码（可选）
    pub password: Option<String>,
    /// 连接超时时间（秒）
    pub connection_timeout: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            database: 0,
            password: None,
            connection_timeout: 10,
        }
    }
}

impl RedisConfig {
    /// 构建 Redis 连接 URL
    #[must_use]
    pub fn build_url(&self) -> String {
        if let Some(password) = &self.password {
            format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.database
            )
        } else {
            format!("redis://{}:{}/{}", self.host, self.port, self.database)
        }
    }
}

/// Redis 缓存客户端
pub struct CacheClient {
    /// Redis 连接管理器
    connection_manager: ConnectionManager,
    /// 配置信息
    config: RedisConfig,
}

impl CacheClient {
    /// 创建新的缓存客户端
    pub async fn new(config: RedisConfig) -> Result<Self> {
        info!("正在连接 Redis 服务器: {}:{}", config.host, config.port);

        let client = Client::open(config.build_url())
            .map_err(|e| ProxyError::cache_with_source("创建 Redis 客户端失败", e))?;

        let connection_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| ProxyError::cache_with_source("建立 Redis 连接失败", e))?;

        info!("Redis 连接建立成功");

        Ok(Self {
            connection_manager,
            config,
        })
    }

    /// 设置字符串键（无过期时间）
    pub async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.connection_manager.clone();

        conn.set::<_, _, ()>(key, value)
            .await
            .map_err(|e| ProxyError::cache_with_source(format!("设置缓存失败: {key}"), e))?;

        Ok(())
    }

    /// 设置字符串键并指定 TTL
    pub async fn set_with_ttl(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        debug!("设置缓存: key={}, ttl={}s", key, ttl_seconds);

        let mut conn = self.connection_manager.clone();

        conn.set_ex::<_, _, ()>(key, value, ttl_seconds)
            .await
            .map_err(|e| ProxyError::cache_with_source(format!("设置缓存失败: {key}"), e))?;

        Ok(())
    }

    /// 获取缓存剩余存活时间
    pub async fn ttl(&self, key: &str) -> Result<i64> {
        let mut conn = self.connection_manager.clone();

        let ttl: i64 = conn
            .ttl(key)
            .await
            .map_err(|e| ProxyError::cache_with_source(format!("获取缓存TTL失败: {key}"), e))?;

        Ok(ttl)
    }

    /// 测试连接
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection_manager.clone();

        let response: String = redis::Cmd::new()
            .arg("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| ProxyError::cache_with_source("Redis ping 失败", e))?;

        if response == "PONG" {
            Ok(())
        } else {
            Err(ProxyError::cache("Redis 连接测试失败"))
        }
    }

    /// 获取配置信息
    #[must_use]
    pub const fn config(&self) -> &RedisConfig {
        &self.config
    }
}

#[async_trait]
impl SessionStore for CacheClient {
    async fn scan_keys(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>)> {
        let mut conn = self.connection_manager.clone();

        let mut cmd = redis::cmd("SCAN");
        cmd.arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count);

        let (next_cursor, keys): (u64, Vec<String>) = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| ProxyError::cache_with_source(format!("扫描键空间失败: {pattern}"), e))?;

        Ok((next_cursor, keys))
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection_manager.clone();

        let result: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| ProxyError::cache_with_source(format!("获取缓存失败: {key}"), e))?;

        Ok(result)
    }

    async fn fetch_with_ttl(&self, keys: &[String]) -> Result<Vec<(Option<String>, i64)>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.connection_manager.clone();

        // GET + TTL 成对打包，一次流水线往返
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.get(key);
            pipe.ttl(key);
        }

        let values: Vec<redis::Value> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| ProxyError::cache_with_source("批量读取会话映射失败", e))?;

        let mut results = Vec::with_capacity(keys.len());
        for chunk in values.chunks(2) {
            if chunk.len() < 2 {
                results.push((None, -2));
                continue;
            }

            // 单键解码失败按不存在处理，不能让一个坏键拖垮整轮扫描
            let value: Option<String> = redis::from_redis_value(&chunk[0]).unwrap_or(None);
            let ttl: i64 = redis::from_redis_value(&chunk[1]).unwrap_or(-2);
            results.push((value, ttl));
        }

        Ok(results)
    }
}

#[async_trait]
impl InterruptionSink for CacheClient {
    async fn record_stream_interruption(&self, reason: &str, provider: &str) -> Result<()> {
        let mut conn = self.connection_manager.clone();

        let key = format!("stats:stream_interruption:{provider}");
        let _count: i64 = conn
            .hincr(&key, reason, 1i64)
            .await
            .map_err(|e| ProxyError::cache_with_source(format!("记录流中断统计失败: {key}"), e))?;

        Ok(())
    }
}

impl Clone for CacheClient {
    fn clone(&self) -> Self {
        Self {
            connection_manager: self.connection_manager.clone(),
            config: self.config.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url_without_password() {
        let config = RedisConfig::default();
        assert_eq!(config.build_url(), "redis://127.0.0.1:6379/0");
    }

    #[test]
    fn test_build_url_with_password() {
        let config = RedisConfig {
            password: Some("secret".to_string()),
            ..RedisConfig::default()
        };
        assert_eq!(config.build_url(), "redis://:secret@127.0.0.1:6379/0");
    }
}
