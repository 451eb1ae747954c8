//! # 存储抽象层
//!
//! 将诊断扫描与统计落盘依赖的存储原语收敛为窄接口，
//! 生产环境由 Redis 客户端实现，测试中可用内存实现替换

use async_trait::async_trait;

use crate::error::Result;

/// 会话存储接口
///
/// 诊断扫描只消费三个只读原语：游标式 SCAN、单键 GET、
/// 以及一次流水线往返完成的批量 GET+TTL。
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 按游标扫描键空间，返回下一个游标和本轮候选键。
    /// 游标为 0 表示遍历完成。
    async fn scan_keys(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>)>;

    /// 读取单个字符串键
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    /// 批量读取键的值和剩余 TTL，一次流水线往返。
    ///
    /// 单个键的读取失败以 `(None, -2)` 表示（调用方按不存在跳过），
    /// 只有整体连接失败才返回错误。
    async fn fetch_with_ttl(&self, keys: &[String]) -> Result<Vec<(Option<String>, i64)>>;
}

/// 流中断统计落盘接口
///
/// 记录失败永远不允许影响主响应路径，调用方负责吞掉错误。
#[async_trait]
pub trait InterruptionSink: Send + Sync {
    /// 持久化一次流中断记录
    async fn record_stream_interruption(&self, reason: &str, provider: &str) -> Result<()>;
}
