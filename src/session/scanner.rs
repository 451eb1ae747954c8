//! # 会话映射诊断扫描
//!
//! 在共享键值存储中按预算、分页地回收归属于某个 API Key 的
//! 会话→账户映射，支持多 provider 命名空间并行扫描。

use chrono::{DateTime, Duration, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::SessionStore;
use crate::error::Result;

/// 单轮 SCAN 的 COUNT 提示
pub const SESSION_MAPPING_SCAN_COUNT: usize = 200;
/// 每个 provider 的累计扫描键数上限
pub const SESSION_MAPPING_SCAN_LIMIT: usize = 1500;
/// 每个 provider 返回的会话数上限
pub const SESSION_MAPPING_RESULT_LIMIT: usize = 20;

/// Gemini 命名空间下可识别的 OAuth 子 provider
const GEMINI_OAUTH_PROVIDERS: [&str; 2] = ["gemini-cli", "antigravity"];

/// 会话映射所属的上游 provider 命名空间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionProvider {
    Claude,
    Gemini,
    Openai,
}

impl SessionProvider {
    /// 转换为字符串表示
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Gemini => "gemini",
            Self::Openai => "openai",
        }
    }
}

impl std::fmt::Display for SessionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一个 provider 命名空间的扫描目标
#[derive(Debug, Clone)]
pub struct ScanTarget {
    /// provider 命名空间
    pub provider: SessionProvider,
    /// SCAN MATCH 模式
    pub pattern: String,
    /// 键前缀，用于还原会话标识
    pub prefix: String,
}

impl ScanTarget {
    /// 按 provider 构建统一映射命名空间的扫描目标
    #[must_use]
    pub fn for_provider(provider: SessionProvider) -> Self {
        let prefix = format!("unified_{}_session_mapping:", provider.as_str());
        Self {
            provider,
            pattern: format!("{prefix}*"),
            prefix,
        }
    }
}

/// 解析出的一条会话映射
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMapping {
    /// provider 命名空间
    pub provider: SessionProvider,
    /// Gemini 专用的 OAuth 子 provider，其余 provider 恒为空
    pub oauth_provider: Option<String>,
    /// 会话标识（不透明哈希）
    pub session_hash: String,
    /// 掩码后的展示形式
    pub session_preview: String,
    /// 绑定的账户 ID
    pub account_id: String,
    /// 账户类型
    pub account_type: String,
    /// 剩余 TTL（秒），None 表示未知或持久
    pub ttl_seconds: Option<i64>,
    /// 剩余 TTL（分钟，向上取整）
    pub ttl_minutes: Option<i64>,
    /// 推导的过期时间
    pub expires_at: Option<DateTime<Utc>>,
}

/// 单个 provider 的扫描结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderScanOutcome {
    /// provider 命名空间
    pub provider: SessionProvider,
    /// 实际读取的键数
    pub scanned_keys: usize,
    /// 是否因预算或结果上限被截断
    pub truncated: bool,
    /// 归属于目标 API Key 的会话列表
    pub sessions: Vec<SessionMapping>,
}

/// 多 provider 合并后的诊断汇总
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StickyDiagnosticsSummary {
    /// 各 provider 扫描键数之和
    pub scanned_keys: usize,
    /// 任一 provider 被截断即为 true
    pub truncated: bool,
    /// 合并排序后的会话列表（TTL 降序，未知 TTL 排最后）
    pub sessions: Vec<SessionMapping>,
}

/// 存储中的原始映射记录，多余字段一概忽略
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMappingRecord {
    api_key_id: Option<String>,
    #[serde(default)]
    account_id: Option<String>,
    #[serde(default)]
    account_type: Option<String>,
}

/// 掩码会话哈希：12 个字符以内原样展示，超长时取前 8 + "..." + 后 4
#[must_use]
pub fn mask_session_hash(session_hash: &str) -> String {
    if session_hash.len() <= 12 {
        return session_hash.to_string();
    }

    // 按字节切片，会话哈希是 ASCII 的十六进制/UUID 形式
    format!(
        "{}...{}",
        &session_hash[..8],
        &session_hash[session_hash.len() - 4..]
    )
}

/// 从键名还原会话标识
///
/// Gemini 命名空间的键可能带有 OAuth 子 provider 段
/// （`unified_gemini_session_mapping:gemini-cli:{hash}`），
/// 识别到已知子 provider 时将其剥离。
fn parse_session_identity(
    key: &str,
    prefix: &str,
    provider: SessionProvider,
) -> (String, String, Option<String>) {
    let Some(raw_session_part) = key.strip_prefix(prefix) else {
        // 不符合前缀的键原样透出，掩码同样缺省
        return (key.to_string(), key.to_string(), None);
    };

    if provider == SessionProvider::Gemini {
        if let Some((first, rest)) = raw_session_part.split_once(':') {
            if !rest.is_empty() && GEMINI_OAUTH_PROVIDERS.contains(&first) {
                return (
                    rest.to_string(),
                    mask_session_hash(rest),
                    Some(first.to_string()),
                );
            }
        }
    }

    (
        raw_session_part.to_string(),
        mask_session_hash(raw_session_part),
        None,
    )
}

/// 扫描单个 provider 命名空间，回收归属于指定 API Key 的会话映射
///
/// 预算约束：单轮 COUNT 提示 200、累计 1500 个键、最多 20 条结果。
/// 任何单键的读取失败、空值、TTL=-2（与过期竞争）、无法解析或
/// 租户不匹配都静默跳过；只有存储连接失败才向上传播。
pub async fn collect_sessions_for_api_key(
    store: &dyn SessionStore,
    target: &ScanTarget,
    api_key_id: &str,
) -> Result<ProviderScanOutcome> {
    let mut sessions: Vec<SessionMapping> = Vec::new();
    let mut cursor: u64 = 0;
    let mut scanned_keys: usize = 0;
    let mut truncated = false;

    loop {
        let (next_cursor, keys) = store
            .scan_keys(cursor, &target.pattern, SESSION_MAPPING_SCAN_COUNT)
            .await?;
        cursor = next_cursor;

        if keys.is_empty() {
            if cursor == 0 {
                break;
            }
            continue;
        }

        let remaining_budget = SESSION_MAPPING_SCAN_LIMIT.saturating_sub(scanned_keys);
        if remaining_budget == 0 {
            truncated = true;
            break;
        }

        let candidate_count = keys.len().min(remaining_budget);
        let candidate_keys = &keys[..candidate_count];
        scanned_keys += candidate_count;

        let details = store.fetch_with_ttl(candidate_keys).await?;

        for (key, (mapping_text, ttl_raw)) in candidate_keys.iter().zip(details) {
            if sessions.len() >= SESSION_MAPPING_RESULT_LIMIT {
                truncated = true;
                break;
            }

            // TTL=-2 表示键已经不存在，与过期竞争时按不存在跳过
            let Some(mapping_text) = mapping_text else {
                continue;
            };
            if mapping_text.is_empty() || ttl_raw == -2 {
                continue;
            }

            let Ok(record) = serde_json::from_str::<RawMappingRecord>(&mapping_text) else {
                continue;
            };

            // 严格租户隔离：只归集 apiKeyId 完全匹配的映射
            if record.api_key_id.as_deref() != Some(api_key_id) {
                continue;
            }

            let (session_hash, session_preview, oauth_provider) =
                parse_session_identity(key, &target.prefix, target.provider);
            let ttl_seconds = (ttl_raw >= 0).then_some(ttl_raw);

            sessions.push(SessionMapping {
                provider: target.provider,
                oauth_provider,
                session_hash,
                session_preview,
                account_id: record.account_id.unwrap_or_default(),
                account_type: record.account_type.unwrap_or_default(),
                ttl_seconds,
                ttl_minutes: ttl_seconds.map(|ttl| (ttl + 59) / 60),
                expires_at: ttl_seconds.map(|ttl| Utc::now() + Duration::seconds(ttl)),
            });
        }

        if sessions.len() >= SESSION_MAPPING_RESULT_LIMIT {
            truncated = true;
            break;
        }

        // 本轮返回的键数超过剩余预算，后续无法完整覆盖
        if candidate_count < keys.len() {
            truncated = true;
            break;
        }

        if cursor == 0 {
            break;
        }
    }

    // 预算内没有走到终止游标，键空间未被完整遍历
    if cursor != 0 {
        truncated = true;
    }

    debug!(
        provider = target.provider.as_str(),
        scanned_keys,
        matched = sessions.len(),
        truncated,
        "会话映射扫描完成"
    );

    Ok(ProviderScanOutcome {
        provider: target.provider,
        scanned_keys,
        truncated,
        sessions,
    })
}

/// 解析诊断请求的扫描目标
///
/// `provider` 为 None 或 "all" 时返回全部三个命名空间。
#[must_use]
pub fn resolve_scan_targets(provider: Option<SessionProvider>) -> Vec<ScanTarget> {
    let all = [
        SessionProvider::Claude,
        SessionProvider::Gemini,
        SessionProvider::Openai,
    ];

    all.into_iter()
        .filter(|p| provider.is_none_or(|wanted| *p == wanted))
        .map(ScanTarget::for_provider)
        .collect()
}

/// 并行扫描多个 provider 命名空间并合并结果
///
/// 合并后的会话列表按 TTL 降序排列，未知 TTL 排在最后；
/// `scanned_keys` 为各 provider 之和，`truncated` 为逻辑或。
pub async fn run_sticky_diagnostics(
    store: &dyn SessionStore,
    targets: &[ScanTarget],
    api_key_id: &str,
) -> Result<StickyDiagnosticsSummary> {
    let outcomes = try_join_all(
        targets
            .iter()
            .map(|target| collect_sessions_for_api_key(store, target, api_key_id)),
    )
    .await?;

    let scanned_keys = outcomes.iter().map(|o| o.scanned_keys).sum();
    let truncated = outcomes.iter().any(|o| o.truncated);

    let mut sessions: Vec<SessionMapping> = outcomes
        .into_iter()
        .flat_map(|o| o.sessions)
        .collect();
    sessions.sort_by_key(|s| std::cmp::Reverse(s.ttl_seconds.unwrap_or(-1)));

    Ok(StickyDiagnosticsSummary {
        scanned_keys,
        truncated,
        sessions,
    })
}
