//! # API Key 校验服务
//!
//! 按哈希索引从存储中取回 API Key 记录并做状态校验。
//! 对外的失败消息不区分"密钥错误"与"密钥不存在"，避免认证预言机。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

use crate::cache::SessionStore;
use crate::error::Result;

/// 对外统一的校验失败消息
const INVALID_KEY_MESSAGE: &str = "Invalid API key";

/// API Key 的合法长度范围
pub const API_KEY_MIN_LENGTH: usize = 10;
/// API Key 的合法长度上限
pub const API_KEY_MAX_LENGTH: usize = 512;

/// 存储中的 API Key 记录
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyRecord {
    /// 记录 ID
    pub id: String,
    /// 展示名称
    pub name: String,
    /// 描述
    #[serde(default)]
    pub description: Option<String>,
    /// 是否启用
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// 过期时间
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// 绑定的 Claude 账户
    #[serde(default)]
    pub claude_account_id: Option<String>,
    /// 绑定的 Gemini 账户
    #[serde(default)]
    pub gemini_account_id: Option<String>,
    /// 绑定的 OpenAI 账户
    #[serde(default)]
    pub openai_account_id: Option<String>,
}

const fn default_true() -> bool {
    true
}

/// 校验选项
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationOptions {
    /// 允许已禁用的密钥通过（只读诊断场景）
    pub allow_disabled: bool,
    /// 允许已过期的密钥通过
    pub allow_expired: bool,
}

/// 校验结果
#[derive(Debug, Clone)]
pub struct ApiKeyValidation {
    /// 是否有效
    pub valid: bool,
    /// 失败消息
    pub error: Option<String>,
    /// 命中的记录
    pub record: Option<ApiKeyRecord>,
}

impl ApiKeyValidation {
    fn invalid(message: &str) -> Self {
        Self {
            valid: false,
            error: Some(message.to_string()),
            record: None,
        }
    }

    const fn valid(record: ApiKeyRecord) -> Self {
        Self {
            valid: true,
            error: None,
            record: Some(record),
        }
    }
}

/// API Key 校验服务
pub struct ApiKeyService {
    store: Arc<dyn SessionStore>,
}

impl ApiKeyService {
    /// 创建校验服务
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// 校验 API Key 是否在给定宽限选项下有效
    ///
    /// 只有存储连接失败才返回错误；密钥不存在、禁用、过期都折叠进
    /// `ApiKeyValidation`。
    pub async fn validate_for_stats(
        &self,
        api_key: &str,
        options: ValidationOptions,
    ) -> Result<ApiKeyValidation> {
        let hashed = hash_api_key(api_key);

        let Some(key_id) = self.store.get_string(&format!("apikey:hash:{hashed}")).await? else {
            debug!("API Key 哈希索引未命中");
            return Ok(ApiKeyValidation::invalid(INVALID_KEY_MESSAGE));
        };

        let Some(record_text) = self.store.get_string(&format!("apikey:{key_id}")).await? else {
            debug!(key_id, "API Key 记录缺失");
            return Ok(ApiKeyValidation::invalid(INVALID_KEY_MESSAGE));
        };

        let Ok(record) = serde_json::from_str::<ApiKeyRecord>(&record_text) else {
            debug!(key_id, "API Key 记录无法解析");
            return Ok(ApiKeyValidation::invalid(INVALID_KEY_MESSAGE));
        };

        if !record.is_active && !options.allow_disabled {
            return Ok(ApiKeyValidation::invalid("API key is disabled"));
        }

        if !options.allow_expired {
            if let Some(expires_at) = record.expires_at {
                if Utc::now() > expires_at {
                    return Ok(ApiKeyValidation::invalid("API key has expired"));
                }
            }
        }

        Ok(ApiKeyValidation::valid(record))
    }
}

/// API Key 的存储哈希（SHA-256 十六进制）
#[must_use]
pub fn hash_api_key(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// API Key 格式预检：长度必须在合法范围内
#[must_use]
pub fn is_valid_key_format(api_key: &str) -> bool {
    (API_KEY_MIN_LENGTH..=API_KEY_MAX_LENGTH).contains(&api_key.len())
}
