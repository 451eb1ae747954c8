//! # 账户概览读取
//!
//! 账户池由外部模块维护，这里只消费一个窄读：按账户 ID 取回概览，
//! 用于决定是否在诊断结果中透出专属账户信息

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cache::SessionStore;
use crate::error::Result;

/// 账户概览
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountOverview {
    /// 账户类型，只有 "dedicated" 会被透出
    pub account_type: String,
    /// 账户展示名
    #[serde(default)]
    pub name: Option<String>,
    /// 账户状态
    #[serde(default)]
    pub status: Option<String>,
}

impl AccountOverview {
    /// 是否为专属账户
    #[must_use]
    pub fn is_dedicated(&self) -> bool {
        self.account_type == "dedicated"
    }
}

/// 读取账户概览；记录缺失或无法解析时返回 None
pub async fn get_account_overview(
    store: &dyn SessionStore,
    provider: &str,
    account_id: &str,
) -> Result<Option<AccountOverview>> {
    let key = format!("account:{provider}:{account_id}");

    let Some(text) = store.get_string(&key).await? else {
        return Ok(None);
    };

    match serde_json::from_str::<AccountOverview>(&text) {
        Ok(overview) => Ok(Some(overview)),
        Err(err) => {
            warn!(key, error = %err, "账户概览记录无法解析");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedicated_detection() {
        let overview: AccountOverview =
            serde_json::from_str(r#"{"accountType":"dedicated","name":"团队账户"}"#)
                .expect("解析失败");
        assert!(overview.is_dedicated());

        let overview: AccountOverview =
            serde_json::from_str(r#"{"accountType":"shared"}"#).expect("解析失败");
        assert!(!overview.is_dedicated());
    }
}
