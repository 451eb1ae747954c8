//! # 粘性会话策略
//!
//! 从配置与运行时覆盖项计算 TTL/续期参数。纯计算，永不失败。

use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;

/// 粘性会话策略计算结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StickySessionPolicy {
    /// 会话映射 TTL（小时），保证为正
    pub ttl_hours: f64,
    /// 完整 TTL（秒），至少为 1
    pub full_ttl_seconds: u64,
    /// 续期提醒窗口（分钟），禁用续期时恒为 0
    pub renewal_threshold_minutes: f64,
    /// 续期提醒窗口（秒）
    pub renewal_threshold_seconds: u64,
    /// 是否禁用自动续期
    pub auto_renew_disabled: bool,
}

/// 续期模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenewalMode {
    /// 自动续期被禁用
    Disabled,
    /// 显式配置了正的续期窗口
    Manual,
    /// 按 TTL 的三分之一自动推导
    Auto,
}

impl RenewalMode {
    /// 转换为字符串表示
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Manual => "manual",
            Self::Auto => "auto",
        }
    }
}

/// 取第一个正的有限值，否则回退
fn to_positive(value: Option<f64>, fallback: f64) -> f64 {
    match value {
        Some(v) if v.is_finite() && v > 0.0 => v,
        _ => fallback,
    }
}

/// 解析粘性会话策略
///
/// `auto_renew_enabled_override` 来自运行时配置，优先于配置文件中的
/// `disable_auto_renewal` 标志。未禁用且无显式窗口时，默认提醒窗口为
/// TTL 的三分之一，下限 5 分钟、上限 60 分钟。
#[must_use]
pub fn resolve_sticky_session_policy(
    session_config: &SessionConfig,
    auto_renew_enabled_override: Option<bool>,
) -> StickySessionPolicy {
    let ttl_hours = to_positive(session_config.sticky_ttl_hours, 1.0);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let full_ttl_seconds = ((ttl_hours * 60.0 * 60.0).floor() as i64).max(1) as u64;

    let auto_renew_disabled = auto_renew_enabled_override
        .map_or(session_config.disable_auto_renewal, |enabled| !enabled);

    let renewal_threshold_minutes = if auto_renew_disabled {
        0.0
    } else {
        match session_config.renewal_threshold_minutes {
            Some(v) if v.is_finite() && v > 0.0 => v,
            _ => ((ttl_hours * 60.0) / 3.0).ceil().clamp(5.0, 60.0),
        }
    };

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let renewal_threshold_seconds = ((renewal_threshold_minutes * 60.0).floor() as i64).max(0) as u64;

    StickySessionPolicy {
        ttl_hours,
        full_ttl_seconds,
        renewal_threshold_minutes,
        renewal_threshold_seconds,
        auto_renew_disabled,
    }
}

/// 解析续期模式
#[must_use]
pub fn resolve_renewal_mode(
    session_config: &SessionConfig,
    policy: &StickySessionPolicy,
) -> RenewalMode {
    if policy.auto_renew_disabled {
        return RenewalMode::Disabled;
    }

    match session_config.renewal_threshold_minutes {
        Some(v) if v.is_finite() && v > 0.0 => RenewalMode::Manual,
        _ => RenewalMode::Auto,
    }
}
