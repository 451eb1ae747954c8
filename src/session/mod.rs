//! # 粘性会话模块
//!
//! 会话粘性策略计算与会话映射诊断扫描

pub mod policy;
pub mod scanner;

pub use policy::{RenewalMode, StickySessionPolicy, resolve_renewal_mode, resolve_sticky_session_policy};
pub use scanner::{
    ProviderScanOutcome, ScanTarget, SessionMapping, SessionProvider, StickyDiagnosticsSummary,
    collect_sessions_for_api_key, mask_session_hash, resolve_scan_targets, run_sticky_diagnostics,
};
