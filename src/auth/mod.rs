//! # 认证模块
//!
//! 代理签发的 API Key 的校验（供诊断与测试接口消费），
//! 以及账户概览的窄读接口

pub mod accounts;
pub mod api_key;

pub use accounts::{AccountOverview, get_account_overview};
pub use api_key::{ApiKeyRecord, ApiKeyService, ApiKeyValidation, ValidationOptions};
