//! # API Key 自助诊断与测试接口
//!
//! 面向密钥持有者的自查能力：密钥 ID 查询、粘性会话诊断、
//! 以及对三种上游的连通性测试（SSE 事件流输出）

use std::convert::Infallible;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Json, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tracing::{debug, error, info, warn};

use crate::auth::{AccountOverview, ApiKeyRecord, ValidationOptions, get_account_overview};
use crate::auth::api_key::is_valid_key_format;
use crate::error::Result;
use crate::management::response;
use crate::management::server::AppState;
use crate::relay::events::{RelayEvent, RelayEventSender};
use crate::relay::payload::{
    CodexPayloadOptions, create_claude_test_payload, create_codex_test_payload,
    create_gemini_test_payload,
};
use crate::relay::upstream::{
    RelayRequest, relay_claude_stream, relay_codex_stream, relay_gemini_json,
};
use crate::session::policy::{resolve_renewal_mode, resolve_sticky_session_policy};
use crate::session::scanner::{
    SESSION_MAPPING_RESULT_LIMIT, SESSION_MAPPING_SCAN_LIMIT, SessionMapping, SessionProvider,
    resolve_scan_targets, run_sticky_diagnostics,
};

/// 诊断结果附带的归集说明
const DIAGNOSTICS_NOTE: &str = "Only unified mappings that include apiKeyId can be attributed \
to this API key. Legacy sticky_session keys are not included.";

/// 测试接口可选的 provider 集合
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestProvider {
    Claude,
    Gemini,
    Codex,
}

impl TestProvider {
    /// 转换为字符串表示
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Gemini => "gemini",
            Self::Codex => "codex",
        }
    }
}

/// 归一化测试 provider；None 表示未提供，Err 表示无法识别
fn normalize_test_provider(raw: Option<&str>) -> std::result::Result<Option<TestProvider>, ()> {
    let Some(raw) = raw else {
        return Ok(None);
    };

    match raw.trim().to_lowercase().as_str() {
        "claude" => Ok(Some(TestProvider::Claude)),
        "gemini" => Ok(Some(TestProvider::Gemini)),
        "codex" => Ok(Some(TestProvider::Codex)),
        _ => Err(()),
    }
}

/// 诊断接口的扫描范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StickyScope {
    /// 全部 provider 命名空间
    All,
    /// 单个 provider 命名空间
    One(SessionProvider),
}

impl StickyScope {
    /// 转换为响应中的字符串表示
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::One(provider) => provider.as_str(),
        }
    }

    /// 对应的目标过滤器
    #[must_use]
    pub const fn provider_filter(self) -> Option<SessionProvider> {
        match self {
            Self::All => None,
            Self::One(provider) => Some(provider),
        }
    }
}

/// 归一化诊断 provider；缺省为 all，codex 是 openai 命名空间的别名
fn normalize_sticky_scope(raw: Option<&str>) -> Option<StickyScope> {
    let normalized = raw.unwrap_or("all").trim().to_lowercase();
    match normalized.as_str() {
        "all" => Some(StickyScope::All),
        "claude" => Some(StickyScope::One(SessionProvider::Claude)),
        "gemini" => Some(StickyScope::One(SessionProvider::Gemini)),
        // codex 走 openai 命名空间
        "codex" | "openai" => Some(StickyScope::One(SessionProvider::Openai)),
        _ => None,
    }
}

/// 账户 ID 非空才视为已绑定
fn has_bound_account(account_id: Option<&str>) -> bool {
    account_id.is_some_and(|id| !id.trim().is_empty())
}

/// 从密钥绑定的账户推断测试 provider
///
/// 优先级：绑定 OpenAI 账户 → codex；绑定 Gemini 账户 → gemini；
/// 否则 claude。
#[must_use]
pub fn infer_test_provider(record: &ApiKeyRecord) -> TestProvider {
    if has_bound_account(record.openai_account_id.as_deref()) {
        return TestProvider::Codex;
    }
    if has_bound_account(record.gemini_account_id.as_deref()) {
        return TestProvider::Gemini;
    }
    TestProvider::Claude
}

// ---------------------------------------------------------------------------
// POST /api-key/get-key-id
// ---------------------------------------------------------------------------

/// 请求体
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetKeyIdRequest {
    #[serde(default)]
    pub api_key: Option<String>,
}

/// 响应体
#[derive(Debug, Serialize)]
pub struct GetKeyIdPayload {
    pub id: String,
}

/// 查询 API Key 对应的记录 ID
pub async fn get_key_id(
    State(state): State<AppState>,
    Json(request): Json<GetKeyIdRequest>,
) -> Response {
    match process_get_key_id(&state, request).await {
        Ok(response) => response,
        Err(err) => {
            error!(error = %err, "查询 API Key ID 失败");
            response::app_error(&err)
        }
    }
}

async fn process_get_key_id(state: &AppState, request: GetKeyIdRequest) -> Result<Response> {
    let Some(api_key) = request.api_key.as_deref().filter(|k| !k.is_empty()) else {
        return Ok(response::error(
            StatusCode::BAD_REQUEST,
            "INVALID_INPUT",
            "Please provide your API Key",
        ));
    };

    if !is_valid_key_format(api_key) {
        return Ok(response::error(
            StatusCode::BAD_REQUEST,
            "INVALID_INPUT",
            "API key format is invalid",
        ));
    }

    let validation = state
        .api_keys
        .validate_for_stats(
            api_key,
            ValidationOptions {
                allow_disabled: true,
                allow_expired: true,
            },
        )
        .await?;

    let Some(record) = validation.record else {
        warn!("get-key-id 收到无效的 API Key");
        return Ok(response::error(
            StatusCode::UNAUTHORIZED,
            "INVALID_API_KEY",
            validation.error.as_deref().unwrap_or("Invalid API key"),
        ));
    };

    Ok(response::success(GetKeyIdPayload { id: record.id }))
}

// ---------------------------------------------------------------------------
// POST /api-key/sticky-diagnostics
// ---------------------------------------------------------------------------

/// 请求体
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StickyDiagnosticsRequest {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
}

/// 策略部分的响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyPayload {
    pub sticky_ttl_hours: f64,
    #[serde(rename = "fullTTLSeconds")]
    pub full_ttl_seconds: u64,
    pub renewal_threshold_minutes: f64,
    pub renewal_threshold_seconds: u64,
    pub auto_renew_enabled: bool,
    pub renewal_mode: &'static str,
}

/// 诊断元数据
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsMeta {
    pub scanned_keys: usize,
    pub scan_limit_per_provider: usize,
    pub result_limit_per_provider: usize,
    pub truncated: bool,
}

/// 绑定的专属账户详情
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundAccountDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claude: Option<AccountOverview>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai: Option<AccountOverview>,
}

impl BoundAccountDetails {
    const fn is_empty(&self) -> bool {
        self.claude.is_none() && self.openai.is_none()
    }
}

/// 诊断响应体
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StickyDiagnosticsPayload {
    pub provider: &'static str,
    pub api_key_id: String,
    pub api_key_name: String,
    pub policy: PolicyPayload,
    pub active_session_count: usize,
    pub sessions: Vec<SessionMapping>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bound_accounts: Option<BoundAccountDetails>,
    pub diagnostics: DiagnosticsMeta,
    pub note: &'static str,
}

/// 粘性会话诊断
pub async fn sticky_diagnostics(
    State(state): State<AppState>,
    Json(request): Json<StickyDiagnosticsRequest>,
) -> Response {
    match process_sticky_diagnostics(&state, request).await {
        Ok(response) => response,
        Err(err) => {
            error!(error = %err, "粘性会话诊断失败");
            response::app_error(&err)
        }
    }
}

async fn process_sticky_diagnostics(
    state: &AppState,
    request: StickyDiagnosticsRequest,
) -> Result<Response> {
    let Some(scope) = normalize_sticky_scope(request.provider.as_deref()) else {
        return Ok(response::error(
            StatusCode::BAD_REQUEST,
            "INVALID_PROVIDER",
            "Provider must be one of: all, claude, gemini, codex",
        ));
    };

    let Some(api_key) = request.api_key.as_deref().filter(|k| !k.is_empty()) else {
        return Ok(response::error(
            StatusCode::BAD_REQUEST,
            "INVALID_INPUT",
            "Please provide your API Key",
        ));
    };

    if !is_valid_key_format(api_key) {
        return Ok(response::error(
            StatusCode::BAD_REQUEST,
            "INVALID_INPUT",
            "API key format is invalid",
        ));
    }

    let validation = state
        .api_keys
        .validate_for_stats(
            api_key,
            ValidationOptions {
                allow_disabled: true,
                allow_expired: true,
            },
        )
        .await?;

    let Some(record) = validation.record else {
        return Ok(response::error(
            StatusCode::UNAUTHORIZED,
            "INVALID_API_KEY",
            validation.error.as_deref().unwrap_or("Invalid API key"),
        ));
    };

    let store = state.session_store();

    // 运行时覆盖：中继配置可以整体开关自动续期，读取失败只降级
    let auto_renew_override = load_auto_renew_override(store.as_ref()).await;

    let session_config = &state.config.session;
    let policy = resolve_sticky_session_policy(session_config, auto_renew_override);
    let renewal_mode = resolve_renewal_mode(session_config, &policy);

    let targets = resolve_scan_targets(scope.provider_filter());
    let summary = run_sticky_diagnostics(store.as_ref(), &targets, &record.id).await?;

    let bound_accounts = load_bound_accounts(store.as_ref(), &record).await;

    info!(
        api_key_id = %record.id,
        provider = scope.as_str(),
        sessions = summary.sessions.len(),
        scanned_keys = summary.scanned_keys,
        "粘性会话诊断完成"
    );

    Ok(response::success(StickyDiagnosticsPayload {
        provider: scope.as_str(),
        api_key_id: record.id,
        api_key_name: record.name,
        policy: PolicyPayload {
            sticky_ttl_hours: policy.ttl_hours,
            full_ttl_seconds: policy.full_ttl_seconds,
            renewal_threshold_minutes: policy.renewal_threshold_minutes,
            renewal_threshold_seconds: policy.renewal_threshold_seconds,
            auto_renew_enabled: !policy.auto_renew_disabled,
            renewal_mode: renewal_mode.as_str(),
        },
        active_session_count: summary.sessions.len(),
        sessions: summary.sessions,
        bound_accounts,
        diagnostics: DiagnosticsMeta {
            scanned_keys: summary.scanned_keys,
            scan_limit_per_provider: SESSION_MAPPING_SCAN_LIMIT,
            result_limit_per_provider: SESSION_MAPPING_RESULT_LIMIT,
            truncated: summary.truncated,
        },
        note: DIAGNOSTICS_NOTE,
    }))
}

/// 从中继运行时配置读取自动续期开关；任何失败都只降级为无覆盖
async fn load_auto_renew_override(store: &dyn crate::cache::SessionStore) -> Option<bool> {
    match store.get_string("relay_config").await {
        Ok(Some(text)) => serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|config| {
                config
                    .get("stickySessionAutoRenewalEnabled")
                    .and_then(Value::as_bool)
            }),
        Ok(None) => None,
        Err(err) => {
            debug!(error = %err, "读取粘性会话运行时覆盖失败");
            None
        }
    }
}

/// 并发读取绑定账户的概览，只透出专属账户
async fn load_bound_accounts(
    store: &dyn crate::cache::SessionStore,
    record: &ApiKeyRecord,
) -> Option<BoundAccountDetails> {
    let claude_task = async {
        match record.claude_account_id.as_deref().filter(|id| !id.is_empty()) {
            Some(account_id) => match get_account_overview(store, "claude", account_id).await {
                Ok(overview) => overview.filter(AccountOverview::is_dedicated),
                Err(err) => {
                    warn!(account_id, error = %err, "读取 Claude 账户概览失败");
                    None
                }
            },
            None => None,
        }
    };

    let openai_task = async {
        match record.openai_account_id.as_deref().filter(|id| !id.is_empty()) {
            Some(account_id) => match get_account_overview(store, "openai", account_id).await {
                Ok(overview) => overview.filter(AccountOverview::is_dedicated),
                Err(err) => {
                    warn!(account_id, error = %err, "读取 OpenAI 账户概览失败");
                    None
                }
            },
            None => None,
        }
    };

    let (claude, openai) = tokio::join!(claude_task, openai_task);

    let details = BoundAccountDetails { claude, openai };
    (!details.is_empty()).then_some(details)
}

// ---------------------------------------------------------------------------
// POST /api-key/test
// ---------------------------------------------------------------------------

/// 请求体
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyTestRequest {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// API Key 连通性测试
///
/// 校验通过后把连接升级为 SSE 事件流；一旦响应头发出，
/// 后续所有失败都只出现在事件流里，HTTP 状态恒为 200。
pub async fn api_key_test(
    State(state): State<AppState>,
    Json(request): Json<KeyTestRequest>,
) -> Response {
    match process_api_key_test(&state, request).await {
        Ok(response) => response,
        Err(err) => {
            error!(error = %err, "API Key 测试启动失败");
            response::app_error(&err)
        }
    }
}

async fn process_api_key_test(state: &AppState, request: KeyTestRequest) -> Result<Response> {
    let Ok(requested_provider) = normalize_test_provider(request.provider.as_deref()) else {
        return Ok(response::error(
            StatusCode::BAD_REQUEST,
            "INVALID_PROVIDER",
            "Provider must be one of: claude, gemini, codex",
        ));
    };

    let Some(api_key) = request.api_key.as_deref().filter(|k| !k.is_empty()) else {
        return Ok(response::error(
            StatusCode::BAD_REQUEST,
            "INVALID_INPUT",
            "Please provide your API Key",
        ));
    };

    if !is_valid_key_format(api_key) {
        return Ok(response::error(
            StatusCode::BAD_REQUEST,
            "INVALID_INPUT",
            "API key format is invalid",
        ));
    }

    // 连通性测试不放宽任何状态：禁用或过期的密钥直接拒绝
    let validation = state
        .api_keys
        .validate_for_stats(api_key, ValidationOptions::default())
        .await?;

    let Some(record) = validation.record else {
        return Ok(response::error(
            StatusCode::UNAUTHORIZED,
            "INVALID_API_KEY",
            validation.error.as_deref().unwrap_or("Invalid API key"),
        ));
    };

    let provider = requested_provider.unwrap_or_else(|| infer_test_provider(&record));

    info!(
        api_key_id = %record.id,
        api_key_name = %record.name,
        provider = provider.as_str(),
        "API Key 测试开始"
    );

    let relay_request = build_relay_request(state, provider, api_key, request.model.as_deref());

    let (tx, rx) = mpsc::channel::<RelayEvent>(64);
    let mut events = RelayEventSender::new(tx);
    let http = state.http.clone();
    let sink = state.interruption_sink();

    tokio::spawn(async move {
        match provider {
            TestProvider::Claude => {
                relay_claude_stream(&http, &relay_request, &mut events, &sink).await;
            }
            TestProvider::Codex => {
                relay_codex_stream(&http, &relay_request, &mut events, &sink).await;
            }
            TestProvider::Gemini => {
                relay_gemini_json(&http, &relay_request, &mut events, &sink).await;
            }
        }
    });

    Ok(sse_event_response(rx))
}

/// 按 provider 组装回环中继请求
fn build_relay_request(
    state: &AppState,
    provider: TestProvider,
    api_key: &str,
    model: Option<&str>,
) -> RelayRequest {
    let port = state.config.server.port;
    let test_config = &state.config.relay_test;
    let timeout = Duration::from_millis(test_config.timeout_ms);

    match provider {
        TestProvider::Claude => {
            let model = model.unwrap_or(&test_config.claude_model);
            RelayRequest {
                url: format!("http://127.0.0.1:{port}/api/v1/messages?beta=true"),
                authorization: api_key.to_string(),
                payload: create_claude_test_payload(model, true),
                timeout,
                extra_headers: vec![("x-api-key".to_string(), api_key.to_string())],
                provider: provider.as_str().to_string(),
            }
        }
        TestProvider::Gemini => {
            let model = model.unwrap_or(&test_config.gemini_model);
            let encoded_model = urlencoding::encode(model);
            RelayRequest {
                url: format!(
                    "http://127.0.0.1:{port}/gemini/v1beta/models/{encoded_model}:generateContent"
                ),
                authorization: api_key.to_string(),
                payload: create_gemini_test_payload(),
                timeout,
                extra_headers: vec![("x-api-key".to_string(), api_key.to_string())],
                provider: provider.as_str().to_string(),
            }
        }
        TestProvider::Codex => {
            let model = model.unwrap_or(&test_config.codex_model);
            RelayRequest {
                url: format!("http://127.0.0.1:{port}/openai/v1/responses"),
                authorization: format!("Bearer {api_key}"),
                payload: create_codex_test_payload(
                    model,
                    &CodexPayloadOptions {
                        stream: true,
                        prompt: None,
                        instructions: Some("你是一个AI助手".to_string()),
                    },
                ),
                timeout,
                extra_headers: vec![(
                    "user-agent".to_string(),
                    "codex_cli_rs/0.50.0 (PowerShell)".to_string(),
                )],
                provider: provider.as_str().to_string(),
            }
        }
    }
}

/// 把事件通道桥接为 SSE 响应
///
/// 响应头发出后状态恒为 200，禁用中间层缓冲。
fn sse_event_response(rx: mpsc::Receiver<RelayEvent>) -> Response {
    let stream = ReceiverStream::new(rx)
        .map(|event| Ok::<_, Infallible>(Bytes::from(event.to_sse_frame())));

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}
