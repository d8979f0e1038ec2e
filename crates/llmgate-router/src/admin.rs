//! Management API: a shared-secret `admin_auth` middleware gating every
//! route, thin `Json`-in/`Json`-out handlers that read and write rows
//! directly through [`RowStore`] rather than through the request-path
//! collaborators (the Account Pool's snapshot cache and the Route Table's
//! copy-on-write snapshot are both explicitly invalidated/reloaded after
//! every write).

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use llmgate_common::{AccountState, AuthMethod, Provider};
use llmgate_core::account::Account;
use llmgate_core::account_pool::{account_from_row, account_to_row};
use llmgate_core::credentials::Credentials;
use llmgate_core::events::GatewayEvent;
use llmgate_storage::{Filter, Row};
use serde::{Deserialize, Serialize};

use crate::oauth_session::{OAuthSession, PendingOAuth};
use crate::GatewayState;

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/api/accounts", get(list_accounts).post(create_account))
        .route("/api/accounts/{id}", put(update_account).delete(delete_account))
        .route("/api/accounts/{id}/health-check", post(health_check_account))
        .route("/api/apikeys", get(list_api_keys).post(create_api_key))
        .route("/api/apikeys/{id}", delete(delete_api_key))
        .route("/api/apikeys/{id}/model-routes", put(put_model_routes))
        .route("/api/oauth/start", post(oauth_start))
        .route("/api/oauth/callback", post(oauth_callback))
        .route("/api/oauth/status/{id}", get(oauth_status))
        .route("/api/dashboard/stats", get(dashboard_stats))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth))
        .with_state(state)
}

async fn admin_auth(State(state): State<GatewayState>, request: axum::extract::Request, next: Next) -> Result<Response, StatusCode> {
    let provided = request
        .headers()
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            request
                .headers()
                .get(axum::http::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        });
    match provided {
        Some(key) if key == state.admin_key => Ok(next.run(request).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

fn bad_request(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "not found" }))).into_response()
}

#[derive(Debug, Serialize)]
struct AccountView {
    id: i64,
    owner_id: i64,
    name: String,
    provider: Provider,
    auth_method: AuthMethod,
    state: AccountState,
    priority: i16,
    weight: i32,
    proxy_binding: Option<String>,
    request_count: u64,
    success_count: u64,
    error_count: u64,
    health_status: Option<llmgate_common::HealthStatus>,
}

impl From<&Account> for AccountView {
    fn from(a: &Account) -> Self {
        Self {
            id: a.id,
            owner_id: a.owner_id,
            name: a.name.clone(),
            provider: a.provider,
            auth_method: a.auth_method,
            state: a.state,
            priority: a.priority,
            weight: a.weight,
            proxy_binding: a.proxy_binding.clone(),
            request_count: a.request_count,
            success_count: a.success_count,
            error_count: a.error_count,
            health_status: a.health_status.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListAccountsQuery {
    owner_id: i64,
    provider: Option<String>,
    #[serde(default)]
    include_inactive: bool,
}

async fn list_accounts(State(state): State<GatewayState>, Query(query): Query<ListAccountsQuery>) -> Response {
    let filter = match query.provider.as_deref().map(Provider::parse) {
        Some(Some(provider)) => llmgate_common::ProviderFilter::Only(provider),
        Some(None) => return bad_request("unknown provider"),
        None => llmgate_common::ProviderFilter::Any,
    };
    let accounts = state.pool.snapshot(query.owner_id, filter, query.include_inactive).await;
    let views: Vec<AccountView> = accounts.iter().map(AccountView::from).collect();
    Json(views).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CredentialsInput {
    ApiKey { key: String, base_url: Option<String> },
    OAuth { access_token: String, refresh_token: Option<String>, expires_at: time::OffsetDateTime, scopes: Vec<String> },
}

impl From<CredentialsInput> for Credentials {
    fn from(value: CredentialsInput) -> Self {
        match value {
            CredentialsInput::ApiKey { key, base_url } => Credentials::ApiKey { key, base_url },
            CredentialsInput::OAuth { access_token, refresh_token, expires_at, scopes } => {
                Credentials::OAuth { access_token, refresh_token, expires_at, scopes }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateAccountRequest {
    owner_id: i64,
    name: String,
    provider: String,
    #[serde(default = "default_priority")]
    priority: i16,
    #[serde(default = "default_weight")]
    weight: i32,
    proxy_binding: Option<String>,
    credentials: CredentialsInput,
}

fn default_priority() -> i16 {
    5
}

fn default_weight() -> i32 {
    100
}

async fn create_account(State(state): State<GatewayState>, Json(req): Json<CreateAccountRequest>) -> Response {
    let Some(provider) = Provider::parse(&req.provider) else {
        return bad_request("unknown provider");
    };
    let (auth_method, initial_state) = match &req.credentials {
        CredentialsInput::ApiKey { .. } => (AuthMethod::ApiKey, AccountState::Active),
        CredentialsInput::OAuth { .. } => (AuthMethod::OAuth, AccountState::Pending),
    };
    let credentials: Credentials = req.credentials.into();
    let envelope = match credentials.encrypt(&state.master_key) {
        Ok(envelope) => envelope,
        Err(_) => return bad_request("credentials could not be encrypted"),
    };

    let now = llmgate_common::now();
    let account = Account {
        id: 0,
        owner_id: req.owner_id,
        name: req.name,
        provider,
        auth_method,
        credentials: envelope,
        state: initial_state,
        priority: req.priority,
        weight: req.weight,
        proxy_binding: req.proxy_binding,
        request_count: 0,
        success_count: 0,
        error_count: 0,
        last_health_check: None,
        health_status: None,
        last_used_at: None,
        created_at: now,
        updated_at: now,
    };

    let row = match state.store.create(llmgate_core::account_pool::TABLE, account_to_row(&account)).await {
        Ok(row) => row,
        Err(_) => return (StatusCode::INTERNAL_SERVER_ERROR, "account creation failed").into_response(),
    };
    state.pool.invalidate(req.owner_id).await;

    match account_from_row(&row) {
        Some(account) => (StatusCode::CREATED, Json(AccountView::from(&account))).into_response(),
        None => (StatusCode::INTERNAL_SERVER_ERROR, "stored row could not be read back").into_response(),
    }
}

#[derive(Debug, Deserialize, Default)]
struct UpdateAccountRequest {
    name: Option<String>,
    state: Option<AccountState>,
    priority: Option<i16>,
    weight: Option<i32>,
    proxy_binding: Option<Option<String>>,
}

async fn update_account(State(state): State<GatewayState>, Path(id): Path<i64>, Json(req): Json<UpdateAccountRequest>) -> Response {
    let Some(existing) = state.pool.get(id).await else {
        return not_found();
    };

    let mut patch = Row::new();
    if let Some(name) = req.name {
        patch.insert("name".into(), serde_json::json!(name));
    }
    if let Some(account_state) = req.state {
        patch.insert("state".into(), serde_json::json!(state_to_str(account_state)));
    }
    if let Some(priority) = req.priority {
        patch.insert("priority".into(), serde_json::json!(priority));
    }
    if let Some(weight) = req.weight {
        patch.insert("weight".into(), serde_json::json!(weight));
    }
    if let Some(proxy_binding) = req.proxy_binding {
        patch.insert("proxy_binding".into(), serde_json::json!(proxy_binding));
    }
    patch.insert("updated_at".into(), serde_json::json!(llmgate_common::now()));

    let filter = Filter::new().eq("id", id);
    if state.store.update(llmgate_core::account_pool::TABLE, &filter, patch).await.unwrap_or(0) == 0 {
        return not_found();
    }
    state.pool.invalidate(existing.owner_id).await;

    match state.pool.get(id).await {
        Some(account) => Json(AccountView::from(&account)).into_response(),
        None => not_found(),
    }
}

async fn delete_account(State(state): State<GatewayState>, Path(id): Path<i64>) -> Response {
    let Some(existing) = state.pool.get(id).await else {
        return not_found();
    };
    let filter = Filter::new().eq("id", id);
    let affected = state.store.delete(llmgate_core::account_pool::TABLE, &filter).await.unwrap_or(0);
    state.pool.invalidate(existing.owner_id).await;
    if affected == 0 {
        return not_found();
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn health_check_account(State(state): State<GatewayState>, Path(id): Path<i64>) -> Response {
    if state.pool.get(id).await.is_none() {
        return not_found();
    }
    let ok = state.prober.probe_one(id).await;
    Json(serde_json::json!({ "account_id": id, "ok": ok })).into_response()
}

fn state_to_str(state: AccountState) -> &'static str {
    match state {
        AccountState::Active => "active",
        AccountState::Inactive => "inactive",
        AccountState::Error => "error",
        AccountState::Pending => "pending",
    }
}

#[derive(Debug, Serialize)]
struct ApiKeyView {
    id: i64,
    owner_id: i64,
    name: String,
    permissions: Vec<String>,
    is_active: bool,
    expires_at: Option<time::OffsetDateTime>,
    last_used_at: Option<time::OffsetDateTime>,
    request_count: u64,
}

fn api_key_view_from_row(row: &Row) -> Option<ApiKeyView> {
    Some(ApiKeyView {
        id: row.get("id")?.as_i64()?,
        owner_id: row.get("owner_id")?.as_i64()?,
        name: row.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        permissions: row
            .get("permissions")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default(),
        is_active: row.get("is_active").and_then(|v| v.as_bool()).unwrap_or(false),
        expires_at: row.get("expires_at").and_then(|v| serde_json::from_value(v.clone()).ok()).flatten(),
        last_used_at: row.get("last_used_at").and_then(|v| serde_json::from_value(v.clone()).ok()).flatten(),
        request_count: row.get("request_count").and_then(|v| v.as_u64()).unwrap_or(0),
    })
}

#[derive(Debug, Deserialize)]
struct ListApiKeysQuery {
    owner_id: i64,
}

async fn list_api_keys(State(state): State<GatewayState>, Query(query): Query<ListApiKeysQuery>) -> Response {
    let filter = Filter::new().eq("owner_id", query.owner_id);
    let rows = match state.store.find_many("api_keys", &filter, &[], None, None).await {
        Ok(rows) => rows,
        Err(_) => return (StatusCode::INTERNAL_SERVER_ERROR, "lookup failed").into_response(),
    };
    let views: Vec<ApiKeyView> = rows.iter().filter_map(api_key_view_from_row).collect();
    Json(views).into_response()
}

#[derive(Debug, Deserialize)]
struct CreateApiKeyRequest {
    owner_id: i64,
    name: String,
    #[serde(default)]
    permissions: Vec<String>,
    expires_at: Option<time::OffsetDateTime>,
}

/// The plaintext secret is only ever visible in this one response; only its
/// `key_hash` is persisted.
async fn create_api_key(State(state): State<GatewayState>, Json(req): Json<CreateApiKeyRequest>) -> Response {
    let secret = llmgate_crypto::generate_api_key_secret();
    let key_hash = llmgate_crypto::hash_api_key(&secret);

    let mut row = Row::new();
    row.insert("owner_id".into(), serde_json::json!(req.owner_id));
    row.insert("name".into(), serde_json::json!(req.name));
    row.insert("key_hash".into(), serde_json::json!(key_hash));
    row.insert("permissions".into(), serde_json::json!(req.permissions));
    row.insert("is_active".into(), serde_json::json!(true));
    row.insert("expires_at".into(), serde_json::json!(req.expires_at));
    row.insert("last_used_at".into(), serde_json::json!(None::<time::OffsetDateTime>));
    row.insert("request_count".into(), serde_json::json!(0));
    row.insert("created_at".into(), serde_json::json!(llmgate_common::now()));

    let stored = match state.store.create("api_keys", row).await {
        Ok(row) => row,
        Err(_) => return (StatusCode::INTERNAL_SERVER_ERROR, "api key creation failed").into_response(),
    };
    let Some(view) = api_key_view_from_row(&stored) else {
        return (StatusCode::INTERNAL_SERVER_ERROR, "stored row could not be read back").into_response();
    };
    (StatusCode::CREATED, Json(serde_json::json!({ "api_key": view, "secret": secret }))).into_response()
}

async fn delete_api_key(State(state): State<GatewayState>, Path(id): Path<i64>) -> Response {
    let filter = Filter::new().eq("id", id);
    let affected = state.store.delete("api_keys", &filter).await.unwrap_or(0);
    if affected == 0 {
        return not_found();
    }
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Debug, Deserialize)]
struct RouteRuleInput {
    source_model: String,
    target_model: String,
    target_provider: String,
    #[serde(default)]
    priority: i32,
    #[serde(default = "default_true")]
    enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Replaces every rule scoped to `api_key_id`, then reloads the whole
/// route table: its copy-on-write snapshot is rebuilt wholesale on every
/// mutation, never patched in place.
async fn put_model_routes(State(state): State<GatewayState>, Path(api_key_id): Path<i64>, Json(rules): Json<Vec<RouteRuleInput>>) -> Response {
    for rule in &rules {
        if Provider::parse(&rule.target_provider).is_none() {
            return bad_request(format!("unknown provider: {}", rule.target_provider));
        }
    }

    let filter = Filter::new().eq("api_key_id", api_key_id);
    if state.store.delete("model_routes", &filter).await.is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "route replacement failed").into_response();
    }
    for rule in rules {
        let mut row = Row::new();
        row.insert("api_key_id".into(), serde_json::json!(api_key_id));
        row.insert("source_model".into(), serde_json::json!(rule.source_model));
        row.insert("target_model".into(), serde_json::json!(rule.target_model));
        row.insert("target_provider".into(), serde_json::json!(rule.target_provider));
        row.insert("priority".into(), serde_json::json!(rule.priority));
        row.insert("enabled".into(), serde_json::json!(rule.enabled));
        row.insert("created_at".into(), serde_json::json!(llmgate_common::now()));
        if state.store.create("model_routes", row).await.is_err() {
            return (StatusCode::INTERNAL_SERVER_ERROR, "route replacement failed").into_response();
        }
    }

    crate::reload_routes(state.store.as_ref(), &state.routes).await;
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Debug, Deserialize)]
struct OAuthStartRequest {
    owner_id: i64,
    name: String,
    provider: String,
}

/// Pre-creates the `pending` [`Account`] row that both the Anthropic
/// callback and the Qwen poll transition to `active`, and stashes the
/// PKCE/device-code state needed to finish the exchange in an in-memory
/// [`OAuthSession`], keyed by that account's id and never persisted to
/// the row store.
async fn oauth_start(State(state): State<GatewayState>, Json(req): Json<OAuthStartRequest>) -> Response {
    let Some(provider) = Provider::parse(&req.provider) else {
        return bad_request("unknown provider");
    };
    if !matches!(provider, Provider::Anthropic | Provider::Qwen) {
        return bad_request("provider does not support oauth");
    }

    let now = llmgate_common::now();
    let placeholder_account = Account {
        id: 0,
        owner_id: req.owner_id,
        name: req.name,
        provider,
        auth_method: AuthMethod::OAuth,
        credentials: String::new(),
        state: AccountState::Pending,
        priority: default_priority(),
        weight: default_weight(),
        proxy_binding: None,
        request_count: 0,
        success_count: 0,
        error_count: 0,
        last_health_check: None,
        health_status: None,
        last_used_at: None,
        created_at: now,
        updated_at: now,
    };
    let stored = match state.store.create(llmgate_core::account_pool::TABLE, account_to_row(&placeholder_account)).await {
        Ok(row) => row,
        Err(_) => return (StatusCode::INTERNAL_SERVER_ERROR, "account creation failed").into_response(),
    };
    let account_id = match stored.get("id").and_then(|v| v.as_i64()) {
        Some(id) => id,
        None => return (StatusCode::INTERNAL_SERVER_ERROR, "stored row missing id").into_response(),
    };
    state.pool.invalidate(req.owner_id).await;

    let body = match provider {
        Provider::Anthropic => {
            let params = llmgate_core::oauth::anthropic::generate_oauth_params(&state.oauth_urls);
            state
                .oauth_sessions
                .insert(OAuthSession {
                    account_id,
                    owner_id: req.owner_id,
                    provider,
                    pending: PendingOAuth::Anthropic {
                        code_verifier: params.code_verifier,
                        csrf_state: params.state.clone(),
                    },
                })
                .await;
            serde_json::json!({ "account_id": account_id, "auth_url": params.auth_url, "state": params.state })
        }
        Provider::Qwen => {
            let client = llmgate_core::upstream_client::WreqUpstreamClient::new(default_client_config());
            let client: std::sync::Arc<dyn llmgate_core::upstream_client::UpstreamClient> = match client {
                Ok(client) => std::sync::Arc::new(client),
                Err(_) => return (StatusCode::INTERNAL_SERVER_ERROR, "could not build upstream client").into_response(),
            };
            let session = match llmgate_core::oauth::qwen::start(client.as_ref(), &state.oauth_urls).await {
                Ok(session) => session,
                Err(err) => return (StatusCode::BAD_GATEWAY, err.to_string()).into_response(),
            };
            let body = serde_json::json!({
                "account_id": account_id,
                "user_code": session.user_code,
                "verification_uri": session.verification_uri,
                "interval_secs": session.interval_secs,
            });
            state
                .oauth_sessions
                .insert(OAuthSession { account_id, owner_id: req.owner_id, provider, pending: PendingOAuth::Qwen { session } })
                .await;
            body
        }
        _ => unreachable!("checked above"),
    };

    (StatusCode::CREATED, Json(body)).into_response()
}

fn default_client_config() -> llmgate_core::upstream_client::UpstreamClientConfig {
    llmgate_core::upstream_client::UpstreamClientConfig {
        connect_timeout: std::time::Duration::from_secs(10),
        unary_timeout: std::time::Duration::from_secs(30),
        stream_idle_timeout: std::time::Duration::from_secs(30),
    }
}

#[derive(Debug, Deserialize)]
struct OAuthCallbackRequest {
    account_id: i64,
    code: String,
}

/// Anthropic side of E6: exchanges the authorization code, stores the
/// tokens encrypted, and transitions the pending account to `active`.
async fn oauth_callback(State(state): State<GatewayState>, Json(req): Json<OAuthCallbackRequest>) -> Response {
    let Some(session) = state.oauth_sessions.get(req.account_id).await else {
        return not_found();
    };
    let PendingOAuth::Anthropic { code_verifier, csrf_state } = &session.pending else {
        return bad_request("account is not mid anthropic oauth flow");
    };
    let code = match llmgate_core::oauth::anthropic::parse_callback(&req.code) {
        Ok(code) => code,
        Err(_) => return bad_request("invalid authorization code"),
    };

    let client = match llmgate_core::upstream_client::WreqUpstreamClient::new(default_client_config()) {
        Ok(client) => client,
        Err(_) => return (StatusCode::INTERNAL_SERVER_ERROR, "could not build upstream client").into_response(),
    };
    let exchanged = match llmgate_core::oauth::anthropic::exchange(&client, &state.oauth_urls, &code, code_verifier, csrf_state).await {
        Ok(tokens) => tokens,
        Err(err) => {
            state.events.emit(GatewayEvent::OAuthFailed { at: llmgate_common::now(), account_id: req.account_id, provider: session.provider, reason: err.to_string() }).await;
            return (StatusCode::BAD_GATEWAY, err.to_string()).into_response();
        }
    };

    if !activate_oauth_account(&state, req.account_id, session.owner_id, exchanged.access_token, exchanged.refresh_token, exchanged.expires_at, exchanged.scopes).await {
        return (StatusCode::INTERNAL_SERVER_ERROR, "account activation failed").into_response();
    }
    state.oauth_sessions.remove(req.account_id).await;
    state.events.emit(GatewayEvent::OAuthCompleted { at: llmgate_common::now(), account_id: req.account_id, provider: session.provider }).await;
    Json(serde_json::json!({ "account_id": req.account_id, "state": "active" })).into_response()
}

#[allow(clippy::too_many_arguments)]
async fn activate_oauth_account(
    state: &GatewayState,
    account_id: i64,
    owner_id: i64,
    access_token: String,
    refresh_token: Option<String>,
    expires_at: time::OffsetDateTime,
    scopes: Vec<String>,
) -> bool {
    let credentials = Credentials::OAuth { access_token, refresh_token, expires_at, scopes };
    let Ok(envelope) = credentials.encrypt(&state.master_key) else {
        return false;
    };
    let mut patch = Row::new();
    patch.insert("credentials".into(), serde_json::json!(envelope));
    patch.insert("state".into(), serde_json::json!("active"));
    patch.insert("updated_at".into(), serde_json::json!(llmgate_common::now()));
    let filter = Filter::new().eq("id", account_id);
    let updated = state.store.update(llmgate_core::account_pool::TABLE, &filter, patch).await.unwrap_or(0) > 0;
    state.pool.invalidate(owner_id).await;
    updated
}

/// Qwen's device-code grant carries no redirect, so the admin client polls
/// this instead of posting a callback body.
async fn oauth_status(State(state): State<GatewayState>, Path(account_id): Path<i64>) -> Response {
    let Some(account) = state.pool.get(account_id).await else {
        return not_found();
    };
    if account.state != AccountState::Pending {
        return Json(serde_json::json!({ "account_id": account_id, "state": state_to_str(account.state) })).into_response();
    }

    let Some(session) = state.oauth_sessions.get(account_id).await else {
        return Json(serde_json::json!({ "account_id": account_id, "state": "pending" })).into_response();
    };
    let PendingOAuth::Qwen { session: device_session } = &session.pending else {
        return Json(serde_json::json!({ "account_id": account_id, "state": "pending" })).into_response();
    };

    let client = match llmgate_core::upstream_client::WreqUpstreamClient::new(default_client_config()) {
        Ok(client) => client,
        Err(_) => return (StatusCode::INTERNAL_SERVER_ERROR, "could not build upstream client").into_response(),
    };
    let outcome = match llmgate_core::oauth::qwen::poll(&client, &state.oauth_urls, device_session).await {
        Ok(outcome) => outcome,
        Err(err) => return (StatusCode::BAD_GATEWAY, err.to_string()).into_response(),
    };

    match outcome {
        llmgate_core::oauth::qwen::PollOutcome::Pending => {
            Json(serde_json::json!({ "account_id": account_id, "state": "pending" })).into_response()
        }
        llmgate_core::oauth::qwen::PollOutcome::Denied | llmgate_core::oauth::qwen::PollOutcome::Expired => {
            state.oauth_sessions.remove(account_id).await;
            Json(serde_json::json!({ "account_id": account_id, "state": "error" })).into_response()
        }
        llmgate_core::oauth::qwen::PollOutcome::Authorized { access_token, refresh_token, expires_at } => {
            let ok = activate_oauth_account(&state, account_id, account.owner_id, access_token, refresh_token, expires_at, vec![]).await;
            state.oauth_sessions.remove(account_id).await;
            if !ok {
                return (StatusCode::INTERNAL_SERVER_ERROR, "account activation failed").into_response();
            }
            state.events.emit(GatewayEvent::OAuthCompleted { at: llmgate_common::now(), account_id, provider: account.provider }).await;
            Json(serde_json::json!({ "account_id": account_id, "state": "active" })).into_response()
        }
    }
}

async fn dashboard_stats(State(state): State<GatewayState>) -> Response {
    let total_accounts = state.store.count(llmgate_core::account_pool::TABLE, &Filter::new()).await.unwrap_or(0);
    let active_accounts = state.pool.all_in_states(&[AccountState::Active]).await.len() as u64;
    let error_accounts = state.pool.all_in_states(&[AccountState::Error]).await.len() as u64;
    let total_api_keys = state.store.count("api_keys", &Filter::new()).await.unwrap_or(0);
    let total_requests = state.store.count("usage_records", &Filter::new()).await.unwrap_or(0);

    Json(serde_json::json!({
        "accounts": { "total": total_accounts, "active": active_accounts, "error": error_accounts },
        "api_keys": { "total": total_api_keys },
        "requests": { "total": total_requests },
    }))
    .into_response()
}
