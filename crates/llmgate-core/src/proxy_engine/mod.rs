//! The proxy control flow: authenticate, select an account, acquire fresh
//! credentials, build and send the upstream request, retry on a failed
//! account with the next-best candidate, and record the outcome. Tracks
//! `attempt_no`/`provider_retry_used` across the loop, and does no
//! cross-protocol transformation since this gateway only rewrites the
//! `model` field and otherwise forwards bodies verbatim.

pub mod protocol;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::HeaderMap;
use llmgate_common::{BalanceStrategy, Provider, ProviderFilter};
use serde_json::Value;
use tokio::time::Instant;

use crate::account::Account;
use crate::account_pool::AccountPool;
use crate::auth::{self, AuthError};
use crate::credentials::Credentials;
use crate::error::{GatewayError, GatewayErrorKind};
use crate::events::{EventHub, GatewayEvent};
use crate::load_balancer::LoadBalancer;
use crate::oauth::OAuthManager;
use crate::route_table::RouteTable;
use crate::upstream_client::{HttpMethod, UpstreamBody, UpstreamClient, UpstreamFailure, UpstreamRequest};
use protocol::InboundProtocol;

pub struct ProxyEngineConfig {
    pub strategy: BalanceStrategy,
    pub min_health_score: f64,
}

impl Default for ProxyEngineConfig {
    fn default() -> Self {
        Self { strategy: BalanceStrategy::Adaptive, min_health_score: 0.5 }
    }
}

pub struct ProxyEngine {
    pool: Arc<AccountPool>,
    routes: Arc<RouteTable>,
    oauth: Arc<OAuthManager>,
    client: Arc<dyn UpstreamClient>,
    store: Arc<dyn llmgate_storage::RowStore>,
    events: EventHub,
    master_key: llmgate_crypto::MasterKey,
    config: ProxyEngineConfig,
}

pub struct InboundRequest {
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug)]
pub struct OutboundResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: UpstreamBody,
}

impl ProxyEngine {
    pub fn new(
        pool: Arc<AccountPool>,
        routes: Arc<RouteTable>,
        oauth: Arc<OAuthManager>,
        client: Arc<dyn UpstreamClient>,
        store: Arc<dyn llmgate_storage::RowStore>,
        events: EventHub,
        master_key: llmgate_crypto::MasterKey,
        config: ProxyEngineConfig,
    ) -> Self {
        Self { pool, routes, oauth, client, store, events, master_key, config }
    }

    pub async fn handle(&self, request: InboundRequest) -> Result<OutboundResponse, GatewayError> {
        let started = Instant::now();

        // 1. Authenticate.
        let authenticated = auth::authenticate(self.store.as_ref(), &request.headers).await.map_err(|err| match err {
            AuthError::Missing | AuthError::Unknown => GatewayError::new(GatewayErrorKind::AuthInvalid, "invalid api key"),
            AuthError::Disabled | AuthError::Expired => GatewayError::new(GatewayErrorKind::AuthExpired, "api key disabled or expired"),
        })?;

        // 2. Parse & classify.
        let (inbound_protocol, path_model) = protocol::classify_path(&request.path)
            .ok_or_else(|| GatewayError::new(GatewayErrorKind::Internal, "unrecognized inbound path"))?;
        let body_json: Value = serde_json::from_slice(&request.body)
            .map_err(|_| GatewayError::new(GatewayErrorKind::Internal, "request body is not valid json"))?;
        let source_model = protocol::extract_model(inbound_protocol, path_model.as_deref(), &body_json)
            .ok_or_else(|| GatewayError::new(GatewayErrorKind::Internal, "request is missing a model field"))?;
        let wants_stream = inbound_protocol.is_stream(&body_json);

        // 3. Route.
        let (target_model, target_provider) =
            self.routes.resolve(authenticated.api_key_id, &source_model, inbound_protocol.provider());
        let forwarded_body = protocol::rewrite_model(inbound_protocol, body_json, &target_model);

        // 4. Select, with one bounded retry against an alternative account.
        let snapshot = self.pool.snapshot(authenticated.owner_id, ProviderFilter::Only(target_provider), false).await;
        let mut excluded: Option<i64> = None;

        for attempt in 0..2 {
            let candidates: Vec<Account> =
                snapshot.iter().filter(|a| Some(a.id) != excluded).cloned().collect();
            let Some(account) =
                LoadBalancer::select(&candidates, self.config.strategy, self.config.min_health_score)
            else {
                return Err(GatewayError::no_upstream());
            };

            // Armed only around the outbound call: if the inbound
            // connection drops while this is in flight, the surrounding
            // future (and with it this guard and the `try_account` call
            // it's awaiting) gets dropped before `disarm()` runs, so the
            // guard's `Drop` impl writes a best-effort 499 usage record
            // and the request is never retried.
            let cancel_guard = CancelGuard::new(self.store.clone(), authenticated.api_key_id, account.id, &request.path, started);
            let outcome = self.try_account(&account, inbound_protocol, target_provider, &target_model, &forwarded_body, wants_stream).await;
            cancel_guard.disarm();

            match outcome {
                Ok(response) => {
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    self.pool.record_usage(account.id, true, Some(elapsed_ms)).await;
                    self.increment_api_key_request_count(authenticated.api_key_id).await;
                    self.record_usage_row(authenticated.api_key_id, Some(account.id), &request.path, response.status, elapsed_ms, None).await;
                    return Ok(response);
                }
                Err(failure) => {
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    self.pool.record_usage(account.id, false, Some(elapsed_ms)).await;
                    let is_auth_failure = matches!(&failure, UpstreamFailure::Http { status: 401, .. });
                    if is_auth_failure {
                        self.pool.mark_failed(account.id, "token_expired_or_invalid").await;
                        self.oauth.handle_unauthorized(account.id).await;
                        self.events
                            .emit(GatewayEvent::AccountFailed {
                                at: llmgate_common::now(),
                                account_id: account.id,
                                provider: account.provider,
                                reason: "token_expired_or_invalid".to_string(),
                            })
                            .await;
                    }

                    let retryable = is_retryable(&failure);
                    self.record_usage_row(
                        authenticated.api_key_id,
                        Some(account.id),
                        &request.path,
                        status_of(&failure),
                        elapsed_ms,
                        Some(describe_failure(&failure)),
                    )
                    .await;

                    if attempt == 0 && retryable {
                        excluded = Some(account.id);
                        continue;
                    }
                    return Err(failure_to_gateway_error(failure));
                }
            }
        }

        Err(GatewayError::no_upstream())
    }

    async fn try_account(
        &self,
        account: &Account,
        protocol: InboundProtocol,
        target_provider: Provider,
        target_model: &str,
        body: &Bytes,
        wants_stream: bool,
    ) -> Result<OutboundResponse, UpstreamFailure> {
        let credentials = self.credentials_for(account).await.map_err(|message| UpstreamFailure::Transport {
            kind: crate::upstream_client::TransportErrorKind::Other,
            message,
        })?;

        let (url, headers) = self.build_outbound(protocol, target_provider, target_model, &credentials);
        let request = UpstreamRequest {
            method: HttpMethod::Post,
            url,
            headers,
            body: Some(body.clone()),
            is_stream: wants_stream,
            proxy_binding: account.proxy_binding.clone(),
        };

        let response = self.client.send(request).await?;
        if !(200..300).contains(&response.status) {
            let body = match response.body {
                UpstreamBody::Bytes(bytes) => bytes,
                UpstreamBody::Stream(_) => Bytes::new(),
            };
            return Err(UpstreamFailure::Http { status: response.status, headers: response.headers, body });
        }
        Ok(OutboundResponse { status: response.status, headers: response.headers, body: response.body })
    }

    async fn credentials_for(&self, account: &Account) -> Result<Credentials, String> {
        match self.oauth.ensure_fresh(account.id, &self.master_key).await {
            Ok(credentials) => Ok(credentials),
            Err(crate::oauth::RefreshError::NotOAuth) => {
                Credentials::decrypt(&self.master_key, &account.credentials).map_err(|_| "credential decrypt failed".to_string())
            }
            Err(err) => Err(err.to_string()),
        }
    }

    /// Per-provider outbound header/auth shape.
    fn build_outbound(
        &self,
        protocol: InboundProtocol,
        target_provider: Provider,
        target_model: &str,
        credentials: &Credentials,
    ) -> (String, Vec<(String, String)>) {
        let base_url = match credentials {
            Credentials::ApiKey { base_url: Some(url), .. } => url.clone(),
            _ => default_base_url(target_provider),
        };

        match (target_provider, credentials) {
            (Provider::Anthropic, Credentials::ApiKey { key, .. }) => (
                format!("{base_url}/v1/messages"),
                vec![
                    ("x-api-key".to_string(), key.clone()),
                    ("anthropic-version".to_string(), "2023-06-01".to_string()),
                    ("content-type".to_string(), "application/json".to_string()),
                ],
            ),
            (Provider::Anthropic, Credentials::OAuth { access_token, .. }) => (
                format!("{base_url}/v1/messages"),
                vec![
                    ("authorization".to_string(), format!("Bearer {access_token}")),
                    ("anthropic-version".to_string(), "2023-06-01".to_string()),
                    ("user-agent".to_string(), "claude-cli/1.0 (external, cli)".to_string()),
                    ("content-type".to_string(), "application/json".to_string()),
                ],
            ),
            (Provider::OpenAI, Credentials::ApiKey { key, .. }) => (
                format!("{base_url}/v1/chat/completions"),
                vec![
                    ("authorization".to_string(), format!("Bearer {key}")),
                    ("content-type".to_string(), "application/json".to_string()),
                ],
            ),
            (Provider::Qwen, Credentials::ApiKey { key, .. }) => (
                format!("{base_url}/compatible-mode/v1/chat/completions"),
                vec![
                    ("authorization".to_string(), format!("Bearer {key}")),
                    ("content-type".to_string(), "application/json".to_string()),
                ],
            ),
            (Provider::Gemini, Credentials::ApiKey { key, .. }) => {
                let suffix = if matches!(protocol, InboundProtocol::GeminiStreamGenerateContent) {
                    "streamGenerateContent"
                } else {
                    "generateContent"
                };
                (
                    format!("{base_url}/v1beta/models/{target_model}:{suffix}?key={key}"),
                    vec![("content-type".to_string(), "application/json".to_string())],
                )
            }
            // An OAuth account paired with a non-Anthropic provider or vice
            // versa indicates stale account data; surfaced as a transport
            // failure so the caller's retry/mark-failed path handles it.
            _ => (default_base_url(target_provider), vec![]),
        }
    }

    /// Increments `APIKey.request_count` for a successful proxied call.
    /// Best-effort: a missing row just means no counter to bump.
    async fn increment_api_key_request_count(&self, api_key_id: i64) {
        let Ok(Some(row)) = self.store.find_one("api_keys", &llmgate_storage::Filter::new().eq("id", api_key_id)).await else {
            return;
        };
        let current = row.get("request_count").and_then(|v| v.as_i64()).unwrap_or(0);
        let mut patch = llmgate_storage::Row::new();
        patch.insert("request_count".into(), serde_json::json!(current + 1));
        let _ = self
            .store
            .update("api_keys", &llmgate_storage::Filter::new().eq("id", api_key_id), patch)
            .await;
    }

    async fn record_usage_row(
        &self,
        api_key_id: i64,
        upstream_account_id: Option<i64>,
        endpoint: &str,
        status_code: u16,
        response_time_ms: u64,
        error_message: Option<String>,
    ) {
        let mut row = llmgate_storage::Row::new();
        row.insert("api_key_id".into(), serde_json::json!(api_key_id));
        row.insert("upstream_account_id".into(), serde_json::json!(upstream_account_id));
        row.insert("request_id".into(), serde_json::json!(uuid::Uuid::new_v4().to_string()));
        row.insert("method".into(), serde_json::json!("POST"));
        row.insert("endpoint".into(), serde_json::json!(endpoint));
        row.insert("status_code".into(), serde_json::json!(status_code));
        row.insert("response_time_ms".into(), serde_json::json!(response_time_ms));
        row.insert("tokens_used".into(), serde_json::json!(0));
        row.insert("cost".into(), serde_json::json!(0.0));
        row.insert("error_message".into(), serde_json::json!(error_message));
        row.insert("created_at".into(), serde_json::json!(llmgate_common::now()));
        let _ = self.store.create("usage_records", row).await;
    }
}

/// Detects an inbound disconnect that happens while an outbound call is in
/// flight. `armed` while the guard is alive and not yet [`disarm`]ed; a
/// disconnect drops the whole request future (and this guard with it)
/// mid-`.await`, so the drop path -- and only the drop path -- writes the
/// best-effort 499 [`UsageRecord`] and lets the request die without a retry.
struct CancelGuard {
    store: Arc<dyn llmgate_storage::RowStore>,
    api_key_id: i64,
    account_id: i64,
    endpoint: String,
    started: Instant,
    armed: std::cell::Cell<bool>,
}

impl CancelGuard {
    fn new(store: Arc<dyn llmgate_storage::RowStore>, api_key_id: i64, account_id: i64, endpoint: &str, started: Instant) -> Self {
        Self { store, api_key_id, account_id, endpoint: endpoint.to_string(), started, armed: std::cell::Cell::new(true) }
    }

    fn disarm(&self) {
        self.armed.set(false);
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if !self.armed.get() {
            return;
        }
        let store = self.store.clone();
        let api_key_id = self.api_key_id;
        let account_id = self.account_id;
        let endpoint = std::mem::take(&mut self.endpoint);
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        let canceled = GatewayError::new(GatewayErrorKind::Canceled, "client disconnected");
        tokio::spawn(async move {
            let mut row = llmgate_storage::Row::new();
            row.insert("api_key_id".into(), serde_json::json!(api_key_id));
            row.insert("upstream_account_id".into(), serde_json::json!(Some(account_id)));
            row.insert("request_id".into(), serde_json::json!(uuid::Uuid::new_v4().to_string()));
            row.insert("method".into(), serde_json::json!("POST"));
            row.insert("endpoint".into(), serde_json::json!(endpoint));
            row.insert("status_code".into(), serde_json::json!(canceled.status.as_u16()));
            row.insert("response_time_ms".into(), serde_json::json!(elapsed_ms));
            row.insert("tokens_used".into(), serde_json::json!(0));
            row.insert("cost".into(), serde_json::json!(0.0));
            row.insert("error_message".into(), serde_json::json!(String::from_utf8_lossy(&canceled.body).into_owned()));
            row.insert("created_at".into(), serde_json::json!(llmgate_common::now()));
            let _ = store.create("usage_records", row).await;
        });
    }
}

fn default_base_url(provider: Provider) -> String {
    match provider {
        Provider::Anthropic => "https://api.anthropic.com".to_string(),
        Provider::OpenAI => "https://api.openai.com".to_string(),
        Provider::Gemini => "https://generativelanguage.googleapis.com".to_string(),
        Provider::Qwen => "https://dashscope.aliyuncs.com".to_string(),
    }
}

fn is_retryable(failure: &UpstreamFailure) -> bool {
    match failure {
        UpstreamFailure::Transport { .. } => true,
        UpstreamFailure::Http { status, .. } => *status == 429 || *status == 401 || (500..600).contains(status),
    }
}

fn status_of(failure: &UpstreamFailure) -> u16 {
    match failure {
        UpstreamFailure::Transport { .. } => 502,
        UpstreamFailure::Http { status, .. } => *status,
    }
}

fn describe_failure(failure: &UpstreamFailure) -> String {
    match failure {
        UpstreamFailure::Transport { message, .. } => message.clone(),
        UpstreamFailure::Http { status, .. } => format!("upstream returned {status}"),
    }
}

fn failure_to_gateway_error(failure: UpstreamFailure) -> GatewayError {
    match failure {
        UpstreamFailure::Transport { message, .. } => GatewayError::new(GatewayErrorKind::UpstreamTransport, message),
        UpstreamFailure::Http { status: 401, .. } => {
            GatewayError::new(GatewayErrorKind::UpstreamAuth, "upstream rejected credentials")
        }
        UpstreamFailure::Http { status, body, .. } => GatewayError::new(GatewayErrorKind::UpstreamStatus(status), body),
    }
}
