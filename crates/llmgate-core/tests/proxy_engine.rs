use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::HeaderMap;
use llmgate_common::{AccountState, AuthMethod, Provider};
use llmgate_core::account::Account;
use llmgate_core::account_pool::AccountPool;
use llmgate_core::credentials::Credentials;
use llmgate_core::error::GatewayErrorKind;
use llmgate_core::events::EventHub;
use llmgate_core::oauth::OAuthManager;
use llmgate_core::proxy_engine::{InboundRequest, ProxyEngine, ProxyEngineConfig};
use llmgate_core::route_table::RouteTable;
use llmgate_core::upstream_client::{UpstreamBody, UpstreamClient, UpstreamFailure, UpstreamRequest};
use llmgate_storage::{InMemoryRowStore, RowStore};

fn anthropic_account(id: i64, key: &llmgate_crypto::MasterKey) -> Account {
    let creds = Credentials::ApiKey { key: "sk-ant-test".into(), base_url: None };
    Account {
        id,
        owner_id: 1,
        name: format!("acct-{id}"),
        provider: Provider::Anthropic,
        auth_method: AuthMethod::ApiKey,
        credentials: creds.encrypt(key).unwrap(),
        state: AccountState::Active,
        priority: 0,
        weight: 100,
        proxy_binding: None,
        request_count: 0,
        success_count: 0,
        error_count: 0,
        last_health_check: None,
        health_status: None,
        last_used_at: None,
        created_at: llmgate_common::now(),
        updated_at: llmgate_common::now(),
    }
}

async fn setup(
    master_key: llmgate_crypto::MasterKey,
    accounts: Vec<Account>,
    client: Arc<dyn UpstreamClient>,
) -> (ProxyEngine, Arc<dyn RowStore>) {
    let store: Arc<dyn RowStore> = Arc::new(InMemoryRowStore::new());
    for account in &accounts {
        store
            .create(llmgate_core::account_pool::TABLE, llmgate_core::account_pool::account_to_row(account))
            .await
            .unwrap();
    }
    let mut key_row = llmgate_storage::Row::new();
    key_row.insert("owner_id".into(), serde_json::json!(1));
    key_row.insert("key_hash".into(), serde_json::json!(llmgate_crypto::hash_api_key("lg-test")));
    key_row.insert("is_active".into(), serde_json::json!(true));
    key_row.insert("expires_at".into(), serde_json::json!(None::<time::OffsetDateTime>));
    store.create("api_keys", key_row).await.unwrap();

    let pool = Arc::new(AccountPool::new(store.clone(), Duration::from_secs(60)));
    let routes = Arc::new(RouteTable::new());
    let oauth = Arc::new(OAuthManager::new(pool.clone(), client.clone(), llmgate_core::config::OAuthProviderUrls::default()));
    let engine = ProxyEngine::new(
        pool,
        routes,
        oauth,
        client,
        store.clone(),
        EventHub::default(),
        master_key,
        ProxyEngineConfig::default(),
    );
    (engine, store)
}

fn request_with(body: serde_json::Value) -> InboundRequest {
    let mut headers = HeaderMap::new();
    headers.insert(http::header::AUTHORIZATION, "Bearer lg-test".parse().unwrap());
    InboundRequest { path: "/v1/messages".to_string(), headers, body: Bytes::from(serde_json::to_vec(&body).unwrap()) }
}

struct AlwaysOk;
#[async_trait::async_trait]
impl UpstreamClient for AlwaysOk {
    async fn send(&self, _req: UpstreamRequest) -> Result<llmgate_core::upstream_client::UpstreamResponse, UpstreamFailure> {
        Ok(llmgate_core::upstream_client::UpstreamResponse {
            status: 200,
            headers: vec![],
            body: UpstreamBody::Bytes(Bytes::from_static(b"{\"id\":\"msg_1\"}")),
        })
    }
}

#[tokio::test]
async fn missing_auth_header_is_rejected_before_any_upstream_call() {
    let key = llmgate_crypto::MasterKey::generate();
    let (engine, _store) = setup(key, vec![], Arc::new(AlwaysOk)).await;
    let mut request = request_with(serde_json::json!({"model": "claude-3-opus", "messages": []}));
    request.headers.clear();
    let result = engine.handle(request).await;
    assert!(matches!(result.unwrap_err().kind, GatewayErrorKind::AuthInvalid));
}

#[tokio::test]
async fn no_matching_account_yields_no_upstream() {
    let key = llmgate_crypto::MasterKey::generate();
    let (engine, _store) = setup(key, vec![], Arc::new(AlwaysOk)).await;
    let request = request_with(serde_json::json!({"model": "claude-3-opus", "messages": []}));
    let result = engine.handle(request).await;
    assert!(matches!(result.unwrap_err().kind, GatewayErrorKind::NoUpstream));
}

#[tokio::test]
async fn successful_request_writes_a_usage_record_and_returns_200() {
    let key = llmgate_crypto::MasterKey::generate();
    let account = anthropic_account(1, &key);
    let (engine, store) = setup(key, vec![account], Arc::new(AlwaysOk)).await;
    let request = request_with(serde_json::json!({"model": "claude-3-opus", "messages": []}));
    let response = engine.handle(request).await.unwrap();
    assert_eq!(response.status, 200);

    let usage_rows = store.find_many("usage_records", &llmgate_storage::Filter::new(), &[], None, None).await.unwrap();
    assert_eq!(usage_rows.len(), 1);
}

#[tokio::test]
async fn a_failing_account_is_excluded_on_the_bounded_retry() {
    let key = llmgate_crypto::MasterKey::generate();
    let failing = anthropic_account(1, &key);
    let healthy = anthropic_account(2, &key);

    struct FailsFirstAccountOnly {
        calls: AtomicUsize,
    }
    #[async_trait::async_trait]
    impl UpstreamClient for FailsFirstAccountOnly {
        async fn send(&self, req: UpstreamRequest) -> Result<llmgate_core::upstream_client::UpstreamResponse, UpstreamFailure> {
            let call_no = self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = &req;
            if call_no == 0 {
                Err(UpstreamFailure::Http { status: 500, headers: vec![], body: Bytes::new() })
            } else {
                Ok(llmgate_core::upstream_client::UpstreamResponse { status: 200, headers: vec![], body: UpstreamBody::Bytes(Bytes::new()) })
            }
        }
    }

    let client = Arc::new(FailsFirstAccountOnly { calls: AtomicUsize::new(0) });
    let (engine, _store) = setup(key, vec![failing, healthy], client).await;
    let request = request_with(serde_json::json!({"model": "claude-3-opus", "messages": []}));
    let response = engine.handle(request).await.unwrap();
    assert_eq!(response.status, 200);
}
