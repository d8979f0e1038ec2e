//! Wires `llmgate-core`'s framework-agnostic domain logic to axum: a thin
//! HTTP layer that owns no business logic of its own, split into an
//! inbound passthrough router ([`proxy`]) and a management API router
//! ([`admin`]), both built from one shared [`GatewayState`] and merged by
//! [`build_router`].

pub mod admin;
pub mod oauth_session;
pub mod proxy;

use std::sync::Arc;

use llmgate_core::account_pool::AccountPool;
use llmgate_core::config::OAuthProviderUrls;
use llmgate_core::events::EventHub;
use llmgate_core::health_prober::HealthProber;
use llmgate_core::oauth::OAuthManager;
use llmgate_core::proxy_engine::ProxyEngine;
use llmgate_core::route_table::RouteTable;
use llmgate_storage::RowStore;
use tokio::sync::Semaphore;

use oauth_session::OAuthSessionStore;

/// Everything an axum handler needs, cloned cheaply per request (every
/// field is an `Arc` or a small `Copy`/`Clone` value). One struct rather
/// than a separate admin/proxy pair, since this gateway's admin and proxy
/// surfaces share every collaborator.
#[derive(Clone)]
pub struct GatewayState {
    pub engine: Arc<ProxyEngine>,
    pub pool: Arc<AccountPool>,
    pub routes: Arc<RouteTable>,
    pub oauth: Arc<OAuthManager>,
    pub prober: Arc<HealthProber>,
    pub store: Arc<dyn RowStore>,
    pub events: EventHub,
    pub master_key: llmgate_crypto::MasterKey,
    pub oauth_urls: OAuthProviderUrls,
    pub oauth_sessions: Arc<OAuthSessionStore>,
    pub admin_key: String,
    /// Bounds total inbound concurrency to `worker_pool_size`. A request
    /// that can't acquire a permit within `proxy::QUEUE_WAIT` gets a 503
    /// instead of queueing indefinitely.
    pub concurrency_limiter: Arc<Semaphore>,
}

/// Reloads the `model_routes` table into `routes`' copy-on-write snapshot.
/// Called at bootstrap and after any admin mutation of the route table,
/// since [`RouteTable::replace`] always replaces the table wholesale
/// rather than patching one rule in place.
pub async fn reload_routes(store: &dyn RowStore, routes: &RouteTable) {
    let rows = store
        .find_many("model_routes", &llmgate_storage::Filter::new(), &[], None, None)
        .await
        .unwrap_or_default();
    let rules = rows.iter().filter_map(route_rule_from_row).collect();
    routes.replace(rules);
}

fn route_rule_from_row(row: &llmgate_storage::Row) -> Option<llmgate_core::route_table::RouteRule> {
    use llmgate_common::Provider;

    let id = row.get("id")?.as_i64()?;
    let api_key_id = row.get("api_key_id").and_then(|v| v.as_i64());
    let source_model = row.get("source_model")?.as_str()?.to_string();
    let target_model = row.get("target_model")?.as_str()?.to_string();
    let target_provider = Provider::parse(row.get("target_provider")?.as_str()?)?;
    let priority = row.get("priority").and_then(|v| v.as_i64()).unwrap_or(0) as i32;
    let enabled = row.get("enabled").and_then(|v| v.as_bool()).unwrap_or(true);
    let created_at: time::OffsetDateTime = row
        .get("created_at")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_else(llmgate_common::now);

    Some(llmgate_core::route_table::RouteRule {
        id,
        api_key_id,
        source_model,
        target_model,
        target_provider,
        priority,
        enabled,
        created_at,
    })
}

/// Builds the full HTTP surface: inbound passthrough routes plus the
/// management API, each independently auth-gated.
pub fn build_router(state: GatewayState) -> axum::Router {
    axum::Router::new()
        .merge(proxy::router(state.clone()))
        .merge(admin::router(state))
}
