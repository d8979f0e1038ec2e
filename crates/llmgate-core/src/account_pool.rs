//! The in-memory index of upstream accounts. Snapshots are TTL-cached,
//! read-only, ordered views over the `upstream_accounts` table; writers
//! mutate counters through [`AccountPool::record_usage`] /
//! [`AccountPool::mark_failed`] without invalidating outstanding snapshot
//! references, so snapshot counters may be slightly stale by design.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use llmgate_common::{AccountId, AccountState, AuthMethod, HealthStatus, Provider, ProviderFilter};
use llmgate_storage::{Filter, Row, RowStore};
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::account::Account;
use crate::health_scorer::HealthScorer;

pub const TABLE: &str = "upstream_accounts";

/// Sweep cadence and entry lifetime: entries older than 10 minutes are
/// dropped every 5 minutes.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const ENTRY_LIFETIME: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    owner_id: i64,
    provider_filter: ProviderFilterKey,
    include_inactive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ProviderFilterKey {
    Only(Provider),
    Any,
}

impl From<ProviderFilter> for ProviderFilterKey {
    fn from(value: ProviderFilter) -> Self {
        match value {
            ProviderFilter::Only(p) => ProviderFilterKey::Only(p),
            ProviderFilter::Any => ProviderFilterKey::Any,
        }
    }
}

struct CacheEntry {
    snapshot: Arc<Vec<Account>>,
    cached_at: Instant,
}

pub struct AccountPool {
    store: Arc<dyn RowStore>,
    cache: RwLock<HashMap<CacheKey, CacheEntry>>,
    ttl: Duration,
    pub scorer: HealthScorer,
}

impl AccountPool {
    pub fn new(store: Arc<dyn RowStore>, ttl: Duration) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            ttl,
            scorer: HealthScorer::new(),
        }
    }

    /// Returns an ordered, possibly-cached snapshot matching `owner_id` and
    /// `provider_filter`. Ordering is `(priority asc, weight desc,
    /// created_at asc)`.
    pub async fn snapshot(
        &self,
        owner_id: i64,
        provider_filter: ProviderFilter,
        include_inactive: bool,
    ) -> Arc<Vec<Account>> {
        let key = CacheKey {
            owner_id,
            provider_filter: provider_filter.into(),
            include_inactive,
        };
        if let Some(entry) = self.cache.read().await.get(&key)
            && entry.cached_at.elapsed() < self.ttl
        {
            return entry.snapshot.clone();
        }

        let mut filter = Filter::new().eq("owner_id", owner_id);
        if let ProviderFilter::Only(provider) = provider_filter {
            filter = filter.eq("provider", provider.as_str());
        }

        let rows = self
            .store
            .find_many(TABLE, &filter, &[], None, None)
            .await
            .unwrap_or_default();

        let mut accounts: Vec<Account> = rows
            .iter()
            .filter_map(account_from_row)
            .filter(|a| include_inactive || a.state != AccountState::Inactive)
            .collect();
        accounts.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        let snapshot = Arc::new(accounts);
        self.cache.write().await.insert(
            key,
            CacheEntry {
                snapshot: snapshot.clone(),
                cached_at: Instant::now(),
            },
        );
        snapshot
    }

    pub async fn invalidate(&self, owner_id: i64) {
        self.cache.write().await.retain(|key, _| key.owner_id != owner_id);
    }

    /// Uncached, cross-owner listing filtered only by `state`. Used by the
    /// health prober, which probes across every owner's accounts rather
    /// than one tenant's snapshot at a time.
    pub async fn all_in_states(&self, states: &[AccountState]) -> Vec<Account> {
        let rows = self.store.find_many(TABLE, &Filter::new(), &[], None, None).await.unwrap_or_default();
        rows.iter()
            .filter_map(account_from_row)
            .filter(|a| states.contains(&a.state))
            .collect()
    }

    /// Atomically (from the caller's perspective) increments `request_count`
    /// and one of `{success_count, error_count}`, updates `health_status`
    /// when `latency_ms` is present, and applies the failure/recovery state
    /// transitions.
    pub async fn record_usage(&self, account_id: AccountId, success: bool, latency_ms: Option<u64>) {
        let Some(row) = self
            .store
            .find_one(TABLE, &Filter::new().eq("id", account_id))
            .await
            .ok()
            .flatten()
        else {
            return;
        };
        let Some(mut account) = account_from_row(&row) else {
            return;
        };

        account.request_count += 1;
        if success {
            account.success_count += 1;
        } else {
            account.error_count += 1;
        }

        if let Some(latency_ms) = latency_ms {
            account.health_status = Some(HealthStatus {
                ok: success,
                latency_ms: Some(latency_ms),
                error: None,
                checked_at: llmgate_common::now(),
            });
            account.last_health_check = Some(llmgate_common::now());
            if success && matches!(account.state, AccountState::Error | AccountState::Pending) {
                account.state = AccountState::Active;
            }
            // Failure -> Error transition on a live call is decided by the
            // proxy engine's failover policy, not unconditionally here; the
            // prober owns the flap-guarded threshold transition.
        }
        account.last_used_at = Some(llmgate_common::now());
        account.updated_at = llmgate_common::now();

        let _ = self
            .store
            .update(TABLE, &Filter::new().eq("id", account_id), account_to_row(&account))
            .await;
        self.owner_invalidate_for(account_id).await;
        self.scorer.invalidate(account_id).await;
    }

    /// Sets `state=error` immediately per the proxy engine's failover
    /// policy, increments `error_count`, and records the failure reason.
    pub async fn mark_failed(&self, account_id: AccountId, reason: &str) {
        let Some(row) = self
            .store
            .find_one(TABLE, &Filter::new().eq("id", account_id))
            .await
            .ok()
            .flatten()
        else {
            return;
        };
        let Some(mut account) = account_from_row(&row) else {
            return;
        };

        account.state = AccountState::Error;
        account.error_count += 1;
        account.health_status = Some(HealthStatus {
            ok: false,
            latency_ms: None,
            error: Some(reason.to_string()),
            checked_at: llmgate_common::now(),
        });
        account.updated_at = llmgate_common::now();

        let _ = self
            .store
            .update(TABLE, &Filter::new().eq("id", account_id), account_to_row(&account))
            .await;
        self.owner_invalidate_for(account_id).await;
        self.scorer.invalidate(account_id).await;
    }

    pub async fn get(&self, account_id: AccountId) -> Option<Account> {
        self.store
            .find_one(TABLE, &Filter::new().eq("id", account_id))
            .await
            .ok()
            .flatten()
            .as_ref()
            .and_then(account_from_row)
    }

    /// Replaces an account's encrypted credentials in place, e.g. after an
    /// OAuth refresh.
    pub async fn update_credentials(&self, account_id: AccountId, credentials: String, state: AccountState) {
        let mut patch = Row::new();
        patch.insert("credentials".into(), serde_json::json!(credentials));
        patch.insert("state".into(), serde_json::json!(state_to_str(state)));
        patch.insert("updated_at".into(), serde_json::json!(llmgate_common::now()));
        let _ = self.store.update(TABLE, &Filter::new().eq("id", account_id), patch).await;
        self.owner_invalidate_for(account_id).await;
    }

    async fn owner_invalidate_for(&self, account_id: AccountId) {
        if let Some(row) = self
            .store
            .find_one(TABLE, &Filter::new().eq("id", account_id))
            .await
            .ok()
            .flatten()
            && let Some(owner_id) = row.get("owner_id").and_then(|v| v.as_i64())
        {
            self.invalidate(owner_id).await;
        }
    }

    /// Background sweep loop: drops stale cache entries every 5 minutes.
    /// Intended to be `tokio::spawn`ed once at bootstrap.
    pub async fn run_sweep_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            self.sweep().await;
            self.scorer.sweep().await;
        }
    }

    async fn sweep(&self) {
        let mut guard = self.cache.write().await;
        guard.retain(|_, entry| entry.cached_at.elapsed() < ENTRY_LIFETIME);
    }
}

pub fn account_from_row(row: &Row) -> Option<Account> {
    Some(Account {
        id: row.get("id")?.as_i64()?,
        owner_id: row.get("owner_id")?.as_i64()?,
        name: row.get("name")?.as_str()?.to_string(),
        provider: Provider::parse(row.get("provider")?.as_str()?)?,
        auth_method: match row.get("auth_method")?.as_str()? {
            "api_key" => AuthMethod::ApiKey,
            "oauth" => AuthMethod::OAuth,
            _ => return None,
        },
        credentials: row.get("credentials")?.as_str()?.to_string(),
        state: parse_state(row.get("state")?.as_str()?)?,
        priority: row.get("priority")?.as_i64()? as i16,
        weight: row.get("weight")?.as_i64()? as i32,
        proxy_binding: row
            .get("proxy_binding")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        request_count: row.get("request_count").and_then(|v| v.as_u64()).unwrap_or(0),
        success_count: row.get("success_count").and_then(|v| v.as_u64()).unwrap_or(0),
        error_count: row.get("error_count").and_then(|v| v.as_u64()).unwrap_or(0),
        last_health_check: row
            .get("last_health_check")
            .and_then(|v| serde_json::from_value(v.clone()).ok()),
        health_status: row
            .get("health_status")
            .and_then(|v| serde_json::from_value(v.clone()).ok()),
        last_used_at: row
            .get("last_used_at")
            .and_then(|v| serde_json::from_value(v.clone()).ok()),
        created_at: row
            .get("created_at")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_else(llmgate_common::now),
        updated_at: row
            .get("updated_at")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_else(llmgate_common::now),
    })
}

pub fn account_to_row(account: &Account) -> Row {
    let mut row = Row::new();
    row.insert("id".into(), serde_json::json!(account.id));
    row.insert("owner_id".into(), serde_json::json!(account.owner_id));
    row.insert("name".into(), serde_json::json!(account.name));
    row.insert("provider".into(), serde_json::json!(account.provider.as_str()));
    row.insert(
        "auth_method".into(),
        serde_json::json!(match account.auth_method {
            AuthMethod::ApiKey => "api_key",
            AuthMethod::OAuth => "oauth",
        }),
    );
    row.insert("credentials".into(), serde_json::json!(account.credentials));
    row.insert("state".into(), serde_json::json!(state_to_str(account.state)));
    row.insert("priority".into(), serde_json::json!(account.priority));
    row.insert("weight".into(), serde_json::json!(account.weight));
    row.insert("proxy_binding".into(), serde_json::json!(account.proxy_binding));
    row.insert("request_count".into(), serde_json::json!(account.request_count));
    row.insert("success_count".into(), serde_json::json!(account.success_count));
    row.insert("error_count".into(), serde_json::json!(account.error_count));
    row.insert(
        "last_health_check".into(),
        serde_json::json!(account.last_health_check),
    );
    row.insert("health_status".into(), serde_json::json!(account.health_status));
    row.insert("last_used_at".into(), serde_json::json!(account.last_used_at));
    row.insert("created_at".into(), serde_json::json!(account.created_at));
    row.insert("updated_at".into(), serde_json::json!(account.updated_at));
    row
}

fn parse_state(value: &str) -> Option<AccountState> {
    match value {
        "active" => Some(AccountState::Active),
        "inactive" => Some(AccountState::Inactive),
        "error" => Some(AccountState::Error),
        "pending" => Some(AccountState::Pending),
        _ => None,
    }
}

fn state_to_str(state: AccountState) -> &'static str {
    match state {
        AccountState::Active => "active",
        AccountState::Inactive => "inactive",
        AccountState::Error => "error",
        AccountState::Pending => "pending",
    }
}
