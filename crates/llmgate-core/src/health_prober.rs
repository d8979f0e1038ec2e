//! The background health prober. Bounded-parallel probe batches using a
//! `Semaphore` + `FuturesUnordered` pattern for concurrency-limited
//! upstream health checks, against this workspace's [`UpstreamClient`]
//! trait and [`AccountPool`] state machine instead of a raw
//! `reqwest::Client`.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use llmgate_common::{AccountId, AccountState, HealthStatus, Provider};
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::account::Account;
use crate::account_pool::AccountPool;
use crate::credentials::Credentials;
use crate::upstream_client::{HttpMethod, UpstreamClient, UpstreamRequest};

#[derive(Debug, Clone)]
pub struct HealthProberConfig {
    pub interval: Duration,
    pub concurrency: usize,
    pub probe_timeout: Duration,
}

impl Default for HealthProberConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            concurrency: 5,
            probe_timeout: Duration::from_secs(10),
        }
    }
}

pub struct HealthProber {
    pool: Arc<AccountPool>,
    client: Arc<dyn UpstreamClient>,
    master_key: llmgate_crypto::MasterKey,
    config: HealthProberConfig,
}

struct ProbeOutcome {
    account_id: AccountId,
    ok: bool,
    latency_ms: u64,
    error: Option<String>,
}

impl HealthProber {
    pub fn new(
        pool: Arc<AccountPool>,
        client: Arc<dyn UpstreamClient>,
        master_key: llmgate_crypto::MasterKey,
        config: HealthProberConfig,
    ) -> Self {
        Self { pool, client, master_key, config }
    }

    /// Intended to be `tokio::spawn`ed once at bootstrap; ticks forever at
    /// `config.interval`.
    pub async fn run_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        loop {
            ticker.tick().await;
            self.run_once().await;
        }
    }

    /// One full sweep: probe every `{active, pending, error}` account in
    /// bounded-parallel batches, apply the flap-guarded transition rule.
    pub async fn run_once(&self) {
        let candidates = self.candidates().await;
        if candidates.is_empty() {
            return;
        }

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = FuturesUnordered::new();
        for account in candidates {
            let semaphore = Arc::clone(&semaphore);
            let client = Arc::clone(&self.client);
            let master_key = self.master_key.clone();
            let timeout = self.config.probe_timeout;
            tasks.push(async move {
                let _permit = semaphore.acquire().await;
                probe_account(client.as_ref(), &master_key, &account, timeout).await
            });
        }

        while let Some(outcome) = tasks.next().await {
            self.apply_outcome(outcome).await;
        }
    }

    /// Single immediate probe outside the sweep cadence, used by the
    /// management API's manual health-check endpoint. Returns `false` if
    /// the account doesn't exist or the probe failed.
    pub async fn probe_one(&self, account_id: AccountId) -> bool {
        let Some(account) = self.pool.get(account_id).await else {
            return false;
        };
        let outcome = probe_account(self.client.as_ref(), &self.master_key, &account, self.config.probe_timeout).await;
        let ok = outcome.ok;
        self.apply_outcome(outcome).await;
        ok
    }

    async fn candidates(&self) -> Vec<Account> {
        self.pool
            .all_in_states(&[AccountState::Active, AccountState::Pending, AccountState::Error])
            .await
    }

    async fn apply_outcome(&self, outcome: ProbeOutcome) {
        if outcome.ok {
            self.pool
                .record_usage(outcome.account_id, true, Some(outcome.latency_ms))
                .await;
            return;
        }

        // Only escalate to `error` if the account was already unhealthy and
        // has accumulated 3+ errors. A single probe failure on an
        // otherwise-healthy account just updates `health_status` without
        // changing `state`.
        let account = match self.pool.get(outcome.account_id).await {
            Some(account) => account,
            None => return,
        };
        let was_already_failing = account.health_status.as_ref().is_some_and(|s| !s.ok);
        if was_already_failing && account.error_count >= 3 {
            self.pool
                .mark_failed(outcome.account_id, outcome.error.as_deref().unwrap_or("probe failed"))
                .await;
        } else {
            self.pool.record_usage(outcome.account_id, false, Some(outcome.latency_ms)).await;
        }
    }
}

async fn probe_account(
    client: &dyn UpstreamClient,
    master_key: &llmgate_crypto::MasterKey,
    account: &Account,
    timeout: Duration,
) -> ProbeOutcome {
    let start = Instant::now();
    let result = tokio::time::timeout(timeout, send_probe(client, master_key, account)).await;
    let latency_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(Ok(status)) if (200..300).contains(&status) => {
            ProbeOutcome { account_id: account.id, ok: true, latency_ms, error: None }
        }
        Ok(Ok(status)) => ProbeOutcome {
            account_id: account.id,
            ok: false,
            latency_ms,
            error: Some(format!("probe returned http {status}")),
        },
        Ok(Err(message)) => ProbeOutcome { account_id: account.id, ok: false, latency_ms, error: Some(message) },
        Err(_) => ProbeOutcome {
            account_id: account.id,
            ok: false,
            latency_ms,
            error: Some("probe timed out".to_string()),
        },
    }
}

/// Minimal provider-specific validation request. Every provider exposes a
/// cheap models-listing endpoint; this avoids spending a token on every
/// health check.
async fn send_probe(
    client: &dyn UpstreamClient,
    master_key: &llmgate_crypto::MasterKey,
    account: &Account,
) -> Result<u16, String> {
    let credentials = Credentials::decrypt(master_key, &account.credentials).map_err(|_| "credential decrypt failed".to_string())?;
    let token = match &credentials {
        Credentials::ApiKey { key, .. } => key.clone(),
        Credentials::OAuth { access_token, .. } => access_token.clone(),
    };

    let (url, headers) = match account.provider {
        Provider::Anthropic => (
            "https://api.anthropic.com/v1/models".to_string(),
            vec![("x-api-key".to_string(), token), ("anthropic-version".to_string(), "2023-06-01".to_string())],
        ),
        Provider::OpenAI => (
            "https://api.openai.com/v1/models".to_string(),
            vec![("authorization".to_string(), format!("Bearer {token}"))],
        ),
        Provider::Gemini => (
            format!("https://generativelanguage.googleapis.com/v1beta/models?key={token}"),
            vec![],
        ),
        Provider::Qwen => (
            "https://dashscope.aliyuncs.com/compatible-mode/v1/models".to_string(),
            vec![("authorization".to_string(), format!("Bearer {token}"))],
        ),
    };

    let request = UpstreamRequest { method: HttpMethod::Get, url, headers, body: None, is_stream: false, proxy_binding: None };
    match client.send(request).await {
        Ok(response) => Ok(response.status),
        Err(failure) => Err(match failure {
            crate::upstream_client::UpstreamFailure::Transport { message, .. } => message,
            crate::upstream_client::UpstreamFailure::Http { status, .. } => format!("http {status}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmgate_common::AuthMethod;
    use llmgate_storage::InMemoryRowStore;

    fn account_with(state: AccountState, health_status: Option<HealthStatus>, error_count: u64) -> Account {
        let key = llmgate_crypto::MasterKey::generate();
        let creds = Credentials::ApiKey { key: "sk-test".into(), base_url: None };
        Account {
            id: 1,
            owner_id: 1,
            name: "a".into(),
            provider: Provider::Anthropic,
            auth_method: AuthMethod::ApiKey,
            credentials: creds.encrypt(&key).unwrap(),
            state,
            priority: 0,
            weight: 100,
            proxy_binding: None,
            request_count: 10,
            success_count: 5,
            error_count,
            last_health_check: None,
            health_status,
            last_used_at: None,
            created_at: llmgate_common::now(),
            updated_at: llmgate_common::now(),
        }
    }

    #[tokio::test]
    async fn a_single_transient_failure_does_not_escalate_to_error() {
        let store: Arc<dyn llmgate_storage::RowStore> = Arc::new(InMemoryRowStore::new());
        let account = account_with(AccountState::Active, None, 0);
        store.create(crate::account_pool::TABLE, crate::account_pool::account_to_row(&account)).await.unwrap();
        let pool = Arc::new(AccountPool::new(store, Duration::from_secs(60)));

        struct AlwaysFails;
        #[async_trait::async_trait]
        impl UpstreamClient for AlwaysFails {
            async fn send(
                &self,
                _req: UpstreamRequest,
            ) -> Result<crate::upstream_client::UpstreamResponse, crate::upstream_client::UpstreamFailure> {
                Err(crate::upstream_client::UpstreamFailure::Transport {
                    kind: crate::upstream_client::TransportErrorKind::Connect,
                    message: "refused".into(),
                })
            }
        }

        let prober = HealthProber::new(
            pool.clone(),
            Arc::new(AlwaysFails),
            llmgate_crypto::MasterKey::generate(),
            HealthProberConfig { interval: Duration::from_secs(1), concurrency: 1, probe_timeout: Duration::from_secs(1) },
        );
        prober.run_once().await;

        let updated = pool.get(1).await.unwrap();
        assert_eq!(updated.state, AccountState::Active, "single failure on a healthy account must not flip state");
    }

    #[tokio::test]
    async fn repeated_failures_on_an_already_failing_account_escalate_to_error() {
        let store: Arc<dyn llmgate_storage::RowStore> = Arc::new(InMemoryRowStore::new());
        let failing_status = HealthStatus { ok: false, latency_ms: None, error: Some("prior fail".into()), checked_at: llmgate_common::now() };
        let account = account_with(AccountState::Active, Some(failing_status), 3);
        store.create(crate::account_pool::TABLE, crate::account_pool::account_to_row(&account)).await.unwrap();
        let pool = Arc::new(AccountPool::new(store, Duration::from_secs(60)));

        struct AlwaysFails;
        #[async_trait::async_trait]
        impl UpstreamClient for AlwaysFails {
            async fn send(
                &self,
                _req: UpstreamRequest,
            ) -> Result<crate::upstream_client::UpstreamResponse, crate::upstream_client::UpstreamFailure> {
                Err(crate::upstream_client::UpstreamFailure::Transport {
                    kind: crate::upstream_client::TransportErrorKind::Connect,
                    message: "refused".into(),
                })
            }
        }

        let prober = HealthProber::new(
            pool.clone(),
            Arc::new(AlwaysFails),
            llmgate_crypto::MasterKey::generate(),
            HealthProberConfig { interval: Duration::from_secs(1), concurrency: 1, probe_timeout: Duration::from_secs(1) },
        );
        prober.run_once().await;

        let updated = pool.get(1).await.unwrap();
        assert_eq!(updated.state, AccountState::Error);
    }
}
