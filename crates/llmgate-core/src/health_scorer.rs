//! Computes a `[0,1]` health score per account from its counters and
//! latest probe result, with exponential time decay favoring recently
//! checked accounts. Scores are cached per account and swept on the same
//! 10-minute TTL as pool snapshots.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use llmgate_common::{AccountId, AccountState};
use tokio::sync::RwLock;
use tokio::time::Instant;

/// The counters and probe facts the scorer needs; deliberately independent
/// of any storage row shape.
#[derive(Debug, Clone, Copy)]
pub struct ScoreInputs {
    pub request_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub state: AccountState,
    pub last_probe_latency_ms: Option<u64>,
    pub last_health_check: Option<time::OffsetDateTime>,
}

const CACHE_TTL: Duration = Duration::from_secs(10 * 60);

struct CacheEntry {
    score: f64,
    cached_at: Instant,
}

/// Per-account score cache. Cloneable handle around shared state: an
/// `Arc<RwLock<HashMap<..>>>` for read-mostly shared state.
#[derive(Clone, Default)]
pub struct HealthScorer {
    cache: Arc<RwLock<HashMap<AccountId, CacheEntry>>>,
}

impl HealthScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn score(&self, account_id: AccountId, inputs: ScoreInputs) -> f64 {
        if let Some(entry) = self.cache.read().await.get(&account_id)
            && entry.cached_at.elapsed() < CACHE_TTL
        {
            return entry.score;
        }
        let score = compute_score(inputs);
        self.cache.write().await.insert(
            account_id,
            CacheEntry {
                score,
                cached_at: Instant::now(),
            },
        );
        score
    }

    /// Drops cache entries older than the TTL; intended to run from the
    /// same background sweep loop as the pool's snapshot cache.
    pub async fn sweep(&self) {
        let mut guard = self.cache.write().await;
        guard.retain(|_, entry| entry.cached_at.elapsed() < CACHE_TTL);
    }

    pub async fn invalidate(&self, account_id: AccountId) {
        self.cache.write().await.remove(&account_id);
    }
}

/// Pure scoring function, exposed standalone so unit tests (and the load
/// balancer's adaptive strategy) can call it without going through the
/// cache.
pub fn compute_score(inputs: ScoreInputs) -> f64 {
    let request_count = inputs.request_count.max(1) as f64;
    let success_rate = inputs.success_count as f64 / request_count;
    let error_rate = inputs.error_count as f64 / request_count;

    let state_factor = match inputs.state {
        AccountState::Error => 0.1,
        AccountState::Inactive => 0.5,
        AccountState::Active | AccountState::Pending => 1.0,
    };
    let availability = success_rate * state_factor;

    let performance = performance_score(inputs.last_probe_latency_ms.unwrap_or(0));

    let reliability = 1.0 - error_rate;

    let age_seconds = inputs
        .last_health_check
        .map(|checked_at| (llmgate_common::now() - checked_at).as_seconds_f64().max(0.0))
        .unwrap_or(86_400.0);
    let time_decay = (-age_seconds / 600.0).exp();

    let raw = (0.4 * availability + 0.3 * performance + 0.3 * reliability) * time_decay;
    raw.clamp(0.0, 1.0)
}

/// The latency-to-score piecewise curve used by the `performance` term,
/// factored out so the load balancer's adaptive strategy can use the same
/// curve for its independent `latency_score` component.
pub fn performance_score(latency_ms: u64) -> f64 {
    let latency_ms = latency_ms as f64;
    if latency_ms <= 1000.0 {
        1.0
    } else if latency_ms <= 2000.0 {
        1.0 - (latency_ms - 1000.0) / 5000.0
    } else {
        (1.0 - (latency_ms - 2000.0) / 10000.0).max(0.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(
        requests: u64,
        successes: u64,
        errors: u64,
        state: AccountState,
        latency_ms: Option<u64>,
        age_secs: i64,
    ) -> ScoreInputs {
        ScoreInputs {
            request_count: requests,
            success_count: successes,
            error_count: errors,
            state,
            last_probe_latency_ms: latency_ms,
            last_health_check: Some(llmgate_common::now() - time::Duration::seconds(age_secs)),
        }
    }

    #[test]
    fn perfect_fresh_account_scores_near_one() {
        let score = compute_score(inputs(100, 100, 0, AccountState::Active, Some(200), 0));
        assert!(score > 0.95, "expected near-1.0 score, got {score}");
    }

    #[test]
    fn error_state_is_heavily_penalized() {
        let active = compute_score(inputs(100, 100, 0, AccountState::Active, Some(200), 0));
        let errored = compute_score(inputs(100, 100, 0, AccountState::Error, Some(200), 0));
        assert!(errored < active);
    }

    /// Increasing latency never increases performance (and therefore
    /// never increases the score holding everything else fixed).
    #[test]
    fn increasing_latency_never_increases_score() {
        let low = compute_score(inputs(100, 100, 0, AccountState::Active, Some(500), 0));
        let mid = compute_score(inputs(100, 100, 0, AccountState::Active, Some(1500), 0));
        let high = compute_score(inputs(100, 100, 0, AccountState::Active, Some(5000), 0));
        assert!(low >= mid);
        assert!(mid >= high);
    }

    /// Increasing error_count never increases reliability, hence never
    /// increases the score.
    #[test]
    fn increasing_errors_never_increases_score() {
        let few_errors = compute_score(inputs(100, 90, 10, AccountState::Active, Some(200), 0));
        let many_errors = compute_score(inputs(100, 50, 50, AccountState::Active, Some(200), 0));
        assert!(few_errors >= many_errors);
    }

    #[test]
    fn stale_accounts_decay_toward_zero() {
        let fresh = compute_score(inputs(100, 100, 0, AccountState::Active, Some(200), 0));
        let stale = compute_score(inputs(100, 100, 0, AccountState::Active, Some(200), 3600));
        assert!(stale < fresh);
    }

    #[test]
    fn score_is_always_clamped_to_unit_interval() {
        let score = compute_score(inputs(0, 0, 0, AccountState::Error, None, 0));
        assert!((0.0..=1.0).contains(&score));
    }
}
