//! Picks one account out of a candidate snapshot under a named strategy.
//! Selection never fails with an error: an empty snapshot yields `None`
//! and the proxy engine turns that into `NoUpstream`.

use llmgate_common::{AccountState, BalanceStrategy};
use rand::Rng;
use time::Duration as TimeDuration;

use crate::account::Account;
use crate::health_scorer::{compute_score, performance_score, ScoreInputs};

/// Accounts whose most recent failed probe is within this window are
/// dropped from selection.
const RECENT_FAILURE_WINDOW: TimeDuration = TimeDuration::seconds(5 * 60);

pub struct LoadBalancer;

impl LoadBalancer {
    /// Filters `snapshot` and selects one account under `strategy`.
    /// `min_health_score` only applies to the `adaptive`
    /// strategy's third filter pass.
    pub fn select(snapshot: &[Account], strategy: BalanceStrategy, min_health_score: f64) -> Option<Account> {
        let candidates = Self::filter(snapshot, strategy, min_health_score);
        if candidates.is_empty() {
            return None;
        }
        match strategy {
            BalanceStrategy::PriorityFirst => Self::select_priority_first(&candidates),
            BalanceStrategy::LeastConnections => Self::select_least_connections(&candidates),
            BalanceStrategy::WeightedRoundRobin => Self::select_weighted_round_robin(&candidates),
            BalanceStrategy::Adaptive => Self::select_adaptive(&candidates),
        }
    }

    fn filter<'a>(snapshot: &'a [Account], strategy: BalanceStrategy, min_health_score: f64) -> Vec<&'a Account> {
        let healthy: Vec<&Account> = snapshot
            .iter()
            .filter(|a| a.state != AccountState::Error)
            .collect();

        // Filter 1: drop error accounts unless doing so empties the set.
        let mut candidates: Vec<&Account> = if healthy.is_empty() {
            snapshot.iter().collect()
        } else {
            healthy
        };
        if candidates.is_empty() {
            return Self::most_recently_used_fallback(snapshot);
        }

        // Filter 2: drop accounts with a recent failed probe.
        let after_recent_failure: Vec<&Account> = candidates
            .iter()
            .copied()
            .filter(|a| !a.recently_failed_probe(RECENT_FAILURE_WINDOW))
            .collect();
        if after_recent_failure.is_empty() {
            return Self::most_recently_used_fallback(snapshot);
        }
        candidates = after_recent_failure;

        // Filter 3: adaptive-only minimum health score.
        if strategy == BalanceStrategy::Adaptive {
            let above_threshold: Vec<&Account> = candidates
                .iter()
                .copied()
                .filter(|a| score_of(a) >= min_health_score)
                .collect();
            if !above_threshold.is_empty() {
                candidates = above_threshold;
            }
        }

        candidates
    }

    /// Total outage avoidance: fall back to the single account with the
    /// most recent `last_used_at`, even if it is `error`.
    fn most_recently_used_fallback(snapshot: &[Account]) -> Vec<&Account> {
        snapshot
            .iter()
            .max_by_key(|a| a.last_used_at)
            .into_iter()
            .collect()
    }

    fn select_priority_first(candidates: &[&Account]) -> Option<Account> {
        let min_priority = candidates.iter().map(|a| a.priority).min()?;
        let tied: Vec<&Account> = candidates
            .iter()
            .copied()
            .filter(|a| a.priority == min_priority)
            .collect();
        weighted_random(&tied, |a| a.weight.max(0) as u64).cloned()
    }

    fn select_least_connections(candidates: &[&Account]) -> Option<Account> {
        candidates
            .iter()
            .min_by_key(|a| (a.request_count, a.priority))
            .map(|a| (*a).clone())
    }

    fn select_weighted_round_robin(candidates: &[&Account]) -> Option<Account> {
        weighted_random(candidates, |a| a.weight.max(0) as u64).cloned()
    }

    /// `score = (0.4*health + 0.3*latency_score + 0.3*success_rate) *
    /// weight/100`; take the top-3 by score, choose among them with
    /// geometric weights `0.7^i`.
    fn select_adaptive(candidates: &[&Account]) -> Option<Account> {
        let mut scored: Vec<(&Account, f64)> = candidates.iter().map(|a| (*a, score_of(a))).collect();
        // Stable sort on descending score preserves snapshot order
        // (priority, weight, created_at) among ties, per the tie-break rule.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(3);

        let geometric_weights: Vec<f64> = (0..scored.len()).map(|i| 0.7f64.powi(i as i32)).collect();
        let total: f64 = geometric_weights.iter().sum();
        if total <= 0.0 {
            return scored.first().map(|(a, _)| (*a).clone());
        }
        let mut draw = rand::rng().random_range(0.0..total);
        for ((account, _), weight) in scored.iter().zip(geometric_weights.iter()) {
            if draw < *weight {
                return Some((*account).clone());
            }
            draw -= weight;
        }
        scored.last().map(|(a, _)| (*a).clone())
    }
}

/// The adaptive strategy's per-account score, separate from the cached
/// [`crate::health_scorer::HealthScorer`] composite: it mixes in a
/// `weight/100` factor the composite score doesn't carry.
fn score_of(account: &Account) -> f64 {
    let inputs = ScoreInputs {
        request_count: account.request_count,
        success_count: account.success_count,
        error_count: account.error_count,
        state: account.state,
        last_probe_latency_ms: account.health_status.as_ref().and_then(|h| h.latency_ms),
        last_health_check: account.last_health_check,
    };
    let health_score = compute_score(inputs);
    let latency_score = performance_score(account.health_status.as_ref().and_then(|h| h.latency_ms).unwrap_or(0));

    let request_count = account.request_count.max(1) as f64;
    let success_rate = account.success_count as f64 / request_count;

    let composite = 0.4 * health_score + 0.3 * latency_score + 0.3 * success_rate;
    composite * (account.weight.max(0) as f64 / 100.0)
}

/// Draws an integer in `[0, total_weight)` and walks the candidate list
/// subtracting weights until negative. Falls back to uniform random when
/// the total weight is 0.
fn weighted_random<'a, T>(candidates: &[&'a T], weight_of: impl Fn(&T) -> u64) -> Option<&'a T> {
    if candidates.is_empty() {
        return None;
    }
    let total_weight: u64 = candidates.iter().map(|c| weight_of(c)).sum();
    if total_weight == 0 {
        let index = rand::rng().random_range(0..candidates.len());
        return Some(candidates[index]);
    }
    let mut draw = rand::rng().random_range(0..total_weight);
    for candidate in candidates {
        let weight = weight_of(candidate);
        if draw < weight {
            return Some(candidate);
        }
        draw -= weight;
    }
    candidates.last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmgate_common::{AuthMethod, Provider};

    fn account(id: i64, priority: i16, weight: i32, state: AccountState, request_count: u64) -> Account {
        Account {
            id,
            owner_id: 1,
            name: format!("a{id}"),
            provider: Provider::Anthropic,
            auth_method: AuthMethod::ApiKey,
            credentials: "x".into(),
            state,
            priority,
            weight,
            proxy_binding: None,
            request_count,
            success_count: request_count,
            error_count: 0,
            last_health_check: Some(llmgate_common::now()),
            health_status: Some(llmgate_common::HealthStatus {
                ok: true,
                latency_ms: Some(100),
                error: None,
                checked_at: llmgate_common::now(),
            }),
            last_used_at: Some(llmgate_common::now()),
            created_at: llmgate_common::now(),
            updated_at: llmgate_common::now(),
        }
    }

    #[test]
    fn priority_first_only_considers_minimum_priority_tier() {
        let snapshot = vec![
            account(1, 2, 100, AccountState::Active, 10),
            account(2, 1, 100, AccountState::Active, 10),
        ];
        for _ in 0..20 {
            let chosen = LoadBalancer::select(&snapshot, BalanceStrategy::PriorityFirst, 0.0).unwrap();
            assert_eq!(chosen.id, 2);
        }
    }

    #[test]
    fn least_connections_picks_smallest_request_count() {
        let snapshot = vec![
            account(1, 1, 100, AccountState::Active, 50),
            account(2, 1, 100, AccountState::Active, 5),
        ];
        let chosen = LoadBalancer::select(&snapshot, BalanceStrategy::LeastConnections, 0.0).unwrap();
        assert_eq!(chosen.id, 2);
    }

    #[test]
    fn weighted_round_robin_never_selects_zero_weight_when_alternative_exists() {
        let snapshot = vec![
            account(1, 1, 0, AccountState::Active, 1),
            account(2, 1, 100, AccountState::Active, 1),
        ];
        let mut saw_two = false;
        for _ in 0..50 {
            let chosen = LoadBalancer::select(&snapshot, BalanceStrategy::WeightedRoundRobin, 0.0).unwrap();
            if chosen.id == 2 {
                saw_two = true;
            }
        }
        assert!(saw_two);
    }

    #[test]
    fn all_error_accounts_fall_back_to_most_recently_used() {
        let mut a = account(1, 1, 100, AccountState::Error, 10);
        a.last_used_at = Some(llmgate_common::now() - time::Duration::seconds(10));
        let mut b = account(2, 1, 100, AccountState::Error, 10);
        b.last_used_at = Some(llmgate_common::now());
        let snapshot = vec![a, b];

        let chosen = LoadBalancer::select(&snapshot, BalanceStrategy::Adaptive, 0.5).unwrap();
        assert_eq!(chosen.id, 2);
    }

    #[test]
    fn empty_snapshot_selects_nothing() {
        assert!(LoadBalancer::select(&[], BalanceStrategy::Adaptive, 0.5).is_none());
    }

    #[test]
    fn accounts_with_recent_failed_probe_are_skipped_when_alternative_exists() {
        let mut failing = account(1, 1, 100, AccountState::Active, 10);
        failing.health_status = Some(llmgate_common::HealthStatus {
            ok: false,
            latency_ms: None,
            error: Some("boom".into()),
            checked_at: llmgate_common::now(),
        });
        let healthy = account(2, 1, 100, AccountState::Active, 10);
        let snapshot = vec![failing, healthy];

        for _ in 0..10 {
            let chosen = LoadBalancer::select(&snapshot, BalanceStrategy::WeightedRoundRobin, 0.0).unwrap();
            assert_eq!(chosen.id, 2);
        }
    }
}
