//! Resolves a requested model to a target model and provider. The table is
//! a copy-on-write snapshot behind an `ArcSwap` — readers never block, and
//! a mutation builds a whole new snapshot and swaps it in atomically.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use llmgate_common::Provider;
use time::OffsetDateTime;

#[derive(Debug, Clone)]
pub struct RouteRule {
    pub id: i64,
    pub api_key_id: Option<i64>,
    pub source_model: String,
    pub target_model: String,
    pub target_provider: Provider,
    pub priority: i32,
    pub enabled: bool,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default)]
struct RouteSnapshot {
    by_key: HashMap<i64, Vec<RouteRule>>,
    global: Vec<RouteRule>,
}

pub struct RouteTable {
    snapshot: ArcSwap<RouteSnapshot>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteTable {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(RouteSnapshot::default()),
        }
    }

    /// Replaces the whole table. Call after any route create/update/delete:
    /// the table is a copy-on-write snapshot refreshed wholesale on every
    /// mutation.
    pub fn replace(&self, rules: Vec<RouteRule>) {
        let mut by_key: HashMap<i64, Vec<RouteRule>> = HashMap::new();
        let mut global = Vec::new();
        for rule in rules {
            match rule.api_key_id {
                Some(key_id) => by_key.entry(key_id).or_default().push(rule),
                None => global.push(rule),
            }
        }
        for rules in by_key.values_mut() {
            sort_rules(rules);
        }
        sort_rules(&mut global);
        self.snapshot.store(Arc::new(RouteSnapshot { by_key, global }));
    }

    /// Resolves a route: per-key rules first, then global rules, then
    /// passthrough using `inferred_provider` (the provider implied by the
    /// inbound endpoint path).
    pub fn resolve(&self, api_key_id: i64, source_model: &str, inferred_provider: Provider) -> (String, Provider) {
        let snapshot = self.snapshot.load();

        if let Some(rules) = snapshot.by_key.get(&api_key_id)
            && let Some(rule) = first_match(rules, source_model)
        {
            return (rule.target_model.clone(), rule.target_provider);
        }
        if let Some(rule) = first_match(&snapshot.global, source_model) {
            return (rule.target_model.clone(), rule.target_provider);
        }
        (source_model.to_string(), inferred_provider)
    }
}

/// `(priority asc, created_at asc)`: ties broken by creation order.
fn sort_rules(rules: &mut [RouteRule]) {
    rules.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.created_at.cmp(&b.created_at)));
}

fn first_match<'a>(rules: &'a [RouteRule], source_model: &str) -> Option<&'a RouteRule> {
    rules.iter().find(|r| r.enabled && r.source_model == source_model)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: i64, api_key_id: Option<i64>, source: &str, target: &str, priority: i32, created_at: OffsetDateTime) -> RouteRule {
        RouteRule {
            id,
            api_key_id,
            source_model: source.to_string(),
            target_model: target.to_string(),
            target_provider: Provider::Anthropic,
            priority,
            enabled: true,
            created_at,
        }
    }

    #[test]
    fn per_key_route_takes_precedence_over_global() {
        let t0 = llmgate_common::now();
        let table = RouteTable::new();
        table.replace(vec![
            rule(1, None, "gpt-4o", "global-target", 1, t0),
            rule(2, Some(7), "gpt-4o", "key-target", 1, t0),
        ]);
        let (target, _) = table.resolve(7, "gpt-4o", Provider::OpenAI);
        assert_eq!(target, "key-target");
    }

    #[test]
    fn lowest_priority_wins_ties_broken_by_creation_order() {
        let t0 = llmgate_common::now();
        let t1 = t0 + time::Duration::seconds(1);
        let table = RouteTable::new();
        table.replace(vec![
            rule(1, None, "m", "second", 1, t1),
            rule(2, None, "m", "first", 1, t0),
        ]);
        let (target, _) = table.resolve(1, "m", Provider::OpenAI);
        assert_eq!(target, "first");
    }

    #[test]
    fn no_match_falls_through_to_passthrough() {
        let table = RouteTable::new();
        let (target, provider) = table.resolve(1, "untouched-model", Provider::Gemini);
        assert_eq!(target, "untouched-model");
        assert_eq!(provider, Provider::Gemini);
    }

    #[test]
    fn disabled_rules_are_skipped() {
        let t0 = llmgate_common::now();
        let table = RouteTable::new();
        let mut disabled = rule(1, None, "m", "target", 1, t0);
        disabled.enabled = false;
        table.replace(vec![disabled]);
        let (target, _) = table.resolve(1, "m", Provider::OpenAI);
        assert_eq!(target, "m");
    }
}
