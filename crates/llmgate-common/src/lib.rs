//! Shared identifiers, enums and small value types used across every crate
//! in the workspace. Nothing here talks to a database, a socket or a clock;
//! it is the vocabulary the rest of the gateway is written in.

mod ids;
mod provider;

pub use ids::{AccountId, ApiKeyId, RequestId, RouteId};
pub use provider::Provider;

use serde::{Deserialize, Serialize};

/// How an upstream account authenticates against its provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    ApiKey,
    OAuth,
}

/// Lifecycle state of an [`UpstreamAccount`]-equivalent row.
///
/// `Error` accounts are never selected by the load balancer except as the
/// last-resort fallback when no other account is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountState {
    Active,
    Inactive,
    Error,
    Pending,
}

impl AccountState {
    pub fn is_selectable(&self) -> bool {
        matches!(self, AccountState::Active)
    }
}

/// Named load-balancing strategies the router can select between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BalanceStrategy {
    PriorityFirst,
    LeastConnections,
    WeightedRoundRobin,
    #[default]
    Adaptive,
}

/// Filter applied when snapshotting the account pool: either accounts for a
/// single provider, or accounts for any provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderFilter {
    Only(Provider),
    Any,
}

impl ProviderFilter {
    pub fn matches(&self, provider: Provider) -> bool {
        match self {
            ProviderFilter::Only(p) => *p == provider,
            ProviderFilter::Any => true,
        }
    }
}

/// A probe or live-call outcome recorded against an account's
/// `health_status` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub ok: bool,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
    pub checked_at: time::OffsetDateTime,
}

pub fn now() -> time::OffsetDateTime {
    time::OffsetDateTime::now_utc()
}
