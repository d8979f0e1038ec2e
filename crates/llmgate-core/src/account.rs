use llmgate_common::{AccountId, AccountState, AuthMethod, HealthStatus, Provider};
use serde::{Deserialize, Serialize};

/// In-memory projection of an upstream account row, as carried inside a
/// pool snapshot. `credentials` stays encrypted until the proxy engine
/// decrypts it right before dispatch — it is never decrypted just to
/// build a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub owner_id: i64,
    pub name: String,
    pub provider: Provider,
    pub auth_method: AuthMethod,
    pub credentials: String,
    pub state: AccountState,
    pub priority: i16,
    pub weight: i32,
    pub proxy_binding: Option<String>,
    pub request_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub last_health_check: Option<time::OffsetDateTime>,
    pub health_status: Option<HealthStatus>,
    pub last_used_at: Option<time::OffsetDateTime>,
    pub created_at: time::OffsetDateTime,
    pub updated_at: time::OffsetDateTime,
}

impl Account {
    /// Total order used for every snapshot: `(priority asc, weight desc,
    /// created_at asc)`.
    pub fn sort_key(&self) -> (i16, std::cmp::Reverse<i32>, time::OffsetDateTime) {
        (self.priority, std::cmp::Reverse(self.weight), self.created_at)
    }

    pub fn recently_failed_probe(&self, within: time::Duration) -> bool {
        match &self.health_status {
            Some(status) if !status.ok => llmgate_common::now() - status.checked_at < within,
            _ => false,
        }
    }
}
