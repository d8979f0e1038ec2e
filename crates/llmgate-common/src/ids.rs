use serde::{Deserialize, Serialize};

/// Row id of an upstream account: an opaque, persistence-assigned integer.
pub type AccountId = i64;

/// Row id of a gateway-issued API key.
pub type ApiKeyId = i64;

/// Row id of a model route rule.
pub type RouteId = i64;

/// Per-inbound-request correlation id, used for the `request_id` column on
/// `UsageRecord` and threaded through tracing spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub uuid::Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
