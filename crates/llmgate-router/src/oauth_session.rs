//! A short-lived, in-memory handle linking an `/api/oauth/start` call to
//! its matching `/api/oauth/callback` (Anthropic) or poll (Qwen). Never
//! persisted — the 10 minute lifetime is enforced by
//! [`OAuthSessionStore::sweep_expired`], the same TTL-sweep idiom
//! [`llmgate_core::account_pool::AccountPool`] uses for its cache entries.

use std::collections::HashMap;
use std::time::Duration;

use llmgate_common::Provider;
use tokio::sync::Mutex;
use tokio::time::Instant;

const SESSION_LIFETIME: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone)]
pub enum PendingOAuth {
    Anthropic {
        code_verifier: String,
        csrf_state: String,
    },
    Qwen {
        session: llmgate_core::oauth::qwen::DeviceCodeSession,
    },
}

#[derive(Debug, Clone)]
pub struct OAuthSession {
    pub account_id: i64,
    pub owner_id: i64,
    pub provider: Provider,
    pub pending: PendingOAuth,
}

struct Entry {
    session: OAuthSession,
    started_at: Instant,
}

/// Keyed by the numeric `upstream_accounts.id` the `/api/oauth/start`
/// handler pre-creates in the `pending` state: the session id handed back
/// to the caller doubles as that account id, so
/// `/api/oauth/status/{id}` and `/api/oauth/callback` both address it the
/// same way the REST CRUD endpoints address any other account.
pub struct OAuthSessionStore {
    entries: Mutex<HashMap<i64, Entry>>,
}

impl OAuthSessionStore {
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    pub async fn insert(&self, session: OAuthSession) {
        self.entries.lock().await.insert(
            session.account_id,
            Entry { session, started_at: Instant::now() },
        );
    }

    pub async fn get(&self, account_id: i64) -> Option<OAuthSession> {
        let mut entries = self.entries.lock().await;
        self.evict_if_expired(&mut entries, account_id);
        entries.get(&account_id).map(|e| e.session.clone())
    }

    pub async fn remove(&self, account_id: i64) -> Option<OAuthSession> {
        self.entries.lock().await.remove(&account_id).map(|e| e.session)
    }

    fn evict_if_expired(&self, entries: &mut HashMap<i64, Entry>, account_id: i64) {
        if entries.get(&account_id).is_some_and(|e| e.started_at.elapsed() > SESSION_LIFETIME) {
            entries.remove(&account_id);
        }
    }

    pub async fn sweep_expired(&self) {
        self.entries.lock().await.retain(|_, e| e.started_at.elapsed() <= SESSION_LIFETIME);
    }
}

impl Default for OAuthSessionStore {
    fn default() -> Self {
        Self::new()
    }
}
