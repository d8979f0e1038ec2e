//! OAuth authorization flows and refresh coordination.

pub mod anthropic;
pub mod qwen;

use std::collections::HashMap;
use std::sync::Arc;

use llmgate_common::AccountId;
use tokio::sync::Mutex;

use crate::account_pool::AccountPool;
use crate::config::OAuthProviderUrls;
use crate::credentials::Credentials;
use crate::upstream_client::UpstreamClient;

/// Coordinates refresh calls so that concurrent requests against the same
/// near-expiry OAuth account issue exactly one upstream refresh: a
/// per-account mutex held only across the refresh call, not the whole
/// request.
pub struct OAuthManager {
    pool: Arc<AccountPool>,
    client: Arc<dyn UpstreamClient>,
    urls: OAuthProviderUrls,
    locks: Mutex<HashMap<AccountId, Arc<Mutex<()>>>>,
}

#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error("account not found")]
    NotFound,
    #[error("account does not use oauth credentials")]
    NotOAuth,
    #[error("unsupported provider for oauth refresh")]
    UnsupportedProvider,
    #[error("anthropic refresh failed: {0}")]
    Anthropic(#[from] anthropic::OAuthError),
}

impl OAuthManager {
    pub fn new(pool: Arc<AccountPool>, client: Arc<dyn UpstreamClient>, urls: OAuthProviderUrls) -> Self {
        Self {
            pool,
            client,
            urls,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, account_id: AccountId) -> Arc<Mutex<()>> {
        self.locks.lock().await.entry(account_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Ensures `account_id`'s stored credentials are fresh, refreshing at
    /// most once even under concurrent callers. Returns the decrypted,
    /// current credentials.
    pub async fn ensure_fresh(
        &self,
        account_id: AccountId,
        master_key: &llmgate_crypto::MasterKey,
    ) -> Result<Credentials, RefreshError> {
        let account = self.pool.get(account_id).await.ok_or(RefreshError::NotFound)?;
        let current = Credentials::decrypt(master_key, &account.credentials).map_err(|_| RefreshError::NotOAuth)?;
        if !current.needs_refresh() {
            return Ok(current);
        }

        let lock = self.lock_for(account_id).await;
        let _guard = lock.lock().await;

        // Re-read after acquiring the lock: another caller may have already
        // refreshed while we waited.
        let account = self.pool.get(account_id).await.ok_or(RefreshError::NotFound)?;
        let current = Credentials::decrypt(master_key, &account.credentials).map_err(|_| RefreshError::NotOAuth)?;
        if !current.needs_refresh() {
            return Ok(current);
        }

        let refresh_token = match &current {
            Credentials::OAuth { refresh_token: Some(token), .. } => token.clone(),
            Credentials::OAuth { refresh_token: None, .. } => return Err(RefreshError::NotOAuth),
            Credentials::ApiKey { .. } => return Err(RefreshError::NotOAuth),
        };

        let refreshed = match account.provider {
            llmgate_common::Provider::Anthropic => {
                anthropic::refresh(self.client.as_ref(), &self.urls, &refresh_token).await?
            }
            _ => return Err(RefreshError::UnsupportedProvider),
        };

        let new_credentials = Credentials::OAuth {
            access_token: refreshed.access_token,
            refresh_token: refreshed.refresh_token,
            expires_at: refreshed.expires_at,
            scopes: refreshed.scopes,
        };
        let envelope = new_credentials.encrypt(master_key).map_err(|_| RefreshError::NotOAuth)?;
        self.pool
            .update_credentials(account_id, envelope, account.state)
            .await;

        Ok(new_credentials)
    }

    /// A 401 from an upstream OAuth-authenticated call marks the account
    /// failed rather than retrying the refresh indefinitely.
    pub async fn handle_unauthorized(&self, account_id: AccountId) {
        self.pool.mark_failed(account_id, "oauth token rejected by upstream (401)").await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmgate_common::{AccountState, AuthMethod, Provider};
    use llmgate_storage::InMemoryRowStore;
    use std::time::Duration;

    fn sample_row(id: i64, expires_in_secs: i64, key: &llmgate_crypto::MasterKey) -> llmgate_storage::Row {
        let creds = Credentials::OAuth {
            access_token: "old".into(),
            refresh_token: Some("refresh-me".into()),
            expires_at: llmgate_common::now() + time::Duration::seconds(expires_in_secs),
            scopes: vec![],
        };
        let envelope = creds.encrypt(key).unwrap();
        let account = crate::account::Account {
            id,
            owner_id: 1,
            name: "a".into(),
            provider: Provider::Anthropic,
            auth_method: AuthMethod::OAuth,
            credentials: envelope,
            state: AccountState::Active,
            priority: 0,
            weight: 100,
            proxy_binding: None,
            request_count: 0,
            success_count: 0,
            error_count: 0,
            last_health_check: None,
            health_status: None,
            last_used_at: None,
            created_at: llmgate_common::now(),
            updated_at: llmgate_common::now(),
        };
        crate::account_pool::account_to_row(&account)
    }

    struct NeverCalled;
    #[async_trait::async_trait]
    impl UpstreamClient for NeverCalled {
        async fn send(
            &self,
            _req: crate::upstream_client::UpstreamRequest,
        ) -> Result<crate::upstream_client::UpstreamResponse, crate::upstream_client::UpstreamFailure> {
            panic!("should not be called for fresh credentials");
        }
    }

    #[tokio::test]
    async fn fresh_credentials_are_returned_without_refresh_call() {
        let key = llmgate_crypto::MasterKey::generate();
        let store: Arc<dyn llmgate_storage::RowStore> = Arc::new(InMemoryRowStore::new());
        store.create(crate::account_pool::TABLE, sample_row(1, 3600, &key)).await.unwrap();
        let pool = Arc::new(AccountPool::new(store, Duration::from_secs(60)));

        let manager = OAuthManager::new(pool, Arc::new(NeverCalled), OAuthProviderUrls::default());
        let result = manager.ensure_fresh(1, &key).await.unwrap();
        assert!(matches!(result, Credentials::OAuth { access_token, .. } if access_token == "old"));
    }
}
