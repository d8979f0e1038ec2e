//! Inbound bearer-token authentication against `api_keys.key_hash`: the
//! token is hashed on every request and looked up, never stored in
//! plaintext.

use http::HeaderMap;
use llmgate_common::now;
use llmgate_storage::{Filter, RowStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    Missing,
    Unknown,
    Disabled,
    Expired,
}

#[derive(Debug, Clone)]
pub struct AuthenticatedKey {
    pub api_key_id: i64,
    pub owner_id: i64,
}

/// Extracts the bearer token, hashes it, and looks it up by `key_hash`.
/// Missing/unknown → [`AuthError::Missing`]/[`AuthError::Unknown`] (`401`
/// on the inbound edge); disabled/expired → [`AuthError::Disabled`]/
/// [`AuthError::Expired`] (`403`).
pub async fn authenticate(store: &dyn RowStore, headers: &HeaderMap) -> Result<AuthenticatedKey, AuthError> {
    let token = extract_bearer_token(headers).ok_or(AuthError::Missing)?;
    let key_hash = llmgate_crypto::hash_api_key(&token);

    let row = store
        .find_one("api_keys", &Filter::new().eq("key_hash", key_hash))
        .await
        .map_err(|_| AuthError::Unknown)?
        .ok_or(AuthError::Unknown)?;

    let is_active = row.get("is_active").and_then(|v| v.as_bool()).unwrap_or(false);
    if !is_active {
        return Err(AuthError::Disabled);
    }
    if let Some(expires_at) = row
        .get("expires_at")
        .and_then(|v| serde_json::from_value::<Option<time::OffsetDateTime>>(v.clone()).ok())
        .flatten()
        && expires_at <= now()
    {
        return Err(AuthError::Expired);
    }

    let api_key_id = row.get("id").and_then(|v| v.as_i64()).ok_or(AuthError::Unknown)?;
    let owner_id = row.get("owner_id").and_then(|v| v.as_i64()).ok_or(AuthError::Unknown)?;
    Ok(AuthenticatedKey { api_key_id, owner_id })
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(http::header::AUTHORIZATION)?.to_str().ok()?.trim();
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(|token| token.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmgate_storage::InMemoryRowStore;

    fn headers_with_bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::AUTHORIZATION,
            format!("Bearer {token}").parse().unwrap(),
        );
        headers
    }

    #[tokio::test]
    async fn missing_header_is_rejected() {
        let store = InMemoryRowStore::new();
        let result = authenticate(&store, &HeaderMap::new()).await;
        assert_eq!(result.unwrap_err(), AuthError::Missing);
    }

    #[tokio::test]
    async fn unknown_key_is_rejected() {
        let store = InMemoryRowStore::new();
        let result = authenticate(&store, &headers_with_bearer("lg-nope")).await;
        assert_eq!(result.unwrap_err(), AuthError::Unknown);
    }

    #[tokio::test]
    async fn active_key_authenticates() {
        let store = InMemoryRowStore::new();
        let secret = "lg-abc123";
        let mut row = llmgate_storage::Row::new();
        row.insert("owner_id".into(), serde_json::json!(9));
        row.insert("key_hash".into(), serde_json::json!(llmgate_crypto::hash_api_key(secret)));
        row.insert("is_active".into(), serde_json::json!(true));
        row.insert("expires_at".into(), serde_json::json!(None::<time::OffsetDateTime>));
        store.create("api_keys", row).await.unwrap();

        let authenticated = authenticate(&store, &headers_with_bearer(secret)).await.unwrap();
        assert_eq!(authenticated.owner_id, 9);
    }

    #[tokio::test]
    async fn disabled_key_is_rejected() {
        let store = InMemoryRowStore::new();
        let secret = "lg-disabled";
        let mut row = llmgate_storage::Row::new();
        row.insert("owner_id".into(), serde_json::json!(1));
        row.insert("key_hash".into(), serde_json::json!(llmgate_crypto::hash_api_key(secret)));
        row.insert("is_active".into(), serde_json::json!(false));
        store.create("api_keys", row).await.unwrap();

        let result = authenticate(&store, &headers_with_bearer(secret)).await;
        assert_eq!(result.unwrap_err(), AuthError::Disabled);
    }
}
