//! `credentials` is a tagged sum type, not a loosely-typed blob. The
//! encrypted envelope stored in `upstream_accounts.credentials` is
//! `base64(nonce || AES-256-GCM(json))` of one of these two shapes.

use llmgate_crypto::{CryptoError, MasterKey};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "auth_method", rename_all = "snake_case")]
pub enum Credentials {
    ApiKey {
        key: String,
        base_url: Option<String>,
    },
    OAuth {
        access_token: String,
        refresh_token: Option<String>,
        expires_at: OffsetDateTime,
        scopes: Vec<String>,
    },
}

impl Credentials {
    pub fn encrypt(&self, key: &MasterKey) -> Result<String, CryptoError> {
        let json = serde_json::to_vec(self).map_err(|_| CryptoError::Encrypt)?;
        llmgate_crypto::encrypt(key, &json)
    }

    pub fn decrypt(key: &MasterKey, envelope: &str) -> Result<Self, CryptoError> {
        let plaintext = llmgate_crypto::decrypt(key, envelope)?;
        serde_json::from_slice(&plaintext).map_err(|_| CryptoError::Decrypt)
    }

    /// Refresh trigger: `expires_at - now < 60s`.
    pub fn needs_refresh(&self) -> bool {
        match self {
            Credentials::OAuth { expires_at, .. } => {
                *expires_at - llmgate_common::now() < time::Duration::seconds(60)
            }
            Credentials::ApiKey { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_credentials_roundtrip_through_encryption() {
        let key = MasterKey::generate();
        let creds = Credentials::ApiKey {
            key: "sk-test".to_string(),
            base_url: None,
        };
        let envelope = creds.encrypt(&key).unwrap();
        let decrypted = Credentials::decrypt(&key, &envelope).unwrap();
        match decrypted {
            Credentials::ApiKey { key, .. } => assert_eq!(key, "sk-test"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn oauth_credentials_close_to_expiry_need_refresh() {
        let creds = Credentials::OAuth {
            access_token: "a".into(),
            refresh_token: Some("r".into()),
            expires_at: llmgate_common::now() + time::Duration::seconds(30),
            scopes: vec![],
        };
        assert!(creds.needs_refresh());
    }

    #[test]
    fn oauth_credentials_far_from_expiry_do_not_need_refresh() {
        let creds = Credentials::OAuth {
            access_token: "a".into(),
            refresh_token: Some("r".into()),
            expires_at: llmgate_common::now() + time::Duration::minutes(30),
            scopes: vec![],
        };
        assert!(!creds.needs_refresh());
    }
}
