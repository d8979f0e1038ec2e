use std::time::Duration;

use llmgate_common::BalanceStrategy;
use llmgate_crypto::MasterKey;
use serde::{Deserialize, Serialize};

/// Process-wide configuration: listen address, worker-pool size,
/// per-phase timeouts, health-probe interval and concurrency, snapshot
/// TTL, default load-balance strategy, OAuth client id/URLs per provider,
/// encryption master key (≥32 bytes), JWT secret (≥32 bytes, for admin
/// auth), and the outbound proxy list.
#[derive(Clone)]
pub struct GatewayConfig {
    pub listen_addr: String,
    pub worker_pool_size: usize,

    pub connect_timeout: Duration,
    pub unary_timeout: Duration,
    pub stream_idle_timeout: Duration,
    pub probe_timeout: Duration,
    pub oauth_exchange_timeout: Duration,
    pub token_refresh_timeout: Duration,

    pub health_probe_interval: Duration,
    pub health_probe_concurrency: usize,
    pub snapshot_ttl: Duration,

    pub default_strategy: BalanceStrategy,
    pub min_health_score: f64,

    pub oauth: OAuthProviderUrls,

    pub encryption_master_key: MasterKey,
    pub jwt_secret: Vec<u8>,
    pub outbound_proxies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthProviderUrls {
    pub anthropic_client_id: String,
    pub anthropic_authorize_url: String,
    pub anthropic_token_url: String,
    pub anthropic_redirect_uri: String,
    pub qwen_client_id: String,
    pub qwen_device_code_url: String,
    pub qwen_token_url: String,
}

impl Default for OAuthProviderUrls {
    fn default() -> Self {
        Self {
            anthropic_client_id: "9d1c250a-e61b-44d9-88ed-5944d1962f5e".to_string(),
            anthropic_authorize_url: "https://claude.ai/oauth/authorize".to_string(),
            anthropic_token_url: "https://console.anthropic.com/v1/oauth/token".to_string(),
            anthropic_redirect_uri: "https://console.anthropic.com/oauth/code/callback"
                .to_string(),
            qwen_client_id: "f0304373b74a44d2b584a3fb70ca9e56".to_string(),
            qwen_device_code_url: "https://chat.qwen.ai/api/v1/oauth2/device/code".to_string(),
            qwen_token_url: "https://chat.qwen.ai/api/v1/oauth2/token".to_string(),
        }
    }
}

impl GatewayConfig {
    /// The JWT secret used for admin auth must be at least 32 bytes. A
    /// fatal config error here is exit code `1`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.len() < 32 {
            return Err(ConfigError::JwtSecretTooShort(self.jwt_secret.len()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("jwt secret must be at least 32 bytes, got {0}")]
    JwtSecretTooShort(usize),
    #[error("missing required config field: {0}")]
    MissingField(&'static str),
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            worker_pool_size: 256,
            connect_timeout: Duration::from_secs(10),
            unary_timeout: Duration::from_secs(60),
            stream_idle_timeout: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(10),
            oauth_exchange_timeout: Duration::from_secs(30),
            token_refresh_timeout: Duration::from_secs(15),
            health_probe_interval: Duration::from_secs(5 * 60),
            health_probe_concurrency: 5,
            snapshot_ttl: Duration::from_secs(60),
            default_strategy: BalanceStrategy::Adaptive,
            min_health_score: 0.5,
            oauth: OAuthProviderUrls::default(),
            encryption_master_key: MasterKey::generate(),
            jwt_secret: vec![0u8; 32],
            outbound_proxies: Vec::new(),
        }
    }
}
