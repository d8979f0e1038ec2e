//! Qwen device-code flow: follows the request/response shape and error
//! handling idiom of [`super::anthropic`] against Qwen's own endpoints.

use bytes::Bytes;
use serde::Deserialize;
use time::OffsetDateTime;

use crate::config::OAuthProviderUrls;
use crate::upstream_client::{HttpMethod, UpstreamBody, UpstreamClient, UpstreamFailure, UpstreamRequest};

#[derive(Debug, thiserror::Error)]
pub enum DeviceCodeError {
    #[error("device code request failed: {0}")]
    Start(String),
    #[error("device code poll failed: {0}")]
    Poll(String),
}

#[derive(Debug, Clone)]
pub struct DeviceCodeSession {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in_secs: i64,
    pub interval_secs: i64,
    pub started_at: OffsetDateTime,
}

impl DeviceCodeSession {
    pub fn expired(&self) -> bool {
        llmgate_common::now() - self.started_at > time::Duration::seconds(self.expires_in_secs)
    }
}

#[derive(Debug)]
pub enum PollOutcome {
    Pending,
    Authorized { access_token: String, refresh_token: Option<String>, expires_at: OffsetDateTime },
    Expired,
    Denied,
}

#[derive(Debug, Deserialize)]
struct StartResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    expires_in: i64,
    interval: i64,
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    status: String,
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

pub async fn start(client: &dyn UpstreamClient, urls: &OAuthProviderUrls) -> Result<DeviceCodeSession, DeviceCodeError> {
    let body = serde_json::json!({ "client_id": urls.qwen_client_id, "scope": "openid profile email model.completion" });
    let request = UpstreamRequest {
        method: HttpMethod::Post,
        url: urls.qwen_device_code_url.clone(),
        headers: vec![("content-type".to_string(), "application/json".to_string())],
        body: Some(Bytes::from(serde_json::to_vec(&body).map_err(|e| DeviceCodeError::Start(e.to_string()))?)),
        is_stream: false,
        proxy_binding: None,
    };
    let response = client.send(request).await.map_err(|err| DeviceCodeError::Start(describe(err)))?;
    let bytes = bytes_of(response.body).ok_or_else(|| DeviceCodeError::Start("unexpected streaming response".into()))?;
    if !(200..300).contains(&response.status) {
        return Err(DeviceCodeError::Start(format!("device code endpoint returned {}", response.status)));
    }
    let parsed: StartResponse = serde_json::from_slice(&bytes).map_err(|e| DeviceCodeError::Start(e.to_string()))?;
    Ok(DeviceCodeSession {
        device_code: parsed.device_code,
        user_code: parsed.user_code,
        verification_uri: parsed.verification_uri,
        expires_in_secs: parsed.expires_in,
        interval_secs: parsed.interval,
        started_at: llmgate_common::now(),
    })
}

/// A single poll of the status endpoint. The proxy engine/management API is
/// expected to call this on `interval_secs` cadence until `authorized` or
/// the session's `expired()`.
pub async fn poll(
    client: &dyn UpstreamClient,
    urls: &OAuthProviderUrls,
    session: &DeviceCodeSession,
) -> Result<PollOutcome, DeviceCodeError> {
    if session.expired() {
        return Ok(PollOutcome::Expired);
    }
    let body = serde_json::json!({
        "client_id": urls.qwen_client_id,
        "device_code": session.device_code,
        "grant_type": "urn:ietf:params:oauth:grant-type:device_code",
    });
    let request = UpstreamRequest {
        method: HttpMethod::Post,
        url: urls.qwen_token_url.clone(),
        headers: vec![("content-type".to_string(), "application/json".to_string())],
        body: Some(Bytes::from(serde_json::to_vec(&body).map_err(|e| DeviceCodeError::Poll(e.to_string()))?)),
        is_stream: false,
        proxy_binding: None,
    };
    let response = client.send(request).await.map_err(|err| DeviceCodeError::Poll(describe(err)))?;
    let bytes = bytes_of(response.body).ok_or_else(|| DeviceCodeError::Poll("unexpected streaming response".into()))?;
    let parsed: PollResponse = serde_json::from_slice(&bytes).map_err(|e| DeviceCodeError::Poll(e.to_string()))?;

    match parsed.status.as_str() {
        "authorized" => {
            let access_token = parsed.access_token.ok_or_else(|| DeviceCodeError::Poll("missing access_token".into()))?;
            let expires_at = llmgate_common::now() + time::Duration::seconds(parsed.expires_in.unwrap_or(3600));
            Ok(PollOutcome::Authorized {
                access_token,
                refresh_token: parsed.refresh_token,
                expires_at,
            })
        }
        "denied" => Ok(PollOutcome::Denied),
        "expired" => Ok(PollOutcome::Expired),
        _ => Ok(PollOutcome::Pending),
    }
}

fn bytes_of(body: UpstreamBody) -> Option<Bytes> {
    match body {
        UpstreamBody::Bytes(bytes) => Some(bytes),
        UpstreamBody::Stream(_) => None,
    }
}

fn describe(failure: UpstreamFailure) -> String {
    match failure {
        UpstreamFailure::Transport { message, .. } => message,
        UpstreamFailure::Http { status, .. } => format!("http {status}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_reports_expired_past_its_window() {
        let session = DeviceCodeSession {
            device_code: "d".into(),
            user_code: "u".into(),
            verification_uri: "https://example".into(),
            expires_in_secs: 1,
            interval_secs: 5,
            started_at: llmgate_common::now() - time::Duration::seconds(10),
        };
        assert!(session.expired());
    }
}
