//! Anthropic authorization-code + PKCE flow: same token endpoint shape,
//! same CLI-mimicking headers, same urlencoded-form POST, against this
//! workspace's `UpstreamClient` trait instead of a raw `wreq::Client`.

use bytes::Bytes;
use llmgate_crypto::PkceParams;
use serde::Deserialize;
use time::OffsetDateTime;

use crate::config::OAuthProviderUrls;
use crate::upstream_client::{HttpMethod, UpstreamBody, UpstreamClient, UpstreamFailure, UpstreamRequest};

pub const SCOPE: &str = "org:create_api_key user:profile user:inference";

#[derive(Debug, Clone)]
pub struct OAuthStartParams {
    pub auth_url: String,
    pub state: String,
    pub code_verifier: String,
    pub code_challenge: String,
}

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("invalid authorization code")]
    BadCode,
    #[error("token exchange failed: {0}")]
    Exchange(String),
}

#[derive(Debug, Clone)]
pub struct ExchangedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: OffsetDateTime,
    pub scopes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    scope: Option<String>,
}

/// Builds the PKCE params and the authorize-URL a caller should redirect to.
pub fn generate_oauth_params(urls: &OAuthProviderUrls) -> OAuthStartParams {
    let PkceParams {
        code_verifier,
        code_challenge,
        state,
    } = PkceParams::generate();
    let auth_url = build_authorize_url(urls, &code_challenge, &state);
    OAuthStartParams {
        auth_url,
        state,
        code_verifier,
        code_challenge,
    }
}

fn build_authorize_url(urls: &OAuthProviderUrls, code_challenge: &str, state: &str) -> String {
    format!(
        "{base}?code=true&client_id={client_id}&response_type=code&redirect_uri={redirect_uri}&scope={scope}&code_challenge={code_challenge}&code_challenge_method=S256&state={state}",
        base = urls.anthropic_authorize_url,
        client_id = urls.anthropic_client_id,
        redirect_uri = urlencoding::encode(&urls.anthropic_redirect_uri),
        scope = urlencoding::encode(SCOPE),
    )
}

/// Accepts either a full redirect URL or a raw code. Raw codes must match
/// `^[A-Za-z0-9_-]+$` and be at least 10 chars.
pub fn parse_callback(input: &str) -> Result<String, OAuthError> {
    let candidate = if let Some(query_start) = input.find('?') {
        let query = &input[query_start + 1..];
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix("code="))
            .map(|code| urlencoding::decode(code).map(|c| c.into_owned()).unwrap_or_default())
            .ok_or(OAuthError::BadCode)?
    } else {
        input.trim().to_string()
    };

    let code = candidate.split(['#', '&']).next().unwrap_or(&candidate).to_string();
    let valid = code.len() >= 10 && code.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(OAuthError::BadCode);
    }
    Ok(code)
}

/// Exchanges an authorization code for tokens. POSTs to the token endpoint
/// with headers mimicking the official CLI.
pub async fn exchange(
    client: &dyn UpstreamClient,
    urls: &OAuthProviderUrls,
    authorization_code: &str,
    code_verifier: &str,
    state: &str,
) -> Result<ExchangedTokens, OAuthError> {
    let body = serde_json::json!({
        "grant_type": "authorization_code",
        "client_id": urls.anthropic_client_id,
        "code": authorization_code,
        "state": state,
        "redirect_uri": urls.anthropic_redirect_uri,
        "code_verifier": code_verifier,
    });
    let request = UpstreamRequest {
        method: HttpMethod::Post,
        url: urls.anthropic_token_url.clone(),
        headers: vec![
            ("content-type".to_string(), "application/json".to_string()),
            (
                "user-agent".to_string(),
                "claude-cli/1.0 (external, cli)".to_string(),
            ),
            ("origin".to_string(), "https://claude.ai".to_string()),
            ("referer".to_string(), "https://claude.ai/".to_string()),
        ],
        body: Some(Bytes::from(serde_json::to_vec(&body).map_err(|e| OAuthError::Exchange(e.to_string()))?)),
        is_stream: false,
        proxy_binding: None,
    };

    let response = client.send(request).await.map_err(|err| OAuthError::Exchange(describe(err)))?;
    let bytes = match response.body {
        UpstreamBody::Bytes(bytes) => bytes,
        UpstreamBody::Stream(_) => return Err(OAuthError::Exchange("unexpected streaming token response".into())),
    };
    if !(200..300).contains(&response.status) {
        return Err(OAuthError::Exchange(format!(
            "token endpoint returned {}",
            response.status
        )));
    }

    let parsed: TokenResponse = serde_json::from_slice(&bytes).map_err(|e| OAuthError::Exchange(e.to_string()))?;
    let expires_at = llmgate_common::now() + time::Duration::seconds(parsed.expires_in.unwrap_or(3600));
    let scopes = parsed
        .scope
        .unwrap_or_else(|| SCOPE.to_string())
        .split_whitespace()
        .map(str::to_string)
        .collect();

    Ok(ExchangedTokens {
        access_token: parsed.access_token,
        refresh_token: parsed.refresh_token,
        expires_at,
        scopes,
    })
}

/// Refresh using a stored `refresh_token`; shares the exchange endpoint
/// with a different grant type.
pub async fn refresh(
    client: &dyn UpstreamClient,
    urls: &OAuthProviderUrls,
    refresh_token: &str,
) -> Result<ExchangedTokens, OAuthError> {
    let body = serde_json::json!({
        "grant_type": "refresh_token",
        "client_id": urls.anthropic_client_id,
        "refresh_token": refresh_token,
    });
    let request = UpstreamRequest {
        method: HttpMethod::Post,
        url: urls.anthropic_token_url.clone(),
        headers: vec![("content-type".to_string(), "application/json".to_string())],
        body: Some(Bytes::from(serde_json::to_vec(&body).map_err(|e| OAuthError::Exchange(e.to_string()))?)),
        is_stream: false,
        proxy_binding: None,
    };
    let response = client.send(request).await.map_err(|err| OAuthError::Exchange(describe(err)))?;
    let bytes = match response.body {
        UpstreamBody::Bytes(bytes) => bytes,
        UpstreamBody::Stream(_) => return Err(OAuthError::Exchange("unexpected streaming token response".into())),
    };
    if !(200..300).contains(&response.status) {
        return Err(OAuthError::Exchange(format!(
            "token endpoint returned {}",
            response.status
        )));
    }
    let parsed: TokenResponse = serde_json::from_slice(&bytes).map_err(|e| OAuthError::Exchange(e.to_string()))?;
    let expires_at = llmgate_common::now() + time::Duration::seconds(parsed.expires_in.unwrap_or(3600));
    let scopes = parsed
        .scope
        .unwrap_or_else(|| SCOPE.to_string())
        .split_whitespace()
        .map(str::to_string)
        .collect();
    Ok(ExchangedTokens {
        access_token: parsed.access_token,
        refresh_token: parsed.refresh_token.or_else(|| Some(refresh_token.to_string())),
        expires_at,
        scopes,
    })
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
    fn parse_callback_extracts_code_from_full_url() {
        let code = parse_callback("https://console.anthropic.com/oauth/code/callback?code=abcdef0123&state=xyz").unwrap();
        assert_eq!(code, "abcdef0123");
    }

    #[test]
    fn parse_callback_accepts_raw_code() {
        let code = parse_callback("abcdef0123").unwrap();
        assert_eq!(code, "abcdef0123");
    }

    #[test]
    fn parse_callback_rejects_short_codes() {
        assert!(parse_callback("short").is_err());
    }

    #[test]
    fn parse_callback_rejects_invalid_characters() {
        assert!(parse_callback("abc def!!0123").is_err());
    }

    #[test]
    fn auth_url_contains_pkce_and_state() {
        let urls = OAuthProviderUrls::default();
        let params = generate_oauth_params(&urls);
        assert!(params.auth_url.contains("code_challenge="));
        assert!(params.auth_url.contains(&params.state));
        assert_eq!(PkceParams::challenge_for(&params.code_verifier), params.code_challenge);
    }
}
