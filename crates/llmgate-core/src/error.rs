//! Typed error kinds and their HTTP surfacing: a `GatewayErrorKind`
//! taxonomy so the proxy engine can branch on failure cause while still
//! converting to the same `{status, body}` pair at the edge.

use bytes::Bytes;
use http::StatusCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorKind {
    AuthInvalid,
    AuthExpired,
    NoUpstream,
    UpstreamTransport,
    UpstreamStatus(u16),
    UpstreamAuth,
    Canceled,
    Internal,
    OAuthBadCode,
}

#[derive(Debug)]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
    pub status: StatusCode,
    pub body: Bytes,
    pub retry_after_secs: Option<u64>,
}

impl GatewayError {
    pub fn new(kind: GatewayErrorKind, message: impl Into<Bytes>) -> Self {
        let (status, retry_after_secs) = match kind {
            GatewayErrorKind::AuthInvalid => (StatusCode::UNAUTHORIZED, None),
            GatewayErrorKind::AuthExpired => (StatusCode::FORBIDDEN, None),
            GatewayErrorKind::NoUpstream => (StatusCode::SERVICE_UNAVAILABLE, Some(5)),
            GatewayErrorKind::UpstreamTransport => (StatusCode::BAD_GATEWAY, None),
            GatewayErrorKind::UpstreamStatus(code) => {
                (StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_GATEWAY), None)
            }
            GatewayErrorKind::UpstreamAuth => (StatusCode::BAD_GATEWAY, None),
            GatewayErrorKind::Canceled => (StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST), None),
            GatewayErrorKind::Internal => (StatusCode::INTERNAL_SERVER_ERROR, None),
            GatewayErrorKind::OAuthBadCode => (StatusCode::BAD_REQUEST, None),
        };
        Self {
            kind,
            status,
            body: message.into(),
            retry_after_secs,
        }
    }

    pub fn no_upstream() -> Self {
        Self::new(GatewayErrorKind::NoUpstream, "no healthy upstream account available")
    }

    pub fn internal(message: impl Into<Bytes>) -> Self {
        Self::new(GatewayErrorKind::Internal, message)
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, String::from_utf8_lossy(&self.body))
    }
}

impl std::error::Error for GatewayError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_upstream_is_503_with_retry_after() {
        let err = GatewayError::no_upstream();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.retry_after_secs, Some(5));
    }

    #[test]
    fn auth_invalid_is_401_and_auth_expired_is_403() {
        assert_eq!(
            GatewayError::new(GatewayErrorKind::AuthInvalid, "").status,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::new(GatewayErrorKind::AuthExpired, "").status,
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn upstream_status_mirrors_provider_status() {
        let err = GatewayError::new(GatewayErrorKind::UpstreamStatus(429), "");
        assert_eq!(err.status.as_u16(), 429);
    }
}
