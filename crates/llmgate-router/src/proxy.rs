//! Inbound passthrough surface: the four provider-protocol endpoints plus
//! `GET /health`. Pure passthrough — this gateway performs no
//! cross-protocol body translation: every route hands its raw body
//! straight to [`ProxyEngine::handle`], which does the only rewrite this
//! system makes (the `model` field).

use std::convert::Infallible;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::StreamExt;
use llmgate_common::AccountState;
use llmgate_core::error::GatewayError;
use llmgate_core::proxy_engine::{InboundRequest, OutboundResponse};
use llmgate_core::upstream_client::UpstreamBody;
use tokio_stream::wrappers::ReceiverStream;

use crate::GatewayState;

/// How long an inbound request waits for a free worker-pool permit before
/// getting a 503. "Block briefly" rather than fail immediately, so a brief
/// burst over `worker_pool_size` absorbs without rejecting.
const QUEUE_WAIT: Duration = Duration::from_millis(50);

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/v1/messages", post(passthrough))
        .route("/v1/chat/completions", post(passthrough))
        .route("/v1beta/models/{*rest}", post(passthrough))
        .route("/compatible-mode/v1/chat/completions", post(passthrough))
        .route("/health", get(health))
        .with_state(state)
}

async fn passthrough(State(state): State<GatewayState>, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    let _permit = match tokio::time::timeout(QUEUE_WAIT, state.concurrency_limiter.acquire()).await {
        Ok(Ok(permit)) => permit,
        _ => return worker_pool_exhausted_response(),
    };

    let request = InboundRequest { path: uri.path().to_string(), headers, body };
    match state.engine.handle(request).await {
        Ok(response) => to_axum_response(response),
        Err(err) => gateway_error_response(err),
    }
}

fn worker_pool_exhausted_response() -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, "worker pool exhausted, retry shortly").into_response()
}

fn to_axum_response(resp: OutboundResponse) -> Response {
    let mut builder = Response::builder().status(resp.status);
    if let Some(headers) = builder.headers_mut() {
        for (name, value) in resp.headers {
            if is_hop_by_hop_or_framing_header(&name) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(&value)) {
                headers.append(name, value);
            }
        }
    }

    let body = match resp.body {
        UpstreamBody::Bytes(bytes) => Body::from(bytes),
        UpstreamBody::Stream(rx) => {
            let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
            Body::from_stream(stream)
        }
    };

    builder.body(body).unwrap_or_else(|_| (StatusCode::INTERNAL_SERVER_ERROR, "response_build_failed").into_response())
}

fn gateway_error_response(err: GatewayError) -> Response {
    let mut response = Response::builder().status(err.status);
    if let Some(retry_after) = err.retry_after_secs
        && let Some(headers) = response.headers_mut()
    {
        headers.insert("retry-after", HeaderValue::from(retry_after));
    }
    response
        .body(Body::from(err.body))
        .unwrap_or_else(|_| (StatusCode::INTERNAL_SERVER_ERROR, "response_build_failed").into_response())
}

fn is_hop_by_hop_or_framing_header(name: &str) -> bool {
    name.eq_ignore_ascii_case("content-length")
        || name.eq_ignore_ascii_case("transfer-encoding")
        || name.eq_ignore_ascii_case("connection")
        || name.eq_ignore_ascii_case("keep-alive")
        || name.eq_ignore_ascii_case("proxy-authenticate")
        || name.eq_ignore_ascii_case("proxy-authorization")
        || name.eq_ignore_ascii_case("te")
        || name.eq_ignore_ascii_case("trailer")
        || name.eq_ignore_ascii_case("upgrade")
}

/// `{status: "healthy"|"degraded"|"unhealthy"}`. Healthy when no
/// account anywhere is in `error`; unhealthy when accounts are registered
/// but none are `active`; degraded otherwise.
async fn health(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    let total = state.store.count(llmgate_core::account_pool::TABLE, &llmgate_storage::Filter::new()).await.unwrap_or(0);
    let active = state.pool.all_in_states(&[AccountState::Active]).await.len();
    let errored = state.pool.all_in_states(&[AccountState::Error]).await.len();

    let status = if total == 0 || errored == 0 {
        "healthy"
    } else if active == 0 {
        "unhealthy"
    } else {
        "degraded"
    };
    Json(serde_json::json!({ "status": status }))
}
