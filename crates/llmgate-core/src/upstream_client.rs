//! Outbound HTTP, abstracted behind a narrow trait so the proxy engine
//! never depends on a concrete HTTP client crate. The concrete
//! implementation keeps a `wreq::Client` per distinct outbound proxy
//! binding, cached and reused.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use wreq::{Client, Proxy};

pub type Headers = Vec<(String, String)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    fn as_wreq(self) -> wreq::Method {
        match self {
            HttpMethod::Get => wreq::Method::GET,
            HttpMethod::Post => wreq::Method::POST,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
    pub is_stream: bool,
    /// Outbound proxy URL to route this call through. `None` uses the
    /// default (no-proxy) client.
    pub proxy_binding: Option<String>,
}

#[derive(Debug)]
pub enum UpstreamBody {
    Bytes(Bytes),
    Stream(mpsc::Receiver<Bytes>),
}

pub struct UpstreamResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: UpstreamBody,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Connect,
    Timeout,
    ReadTimeout,
    Dns,
    Tls,
    Other,
}

#[derive(Debug, Clone)]
pub enum UpstreamFailure {
    Transport { kind: TransportErrorKind, message: String },
    Http { status: u16, headers: Headers, body: Bytes },
}

#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn send(&self, req: UpstreamRequest) -> Result<UpstreamResponse, UpstreamFailure>;
}

#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    pub connect_timeout: Duration,
    pub unary_timeout: Duration,
    pub stream_idle_timeout: Duration,
}

pub struct WreqUpstreamClient {
    config: UpstreamClientConfig,
    clients: Mutex<HashMap<Option<String>, Client>>,
}

impl WreqUpstreamClient {
    pub fn new(config: UpstreamClientConfig) -> Result<Self, wreq::Error> {
        let default_client = build_client(&config, None)?;
        let mut clients = HashMap::new();
        clients.insert(None, default_client);
        Ok(Self {
            config,
            clients: Mutex::new(clients),
        })
    }

    fn client_for(&self, proxy_binding: Option<&str>) -> Result<Client, UpstreamFailure> {
        let key = proxy_binding.map(str::to_string);
        let mut guard = self.clients.lock().expect("upstream client cache poisoned");
        if let Some(client) = guard.get(&key) {
            return Ok(client.clone());
        }
        let client = build_client(&self.config, proxy_binding).map_err(map_wreq_error)?;
        guard.insert(key, client.clone());
        Ok(client)
    }
}

fn build_client(config: &UpstreamClientConfig, proxy: Option<&str>) -> Result<Client, wreq::Error> {
    let mut builder = Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.unary_timeout)
        .read_timeout(config.stream_idle_timeout);
    if let Some(proxy) = proxy {
        builder = builder.proxy(Proxy::all(proxy)?);
    }
    builder.build()
}

#[async_trait]
impl UpstreamClient for WreqUpstreamClient {
    async fn send(&self, req: UpstreamRequest) -> Result<UpstreamResponse, UpstreamFailure> {
        let client = self.client_for(req.proxy_binding.as_deref())?;
        let mut builder = client.request(req.method.as_wreq(), &req.url);
        for (name, value) in &req.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = req.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(map_wreq_error)?;
        convert_response(response, req.is_stream, self.config.stream_idle_timeout).await
    }
}

async fn convert_response(
    response: wreq::Response,
    want_stream: bool,
    stream_idle_timeout: Duration,
) -> Result<UpstreamResponse, UpstreamFailure> {
    let status = response.status().as_u16();
    let headers = headers_from_wreq(response.headers());

    if !want_stream {
        let body = response.bytes().await.map_err(map_wreq_error)?;
        return Ok(UpstreamResponse {
            status,
            headers,
            body: UpstreamBody::Bytes(body),
        });
    }

    // Streaming must never buffer more than one chunk in memory: a bounded
    // mpsc channel of depth 1 enforces that a producer chunk can't be read
    // ahead of the consumer.
    let (tx, rx) = mpsc::channel::<Bytes>(1);
    tokio::spawn(async move {
        let mut stream = response.bytes_stream();
        loop {
            let next = tokio::time::timeout(stream_idle_timeout, stream.next()).await;
            let Ok(Some(Ok(chunk))) = next else { break };
            if tx.send(chunk).await.is_err() {
                break;
            }
        }
    });

    Ok(UpstreamResponse {
        status,
        headers,
        body: UpstreamBody::Stream(rx),
    })
}

fn headers_from_wreq(map: &wreq::header::HeaderMap) -> Headers {
    map.iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect()
}

fn map_wreq_error(err: wreq::Error) -> UpstreamFailure {
    let message = err.to_string();
    let lowered = message.to_ascii_lowercase();
    let kind = if err.is_timeout() {
        if lowered.contains("read") || lowered.contains("idle") {
            TransportErrorKind::ReadTimeout
        } else {
            TransportErrorKind::Timeout
        }
    } else if err.is_connect() {
        if lowered.contains("dns") || lowered.contains("resolve") {
            TransportErrorKind::Dns
        } else if lowered.contains("tls") || lowered.contains("ssl") {
            TransportErrorKind::Tls
        } else {
            TransportErrorKind::Connect
        }
    } else if lowered.contains("tls") || lowered.contains("ssl") {
        TransportErrorKind::Tls
    } else {
        TransportErrorKind::Other
    };
    UpstreamFailure::Transport { kind, message }
}
