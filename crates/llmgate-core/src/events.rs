//! Ambient observability bus: a broadcast channel for live subscribers
//! (e.g. a dashboard websocket) plus a list of best-effort sinks. The
//! default sink goes through `tracing`, since this workspace's ambient
//! stack is tracing-first.

use std::sync::Arc;

use async_trait::async_trait;
use llmgate_common::{AccountId, Provider};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::{broadcast, RwLock};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GatewayEvent {
    AccountRecovered {
        at: OffsetDateTime,
        account_id: AccountId,
        provider: Provider,
    },
    AccountFailed {
        at: OffsetDateTime,
        account_id: AccountId,
        provider: Provider,
        reason: String,
    },
    OAuthStarted {
        at: OffsetDateTime,
        account_id: AccountId,
        provider: Provider,
    },
    OAuthCompleted {
        at: OffsetDateTime,
        account_id: AccountId,
        provider: Provider,
    },
    OAuthFailed {
        at: OffsetDateTime,
        account_id: AccountId,
        provider: Provider,
        reason: String,
    },
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn write(&self, event: &GatewayEvent);
}

/// Logs every event at `info` (failures at `warn`) through `tracing`.
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn write(&self, event: &GatewayEvent) {
        match event {
            GatewayEvent::AccountFailed { account_id, provider, reason, .. } => {
                tracing::warn!(account_id, %provider, reason, "account marked failed");
            }
            GatewayEvent::OAuthFailed { account_id, provider, reason, .. } => {
                tracing::warn!(account_id, %provider, reason, "oauth flow failed");
            }
            GatewayEvent::AccountRecovered { account_id, provider, .. } => {
                tracing::info!(account_id, %provider, "account recovered");
            }
            GatewayEvent::OAuthStarted { account_id, provider, .. } => {
                tracing::info!(account_id, %provider, "oauth flow started");
            }
            GatewayEvent::OAuthCompleted { account_id, provider, .. } => {
                tracing::info!(account_id, %provider, "oauth flow completed");
            }
        }
    }
}

#[derive(Clone)]
pub struct EventHub {
    inner: Arc<Inner>,
}

struct Inner {
    tx: broadcast::Sender<GatewayEvent>,
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl EventHub {
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer);
        Self {
            inner: Arc::new(Inner {
                tx,
                sinks: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.tx.subscribe()
    }

    pub async fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.inner.sinks.write().await.push(sink);
    }

    pub async fn emit(&self, event: GatewayEvent) {
        let _ = self.inner.tx.send(event.clone());
        let sinks = self.inner.sinks.read().await.clone();
        for sink in sinks {
            let event = event.clone();
            tokio::spawn(async move { sink.write(&event).await });
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let hub = EventHub::default();
        let mut rx = hub.subscribe();
        hub.emit(GatewayEvent::AccountRecovered {
            at: llmgate_common::now(),
            account_id: 1,
            provider: Provider::Anthropic,
        })
        .await;
        let received = rx.recv().await.unwrap();
        assert!(matches!(received, GatewayEvent::AccountRecovered { account_id: 1, .. }));
    }
}
