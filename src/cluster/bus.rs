//! Publish/subscribe port and in-process adapters.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("failed to publish to `{topic}`: {reason}")]
    Publish { topic: String, reason: String },

    #[error("failed to subscribe to `{topic}`: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Topic-based event bus shared by gateway instances.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BusError>;

    /// Stream of payloads published to `topic` after this call.
    async fn subscribe(&self, topic: &str) -> Result<BoxStream<'static, String>, BusError>;
}

/// In-process bus: one broadcast channel per topic. Clones share the channels.
#[derive(Debug, Clone)]
pub struct LocalBus {
    topics: Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>,
    capacity: usize,
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<String> {
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

#[async_trait]
impl EventBus for LocalBus {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BusError> {
        // No subscribers is not an error.
        let receivers = self.sender(topic).send(payload).unwrap_or(0);
        tracing::trace!(topic = %topic, receivers, "Event published");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<BoxStream<'static, String>, BusError> {
        let rx = self.sender(topic).subscribe();
        let topic = topic.to_string();
        let stream = stream::unfold(rx, move |mut rx| {
            let topic = topic.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(payload) => return Some((payload, rx)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(topic = %topic, skipped, "Subscriber lagged; events dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });
        Ok(stream.boxed())
    }
}

/// Bus for a gateway running without cluster sync.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBus;

#[async_trait]
impl EventBus for NoopBus {
    async fn publish(&self, _topic: &str, _payload: String) -> Result<(), BusError> {
        Ok(())
    }

    async fn subscribe(&self, _topic: &str) -> Result<BoxStream<'static, String>, BusError> {
        Ok(stream::empty().boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_payloads() {
        let bus = LocalBus::default();
        let mut a = bus.subscribe("t").await.unwrap();
        let mut b = bus.clone().subscribe("t").await.unwrap();
        let mut other = bus.subscribe("u").await.unwrap();

        bus.publish("t", "hello".into()).await.unwrap();

        assert_eq!(a.next().await.as_deref(), Some("hello"));
        assert_eq!(b.next().await.as_deref(), Some("hello"));
        let nothing =
            tokio::time::timeout(std::time::Duration::from_millis(20), other.next()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let bus = LocalBus::default();
        assert!(bus.publish("nobody", "x".into()).await.is_ok());
    }

    #[tokio::test]
    async fn noop_bus_stream_ends() {
        let bus = NoopBus;
        bus.publish("t", "x".into()).await.unwrap();
        let mut stream = bus.subscribe("t").await.unwrap();
        assert!(stream.next().await.is_none());
    }
}
