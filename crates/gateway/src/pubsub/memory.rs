//! In-process broker for tests and local development
//!
//! Fans published payloads out to every handler subscribed to a channel,
//! synchronously and in registration order. Two gateway stacks sharing one
//! `MemoryBroker` behave like two processes sharing a real broker, which is
//! how the integration tests simulate a cluster.

use super::{MessageHandler, PubSubChannel};
use async_trait::async_trait;
use dashmap::DashMap;
use socket_gateway_core::error::GatewayError;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct MemoryBroker {
    topics: Arc<DashMap<String, Vec<MessageHandler>>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handlers subscribed to a channel.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.topics.get(channel).map(|h| h.len()).unwrap_or(0)
    }
}

#[async_trait]
impl PubSubChannel for MemoryBroker {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), GatewayError> {
        // Clone the handler list so a handler that subscribes re-entrantly
        // cannot deadlock against the map guard.
        let handlers: Vec<MessageHandler> = self
            .topics
            .get(channel)
            .map(|h| h.clone())
            .unwrap_or_default();

        for handler in handlers {
            handler(&payload);
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
        handler: MessageHandler,
    ) -> Result<(), GatewayError> {
        self.topics
            .entry(channel.to_string())
            .or_default()
            .push(handler);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers_of_channel() {
        let broker = MemoryBroker::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let hits = hits.clone();
            broker
                .subscribe("ch1", Arc::new(move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                }))
                .await
                .unwrap();
        }

        let other_hits = Arc::new(AtomicUsize::new(0));
        {
            let other_hits = other_hits.clone();
            broker
                .subscribe("ch2", Arc::new(move |_| {
                    other_hits.fetch_add(1, Ordering::SeqCst);
                }))
                .await
                .unwrap();
        }

        broker.publish("ch1", b"payload".to_vec()).await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(other_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let broker = MemoryBroker::new();
        assert!(broker.publish("nobody", vec![1, 2, 3]).await.is_ok());
    }

    #[tokio::test]
    async fn test_clones_share_topics() {
        let broker = MemoryBroker::new();
        let clone = broker.clone();
        let hits = Arc::new(AtomicUsize::new(0));

        {
            let hits = hits.clone();
            broker
                .subscribe("shared", Arc::new(move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                }))
                .await
                .unwrap();
        }

        clone.publish("shared", vec![]).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(clone.subscriber_count("shared"), 1);
    }
}
