//! Redis-backed pub/sub broker
//!
//! Owns the process's two broker connections: a multiplexed connection used
//! only for PUBLISH, and a dedicated subscriber connection driven by a
//! background task. The subscriber task re-establishes its connection with
//! exponential backoff and replays every registered channel subscription
//! after a reconnect; while it is down the gateway keeps serving local-only
//! delivery.

use super::{BrokerStats, MessageHandler, PubSubChannel};
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use socket_gateway_core::config::RedisConfig;
use socket_gateway_core::error::GatewayError;
use socket_gateway_core::retry::{retry_with_backoff, RetryPolicy};
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct RedisPubSub {
    publish_conn: redis::aio::MultiplexedConnection,
    handlers: Arc<DashMap<String, Vec<MessageHandler>>>,
    control: mpsc::UnboundedSender<String>,
    stats: Arc<BrokerStats>,
}

impl RedisPubSub {
    /// Connect both broker connections and start the subscriber task.
    pub async fn connect(config: &RedisConfig) -> Result<Self, GatewayError> {
        let publish_client = redis::Client::open(config.url.as_str())
            .map_err(|e| GatewayError::BrokerUnavailable(e.to_string()))?;

        let publish_conn = tokio::time::timeout(
            config.connection_timeout,
            publish_client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| {
            GatewayError::BrokerUnavailable("publish connection timed out".to_string())
        })?
        .map_err(|e| GatewayError::BrokerUnavailable(e.to_string()))?;

        let subscribe_client = redis::Client::open(config.url.as_str())
            .map_err(|e| GatewayError::BrokerUnavailable(e.to_string()))?;

        let handlers: Arc<DashMap<String, Vec<MessageHandler>>> = Arc::new(DashMap::new());
        let stats = Arc::new(BrokerStats::new());
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        tokio::spawn(subscriber_task(
            subscribe_client,
            control_rx,
            handlers.clone(),
            stats.clone(),
        ));

        tracing::info!(url = %config.url, "Connected Redis broker (publish + subscribe)");

        Ok(Self {
            publish_conn,
            handlers,
            control: control_tx,
            stats,
        })
    }

    pub fn stats(&self) -> Arc<BrokerStats> {
        self.stats.clone()
    }
}

#[async_trait]
impl PubSubChannel for RedisPubSub {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), GatewayError> {
        let mut conn = self.publish_conn.clone();
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| {
                self.stats.record_error();
                GatewayError::BrokerUnavailable(format!("PUBLISH failed: {}", e))
            })
    }

    async fn subscribe(
        &self,
        channel: &str,
        handler: MessageHandler,
    ) -> Result<(), GatewayError> {
        self.handlers
            .entry(channel.to_string())
            .or_default()
            .push(handler);

        self.control.send(channel.to_string()).map_err(|_| {
            GatewayError::BrokerUnavailable("subscriber task has shut down".to_string())
        })
    }

    fn is_connected(&self) -> bool {
        self.stats.is_connected()
    }
}

/// Drives the dedicated subscriber connection.
///
/// Exits only when the owning `RedisPubSub` is dropped (control channel
/// closed); a lost broker connection is retried forever in the background.
async fn subscriber_task(
    client: redis::Client,
    mut control: mpsc::UnboundedReceiver<String>,
    handlers: Arc<DashMap<String, Vec<MessageHandler>>>,
    stats: Arc<BrokerStats>,
) {
    loop {
        let pubsub = match retry_with_backoff(
            || async { client.get_async_pubsub().await },
            RetryPolicy::broker_reconnect(),
            |_| true,
        )
        .await
        {
            Ok(pubsub) => pubsub,
            Err(e) => {
                // Only reachable if the policy stops retrying.
                tracing::error!(error = %e, "Giving up on broker subscriber connection");
                stats.record_error();
                return;
            }
        };

        let (mut sink, mut stream) = pubsub.split();

        // Replay existing subscriptions after a (re)connect.
        let channels: Vec<String> = handlers.iter().map(|e| e.key().clone()).collect();
        let mut resubscribed = true;
        for channel in &channels {
            if let Err(e) = sink.subscribe(channel).await {
                tracing::warn!(channel = %channel, error = %e, "Resubscribe failed");
                stats.record_error();
                resubscribed = false;
                break;
            }
        }
        if !resubscribed {
            continue;
        }

        stats.set_connected(true);
        tracing::debug!(channels = channels.len(), "Broker subscriber connected");

        loop {
            tokio::select! {
                request = control.recv() => {
                    match request {
                        Some(channel) => {
                            if let Err(e) = sink.subscribe(&channel).await {
                                tracing::warn!(channel = %channel, error = %e, "Subscribe failed");
                                stats.record_error();
                                break;
                            }
                        }
                        // Owner dropped; shut the task down.
                        None => {
                            stats.set_connected(false);
                            return;
                        }
                    }
                }
                msg = stream.next() => {
                    match msg {
                        Some(msg) => {
                            let channel = msg.get_channel_name().to_string();
                            let payload = msg.get_payload_bytes().to_vec();
                            dispatch(&handlers, &channel, &payload);
                        }
                        // Subscriber connection lost; reconnect.
                        None => break,
                    }
                }
            }
        }

        stats.set_connected(false);
        stats.record_error();
        tracing::error!("Broker subscriber connection lost, reconnecting");
    }
}

fn dispatch(handlers: &DashMap<String, Vec<MessageHandler>>, channel: &str, payload: &[u8]) {
    let channel_handlers: Vec<MessageHandler> = handlers
        .get(channel)
        .map(|h| h.clone())
        .unwrap_or_default();

    for handler in channel_handlers {
        handler(payload);
    }
}
