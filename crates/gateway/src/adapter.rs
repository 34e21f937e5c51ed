//! Cluster adapter
//!
//! Makes a local broadcast reach every matching connection cluster-wide:
//! deliver to local members first, then publish the operation so every other
//! process replays the same delivery against its own registry. Messages this
//! node published are skipped on receipt, otherwise local members would see
//! every broadcast twice.
//!
//! Broker loss degrades the adapter to local-only delivery. The failure is
//! logged and counted for the health collaborator; it never fails the local
//! broadcast and never crashes the process.

use crate::namespace::Namespace;
use crate::protocol::{ClusterMessage, ClusterOp};
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::pubsub::{BrokerStats, MessageHandler, PubSubChannel};
use socket_gateway_core::config::GatewayConfig;
use socket_gateway_core::error::GatewayError;
use socket_gateway_core::health::GatewaySnapshot;
use std::sync::Arc;
use uuid::Uuid;

pub struct ClusterAdapter {
    node_id: Uuid,
    registry: Arc<ConnectionRegistry>,
    broker: Arc<dyn PubSubChannel>,
    config: GatewayConfig,
    stats: Arc<BrokerStats>,
}

impl ClusterAdapter {
    /// Build the adapter and install its replay subscriptions for both
    /// namespaces.
    pub async fn start(
        registry: Arc<ConnectionRegistry>,
        broker: Arc<dyn PubSubChannel>,
        config: GatewayConfig,
    ) -> Result<Arc<Self>, GatewayError> {
        let node_id = Uuid::new_v4();

        for namespace in [Namespace::Default, Namespace::Room] {
            let channel = namespace.broadcast_channel(&config.channel_prefix);
            let handler = replay_handler(registry.clone(), node_id);
            broker.subscribe(&channel, handler).await?;
        }

        tracing::info!(node_id = %node_id, prefix = %config.channel_prefix, "Cluster adapter started");

        Ok(Arc::new(Self {
            node_id,
            registry,
            broker,
            config,
            stats: Arc::new(BrokerStats::new()),
        }))
    }

    pub fn node_id(&self) -> Uuid {
        self.node_id
    }

    /// Broadcast to every cluster-wide member of a room.
    ///
    /// Returns the number of local connections delivered to; remote
    /// delivery is best-effort via the broker.
    pub async fn broadcast_to_room(
        &self,
        namespace: Namespace,
        room: &str,
        payload: serde_json::Value,
    ) -> Result<usize, GatewayError> {
        let text = self.render(&payload)?;
        let delivered = self.registry.deliver_to_room(namespace, room, &text);

        self.replicate(
            namespace,
            ClusterOp::Broadcast {
                room: Some(room.to_string()),
                payload,
            },
        )
        .await;

        Ok(delivered)
    }

    /// Broadcast to every cluster-wide connection in a namespace.
    pub async fn broadcast_to_namespace(
        &self,
        namespace: Namespace,
        payload: serde_json::Value,
    ) -> Result<usize, GatewayError> {
        let text = self.render(&payload)?;
        let delivered = self.registry.deliver_to_namespace(namespace, &text);

        self.replicate(namespace, ClusterOp::Broadcast { room: None, payload })
            .await;

        Ok(delivered)
    }

    /// Publish an advisory join notification for a local membership change.
    pub async fn notify_join(&self, namespace: Namespace, id: ConnectionId, room: &str) {
        self.replicate(
            namespace,
            ClusterOp::Join {
                connection_id: id,
                room: room.to_string(),
            },
        )
        .await;
    }

    /// Publish an advisory leave notification for a local membership change.
    pub async fn notify_leave(&self, namespace: Namespace, id: ConnectionId, room: &str) {
        self.replicate(
            namespace,
            ClusterOp::Leave {
                connection_id: id,
                room: room.to_string(),
            },
        )
        .await;
    }

    /// Counters for the external health collaborator.
    pub fn health(&self) -> GatewaySnapshot {
        GatewaySnapshot::evaluate(
            self.registry.connection_count(),
            self.broker.is_connected(),
            self.stats.errors(),
        )
    }

    fn render(&self, payload: &serde_json::Value) -> Result<String, GatewayError> {
        let text = payload.to_string();
        if text.len() > self.config.max_payload_bytes {
            return Err(GatewayError::PayloadTooLarge {
                size: text.len(),
                limit: self.config.max_payload_bytes,
            });
        }
        Ok(text)
    }

    /// Publish an operation on the namespace's broadcast channel, degrading
    /// to local-only on broker failure.
    async fn replicate(&self, namespace: Namespace, op: ClusterOp) {
        let channel = namespace.broadcast_channel(&self.config.channel_prefix);
        let message = ClusterMessage::new(channel.clone(), self.node_id, namespace, op);

        let bytes = match message.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode cluster message");
                return;
            }
        };

        if let Err(e) = self.broker.publish(&channel, bytes).await {
            self.stats.record_error();
            tracing::error!(
                namespace = %namespace,
                error = %e,
                "Broker publish failed, continuing with local-only delivery"
            );
        }
    }
}

/// Handler replaying remote operations against the local registry.
fn replay_handler(registry: Arc<ConnectionRegistry>, node_id: Uuid) -> MessageHandler {
    Arc::new(move |bytes: &[u8]| {
        let message = match ClusterMessage::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding undecodable cluster message");
                return;
            }
        };

        // Local delivery already happened on the origin process.
        if message.origin == node_id {
            return;
        }

        match message.op {
            ClusterOp::Broadcast { room, payload } => {
                let text = payload.to_string();
                let delivered = match room {
                    Some(room) => registry.deliver_to_room(message.namespace, &room, &text),
                    None => registry.deliver_to_namespace(message.namespace, &text),
                };
                tracing::trace!(
                    origin = %message.origin,
                    namespace = %message.namespace,
                    delivered,
                    "Replayed remote broadcast"
                );
            }
            // Membership is process-local; join/leave advisories are
            // idempotent no-ops here. Duplicates from the broker land in
            // the same arm.
            ClusterOp::Join { connection_id, room } | ClusterOp::Leave { connection_id, room } => {
                tracing::trace!(
                    origin = %message.origin,
                    connection_id = %connection_id,
                    room = %room,
                    "Observed remote membership change"
                );
            }
            // Query traffic is owned by the query protocol's channels.
            ClusterOp::QueryRequest { .. } | ClusterOp::QueryResponse { .. } => {}
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::MemoryBroker;
    use crate::registry::{AuthIdentity, ClientSink, ConnectionInfo};
    use tokio::sync::mpsc;

    fn register_member(
        registry: &ConnectionRegistry,
        namespace: Namespace,
        room: Option<&str>,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        registry.register(
            ConnectionInfo {
                id,
                namespace,
                auth: AuthIdentity {
                    user_id: "u".to_string(),
                    session_token: "t".to_string(),
                },
            },
            ClientSink::new(tx),
        );
        if let Some(room) = room {
            registry.add_to_room(id, room);
        }
        (id, rx)
    }

    async fn adapter_with_registry() -> (Arc<ClusterAdapter>, Arc<ConnectionRegistry>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let broker: Arc<dyn PubSubChannel> = Arc::new(MemoryBroker::new());
        let adapter = ClusterAdapter::start(
            registry.clone(),
            broker,
            GatewayConfig::default(),
        )
        .await
        .unwrap();
        (adapter, registry)
    }

    #[tokio::test]
    async fn test_local_delivery_counts_members() {
        let (adapter, registry) = adapter_with_registry().await;
        let (_a, mut rx_a) = register_member(&registry, Namespace::Room, Some("r1"));
        let (_b, _rx_b) = register_member(&registry, Namespace::Room, Some("r2"));

        let delivered = adapter
            .broadcast_to_room(Namespace::Room, "r1", serde_json::json!({"n": 1}))
            .await
            .unwrap();

        assert_eq!(delivered, 1);
        assert_eq!(rx_a.try_recv().unwrap(), "{\"n\":1}");
    }

    #[tokio::test]
    async fn test_own_broadcast_not_replayed_twice() {
        let (adapter, registry) = adapter_with_registry().await;
        let (_a, mut rx_a) = register_member(&registry, Namespace::Room, Some("r1"));

        adapter
            .broadcast_to_room(Namespace::Room, "r1", serde_json::json!({"n": 1}))
            .await
            .unwrap();

        // Exactly one copy: the local delivery. The broker echo of our own
        // message must be skipped.
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_oversize_payload_rejected() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broker: Arc<dyn PubSubChannel> = Arc::new(MemoryBroker::new());
        let adapter = ClusterAdapter::start(
            registry,
            broker,
            GatewayConfig {
                max_payload_bytes: 8,
                ..GatewayConfig::default()
            },
        )
        .await
        .unwrap();

        let result = adapter
            .broadcast_to_room(
                Namespace::Room,
                "r1",
                serde_json::json!({"too": "much data here"}),
            )
            .await;

        assert!(matches!(
            result,
            Err(GatewayError::PayloadTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_namespace_broadcast_skips_other_namespace() {
        let (adapter, registry) = adapter_with_registry().await;
        let (_a, mut rx_room) = register_member(&registry, Namespace::Room, None);
        let (_b, mut rx_default) = register_member(&registry, Namespace::Default, None);

        adapter
            .broadcast_to_namespace(Namespace::Default, serde_json::json!("hello"))
            .await
            .unwrap();

        assert!(rx_default.try_recv().is_ok());
        assert!(rx_room.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_health_snapshot_reflects_registry() {
        let (adapter, registry) = adapter_with_registry().await;
        let (_a, _rx) = register_member(&registry, Namespace::Room, None);

        let snapshot = adapter.health();
        assert_eq!(snapshot.registered_connections, 1);
        assert!(snapshot.broker_connected);
        assert_eq!(snapshot.broker_errors, 0);
        assert!(snapshot.is_healthy());
    }
}
