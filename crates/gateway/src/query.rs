//! Cluster query protocol
//!
//! Answers "which connection ids are in these rooms" over the broker's
//! request/response channel pair. A caller publishes a query request on
//! the namespace's request channel and collects answers until the request
//! timeout elapses. Responses carry the request's correlation id so an
//! answer arriving after its query was abandoned is discarded instead of
//! being misattributed to a newer query.
//!
//! Answers are deliberately local: a responder only answers requests its
//! own process originated, and only ever reports connections it itself
//! holds. A caller wanting cluster-wide membership issues the query to
//! every process and merges the answers; the protocol never does that
//! aggregation on its own.

use crate::namespace::Namespace;
use crate::protocol::{ClusterMessage, ClusterOp};
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::pubsub::{MessageHandler, PubSubChannel};
use dashmap::DashMap;
use socket_gateway_core::config::GatewayConfig;
use socket_gateway_core::error::GatewayError;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

pub struct ClusterQueryProtocol {
    node_id: Uuid,
    broker: Arc<dyn PubSubChannel>,
    channel_prefix: String,
    request_timeout: Duration,
    pending: Arc<DashMap<Uuid, mpsc::UnboundedSender<Vec<ConnectionId>>>>,
}

impl ClusterQueryProtocol {
    /// Install the responder and collector subscriptions and return the
    /// protocol handle.
    ///
    /// This deployment is authoritative for room-membership queries on the
    /// `room` namespace only; requests targeting any other namespace are
    /// declined by every process.
    pub async fn start(
        registry: Arc<ConnectionRegistry>,
        broker: Arc<dyn PubSubChannel>,
        config: &GatewayConfig,
        node_id: Uuid,
    ) -> Result<Arc<Self>, GatewayError> {
        let pending: Arc<DashMap<Uuid, mpsc::UnboundedSender<Vec<ConnectionId>>>> =
            Arc::new(DashMap::new());

        let protocol = Arc::new(Self {
            node_id,
            broker: broker.clone(),
            channel_prefix: config.channel_prefix.clone(),
            request_timeout: config.request_timeout,
            pending: pending.clone(),
        });

        // Responder: answers this process's own requests from the local
        // registry.
        let request_channel = Namespace::Room.request_channel(&config.channel_prefix);
        broker
            .subscribe(
                &request_channel,
                responder_handler(
                    registry,
                    Arc::downgrade(&broker),
                    config.channel_prefix.clone(),
                    node_id,
                ),
            )
            .await?;

        // Collector: routes answers to the pending query they correlate
        // with. Both namespaces get a collector so a declined-everywhere
        // query still times out cleanly.
        for namespace in [Namespace::Default, Namespace::Room] {
            let response_channel = namespace.response_channel(&config.channel_prefix);
            broker
                .subscribe(&response_channel, collector_handler(pending.clone()))
                .await?;
        }

        Ok(protocol)
    }

    /// Ask which connection ids this process holds in the listed rooms.
    ///
    /// The request and its answer travel over the broker like any other
    /// cluster traffic. Waits for the correlated answer up to the request
    /// timeout and returns whatever arrived; a timeout is partial
    /// results, not an error.
    pub async fn query_rooms(
        &self,
        namespace: Namespace,
        rooms: &[String],
    ) -> Result<Vec<ConnectionId>, GatewayError> {
        let request_id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.pending.insert(request_id, tx);

        let channel = namespace.request_channel(&self.channel_prefix);
        let message = ClusterMessage::new(
            channel.clone(),
            self.node_id,
            namespace,
            ClusterOp::QueryRequest {
                request_id,
                rooms: rooms.to_vec(),
            },
        );

        let publish = async {
            let bytes = message.encode()?;
            self.broker.publish(&channel, bytes).await
        };
        if let Err(e) = publish.await {
            self.pending.remove(&request_id);
            return Err(e);
        }

        // One answer is expected per request (a responder only answers its
        // own process's requests); the deadline covers the broker-down
        // case, where the answer never arrives.
        let mut collected = Vec::new();
        let deadline = tokio::time::sleep(self.request_timeout);
        tokio::pin!(deadline);

        tokio::select! {
            () = &mut deadline => {
                tracing::debug!(
                    request_id = %request_id,
                    reason = %GatewayError::QueryTimeout,
                    "Query window closed without an answer"
                );
            }
            Some(ids) = rx.recv() => {
                collected.extend(ids);
            }
        }

        // Answers arriving from here on have no pending entry and are
        // discarded by the collector.
        self.pending.remove(&request_id);
        Ok(collected)
    }
}

fn responder_handler(
    registry: Arc<ConnectionRegistry>,
    broker: Weak<dyn PubSubChannel>,
    channel_prefix: String,
    node_id: Uuid,
) -> MessageHandler {
    Arc::new(move |bytes: &[u8]| {
        let message = match ClusterMessage::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding undecodable query request");
                return;
            }
        };

        // Only the room namespace is answered here; decline anything else
        // rather than reporting unrelated data.
        if message.namespace != Namespace::Room {
            tracing::debug!(namespace = %message.namespace, "Declining query for foreign namespace");
            return;
        }

        // Local-answer mode: every process holds its own registry, so each
        // answers only the queries it originated itself.
        if message.origin != node_id {
            tracing::trace!(origin = %message.origin, "Leaving query for its origin process to answer");
            return;
        }

        let ClusterOp::QueryRequest { request_id, rooms } = message.op else {
            return;
        };

        let mut connection_ids = Vec::new();
        for room in &rooms {
            connection_ids.extend(registry.members_of(Namespace::Room, room));
        }

        let Some(broker) = broker.upgrade() else {
            return;
        };

        let channel = Namespace::Room.response_channel(&channel_prefix);
        let response = ClusterMessage::new(
            channel.clone(),
            node_id,
            Namespace::Room,
            ClusterOp::QueryResponse {
                request_id,
                connection_ids,
            },
        );

        tokio::spawn(async move {
            let bytes = match response.encode() {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to encode query response");
                    return;
                }
            };
            if let Err(e) = broker.publish(&channel, bytes).await {
                tracing::warn!(error = %e, "Failed to publish query response");
            }
        });
    })
}

fn collector_handler(
    pending: Arc<DashMap<Uuid, mpsc::UnboundedSender<Vec<ConnectionId>>>>,
) -> MessageHandler {
    Arc::new(move |bytes: &[u8]| {
        let Ok(message) = ClusterMessage::decode(bytes) else {
            return;
        };
        let ClusterOp::QueryResponse {
            request_id,
            connection_ids,
        } = message.op
        else {
            return;
        };

        match pending.get(&request_id) {
            Some(tx) => {
                let _ = tx.send(connection_ids);
            }
            None => {
                tracing::debug!(request_id = %request_id, "Discarding late query response");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::MemoryBroker;
    use crate::registry::{AuthIdentity, ClientSink, ConnectionInfo};

    fn quick_config() -> GatewayConfig {
        GatewayConfig {
            request_timeout: Duration::from_millis(150),
            ..GatewayConfig::default()
        }
    }

    fn register_in_room(registry: &ConnectionRegistry, room: &str) -> ConnectionId {
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        registry.register(
            ConnectionInfo {
                id,
                namespace: Namespace::Room,
                auth: AuthIdentity {
                    user_id: "u".to_string(),
                    session_token: "t".to_string(),
                },
            },
            ClientSink::new(tx),
        );
        // Receiver deliberately dropped; query tests only need membership.
        registry.add_to_room(id, room);
        id
    }

    #[tokio::test]
    async fn test_query_returns_local_members() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broker: Arc<dyn PubSubChannel> = Arc::new(MemoryBroker::new());
        let protocol =
            ClusterQueryProtocol::start(registry.clone(), broker, &quick_config(), Uuid::new_v4())
                .await
                .unwrap();

        let id = register_in_room(&registry, "r1");

        let ids = protocol
            .query_rooms(Namespace::Room, &["r1".to_string()])
            .await
            .unwrap();
        assert_eq!(ids, vec![id]);
    }

    #[tokio::test]
    async fn test_query_spans_multiple_rooms() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broker: Arc<dyn PubSubChannel> = Arc::new(MemoryBroker::new());
        let protocol =
            ClusterQueryProtocol::start(registry.clone(), broker, &quick_config(), Uuid::new_v4())
                .await
                .unwrap();

        let a = register_in_room(&registry, "r1");
        let b = register_in_room(&registry, "r2");
        register_in_room(&registry, "r3");

        let mut ids = protocol
            .query_rooms(Namespace::Room, &["r1".to_string(), "r2".to_string()])
            .await
            .unwrap();
        ids.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_default_namespace_query_is_declined_everywhere() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broker: Arc<dyn PubSubChannel> = Arc::new(MemoryBroker::new());
        let protocol =
            ClusterQueryProtocol::start(registry.clone(), broker, &quick_config(), Uuid::new_v4())
                .await
                .unwrap();

        register_in_room(&registry, "r1");

        let ids = protocol
            .query_rooms(Namespace::Default, &["r1".to_string()])
            .await
            .unwrap();
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_room_yields_empty_answer() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broker: Arc<dyn PubSubChannel> = Arc::new(MemoryBroker::new());
        let protocol =
            ClusterQueryProtocol::start(registry, broker, &quick_config(), Uuid::new_v4())
                .await
                .unwrap();

        let ids = protocol
            .query_rooms(Namespace::Room, &["ghost".to_string()])
            .await
            .unwrap();
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn test_late_response_is_discarded() {
        let pending: Arc<DashMap<Uuid, mpsc::UnboundedSender<Vec<ConnectionId>>>> =
            Arc::new(DashMap::new());
        let collector = collector_handler(pending.clone());

        // No pending entry for this id; the collector must drop it.
        let response = ClusterMessage::new(
            "gw-response#room#".to_string(),
            Uuid::new_v4(),
            Namespace::Room,
            ClusterOp::QueryResponse {
                request_id: Uuid::new_v4(),
                connection_ids: vec![Uuid::new_v4()],
            },
        );
        collector(&response.encode().unwrap());
        assert!(pending.is_empty());
    }
}
