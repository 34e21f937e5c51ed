//! Cluster wire protocol
//!
//! Every message exchanged between gateway processes over the broker is a
//! `ClusterMessage`. The envelope carries the channel key it was published
//! on, the originating node id (so a process can skip its own broadcasts),
//! the target namespace, and an internally tagged operation.
//!
//! The broker gives per-channel delivery order only; operations on
//! independent rooms may be observed in different relative orders by
//! different processes, and duplicates must be tolerated.

use crate::namespace::Namespace;
use crate::registry::ConnectionId;
use serde::{Deserialize, Serialize};
use socket_gateway_core::error::GatewayError;
use uuid::Uuid;

/// Envelope for all cross-process traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterMessage {
    /// Broker channel this message was published on
    pub channel_key: String,
    /// Node that originated the message
    pub origin: Uuid,
    /// Target namespace; consumers ignore messages for namespaces they do
    /// not route
    pub namespace: Namespace,
    #[serde(flatten)]
    pub op: ClusterOp,
}

/// Operation kinds replicated across the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ClusterOp {
    /// Replay a broadcast to local matching connections. `room: None`
    /// targets the whole namespace.
    Broadcast {
        room: Option<String>,
        payload: serde_json::Value,
    },

    /// Advisory: a connection joined a room on the origin process.
    Join {
        connection_id: ConnectionId,
        room: String,
    },

    /// Advisory: a connection left a room on the origin process.
    Leave {
        connection_id: ConnectionId,
        room: String,
    },

    /// Ask every process for its local members of the listed rooms.
    QueryRequest {
        request_id: Uuid,
        rooms: Vec<String>,
    },

    /// One process's local answer to a `QueryRequest`.
    QueryResponse {
        request_id: Uuid,
        connection_ids: Vec<ConnectionId>,
    },
}

impl ClusterMessage {
    pub fn new(channel_key: String, origin: Uuid, namespace: Namespace, op: ClusterOp) -> Self {
        Self {
            channel_key,
            origin,
            namespace,
            op,
        }
    }

    /// Serialize for broker transmission.
    pub fn encode(&self) -> Result<Vec<u8>, GatewayError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize a broker payload.
    pub fn decode(bytes: &[u8]) -> Result<Self, GatewayError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
