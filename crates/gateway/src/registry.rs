//! Per-process connection registry
//!
//! Tracks the live connections this process holds: their namespace, bound
//! auth identity, room memberships, and the sink used to deliver events to
//! the client. All mutation is funneled through the lifecycle coordinator;
//! the registry itself only guarantees per-entry consistency.
//!
//! Invariants:
//! - `members_of` never reports a connection that is not registered
//! - a room whose last member leaves holds no residual entry
//! - `unregister` is idempotent

use crate::namespace::Namespace;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Unique identifier for a connection, stable for the session lifetime.
pub type ConnectionId = Uuid;

/// Identity material bound to a connection during the handshake.
///
/// These are unvalidated candidates; verification belongs to the auth
/// collaborator, not the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthIdentity {
    pub user_id: String,
    pub session_token: String,
}

/// Delivery handle for one client connection.
///
/// Sending to a sink whose receiver is gone is a no-op: the connection is
/// mid-teardown and the lifecycle coordinator will unregister it.
#[derive(Debug, Clone)]
pub struct ClientSink(mpsc::UnboundedSender<String>);

impl ClientSink {
    pub fn new(sender: mpsc::UnboundedSender<String>) -> Self {
        Self(sender)
    }

    pub fn send(&self, payload: String) {
        let _ = self.0.send(payload);
    }
}

/// Immutable description of a registered connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub namespace: Namespace,
    pub auth: AuthIdentity,
}

struct ConnectionEntry {
    info: ConnectionInfo,
    sink: ClientSink,
    rooms: HashSet<String>,
}

/// Registry of live connections on this process.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionEntry>,
    rooms: DashMap<(Namespace, String), HashSet<ConnectionId>>,
    delivered: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            rooms: DashMap::new(),
            delivered: AtomicU64::new(0),
        }
    }

    /// Register a connection. Replaces any stale entry under the same id.
    pub fn register(&self, info: ConnectionInfo, sink: ClientSink) {
        tracing::debug!(
            connection_id = %info.id,
            namespace = %info.namespace,
            user_id = %info.auth.user_id,
            "Registering connection"
        );
        self.connections.insert(
            info.id,
            ConnectionEntry {
                info,
                sink,
                rooms: HashSet::new(),
            },
        );
    }

    /// Remove a connection and revoke all of its room memberships.
    ///
    /// Calling this twice for the same id is a no-op, not an error.
    pub fn unregister(&self, id: ConnectionId) {
        let Some((_, entry)) = self.connections.remove(&id) else {
            return;
        };

        for room in &entry.rooms {
            self.drop_member(entry.info.namespace, room, id);
        }

        tracing::debug!(
            connection_id = %id,
            namespace = %entry.info.namespace,
            rooms_revoked = entry.rooms.len(),
            "Unregistered connection"
        );
    }

    /// Add a registered connection to a room within its own namespace.
    /// Unknown ids are ignored.
    pub fn add_to_room(&self, id: ConnectionId, room: &str) {
        let Some(mut entry) = self.connections.get_mut(&id) else {
            return;
        };
        let namespace = entry.info.namespace;
        entry.rooms.insert(room.to_string());
        drop(entry);

        self.rooms
            .entry((namespace, room.to_string()))
            .or_default()
            .insert(id);
    }

    /// Remove a connection from a room, reclaiming the room entry when the
    /// last member leaves.
    pub fn remove_from_room(&self, id: ConnectionId, room: &str) {
        let Some(mut entry) = self.connections.get_mut(&id) else {
            return;
        };
        let namespace = entry.info.namespace;
        entry.rooms.remove(room);
        drop(entry);

        self.drop_member(namespace, room, id);
    }

    fn drop_member(&self, namespace: Namespace, room: &str, id: ConnectionId) {
        if let Some(mut members) = self.rooms.get_mut(&(namespace, room.to_string())) {
            members.remove(&id);
            let empty = members.is_empty();
            drop(members);
            if empty {
                self.rooms.remove(&(namespace, room.to_string()));
            }
        }
    }

    /// Local members of a room. Never contains an unregistered id.
    pub fn members_of(&self, namespace: Namespace, room: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(&(namespace, room.to_string()))
            .map(|members| {
                members
                    .iter()
                    .filter(|id| self.connections.contains_key(id))
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Rooms the connection currently belongs to.
    pub fn rooms_of(&self, id: ConnectionId) -> Vec<String> {
        self.connections
            .get(&id)
            .map(|entry| entry.rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.connections.get(&id).map(|entry| entry.info.clone())
    }

    /// Deliver a payload to every local member of a room. Returns the number
    /// of connections written to.
    pub fn deliver_to_room(&self, namespace: Namespace, room: &str, payload: &str) -> usize {
        let ids = self.members_of(namespace, room);
        let mut sent = 0;
        for id in ids {
            if let Some(entry) = self.connections.get(&id) {
                entry.sink.send(payload.to_string());
                sent += 1;
            }
        }
        self.delivered.fetch_add(sent as u64, Ordering::Relaxed);
        sent
    }

    /// Deliver a payload to every local connection in a namespace.
    pub fn deliver_to_namespace(&self, namespace: Namespace, payload: &str) -> usize {
        let mut sent = 0;
        for entry in self.connections.iter() {
            if entry.info.namespace == namespace {
                entry.sink.send(payload.to_string());
                sent += 1;
            }
        }
        self.delivered.fetch_add(sent as u64, Ordering::Relaxed);
        sent
    }

    /// Number of connections currently registered.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of room entries currently held. Used by the no-leak checks.
    pub fn room_table_size(&self) -> usize {
        self.rooms.len()
    }

    /// Total payloads delivered locally since process start.
    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
