//! Connection lifecycle coordination
//!
//! Every connection walks one path: `Connecting` while the handshake runs,
//! `AuthBound` once identity material is attached, `Active` after the room
//! policy hooks accept it, `Disconnecting` while memberships are being torn
//! down, and `Closed` at the end. Transitions are not reentrant; the
//! transport layer may report the same teardown twice (a close frame
//! followed by the stream ending) and only the first report does work.
//!
//! The room policy is the seam to the surrounding application: it decides
//! which rooms a new connection joins and is told when one leaves. The
//! gateway itself attaches no meaning to room names.

use crate::adapter::ClusterAdapter;
use crate::registry::{AuthIdentity, ClientSink, ConnectionId, ConnectionInfo, ConnectionRegistry};
use async_trait::async_trait;
use dashmap::DashMap;
use socket_gateway_core::error::GatewayError;
use std::sync::Arc;
use thiserror::Error;

/// Where a connection is on its lifecycle path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    AuthBound,
    Active,
    Disconnecting,
    Closed,
}

/// Identity material extracted from the handshake before binding.
///
/// Both pieces must be present to bind; connections carrying only one are
/// refused.
#[derive(Debug, Clone, Default)]
pub struct AuthCandidate {
    pub user_id: Option<String>,
    pub session_token: Option<String>,
}

impl AuthCandidate {
    pub fn is_empty(&self) -> bool {
        self.user_id.is_none() && self.session_token.is_none()
    }

    /// Bind the candidate into a concrete identity.
    ///
    /// # Errors
    ///
    /// Returns `AuthMissing` unless both the user id and the session token
    /// are present.
    pub fn bind(self) -> Result<AuthIdentity, GatewayError> {
        match (self.user_id, self.session_token) {
            (Some(user_id), Some(session_token)) => Ok(AuthIdentity {
                user_id,
                session_token,
            }),
            _ => Err(GatewayError::AuthMissing),
        }
    }
}

#[derive(Debug, Error)]
#[error("room policy failed: {0}")]
pub struct PolicyError(pub String);

/// Application hooks invoked as connections come and go.
#[async_trait]
pub trait RoomPolicy: Send + Sync {
    /// Persist per-user connection context. Failures are fatal to the
    /// connection being set up.
    async fn save_user_language(&self, info: &ConnectionInfo) -> Result<(), PolicyError>;

    /// Rooms the connection should join on arrival.
    async fn join_rooms(&self, info: &ConnectionInfo) -> Result<Vec<String>, PolicyError>;

    /// Invoked exactly once as the connection starts tearing down.
    async fn leave_rooms(&self, info: &ConnectionInfo) -> Result<(), PolicyError>;
}

/// Policy that joins nothing and accepts everything.
pub struct NullRoomPolicy;

#[async_trait]
impl RoomPolicy for NullRoomPolicy {
    async fn save_user_language(&self, _info: &ConnectionInfo) -> Result<(), PolicyError> {
        Ok(())
    }

    async fn join_rooms(&self, _info: &ConnectionInfo) -> Result<Vec<String>, PolicyError> {
        Ok(Vec::new())
    }

    async fn leave_rooms(&self, _info: &ConnectionInfo) -> Result<(), PolicyError> {
        Ok(())
    }
}

pub type CloseCallback = Arc<dyn Fn(ConnectionId) + Send + Sync>;

/// Drives connections through their lifecycle and keeps the registry, the
/// cluster adapter, and the room policy in agreement about each one.
pub struct LifecycleCoordinator {
    registry: Arc<ConnectionRegistry>,
    adapter: Arc<ClusterAdapter>,
    policy: Arc<dyn RoomPolicy>,
    on_close: CloseCallback,
    states: DashMap<ConnectionId, ConnectionState>,
}

impl LifecycleCoordinator {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        adapter: Arc<ClusterAdapter>,
        policy: Arc<dyn RoomPolicy>,
    ) -> Self {
        Self {
            registry,
            adapter,
            policy,
            on_close: Arc::new(|_| {}),
            states: DashMap::new(),
        }
    }

    /// Install a callback invoked exactly once when a connection reaches
    /// `Closed`.
    pub fn with_close_callback(mut self, on_close: CloseCallback) -> Self {
        self.on_close = on_close;
        self
    }

    pub fn state_of(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.states.get(&id).map(|s| *s)
    }

    /// Register a freshly authenticated connection and run the arrival
    /// hooks.
    ///
    /// On success the connection is `Active`, registered, and a member of
    /// every room the policy granted, with join advisories published to
    /// the cluster. On policy failure the connection is fully torn down
    /// before the error is returned; the caller only has to close the
    /// transport.
    pub async fn on_connect(
        &self,
        info: ConnectionInfo,
        sink: ClientSink,
    ) -> Result<(), GatewayError> {
        let id = info.id;
        self.states.insert(id, ConnectionState::Connecting);
        self.registry.register(info.clone(), sink);
        self.states.insert(id, ConnectionState::AuthBound);

        if let Err(e) = self.run_arrival_hooks(&info).await {
            tracing::warn!(
                connection_id = %id,
                user_id = %info.auth.user_id,
                error = %e,
                "Arrival hooks refused connection"
            );
            self.registry.unregister(id);
            self.states.remove(&id);
            return Err(GatewayError::TransportTeardown(e.to_string()));
        }

        self.states.insert(id, ConnectionState::Active);
        tracing::info!(
            connection_id = %id,
            namespace = %info.namespace,
            user_id = %info.auth.user_id,
            "Connection active"
        );
        Ok(())
    }

    async fn run_arrival_hooks(&self, info: &ConnectionInfo) -> Result<(), PolicyError> {
        self.policy.save_user_language(info).await?;
        let rooms = self.policy.join_rooms(info).await?;
        for room in rooms {
            self.registry.add_to_room(info.id, &room);
            self.adapter.notify_join(info.namespace, info.id, &room).await;
        }
        Ok(())
    }

    /// Begin teardown: run the leave hook and revoke room memberships while
    /// the connection is still addressable.
    ///
    /// Safe to call more than once; only the first call for a given
    /// connection does work.
    pub async fn on_disconnecting(&self, id: ConnectionId) {
        match self.states.get(&id).map(|s| *s) {
            Some(ConnectionState::Active) | Some(ConnectionState::AuthBound) => {}
            _ => return,
        }
        self.states.insert(id, ConnectionState::Disconnecting);

        let Some(info) = self.registry.get(id) else {
            return;
        };

        if let Err(e) = self.policy.leave_rooms(&info).await {
            tracing::warn!(connection_id = %id, error = %e, "Leave hook failed, continuing teardown");
        }

        for room in self.registry.rooms_of(id) {
            self.registry.remove_from_room(id, &room);
            self.adapter.notify_leave(info.namespace, id, &room).await;
        }

        tracing::debug!(connection_id = %id, "Connection disconnecting");
    }

    /// Final transition: unregister the connection and fire the close
    /// callback.
    ///
    /// If the transport vanished without a disconnecting report, the
    /// teardown work runs here first so the leave hook still fires exactly
    /// once.
    pub async fn on_closed(&self, id: ConnectionId) {
        match self.states.get(&id).map(|s| *s) {
            None | Some(ConnectionState::Closed) => return,
            Some(ConnectionState::Active) | Some(ConnectionState::AuthBound) => {
                self.on_disconnecting(id).await;
            }
            Some(ConnectionState::Connecting) | Some(ConnectionState::Disconnecting) => {}
        }

        self.states.insert(id, ConnectionState::Closed);
        self.registry.unregister(id);
        self.states.remove(&id);
        (self.on_close)(id);
        tracing::info!(connection_id = %id, "Connection closed");
    }
}
