//! WebSocket session actor
//!
//! One actor per client connection. The actor owns the transport side of
//! the lifecycle: it binds the connection into the coordinator when the
//! stream starts, forwards cluster deliveries out to the client, and
//! reports teardown so the leave hooks run while the connection is still
//! addressable.

use crate::adapter::ClusterAdapter;
use crate::lifecycle::LifecycleCoordinator;
use crate::query::ClusterQueryProtocol;
use crate::registry::{ClientSink, ConnectionId, ConnectionInfo};
use actix::{Actor, ActorContext, ActorFutureExt, AsyncContext, Handler, StreamHandler, WrapFuture};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use socket_gateway_core::error::GatewayError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// WebSocket connection heartbeat interval (30 seconds)
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Client timeout (60 seconds - 2 missed heartbeats)
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Event delivered to this client from the registry or a query result.
#[derive(actix::Message)]
#[rtype(result = "()")]
pub struct OutboundEvent(pub String);

/// WebSocket session actor
pub struct GatewaySession {
    info: ConnectionInfo,
    coordinator: Arc<LifecycleCoordinator>,
    adapter: Arc<ClusterAdapter>,
    query: Arc<ClusterQueryProtocol>,
    max_payload_bytes: usize,
    hb: Instant,
    sink: ClientSink,
    outbound: Option<mpsc::UnboundedReceiver<String>>,
}

impl GatewaySession {
    pub fn new(
        info: ConnectionInfo,
        coordinator: Arc<LifecycleCoordinator>,
        adapter: Arc<ClusterAdapter>,
        query: Arc<ClusterQueryProtocol>,
        max_payload_bytes: usize,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            info,
            coordinator,
            adapter,
            query,
            max_payload_bytes,
            hb: Instant::now(),
            sink: ClientSink::new(tx),
            outbound: Some(rx),
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.info.id
    }

    /// Start heartbeat process
    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                tracing::warn!(
                    connection_id = %act.info.id,
                    "Client heartbeat timeout, disconnecting"
                );
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    /// Bridge registry deliveries into this actor's mailbox.
    fn start_outbound_forwarder(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(mut rx) = self.outbound.take() else {
            return;
        };
        let addr = ctx.address();
        actix::spawn(async move {
            while let Some(text) = rx.recv().await {
                if addr.try_send(OutboundEvent(text)).is_err() {
                    break;
                }
            }
        });
    }

    /// Handle a parsed client message.
    fn handle_client_message(&mut self, msg: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        match msg {
            ClientMessage::Broadcast { room, payload } => {
                let adapter = self.adapter.clone();
                let namespace = self.info.namespace;
                let connection_id = self.info.id;
                actix::spawn(async move {
                    let result = match &room {
                        Some(room) => adapter.broadcast_to_room(namespace, room, payload).await,
                        None => adapter.broadcast_to_namespace(namespace, payload).await,
                    };
                    if let Err(e) = result {
                        tracing::warn!(
                            connection_id = %connection_id,
                            room = ?room,
                            error = %e,
                            "Broadcast rejected"
                        );
                    }
                });
            }
            ClientMessage::RoomMembers { rooms } => {
                let query = self.query.clone();
                let namespace = self.info.namespace;
                let connection_id = self.info.id;
                let addr = ctx.address();
                actix::spawn(async move {
                    match query.query_rooms(namespace, &rooms).await {
                        Ok(connection_ids) => {
                            let event = ServerEvent::RoomMembers { connection_ids };
                            match serde_json::to_string(&event) {
                                Ok(text) => {
                                    let _ = addr.try_send(OutboundEvent(text));
                                }
                                Err(e) => {
                                    tracing::error!(error = %e, "Failed to encode query result");
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!(
                                connection_id = %connection_id,
                                error = %e,
                                "Room membership query failed"
                            );
                        }
                    }
                });
            }
            ClientMessage::Ping => {
                ctx.pong(b"");
            }
            ClientMessage::Pong => {
                self.hb = Instant::now();
            }
        }
    }
}

impl Actor for GatewaySession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(
            connection_id = %self.info.id,
            namespace = %self.info.namespace,
            user_id = %self.info.auth.user_id,
            "WebSocket connection established"
        );

        self.start_heartbeat(ctx);
        self.start_outbound_forwarder(ctx);

        // Register with the coordinator before any client frame is
        // processed; a policy refusal closes the socket.
        let coordinator = self.coordinator.clone();
        let info = self.info.clone();
        let sink = self.sink.clone();
        ctx.wait(
            async move { coordinator.on_connect(info, sink).await }
                .into_actor(self)
                .map(|result, act, ctx| {
                    if let Err(e) = result {
                        tracing::warn!(
                            connection_id = %act.info.id,
                            error = %e,
                            "Connection refused during setup"
                        );
                        ctx.close(Some(ws::CloseCode::Policy.into()));
                        ctx.stop();
                    }
                }),
        );
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(connection_id = %self.info.id, "WebSocket connection closed");

        // The disconnecting report may already have run; both transitions
        // are guarded against repeats.
        let coordinator = self.coordinator.clone();
        let id = self.info.id;
        actix::spawn(async move {
            coordinator.on_disconnecting(id).await;
            coordinator.on_closed(id).await;
        });
    }
}

impl Handler<OutboundEvent> for GatewaySession {
    type Result = ();

    fn handle(&mut self, msg: OutboundEvent, ctx: &mut Self::Context) -> Self::Result {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for GatewaySession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                if text.len() > self.max_payload_bytes {
                    tracing::warn!(
                        connection_id = %self.info.id,
                        size = text.len(),
                        limit = self.max_payload_bytes,
                        "Frame exceeds payload cap, closing"
                    );
                    ctx.close(Some(ws::CloseCode::Size.into()));
                    ctx.stop();
                    return;
                }
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(msg) => self.handle_client_message(msg, ctx),
                    Err(e) => {
                        tracing::error!(
                            connection_id = %self.info.id,
                            error = %e,
                            "Failed to parse client message"
                        );
                    }
                }
            }
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!(connection_id = %self.info.id, "Binary frames not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::info!(connection_id = %self.info.id, reason = ?reason, "Close received");
                // Run the disconnecting transition while the connection is
                // still addressable, then finish closing.
                let coordinator = self.coordinator.clone();
                let id = self.info.id;
                ctx.wait(
                    async move { coordinator.on_disconnecting(id).await }
                        .into_actor(self)
                        .map(move |_, _act, ctx| {
                            ctx.close(reason);
                            ctx.stop();
                        }),
                );
            }
            Ok(ws::Message::Continuation(_)) => {
                tracing::warn!(connection_id = %self.info.id, "Continuation frames not supported");
            }
            Ok(ws::Message::Nop) => {}
            Err(e) => {
                let teardown = GatewayError::TransportTeardown(e.to_string());
                tracing::warn!(connection_id = %self.info.id, error = %teardown, "Protocol error, closing");
                ctx.stop();
            }
        }
    }
}

/// Messages clients send over the socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Broadcast a payload to a room, or the whole namespace when `room`
    /// is absent.
    Broadcast {
        #[serde(skip_serializing_if = "Option::is_none")]
        room: Option<String>,
        payload: serde_json::Value,
    },

    /// Ask which connection ids this process holds in these rooms.
    RoomMembers { rooms: Vec<String> },

    Ping,
    Pong,
}

/// Events the gateway sends to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    RoomMembers { connection_ids: Vec<ConnectionId> },
}
