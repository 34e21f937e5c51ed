/// Socket Gateway Service
///
/// Distributed WebSocket connection gateway:
/// - Namespace-separated connections and rooms
/// - Redis pub/sub cluster adapter with local-first delivery
/// - Cross-instance room membership queries with bounded collection
/// - Connection lifecycle coordination with application room policy hooks
pub mod adapter;
pub mod lifecycle;
pub mod namespace;
pub mod protocol;
pub mod pubsub;
pub mod query;
pub mod registry;
pub mod server;
pub mod session;

pub use adapter::ClusterAdapter;
pub use lifecycle::{
    AuthCandidate, ConnectionState, LifecycleCoordinator, NullRoomPolicy, PolicyError, RoomPolicy,
};
pub use namespace::Namespace;
pub use protocol::{ClusterMessage, ClusterOp};
pub use pubsub::{MemoryBroker, MessageHandler, PubSubChannel, RedisPubSub};
pub use query::ClusterQueryProtocol;
pub use registry::{AuthIdentity, ClientSink, ConnectionId, ConnectionInfo, ConnectionRegistry};
pub use server::{start_server, GatewayState};
pub use session::{ClientMessage, GatewaySession, ServerEvent};

/// Initialize tracing for the gateway service
pub fn init_tracing(default_level: &str) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!(
                    "socket_gateway={0},socket_gateway_core={0}",
                    default_level
                ))
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
