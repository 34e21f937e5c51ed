//! HTTP server for the socket gateway
//!
//! Endpoints:
//! - GET /health - Health check with cluster adapter snapshot
//! - GET /ws/{namespace} - WebSocket connection handshake
//!
//! The handshake extracts identity material before upgrading: the user id
//! from the `userId` query parameter and the session token from the `token`
//! cookie. A request carrying no identity material at all is refused with
//! 401 before the upgrade; a request carrying only part of it is upgraded
//! and then immediately closed, so the client sees a policy close rather
//! than a broken handshake.

use crate::adapter::ClusterAdapter;
use crate::lifecycle::{AuthCandidate, LifecycleCoordinator, RoomPolicy};
use crate::namespace::Namespace;
use crate::pubsub::PubSubChannel;
use crate::query::ClusterQueryProtocol;
use crate::registry::{ConnectionInfo, ConnectionRegistry};
use crate::session::GatewaySession;
use actix::{Actor, ActorContext, StreamHandler};
use actix_web::http::StatusCode;
use actix_web::{get, web, App, HttpRequest, HttpResponse, HttpServer, Responder, Result};
use actix_web_actors::ws;
use serde::Deserialize;
use socket_gateway_core::config::{GatewayConfig, ServiceConfig};
use socket_gateway_core::error::GatewayError;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Server state shared across handlers
pub struct GatewayState {
    pub registry: Arc<ConnectionRegistry>,
    pub adapter: Arc<ClusterAdapter>,
    pub coordinator: Arc<LifecycleCoordinator>,
    pub query: Arc<ClusterQueryProtocol>,
    pub config: GatewayConfig,
}

impl GatewayState {
    /// Wire the registry, cluster adapter, query protocol, and lifecycle
    /// coordinator onto one broker.
    pub async fn build(
        broker: Arc<dyn PubSubChannel>,
        policy: Arc<dyn RoomPolicy>,
        config: GatewayConfig,
    ) -> std::result::Result<Self, GatewayError> {
        let registry = Arc::new(ConnectionRegistry::new());
        let adapter =
            ClusterAdapter::start(registry.clone(), broker.clone(), config.clone()).await?;
        let query = ClusterQueryProtocol::start(
            registry.clone(),
            broker,
            &config,
            adapter.node_id(),
        )
        .await?;
        let coordinator = Arc::new(LifecycleCoordinator::new(
            registry.clone(),
            adapter.clone(),
            policy,
        ));

        Ok(Self {
            registry,
            adapter,
            coordinator,
            query,
            config,
        })
    }
}

#[derive(Debug, Deserialize)]
struct HandshakeQuery {
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

/// Health check endpoint
#[get("/health")]
async fn health_check(state: web::Data<GatewayState>) -> impl Responder {
    let snapshot = state.adapter.health();
    let status =
        StatusCode::from_u16(snapshot.status.http_status_code()).unwrap_or(StatusCode::OK);
    HttpResponse::build(status).json(snapshot)
}

/// WebSocket connection endpoint
#[get("/ws/{namespace}")]
async fn websocket(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<String>,
    handshake: web::Query<HandshakeQuery>,
    state: web::Data<GatewayState>,
) -> Result<HttpResponse> {
    let Ok(namespace) = Namespace::from_str(&path) else {
        return Ok(HttpResponse::NotFound().json(serde_json::json!({
            "error": format!("Unknown namespace '{}'", path)
        })));
    };

    let candidate = AuthCandidate {
        user_id: handshake.user_id.clone(),
        session_token: req.cookie("token").map(|c| c.value().to_string()),
    };

    if candidate.is_empty() {
        return Ok(HttpResponse::Unauthorized().json(serde_json::json!({
            "error": "Missing identity material"
        })));
    }

    let auth = match candidate.bind() {
        Ok(auth) => auth,
        Err(e) => {
            tracing::warn!(namespace = %namespace, error = %e, "Refusing partially identified connection");
            return ws::start(RefusedSession, &req, stream);
        }
    };

    let info = ConnectionInfo {
        id: Uuid::new_v4(),
        namespace,
        auth,
    };
    let session = GatewaySession::new(
        info,
        state.coordinator.clone(),
        state.adapter.clone(),
        state.query.clone(),
        state.config.max_payload_bytes,
    );
    ws::start(session, &req, stream)
}

/// Session that completes the upgrade only to close it with a policy
/// code. Used when identity material is present but incomplete.
struct RefusedSession;

impl Actor for RefusedSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        ctx.close(Some(ws::CloseCode::Policy.into()));
        ctx.stop();
    }
}

impl StreamHandler<std::result::Result<ws::Message, ws::ProtocolError>> for RefusedSession {
    fn handle(
        &mut self,
        _msg: std::result::Result<ws::Message, ws::ProtocolError>,
        _ctx: &mut Self::Context,
    ) {
    }
}

/// Start the gateway server
pub async fn start_server(
    service_config: &ServiceConfig,
    state: web::Data<GatewayState>,
) -> std::io::Result<()> {
    tracing::info!(
        host = %service_config.host,
        port = service_config.port,
        "Starting socket gateway service"
    );

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .service(health_check)
            .service(websocket)
    })
    .bind((service_config.host.as_str(), service_config.port))?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{NullRoomPolicy, PolicyError};
    use crate::pubsub::MemoryBroker;
    use actix_web::{test, App};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn test_state() -> web::Data<GatewayState> {
        test_state_with(Arc::new(NullRoomPolicy)).await
    }

    async fn test_state_with(policy: Arc<dyn RoomPolicy>) -> web::Data<GatewayState> {
        let broker: Arc<dyn PubSubChannel> = Arc::new(MemoryBroker::new());
        let state = GatewayState::build(broker, policy, GatewayConfig::default())
            .await
            .unwrap();
        web::Data::new(state)
    }

    #[derive(Default)]
    struct CountingPolicy {
        invocations: AtomicUsize,
    }

    #[async_trait]
    impl RoomPolicy for CountingPolicy {
        async fn save_user_language(&self, _info: &ConnectionInfo) -> Result<(), PolicyError> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn join_rooms(&self, _info: &ConnectionInfo) -> Result<Vec<String>, PolicyError> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        }

        async fn leave_rooms(&self, _info: &ConnectionInfo) -> Result<(), PolicyError> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[actix_web::test]
    async fn test_health_check() {
        let state = test_state().await;
        let app =
            test::init_service(App::new().app_data(state.clone()).service(health_check)).await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn test_websocket_unknown_namespace() {
        let state = test_state().await;
        let app = test::init_service(App::new().app_data(state.clone()).service(websocket)).await;

        let req = test::TestRequest::get().uri("/ws/lobby").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_websocket_without_identity_is_unauthorized() {
        let state = test_state().await;
        let app = test::init_service(App::new().app_data(state.clone()).service(websocket)).await;

        let req = test::TestRequest::get().uri("/ws/room").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn test_websocket_with_partial_identity_is_not_unauthorized() {
        let state = test_state().await;
        let app = test::init_service(App::new().app_data(state.clone()).service(websocket)).await;

        // Carries a user id but no token cookie. The refusal happens after
        // the upgrade, so the plain GET fails the handshake instead of
        // getting a 401.
        let req = test::TestRequest::get()
            .uri("/ws/room?userId=u1")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_ne!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_ne!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_refused_partial_identity_never_reaches_room_policy() {
        let policy = Arc::new(CountingPolicy::default());
        let state = test_state_with(policy.clone()).await;
        let app = test::init_service(App::new().app_data(state.clone()).service(websocket)).await;

        let req = test::TestRequest::get()
            .uri("/ws/room?userId=u1")
            .to_request();
        let _resp = test::call_service(&app, req).await;

        // The refusal path must never register the connection or run any
        // arrival or departure hook.
        assert_eq!(policy.invocations.load(Ordering::SeqCst), 0);
        assert_eq!(state.registry.connection_count(), 0);
    }
}
