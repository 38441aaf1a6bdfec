use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use courier_call::TokenValidator;
use courier_hub::{Dispatcher, Hub};
use courier_proto::Envelope;

use crate::config::ServerConfig;
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub dispatcher: Arc<Dispatcher>,
    pub config: Arc<ServerConfig>,
    pub validator: Arc<dyn TokenValidator>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/broadcast", post(broadcast_announcement))
        .route("/ws", get(ws::websocket_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "HTTP server listening");
    axum::serve(listener, router).await?;
    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    connections: usize,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        connections: state.hub.connection_count(),
    })
}

#[derive(Deserialize)]
struct BroadcastParams {
    message: Option<String>,
}

/// Admin announcement: enqueue a system message to every socket.
async fn broadcast_announcement(
    State(state): State<AppState>,
    Query(params): Query<BroadcastParams>,
) -> (StatusCode, &'static str) {
    let message = params
        .message
        .unwrap_or_else(|| "Test broadcast from HTTP endpoint".to_string());

    state.hub.broadcast_message(&Envelope::system(json!({
        "message": message,
        "timestamp": chrono::Utc::now().timestamp(),
        "source": "http_endpoint",
        "type": "announcement",
    })));

    (StatusCode::OK, "Broadcast sent")
}
