mod api;
mod config;
mod ws;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use courier_call::{CallManager, StaticTokenValidator, TokenValidator};
use courier_hub::{Dispatcher, Hub, MemoryOfflineStore, OfflineStore};
use courier_proto::Envelope;
use courier_store::Database;

use crate::api::AppState;
use crate::config::{ServerConfig, DEV_SHARED_SECRET};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,courier_server=debug")),
        )
        .init();

    info!("Starting courier hub v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env();
    info!(
        addr = %config.http_addr,
        max_connections = config.max_connections,
        persistence = config.database_path.is_some(),
        "Loaded configuration"
    );
    if config.shared_secret == DEV_SHARED_SECRET {
        warn!("running with the development shared secret; set SHARED_SECRET before exposing this server");
    }

    let db = match &config.database_path {
        Some(path) => Some(Arc::new(Mutex::new(Database::open_at(path)?))),
        None => {
            info!("no DATABASE_PATH provided, running without call persistence");
            None
        }
    };

    let offline = Arc::new(MemoryOfflineStore::new(config.offline_max_age));
    let hub = Arc::new(Hub::new(
        config.max_connections,
        offline.clone() as Arc<dyn OfflineStore>,
    ));

    // Placeholder validator: every non-empty token maps to one user id.
    // Deployments plug their identity provider in here; the same
    // instance backs both the websocket handshake and in-call auth.
    let validator: Arc<dyn TokenValidator> = Arc::new(StaticTokenValidator::new("user123"));
    let call_manager = Arc::new(CallManager::new(validator.clone(), db));
    let dispatcher = Arc::new(Dispatcher::new(hub.clone(), call_manager));

    hub.on_connect(|socket| {
        socket.send_message(&Envelope::system(json!({
            "type": "welcome",
            "message": "Connected to courier",
            "id": socket.id(),
        })));
    });

    // Periodic heartbeat so idle clients see a live server.
    let heartbeat_hub = hub.clone();
    let heartbeat_interval = config.heartbeat_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(heartbeat_interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            heartbeat_hub.broadcast_message(&Envelope::system(json!({
                "type": "heartbeat",
                "timestamp": chrono::Utc::now().timestamp(),
                "connections": heartbeat_hub.connection_count(),
            })));
        }
    });

    // Offline spool eviction every hour.
    let eviction_store = offline.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        interval.tick().await;
        loop {
            interval.tick().await;
            match eviction_store.evict_expired() {
                Ok(0) => {}
                Ok(evicted) => info!(evicted, "evicted expired offline messages"),
                Err(error) => warn!(%error, "offline eviction failed"),
            }
        }
    });

    let state = AppState {
        hub,
        dispatcher,
        config: Arc::new(config.clone()),
        validator,
    };

    tokio::select! {
        result = api::serve(state, config.http_addr) => {
            if let Err(error) = &result {
                tracing::error!(%error, "HTTP server failed");
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    }
}
