use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use courier_proto::constants::{DEFAULT_MAX_CONNECTIONS, OFFLINE_MAX_AGE_HOURS};

/// Shipped secret for local development; deployments must override it.
pub const DEV_SHARED_SECRET: &str = "mysecrettoken";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_addr: SocketAddr,
    pub shared_secret: String,
    pub max_connections: usize,
    pub offline_max_age: Duration,
    pub database_path: Option<PathBuf>,
    pub heartbeat_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            shared_secret: DEV_SHARED_SECRET.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            offline_max_age: Duration::from_secs(OFFLINE_MAX_AGE_HOURS * 3600),
            database_path: None,
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(secret) = std::env::var("SHARED_SECRET") {
            if !secret.is_empty() {
                config.shared_secret = secret;
            }
        }

        if let Ok(val) = std::env::var("MAX_CONNECTIONS") {
            if let Ok(n) = val.parse::<usize>() {
                config.max_connections = n;
            } else {
                tracing::warn!(value = %val, "Invalid MAX_CONNECTIONS, using default");
            }
        }

        if let Ok(val) = std::env::var("OFFLINE_MAX_AGE_HOURS") {
            if let Ok(hours) = val.parse::<u64>() {
                config.offline_max_age = Duration::from_secs(hours * 3600);
            } else {
                tracing::warn!(value = %val, "Invalid OFFLINE_MAX_AGE_HOURS, using default");
            }
        }

        if let Ok(path) = std::env::var("DATABASE_PATH") {
            if !path.is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Ok(val) = std::env::var("HEARTBEAT_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                config.heartbeat_interval = Duration::from_secs(secs);
            } else {
                tracing::warn!(value = %val, "Invalid HEARTBEAT_SECS, using default");
            }
        }

        config
    }
}
