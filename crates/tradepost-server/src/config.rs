//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use tradepost_shared::constants::{DEFAULT_HTTP_PORT, MAX_UPLOAD_SIZE};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP and WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8747`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./tradepost.db`
    pub database_path: PathBuf,

    /// Directory uploaded files are written to and served from.
    /// Env: `UPLOAD_DIR`
    /// Default: `./uploads`
    pub upload_dir: PathBuf,

    /// Maximum upload size in bytes.
    /// Env: `MAX_UPLOAD_SIZE`
    /// Default: 50 MiB
    pub max_upload_size: usize,

    /// Origin allowed by CORS. `None` allows any origin without credentials.
    /// Env: `CORS_ORIGIN`
    pub cors_origin: Option<String>,

    /// Admin API bearer token. Required to access /admin/* endpoints.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (admin API disabled).
    pub admin_token: Option<String>,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    pub instance_name: String,

    /// Capacity of each connection's outbound event queue.
    /// Env: `OUTBOUND_BUFFER`
    /// Default: `64`
    pub outbound_buffer: usize,

    /// Seconds between WebSocket pings.
    /// Env: `WS_PING_INTERVAL_SECS`
    /// Default: `30`
    pub ws_ping_interval_secs: u64,

    /// Sustained real-time events per second, per user.
    /// Env: `EVENT_RATE`
    /// Default: `5`
    pub event_rate: f64,

    /// Real-time event burst per user.
    /// Env: `EVENT_BURST`
    /// Default: `20`
    pub event_burst: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./tradepost.db"),
            upload_dir: PathBuf::from("./uploads"),
            max_upload_size: MAX_UPLOAD_SIZE,
            cors_origin: None,
            admin_token: None,
            instance_name: "Tradepost".to_string(),
            outbound_buffer: 64,
            ws_ping_interval_secs: 30,
            event_rate: 5.0,
            event_burst: 20.0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = var("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(path) = var("UPLOAD_DIR") {
            config.upload_dir = PathBuf::from(path);
        }

        parse_into(&var, "MAX_UPLOAD_SIZE", &mut config.max_upload_size);

        if let Some(origin) = var("CORS_ORIGIN") {
            if !origin.is_empty() && origin != "*" {
                config.cors_origin = Some(origin);
            }
        }

        if let Some(token) = var("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        if let Some(name) = var("INSTANCE_NAME") {
            config.instance_name = name;
        }

        parse_into(&var, "OUTBOUND_BUFFER", &mut config.outbound_buffer);
        // mpsc::channel panics on a zero capacity.
        config.outbound_buffer = config.outbound_buffer.max(1);

        parse_into(&var, "WS_PING_INTERVAL_SECS", &mut config.ws_ping_interval_secs);
        config.ws_ping_interval_secs = config.ws_ping_interval_secs.max(1);

        parse_into(&var, "EVENT_RATE", &mut config.event_rate);
        parse_into(&var, "EVENT_BURST", &mut config.event_burst);

        config
    }
}

/// Overwrite `target` with the parsed value of `key`, if set and valid.
fn parse_into<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    let Some(raw) = var(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!(key, value = %raw, "Invalid value, using default"),
    }
}
