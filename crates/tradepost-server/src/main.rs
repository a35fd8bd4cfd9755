//! # tradepost-server
//!
//! Messaging core for the Tradepost B2B marketplace.
//!
//! This binary provides:
//! - **WebSocket transport** for real-time direct and channel messages
//! - **Presence registry** mapping each online user to their connection
//! - **Fan-out engine** that persists a message, then pushes it to every
//!   online recipient
//! - **REST API** (axum) for conversation history, channels, contacts and
//!   file uploads
//! - **Per-IP and per-user rate limiting** to protect against abuse

mod api;
mod config;
mod error;
mod fanout;
mod identity;
mod presence;
mod rate_limit;
mod store;
mod uploads;
mod ws;

#[cfg(test)]
mod testing;

use tracing::info;
use tracing_subscriber::EnvFilter;

use tradepost_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::store::Store;
use crate::uploads::UploadStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tradepost_server=debug")),
        )
        .init();

    info!("Starting Tradepost server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    info!(
        instance = %config.instance_name,
        admin_enabled = config.admin_token.is_some(),
        "Instance settings"
    );

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = Database::open_at(&config.database_path)?;
    let store = Store::new(db);

    let uploads = UploadStore::new(config.upload_dir.clone(), config.max_upload_size).await?;

    let http_addr = config.http_addr;
    let app_state = AppState::new(config, store, uploads);

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Evict rate limiter buckets idle for more than 10 minutes, every 5 minutes.
    let ip_limiter = app_state.rate_limiter.clone();
    let event_limiter = app_state.event_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            ip_limiter.purge_stale(600.0).await;
            event_limiter.purge_stale(600.0).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP + WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
