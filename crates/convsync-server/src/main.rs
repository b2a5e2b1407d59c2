//! # convsync-server
//!
//! HTTP backend for conversation sync:
//! - **Blob store**: one JSON blob per conversation, in per-owner
//!   directories on disk
//! - **Metadata registry**: SQLite catalog of each owner's conversations and
//!   the version last accepted for each
//! - **REST API** (axum) with bearer-token auth and per-owner rate limiting

mod api;
mod auth;
mod blob_store;
mod config;
mod conversations;
mod error;
mod rate_limit;
mod registry;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::auth::TokenAuthenticator;
use crate::blob_store::BlobStore;
use crate::config::ServerConfig;
use crate::conversations::ConversationService;
use crate::rate_limit::RateLimiter;
use crate::registry::SqliteRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,convsync_server=debug")),
        )
        .init();

    info!("Starting convsync server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    if config.auth_tokens.is_empty() {
        warn!("AUTH_TOKENS is empty; every protected route will answer 401");
    }

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let blob_store = Arc::new(
        BlobStore::new(config.blob_storage_path.clone(), config.max_blob_size).await?,
    );

    let registry = SqliteRegistry::open(&config.registry_db_path)?;
    info!(path = %config.registry_db_path.display(), "Metadata registry opened");

    let rate_limiter = RateLimiter::new(config.rate_limit_per_sec, config.rate_limit_burst);

    let app_state = AppState {
        blob_store,
        conversations: ConversationService::new(Arc::new(registry)),
        auth: TokenAuthenticator::new(&config.auth_tokens),
        rate_limiter: rate_limiter.clone(),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Every 5 minutes, evict buckets idle for more than 10 minutes.
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            rate_limiter.purge_stale(600.0).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server until it fails or Ctrl+C arrives
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
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
