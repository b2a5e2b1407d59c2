//! # convsync-sync
//!
//! Runs the sync engine against the device database named by the
//! `CONVSYNC_*` environment variables.  With `CONVSYNC_AUTO_SYNC_SECS` set
//! it keeps syncing on that period until Ctrl+C; otherwise it runs a single
//! cycle and exits non-zero if anything failed.

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use convsync_engine::{ClientConfig, SyncEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,convsync_engine=debug")),
        )
        .init();

    info!("Starting convsync-sync v{}", env!("CARGO_PKG_VERSION"));

    let config = ClientConfig::from_env();
    if config.auth_token.is_empty() {
        warn!("CONVSYNC_AUTH_TOKEN is empty; the server will answer 401");
    }
    let engine = Arc::new(SyncEngine::connect(&config)?);

    if let Some(task) = engine.start_auto_sync() {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down");
        task.abort();
        return Ok(());
    }

    let report = engine.sync_now().await;
    if !report.is_clean() {
        anyhow::bail!("sync finished with errors: {}", report.errors.join("; "));
    }
    Ok(())
}
