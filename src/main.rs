//! `pos-sync`: headless order sync daemon.
//!
//! Opens the local order database, then runs the background sync loop
//! against the order service named by `POS_SYNC_BASE_URL` until Ctrl-C.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use small_pos_order_sync::{
    config, db, logging, HttpConnectivity, HttpOrderService, OrderStore, RemoteConfig,
    RetryQueue, SyncConfig, SyncEngine, SyncListener, SyncLoop, SyncResult,
};

#[tokio::main]
async fn main() -> Result<()> {
    let data_dir = config::data_dir();
    let _log_guard = logging::init(&data_dir.join("logs"));

    info!("Starting pos-sync v{}", env!("CARGO_PKG_VERSION"));

    let remote_config = RemoteConfig::from_env().with_context(|| {
        format!("{} must be set to the order service URL", config::ENV_BASE_URL)
    })?;

    let db = Arc::new(
        db::init(&data_dir)
            .with_context(|| format!("failed to open database in {}", data_dir.display()))?,
    );
    let sync_config = {
        let conn = db.lock()?;
        SyncConfig::load(&conn)
    };
    info!(
        base_url = %remote_config.base_url,
        interval_secs = sync_config.interval_secs,
        "Sync configuration loaded"
    );

    let remote = HttpOrderService::new(
        remote_config.clone(),
        Duration::from_secs(sync_config.request_timeout_secs),
    )?;
    let connectivity = HttpConnectivity::new(
        &remote_config,
        Duration::from_secs(sync_config.health_timeout_secs),
    );

    let store = OrderStore::new(db.clone()).with_id_attempts(sync_config.id_max_attempts);
    let queue = RetryQueue::new(db).with_backoff(sync_config.backoff_secs.clone());
    let engine = Arc::new(
        SyncEngine::new(store, queue, Arc::new(remote))
            .with_stale_syncing_after(sync_config.interval()),
    );

    let summary = engine.store().sync_summary()?;
    info!(
        local = summary.local,
        error = summary.error,
        queued = summary.queued,
        "Pending orders at startup"
    );

    let sync_loop = SyncLoop::new(engine, Arc::new(connectivity), sync_config.interval());
    let log_results: SyncListener = Arc::new(|results: &[SyncResult]| {
        for result in results.iter().filter(|r| !r.success) {
            warn!(
                frontend_id = %result.frontend_id,
                error = result.error.as_deref().unwrap_or("unknown"),
                "Order still pending"
            );
        }
    });
    sync_loop.start(Some(log_results));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown requested");
    sync_loop.stop().await;

    Ok(())
}
