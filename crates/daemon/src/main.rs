use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use towline_core::{
    load_config, spawn_refresh_loop, QueueManager, TrackerRefresher, TransferManager,
};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long the shutdown sequence may take before the process gives up on a
/// clean drain. Retries already in backoff are not interrupted early.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("TOWLINE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    info!("Configuration loaded successfully");
    info!("aria2 endpoint: {}", config.aria2.endpoint());
    info!("qBittorrent WebUI: {}", config.qbittorrent.url);
    info!(
        "Queue limits: {:?} downloads, {:?} uploads",
        config.queue.max_downloads, config.queue.max_uploads
    );

    let queue = Arc::new(QueueManager::new(&config.queue));
    let manager = Arc::new(TransferManager::new());
    manager.initiate(&config).await;

    let (shutdown_tx, _) = broadcast::channel(1);
    let tracker_loop = spawn_refresh_loop(
        TrackerRefresher::new(&config.trackers, queue.clone()),
        manager.clone(),
        &config.trackers,
        shutdown_tx.subscribe(),
    );

    info!("Towline v{} started", VERSION);

    signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received, draining");

    // No new admissions or scheduled work; in-flight transfers drain.
    queue.stop();
    let _ = shutdown_tx.send(());

    let drain = async {
        if let Err(e) = manager.pause_all().await {
            warn!("Pause during shutdown failed :: {}", e);
        }
        manager.close_all().await;
    };
    if timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!("Shutdown grace period elapsed before backends closed");
    }

    let _ = tracker_loop.await;
    info!("Towline stopped");
    Ok(())
}
