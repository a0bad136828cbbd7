//! Periodic tracker-list maintenance.
//!
//! Refetches BitTorrent announce endpoints from the configured sources,
//! rebuilds the in-memory list plus its serialized option value, and stores
//! both under the admission controller's status lock. The refreshed value
//! is then propagated through the facade's option path so running transfers
//! and future submissions pick it up.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::TrackerConfig;
use crate::manager::TransferManager;
use crate::queue::QueueManager;

/// The backend option carrying the announce list.
const TRACKER_OPTION_KEY: &str = "bt-tracker";

/// Fetches and rebuilds the announce list.
pub struct TrackerRefresher {
    client: Client,
    sources: Vec<String>,
    queue: Arc<QueueManager>,
}

impl TrackerRefresher {
    pub fn new(config: &TrackerConfig, queue: Arc<QueueManager>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            sources: config.sources.clone(),
            queue,
        }
    }

    /// Fetch every source, skipping the ones that fail, and store the
    /// deduplicated list. Returns the serialized option value when at
    /// least one announce URL was collected; the previous list is kept
    /// otherwise.
    pub async fn refresh(&self) -> Option<String> {
        let mut seen = HashSet::new();
        let mut trackers = Vec::new();

        for source in &self.sources {
            let body = match self.fetch_source(source).await {
                Ok(body) => body,
                Err(e) => {
                    warn!("Tracker source {} failed :: {}", source, e);
                    continue;
                }
            };
            for tracker in parse_tracker_list(&body) {
                if seen.insert(tracker.clone()) {
                    trackers.push(tracker);
                }
            }
        }

        if trackers.is_empty() {
            warn!("Tracker refresh collected nothing; keeping previous list");
            return None;
        }

        let serialized = trackers.join(",");
        info!("Tracker list refreshed: {} endpoints", trackers.len());
        self.queue.set_trackers(trackers, serialized.clone()).await;
        Some(serialized)
    }

    async fn fetch_source(&self, source: &str) -> Result<String, reqwest::Error> {
        self.client
            .get(source)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }
}

/// One announce URL per line; blanks ignored.
fn parse_tracker_list(body: &str) -> impl Iterator<Item = String> + '_ {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
}

/// Spawn the low-frequency refresh loop: first run shortly after startup,
/// then every `refresh_interval_hours`. The loop skips work while the stop
/// flag is set and exits on the shutdown signal.
pub fn spawn_refresh_loop(
    refresher: TrackerRefresher,
    manager: Arc<TransferManager>,
    config: &TrackerConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    let initial_delay = Duration::from_secs(config.initial_delay_secs as u64);
    let interval = Duration::from_secs(config.refresh_interval_hours as u64 * 3600);

    tokio::spawn(async move {
        info!("Tracker refresh loop started");
        let mut delay = initial_delay;
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Tracker refresh loop received shutdown signal");
                    break;
                }
                _ = sleep(delay) => {
                    delay = interval;
                    if refresher.queue.is_stopped() {
                        continue;
                    }
                    let Some(serialized) = refresher.refresh().await else {
                        continue;
                    };
                    if let Err(e) = manager
                        .change_option(TRACKER_OPTION_KEY, &serialized)
                        .await
                    {
                        warn!("Failed to propagate refreshed tracker list :: {}", e);
                    }
                }
            }
        }
    })
}
