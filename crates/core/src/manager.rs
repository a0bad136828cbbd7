//! Transfer facade.
//!
//! The single object the rest of the system calls to drive both transfer
//! engines: lifecycle (`initiate`/`close_all`), bulk operations fanned out
//! concurrently to both backends, aggregate throughput, and option
//! propagation. Backends live behind explicit init/teardown slots rather
//! than implicit globals so tests can substitute fakes per run.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use crate::backend::{
    Aria2Backend, Backend, BackendError, GlobalStats, QbBackend, RetryingBackend, Transfer,
};
use crate::config::Config;

/// Placeholder path prefix aria2 uses for metadata-only downloads.
pub const METADATA_PREFIX: &str = "[METADATA]";

/// Per-transfer-only option keys that must never be pushed as global
/// defaults.
const TRANSFER_ONLY_KEYS: [&str; 5] = ["checksum", "index-out", "out", "pause", "select-file"];

/// Window used when listing the engine-side waiting queue.
const WAITING_WINDOW: u32 = 1000;

/// Which engine a facade operation was addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// The aria2 JSON-RPC engine.
    RpcEngine,
    /// The qBittorrent HTTP client.
    HttpClient,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::RpcEngine => write!(f, "aria2"),
            BackendKind::HttpClient => write!(f, "qbittorrent"),
        }
    }
}

/// Errors surfaced at the facade boundary.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The backend failed to initialize and every operation on it fails
    /// fast until the next `initiate`.
    #[error("{0} backend is unavailable")]
    BackendUnavailable(BackendKind),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Aggregate throughput over both backends, bytes/second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Speeds {
    pub download: u64,
    pub upload: u64,
}

/// Facade over both transfer engines.
pub struct TransferManager {
    rpc: RwLock<Option<Arc<dyn Backend>>>,
    http: RwLock<Option<Arc<dyn Backend>>>,
    /// Last-known aggregate speeds, readable without touching a backend.
    speeds: RwLock<Speeds>,
    /// Last-applied global option values, read when new transfers are
    /// submitted to seed consistent defaults. Written only by
    /// [`TransferManager::change_option`].
    options: RwLock<HashMap<String, String>>,
}

impl Default for TransferManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferManager {
    pub fn new() -> Self {
        Self {
            rpc: RwLock::new(None),
            http: RwLock::new(None),
            speeds: RwLock::new(Speeds::default()),
            options: RwLock::new(HashMap::new()),
        }
    }

    /// Build a facade over pre-constructed backends (tests).
    pub fn with_backends(
        rpc: Option<Arc<dyn Backend>>,
        http: Option<Arc<dyn Backend>>,
    ) -> Self {
        Self {
            rpc: RwLock::new(rpc),
            http: RwLock::new(http),
            speeds: RwLock::new(Speeds::default()),
            options: RwLock::new(HashMap::new()),
        }
    }

    /// Establish both backend connections, wrapping each in the retry
    /// proxy. A backend that fails to connect is logged and left
    /// unavailable; operations on it fail fast with
    /// [`TransferError::BackendUnavailable`] instead of an ambiguous fault
    /// on first use. Calling again re-attempts the failed connections.
    pub async fn initiate(&self, config: &Config) {
        match Aria2Backend::connect(&config.aria2).await {
            Ok(backend) => {
                let mut slot = self.rpc.write().await;
                *slot = Some(Arc::new(RetryingBackend::new(backend)));
            }
            Err(e) => {
                error!("Failed to initialize aria2 :: {}", e);
            }
        }

        match QbBackend::connect(config.qbittorrent.clone()).await {
            Ok(backend) => {
                let mut slot = self.http.write().await;
                *slot = Some(Arc::new(RetryingBackend::new(backend)));
            }
            Err(e) => {
                error!("Failed to initialize qbittorrent :: {}", e);
            }
        }
    }

    async fn rpc_backend(&self) -> Result<Arc<dyn Backend>, TransferError> {
        self.rpc
            .read()
            .await
            .clone()
            .ok_or(TransferError::BackendUnavailable(BackendKind::RpcEngine))
    }

    async fn http_backend(&self) -> Result<Arc<dyn Backend>, TransferError> {
        self.http
            .read()
            .await
            .clone()
            .ok_or(TransferError::BackendUnavailable(BackendKind::HttpClient))
    }

    /// Shut down both backends concurrently; a failure on one never
    /// prevents shutdown of the other.
    pub async fn close_all(&self) {
        let rpc = self.rpc.write().await.take();
        let http = self.http.write().await.take();

        let close_rpc = async {
            if let Some(backend) = rpc {
                if let Err(e) = backend.close().await {
                    warn!("Failed to close aria2 :: {}", e);
                }
            }
        };
        let close_http = async {
            if let Some(backend) = http {
                if let Err(e) = backend.close().await {
                    warn!("Failed to close qbittorrent :: {}", e);
                }
            }
        };
        tokio::join!(close_rpc, close_http);
    }

    /// Issue pause to both backends concurrently. Both are attempted even
    /// when one fails; the first fault is returned after the join.
    pub async fn pause_all(&self) -> Result<(), TransferError> {
        let rpc = self.rpc_backend().await;
        let http = self.http_backend().await;

        let pause_rpc = async {
            match &rpc {
                Ok(backend) => backend.pause_all().await.map_err(TransferError::from),
                Err(_) => Err(TransferError::BackendUnavailable(BackendKind::RpcEngine)),
            }
        };
        let pause_http = async {
            match &http {
                Ok(backend) => backend.pause_all().await.map_err(TransferError::from),
                Err(_) => Err(TransferError::BackendUnavailable(BackendKind::HttpClient)),
            }
        };

        let (r1, r2) = tokio::join!(pause_rpc, pause_http);
        r1.and(r2)
    }

    /// Pause everything, wipe both backends, then mop up stragglers.
    ///
    /// The mop-up re-lists active and waiting transfers on the RPC engine
    /// and force-removes whatever pause had not yet caught, tolerating
    /// already-gone items so one raced removal never aborts the batch.
    pub async fn remove_all(&self) -> Result<(), TransferError> {
        if let Err(e) = self.pause_all().await {
            warn!("Pause before remove_all failed :: {}", e);
        }

        let rpc = self.rpc_backend().await;
        let http = self.http_backend().await;
        if rpc.is_err() && http.is_err() {
            return Err(TransferError::BackendUnavailable(BackendKind::RpcEngine));
        }

        let purge_rpc = async {
            if let Ok(backend) = &rpc {
                if let Err(e) = backend.purge_results().await {
                    warn!("Failed to purge aria2 results :: {}", e);
                }
            }
        };
        let purge_http = async {
            if let Ok(backend) = &http {
                if let Err(e) = backend.purge_results().await {
                    warn!("Failed to wipe qbittorrent :: {}", e);
                }
            }
        };
        tokio::join!(purge_rpc, purge_http);

        if let Ok(backend) = rpc {
            for transfer in self.list_rpc_transfers(&backend).await {
                if let Err(e) = backend.remove(&transfer.id).await {
                    // Typically a race with pause propagation or a
                    // concurrent removal; the item is gone either way.
                    debug!("Straggler {} removal failed :: {}", transfer.id, e);
                }
            }
        }

        Ok(())
    }

    /// Active plus waiting transfers on the RPC engine, best-effort.
    async fn list_rpc_transfers(&self, backend: &Arc<dyn Backend>) -> Vec<Transfer> {
        let (active, waiting) =
            tokio::join!(backend.list_active(), backend.list_waiting(0, WAITING_WINDOW));

        let mut transfers = Vec::new();
        match active {
            Ok(list) => transfers.extend(list),
            Err(e) => warn!("Failed to list active transfers :: {}", e),
        }
        match waiting {
            Ok(list) => transfers.extend(list),
            Err(e) => warn!("Failed to list waiting transfers :: {}", e),
        }
        transfers
    }

    /// Query both backends concurrently and sum their throughput counters.
    ///
    /// A backend that is unavailable, unreachable or returns garbage
    /// contributes zero; this feeds the status path and never fails.
    pub async fn overall_speed(&self) -> Speeds {
        let rpc = self.rpc_backend().await;
        let http = self.http_backend().await;

        let stats_of = |backend: Result<Arc<dyn Backend>, TransferError>| async move {
            match backend {
                Ok(backend) => match backend.global_stats().await {
                    Ok(stats) => stats,
                    Err(e) => {
                        warn!("Failed to read {} stats :: {}", backend.name(), e);
                        GlobalStats::default()
                    }
                },
                Err(_) => GlobalStats::default(),
            }
        };

        let (s1, s2) = tokio::join!(stats_of(rpc), stats_of(http));
        let speeds = Speeds {
            download: s1.download_speed.saturating_add(s2.download_speed),
            upload: s1.upload_speed.saturating_add(s2.upload_speed),
        };

        *self.speeds.write().await = speeds;
        speeds
    }

    /// Last-known aggregate speeds without touching a backend.
    pub async fn speed_snapshot(&self) -> Speeds {
        *self.speeds.read().await
    }

    /// Push an option to every non-terminal transfer on the RPC engine.
    ///
    /// Per-transfer failures are logged and skipped; a concurrent path may
    /// already have completed or removed the item. Unless `key` is one of
    /// the per-transfer-only keys, the value is also pushed as the engine's
    /// global default and recorded in the option cache so future
    /// submissions inherit it.
    pub async fn change_option(&self, key: &str, value: &str) -> Result<(), TransferError> {
        let backend = self.rpc_backend().await?;

        let transfers = self.list_rpc_transfers(&backend).await;
        let pending: Vec<&Transfer> = transfers
            .iter()
            .filter(|t| !t.status.is_terminal())
            .collect();

        let results = futures::future::join_all(
            pending
                .iter()
                .map(|t| backend.set_option(&t.id, key, value)),
        )
        .await;
        for (transfer, result) in pending.iter().zip(results) {
            if let Err(e) = result {
                error!(
                    "Failed to set {}={} on transfer {} :: {}",
                    key, value, transfer.id, e
                );
            }
        }

        if !TRANSFER_ONLY_KEYS.contains(&key) {
            backend.set_global_option(key, value).await?;
            self.options
                .write()
                .await
                .insert(key.to_string(), value.to_string());
        }

        Ok(())
    }

    /// Last-applied value of a global option.
    pub async fn option(&self, key: &str) -> Option<String> {
        self.options.read().await.get(key).cloned()
    }

    /// Snapshot of every cached global option, for seeding new submissions.
    pub async fn options_snapshot(&self) -> HashMap<String, String> {
        self.options.read().await.clone()
    }
}

/// Derive the display name of a transfer.
///
/// Prefers the BitTorrent metadata name. A metadata-only placeholder path
/// is returned verbatim. Otherwise the name is the first path segment of
/// the first file below the save directory, or empty when nothing applies.
pub fn transfer_name(transfer: &Transfer) -> String {
    if let Some(name) = transfer.metadata_name.as_deref() {
        if !name.is_empty() {
            return name.to_string();
        }
    }

    let Some(first) = transfer.files.first() else {
        return String::new();
    };
    if first.path.starts_with(METADATA_PREFIX) {
        return first.path.clone();
    }

    match first.path.strip_prefix(&transfer.save_dir) {
        Some(relative) => relative
            .trim_start_matches('/')
            .split('/')
            .next()
            .unwrap_or_default()
            .to_string(),
        None => String::new(),
    }
}

/// Whether a transfer only fetches torrent metadata, not content.
pub fn is_metadata_only(transfer: &Transfer) -> bool {
    transfer
        .files
        .iter()
        .any(|f| f.path.starts_with(METADATA_PREFIX))
}
