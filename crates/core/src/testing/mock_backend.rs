//! Mock backend for testing.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::backend::{
    Backend, BackendError, GlobalStats, Transfer, TransferFile, TransferStatus,
};

/// Build a minimal transfer descriptor for tests.
pub fn make_transfer(id: &str, status: TransferStatus) -> Transfer {
    Transfer {
        id: id.to_string(),
        status,
        metadata_name: None,
        files: vec![TransferFile {
            path: format!("/downloads/{}/file.bin", id),
        }],
        save_dir: "/downloads".to_string(),
        total_bytes: 1000,
        completed_bytes: 0,
        download_speed: 0,
        upload_speed: 0,
    }
}

/// Mock implementation of the `Backend` trait.
///
/// Provides controllable behavior for testing:
/// - Seed the transfer table and inspect what remains
/// - Script per-operation error queues (transient faults, already-gone)
/// - Record every call for exact-count assertions
pub struct MockBackend {
    name: &'static str,
    transfers: Mutex<Vec<Transfer>>,
    stats: Mutex<GlobalStats>,
    /// Scripted errors, consumed one per call, keyed by operation name.
    scripted: Mutex<HashMap<&'static str, VecDeque<BackendError>>>,
    /// Ids that vanish when removed: the call fails with NotFound and the
    /// transfer is gone, modelling a concurrent removal race.
    vanishing: Mutex<HashSet<String>>,
    /// Recorded calls as (operation, detail).
    calls: Mutex<Vec<(String, String)>>,
}

impl MockBackend {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            transfers: Mutex::new(Vec::new()),
            stats: Mutex::new(GlobalStats::default()),
            scripted: Mutex::new(HashMap::new()),
            vanishing: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub async fn seed_transfer(&self, transfer: Transfer) {
        self.transfers.lock().await.push(transfer);
    }

    pub async fn set_global_stats(&self, stats: GlobalStats) {
        *self.stats.lock().await = stats;
    }

    /// Queue an error for the next call of `op`.
    pub async fn fail_next(&self, op: &'static str, error: BackendError) {
        self.scripted
            .lock()
            .await
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Make `remove(id)` fail with NotFound while still dropping the
    /// transfer, as if another path removed it first.
    pub async fn vanish_on_remove(&self, id: &str) {
        self.vanishing.lock().await.insert(id.to_string());
    }

    /// Remaining transfers, in seed order.
    pub async fn remaining(&self) -> Vec<Transfer> {
        self.transfers.lock().await.clone()
    }

    /// All recorded calls as (operation, detail).
    pub async fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self, op: &str) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|(recorded, _)| recorded == op)
            .count()
    }

    async fn record(&self, op: &str, detail: String) {
        self.calls.lock().await.push((op.to_string(), detail));
    }

    async fn scripted_error(&self, op: &'static str) -> Option<BackendError> {
        self.scripted
            .lock()
            .await
            .get_mut(op)
            .and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &str {
        self.name
    }

    /// Returns everything in the engine's "active window": running, paused
    /// and freshly completed transfers, the way aria2's tellActive keeps
    /// seeding and just-finished items visible.
    async fn list_active(&self) -> Result<Vec<Transfer>, BackendError> {
        self.record("list_active", String::new()).await;
        if let Some(e) = self.scripted_error("list_active").await {
            return Err(e);
        }
        Ok(self
            .transfers
            .lock()
            .await
            .iter()
            .filter(|t| {
                !matches!(t.status, TransferStatus::Waiting | TransferStatus::Removed)
            })
            .cloned()
            .collect())
    }

    async fn list_waiting(&self, offset: u32, count: u32) -> Result<Vec<Transfer>, BackendError> {
        self.record("list_waiting", format!("{}+{}", offset, count))
            .await;
        if let Some(e) = self.scripted_error("list_waiting").await {
            return Err(e);
        }
        Ok(self
            .transfers
            .lock()
            .await
            .iter()
            .filter(|t| t.status == TransferStatus::Waiting)
            .skip(offset as usize)
            .take(count as usize)
            .cloned()
            .collect())
    }

    async fn pause_all(&self) -> Result<(), BackendError> {
        self.record("pause_all", String::new()).await;
        if let Some(e) = self.scripted_error("pause_all").await {
            return Err(e);
        }
        for transfer in self.transfers.lock().await.iter_mut() {
            if transfer.status == TransferStatus::Active {
                transfer.status = TransferStatus::Paused;
            }
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), BackendError> {
        self.record("remove", id.to_string()).await;
        if let Some(e) = self.scripted_error("remove").await {
            return Err(e);
        }

        let mut transfers = self.transfers.lock().await;
        let before = transfers.len();
        transfers.retain(|t| t.id != id);

        if self.vanishing.lock().await.remove(id) || before == transfers.len() {
            return Err(BackendError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn purge_results(&self) -> Result<(), BackendError> {
        self.record("purge_results", String::new()).await;
        if let Some(e) = self.scripted_error("purge_results").await {
            return Err(e);
        }
        self.transfers
            .lock()
            .await
            .retain(|t| !t.status.is_terminal());
        Ok(())
    }

    async fn global_stats(&self) -> Result<GlobalStats, BackendError> {
        self.record("global_stats", String::new()).await;
        if let Some(e) = self.scripted_error("global_stats").await {
            return Err(e);
        }
        Ok(*self.stats.lock().await)
    }

    async fn set_option(&self, id: &str, key: &str, value: &str) -> Result<(), BackendError> {
        self.record("set_option", format!("{} {}={}", id, key, value))
            .await;
        if let Some(e) = self.scripted_error("set_option").await {
            return Err(e);
        }
        Ok(())
    }

    async fn set_global_option(&self, key: &str, value: &str) -> Result<(), BackendError> {
        self.record("set_global_option", format!("{}={}", key, value))
            .await;
        if let Some(e) = self.scripted_error("set_global_option").await {
            return Err(e);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BackendError> {
        self.record("close", String::new()).await;
        if let Some(e) = self.scripted_error("close").await {
            return Err(e);
        }
        Ok(())
    }
}
