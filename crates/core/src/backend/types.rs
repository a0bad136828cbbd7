//! Types for transfer backend operations.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during backend operations.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Engine error: {0}")]
    Rpc(String),

    #[error("Transfer not found: {0}")]
    NotFound(String),

    #[error("Operation not supported by {0}")]
    Unsupported(&'static str),
}

impl BackendError {
    /// Whether this fault is expected to clear on its own (daemon-side
    /// restart, dropped connection, slow response). Only these are retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BackendError::Connection(_) | BackendError::Timeout | BackendError::Transport(_)
        )
    }
}

/// State of a transfer as reported by its engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Queued inside the engine, not yet started.
    Waiting,
    /// Actively downloading or seeding.
    Active,
    /// Paused.
    Paused,
    /// Finished successfully.
    Complete,
    /// Failed.
    Error,
    /// Removed by user or engine.
    Removed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Waiting => "waiting",
            TransferStatus::Active => "active",
            TransferStatus::Paused => "paused",
            TransferStatus::Complete => "complete",
            TransferStatus::Error => "error",
            TransferStatus::Removed => "removed",
        }
    }

    /// Terminal states accept no further per-transfer option changes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Complete | TransferStatus::Removed)
    }
}

/// One file belonging to a transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferFile {
    pub path: String,
}

/// One transfer known to a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    /// Backend-assigned id (aria2 gid or qBittorrent info hash).
    pub id: String,
    pub status: TransferStatus,
    /// Name from BitTorrent metadata, when the engine has it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_name: Option<String>,
    pub files: Vec<TransferFile>,
    /// Save directory configured on the engine.
    pub save_dir: String,
    pub total_bytes: u64,
    pub completed_bytes: u64,
    /// Current speeds in bytes/second.
    pub download_speed: u64,
    pub upload_speed: u64,
}

/// Aggregate throughput counters for one backend.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GlobalStats {
    pub download_speed: u64,
    pub upload_speed: u64,
}

/// Capability set shared by both transfer engines.
///
/// The facade only ever talks through this trait; engine-specific response
/// shapes stay inside the adapters.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// List transfers currently being processed.
    async fn list_active(&self) -> Result<Vec<Transfer>, BackendError>;

    /// List transfers waiting inside the engine's own queue.
    async fn list_waiting(&self, offset: u32, count: u32) -> Result<Vec<Transfer>, BackendError>;

    /// Force-pause every transfer.
    async fn pause_all(&self) -> Result<(), BackendError>;

    /// Force-remove one transfer. An already-gone id surfaces as
    /// `BackendError::NotFound`.
    async fn remove(&self, id: &str) -> Result<(), BackendError>;

    /// Purge finished/removed result records (and their files, where the
    /// engine ties the two together).
    async fn purge_results(&self) -> Result<(), BackendError>;

    /// Current aggregate throughput.
    async fn global_stats(&self) -> Result<GlobalStats, BackendError>;

    /// Change an option on one transfer.
    async fn set_option(&self, id: &str, key: &str, value: &str) -> Result<(), BackendError>;

    /// Change an engine-wide default option.
    async fn set_global_option(&self, key: &str, value: &str) -> Result<(), BackendError>;

    /// Tear down the connection.
    async fn close(&self) -> Result<(), BackendError>;
}

#[async_trait]
impl<B: Backend + ?Sized> Backend for Arc<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn list_active(&self) -> Result<Vec<Transfer>, BackendError> {
        (**self).list_active().await
    }

    async fn list_waiting(&self, offset: u32, count: u32) -> Result<Vec<Transfer>, BackendError> {
        (**self).list_waiting(offset, count).await
    }

    async fn pause_all(&self) -> Result<(), BackendError> {
        (**self).pause_all().await
    }

    async fn remove(&self, id: &str) -> Result<(), BackendError> {
        (**self).remove(id).await
    }

    async fn purge_results(&self) -> Result<(), BackendError> {
        (**self).purge_results().await
    }

    async fn global_stats(&self) -> Result<GlobalStats, BackendError> {
        (**self).global_stats().await
    }

    async fn set_option(&self, id: &str, key: &str, value: &str) -> Result<(), BackendError> {
        (**self).set_option(id, key, value).await
    }

    async fn set_global_option(&self, key: &str, value: &str) -> Result<(), BackendError> {
        (**self).set_global_option(key, value).await
    }

    async fn close(&self) -> Result<(), BackendError> {
        (**self).close().await
    }
}
