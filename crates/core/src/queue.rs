//! Admission queue controller.
//!
//! Owns the queued/running task sets per direction, applies the concurrency
//! limits and promotes queued tasks strictly in submission order when a
//! slot frees. Admission decisions (rare) and status-map writes (driven by
//! high-frequency progress events) are serialized by two separate locks so
//! progress traffic never contends with the invariant-critical
//! check-and-update.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::backend::TransferStatus;
use crate::config::QueueConfig;

pub type TaskId = u64;

/// Which leg of the pipeline a task occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Download,
    Upload,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Download => "download",
            Direction::Upload => "upload",
        }
    }
}

/// One unit of admission control.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub direction: Direction,
    pub submitted_at: DateTime<Utc>,
}

/// Outcome of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A slot was free; the task is running.
    Admitted,
    /// All slots taken (or the stop flag is set); the task waits in
    /// submission order.
    Queued,
}

/// Per-task progress snapshot kept for the status renderer.
#[derive(Debug, Clone)]
pub struct TaskStatus {
    pub name: String,
    pub state: TransferStatus,
    pub total_bytes: u64,
    pub completed_bytes: u64,
    pub download_speed: u64,
    pub upload_speed: u64,
}

/// Queue occupancy, for introspection and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub queued_downloads: usize,
    pub running_downloads: usize,
    pub queued_uploads: usize,
    pub running_uploads: usize,
}

#[derive(Debug, Default)]
struct DirectionState {
    /// Queued tasks ordered by (submission time, id).
    queued: BTreeMap<(i64, TaskId), Task>,
    /// Currently running task ids.
    running: HashSet<TaskId>,
    limit: Option<usize>,
}

impl DirectionState {
    fn has_slot(&self) -> bool {
        self.limit.is_none_or(|limit| self.running.len() < limit)
    }

    /// Move the oldest queued task into the running set, if a slot is free.
    fn promote_oldest(&mut self) -> Option<TaskId> {
        if !self.has_slot() {
            return None;
        }
        let key = *self.queued.keys().next()?;
        let task = self.queued.remove(&key)?;
        self.running.insert(task.id);
        Some(task.id)
    }

    fn drop_task(&mut self, id: TaskId) {
        if !self.running.remove(&id) {
            self.queued.retain(|_, task| task.id != id);
        }
    }
}

#[derive(Debug, Default)]
struct AdmissionState {
    download: DirectionState,
    upload: DirectionState,
}

impl AdmissionState {
    fn direction(&mut self, direction: Direction) -> &mut DirectionState {
        match direction {
            Direction::Download => &mut self.download,
            Direction::Upload => &mut self.upload,
        }
    }
}

/// Everything guarded by the status lock: the per-task status map plus the
/// tracker list and its serialized option value, which transfer submission
/// reads alongside the statuses.
#[derive(Debug, Default)]
struct StatusBoard {
    tasks: HashMap<TaskId, TaskStatus>,
    trackers: Vec<String>,
    tracker_option: String,
}

/// Admission queue controller.
pub struct QueueManager {
    /// Admission lock.
    state: Mutex<AdmissionState>,
    /// Status lock.
    status: Mutex<StatusBoard>,
    /// Serializes filesystem finalization for tasks whose target
    /// directories overlap.
    same_directory: Mutex<()>,
    /// When set, no new work is admitted; running tasks drain normally.
    stopped: AtomicBool,
}

impl QueueManager {
    pub fn new(config: &QueueConfig) -> Self {
        let mut state = AdmissionState::default();
        state.download.limit = config.max_downloads;
        state.upload.limit = config.max_uploads;
        Self {
            state: Mutex::new(state),
            status: Mutex::new(StatusBoard::default()),
            same_directory: Mutex::new(()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Submit a task. Admission is atomic with respect to concurrent
    /// completions: the slot check and the running-set insert happen under
    /// one lock hold.
    pub async fn submit(&self, id: TaskId, direction: Direction) -> Admission {
        self.submit_at(id, direction, Utc::now()).await
    }

    async fn submit_at(
        &self,
        id: TaskId,
        direction: Direction,
        submitted_at: DateTime<Utc>,
    ) -> Admission {
        let mut state = self.state.lock().await;
        let dir = state.direction(direction);
        let task = Task {
            id,
            direction,
            submitted_at,
        };

        if !self.is_stopped() && dir.has_slot() {
            dir.running.insert(id);
            debug!("Task {} admitted ({})", id, direction.as_str());
            return Admission::Admitted;
        }

        dir.queued
            .insert((submitted_at.timestamp_micros(), id), task);
        debug!("Task {} queued ({})", id, direction.as_str());
        Admission::Queued
    }

    /// Record that a task left the running set (success, error or explicit
    /// removal) and promote the oldest queued task of the same direction.
    /// Returns the promoted task id, if any. Promotion is suppressed while
    /// the stop flag is set.
    pub async fn complete(&self, id: TaskId, direction: Direction) -> Option<TaskId> {
        let mut state = self.state.lock().await;
        let dir = state.direction(direction);
        dir.drop_task(id);

        if self.is_stopped() {
            return None;
        }
        let promoted = dir.promote_oldest();
        if let Some(promoted) = promoted {
            debug!(
                "Task {} promoted ({}) after {} finished",
                promoted,
                direction.as_str(),
                id
            );
        }
        promoted
    }

    /// Explicitly remove a task, wherever it currently is. Dropping a
    /// running task frees its slot and promotes like [`QueueManager::complete`];
    /// dropping a queued task never does.
    pub async fn remove(&self, id: TaskId, direction: Direction) -> Option<TaskId> {
        self.complete(id, direction).await
    }

    /// Replace the concurrency limits. Takes effect on the next admission
    /// decision; running tasks are never preempted.
    pub async fn set_limits(&self, max_downloads: Option<usize>, max_uploads: Option<usize>) {
        let mut state = self.state.lock().await;
        state.download.limit = max_downloads;
        state.upload.limit = max_uploads;
    }

    pub async fn counts(&self) -> QueueCounts {
        let state = self.state.lock().await;
        QueueCounts {
            queued_downloads: state.download.queued.len(),
            running_downloads: state.download.running.len(),
            queued_uploads: state.upload.queued.len(),
            running_uploads: state.upload.running.len(),
        }
    }

    /// Set the stop flag: submissions still record tasks but nothing new
    /// runs, letting in-flight transfers drain.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Hold this guard while finalizing files whose target directories
    /// overlap with another task's.
    pub async fn same_directory_guard(&self) -> MutexGuard<'_, ()> {
        self.same_directory.lock().await
    }

    pub async fn update_status(&self, id: TaskId, status: TaskStatus) {
        self.status.lock().await.tasks.insert(id, status);
    }

    pub async fn remove_status(&self, id: TaskId) {
        self.status.lock().await.tasks.remove(&id);
    }

    /// Non-blocking-in-spirit snapshot for the status renderer; reads only
    /// cached values, never a backend.
    pub async fn status_snapshot(&self) -> HashMap<TaskId, TaskStatus> {
        self.status.lock().await.tasks.clone()
    }

    /// Store the refreshed tracker list and its serialized option value in
    /// one lock hold, so submission never observes one without the other.
    pub async fn set_trackers(&self, trackers: Vec<String>, serialized: String) {
        let mut board = self.status.lock().await;
        board.trackers = trackers;
        board.tracker_option = serialized;
    }

    pub async fn trackers(&self) -> Vec<String> {
        self.status.lock().await.trackers.clone()
    }

    /// Serialized announce list, ready to use as a backend option value.
    pub async fn tracker_option(&self) -> String {
        self.status.lock().await.tracker_option.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn limited(max_downloads: Option<usize>, max_uploads: Option<usize>) -> QueueManager {
        QueueManager::new(&QueueConfig {
            max_downloads,
            max_uploads,
        })
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap()
    }

    #[tokio::test]
    async fn test_admits_until_limit_then_queues() {
        let queue = limited(Some(2), None);

        assert_eq!(queue.submit(1, Direction::Download).await, Admission::Admitted);
        assert_eq!(queue.submit(2, Direction::Download).await, Admission::Admitted);
        assert_eq!(queue.submit(3, Direction::Download).await, Admission::Queued);
        assert_eq!(queue.submit(4, Direction::Download).await, Admission::Queued);

        let counts = queue.counts().await;
        assert_eq!(counts.running_downloads, 2);
        assert_eq!(counts.queued_downloads, 2);
    }

    #[tokio::test]
    async fn test_running_never_exceeds_limit() {
        let queue = limited(Some(2), Some(1));

        for id in 0..10 {
            queue.submit(id, Direction::Download).await;
            queue.submit(100 + id, Direction::Upload).await;
            let counts = queue.counts().await;
            assert!(counts.running_downloads <= 2);
            assert!(counts.running_uploads <= 1);
        }

        for id in 0..5 {
            queue.complete(id, Direction::Download).await;
            queue.complete(100 + id, Direction::Upload).await;
            let counts = queue.counts().await;
            assert!(counts.running_downloads <= 2);
            assert!(counts.running_uploads <= 1);
        }
    }

    #[tokio::test]
    async fn test_promotion_is_fifo_by_submission_time() {
        let queue = limited(Some(2), None);

        // Fill both slots.
        assert_eq!(queue.submit(10, Direction::Download).await, Admission::Admitted);
        assert_eq!(queue.submit(11, Direction::Download).await, Admission::Admitted);

        // Queue three tasks with timestamps deliberately out of arrival
        // order; promotion must follow submission time, not insertion.
        queue.submit_at(3, Direction::Download, at(30)).await;
        queue.submit_at(1, Direction::Download, at(10)).await;
        queue.submit_at(2, Direction::Download, at(20)).await;

        assert_eq!(queue.complete(11, Direction::Download).await, Some(1));
        assert_eq!(queue.complete(10, Direction::Download).await, Some(2));
        assert_eq!(queue.complete(1, Direction::Download).await, Some(3));
        assert_eq!(queue.complete(2, Direction::Download).await, None);
    }

    #[tokio::test]
    async fn test_directions_are_independent() {
        let queue = limited(Some(1), Some(1));

        assert_eq!(queue.submit(1, Direction::Download).await, Admission::Admitted);
        assert_eq!(queue.submit(2, Direction::Download).await, Admission::Queued);
        // A full download queue must not affect upload admission.
        assert_eq!(queue.submit(3, Direction::Upload).await, Admission::Admitted);

        // Completing an upload never promotes a queued download.
        assert_eq!(queue.complete(3, Direction::Upload).await, None);
        let counts = queue.counts().await;
        assert_eq!(counts.queued_downloads, 1);
    }

    #[tokio::test]
    async fn test_unlimited_when_no_limit_configured() {
        let queue = limited(None, None);
        for id in 0..50 {
            assert_eq!(queue.submit(id, Direction::Download).await, Admission::Admitted);
        }
    }

    #[tokio::test]
    async fn test_removing_queued_task_does_not_over_admit() {
        let queue = limited(Some(1), None);

        queue.submit(1, Direction::Download).await;
        queue.submit(2, Direction::Download).await;
        queue.submit(3, Direction::Download).await;

        // Dropping a queued task frees no running slot.
        assert_eq!(queue.complete(2, Direction::Download).await, None);
        let counts = queue.counts().await;
        assert_eq!(counts.running_downloads, 1);
        assert_eq!(counts.queued_downloads, 1);

        // Dropping the running task promotes the remaining queued one.
        assert_eq!(queue.complete(1, Direction::Download).await, Some(3));
    }

    #[tokio::test]
    async fn test_stop_flag_blocks_admission_and_promotion() {
        let queue = limited(Some(2), None);
        queue.submit(1, Direction::Download).await;
        queue.stop();

        // Submission still records the task, but never admits it.
        assert_eq!(queue.submit(2, Direction::Download).await, Admission::Queued);
        let counts = queue.counts().await;
        assert_eq!(counts.running_downloads, 1);
        assert_eq!(counts.queued_downloads, 1);

        // A freed slot is not refilled while draining.
        assert_eq!(queue.complete(1, Direction::Download).await, None);
        assert_eq!(queue.counts().await.running_downloads, 0);
    }

    #[tokio::test]
    async fn test_raised_limit_applies_to_next_decision() {
        let queue = limited(Some(1), None);
        queue.submit(1, Direction::Download).await;
        queue.submit(2, Direction::Download).await;

        queue.set_limits(Some(3), None).await;
        assert_eq!(queue.submit(3, Direction::Download).await, Admission::Admitted);
        // The earlier-queued task is still promoted first when a slot event
        // occurs.
        assert_eq!(queue.complete(1, Direction::Download).await, Some(2));
    }

    #[tokio::test]
    async fn test_explicit_removal_of_running_task_promotes() {
        let queue = limited(Some(1), None);
        queue.submit(1, Direction::Download).await;
        queue.submit(2, Direction::Download).await;

        assert_eq!(queue.remove(1, Direction::Download).await, Some(2));
        let counts = queue.counts().await;
        assert_eq!(counts.running_downloads, 1);
        assert_eq!(counts.queued_downloads, 0);
    }

    #[tokio::test]
    async fn test_same_directory_guard_serializes_finalization() {
        use std::time::Duration;
        use tokio::time::timeout;

        let queue = limited(None, None);
        let guard = queue.same_directory_guard().await;

        // A second finalizer targeting an overlapping directory must wait
        // until the first releases the guard.
        assert!(timeout(Duration::from_millis(20), queue.same_directory_guard())
            .await
            .is_err());

        drop(guard);
        assert!(timeout(Duration::from_millis(20), queue.same_directory_guard())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_status_map_roundtrip() {
        let queue = limited(None, None);
        queue
            .update_status(
                7,
                TaskStatus {
                    name: "movie".to_string(),
                    state: TransferStatus::Active,
                    total_bytes: 100,
                    completed_bytes: 40,
                    download_speed: 8,
                    upload_speed: 0,
                },
            )
            .await;

        let snapshot = queue.status_snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[&7].name, "movie");

        queue.remove_status(7).await;
        assert!(queue.status_snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_tracker_storage_is_paired() {
        let queue = limited(None, None);
        queue
            .set_trackers(
                vec!["udp://a".to_string(), "udp://b".to_string()],
                "udp://a,udp://b".to_string(),
            )
            .await;

        assert_eq!(queue.trackers().await.len(), 2);
        assert_eq!(queue.tracker_option().await, "udp://a,udp://b");
    }
}
