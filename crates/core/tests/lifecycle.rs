//! End-to-end lifecycle over the public API: fake backends behind the
//! facade, admission control gating work, and a drain-style shutdown.

use std::sync::Arc;
use std::time::Duration;

use towline_core::testing::{make_transfer, MockBackend};
use towline_core::{
    Admission, Backend, BackendError, Direction, GlobalStats, QueueConfig, QueueManager,
    RetryPolicy, RetryingBackend, TransferManager, TransferStatus,
};

fn facade(rpc: Arc<MockBackend>, http: Arc<MockBackend>) -> TransferManager {
    TransferManager::with_backends(
        Some(rpc as Arc<dyn Backend>),
        Some(http as Arc<dyn Backend>),
    )
}

#[tokio::test]
async fn admission_gates_work_while_facade_drives_backends() {
    let rpc = Arc::new(MockBackend::new("aria2"));
    let http = Arc::new(MockBackend::new("qbittorrent"));
    rpc.set_global_stats(GlobalStats {
        download_speed: 300,
        upload_speed: 30,
    })
    .await;
    http.set_global_stats(GlobalStats {
        download_speed: 200,
        upload_speed: 20,
    })
    .await;

    let manager = facade(rpc.clone(), http.clone());
    let queue = QueueManager::new(&QueueConfig {
        max_downloads: Some(1),
        max_uploads: None,
    });

    // Two submissions, one slot: the second waits its turn.
    assert_eq!(queue.submit(1, Direction::Download).await, Admission::Admitted);
    assert_eq!(queue.submit(2, Direction::Download).await, Admission::Queued);

    let speeds = manager.overall_speed().await;
    assert_eq!(speeds.download, 500);
    assert_eq!(speeds.upload, 50);
    assert_eq!(manager.speed_snapshot().await, speeds);

    // First download finishes; the queued one takes the slot.
    assert_eq!(queue.complete(1, Direction::Download).await, Some(2));
    let counts = queue.counts().await;
    assert_eq!(counts.running_downloads, 1);
    assert_eq!(counts.queued_downloads, 0);
}

#[tokio::test]
async fn retry_proxy_masks_engine_hiccups_from_the_facade() {
    let rpc = Arc::new(MockBackend::new("aria2"));
    rpc.set_global_stats(GlobalStats {
        download_speed: 64,
        upload_speed: 0,
    })
    .await;
    rpc.fail_next("global_stats", BackendError::Connection("reset".into()))
        .await;
    let http = Arc::new(MockBackend::new("qbittorrent"));

    let policy = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    };
    let manager = TransferManager::with_backends(
        Some(Arc::new(RetryingBackend::with_policy(rpc.clone(), policy)) as Arc<dyn Backend>),
        Some(http as Arc<dyn Backend>),
    );

    let speeds = manager.overall_speed().await;
    assert_eq!(speeds.download, 64);
    // One failed attempt plus the retried success.
    assert_eq!(rpc.call_count("global_stats").await, 2);
}

#[tokio::test]
async fn shutdown_sequence_drains_and_tears_down() {
    let rpc = Arc::new(MockBackend::new("aria2"));
    let http = Arc::new(MockBackend::new("qbittorrent"));
    rpc.seed_transfer(make_transfer("a1", TransferStatus::Active)).await;
    rpc.seed_transfer(make_transfer("w1", TransferStatus::Waiting)).await;

    let manager = facade(rpc.clone(), http.clone());
    let queue = QueueManager::new(&QueueConfig::default());
    queue.submit(1, Direction::Download).await;

    // Stop, pause everything, close both engines.
    queue.stop();
    assert_eq!(queue.submit(2, Direction::Upload).await, Admission::Queued);
    manager.pause_all().await.unwrap();
    manager.close_all().await;

    assert_eq!(rpc.call_count("pause_all").await, 1);
    assert_eq!(http.call_count("pause_all").await, 1);
    assert_eq!(rpc.call_count("close").await, 1);
    assert_eq!(http.call_count("close").await, 1);
}
