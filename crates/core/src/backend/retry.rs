//! Retry proxy for backend calls.
//!
//! Both engines run as long-lived local daemons whose sockets occasionally
//! hiccup during daemon-side restarts; masking sub-second connectivity blips
//! avoids surfacing spurious errors. Only faults classified transient by
//! [`BackendError::is_transient`] are retried.
//!
//! The wrapped call set is the trait impl below, enumerated method by method
//! rather than derived by reflection, so what gets retried is auditable.
//! Mutating calls are included only where repeating them blindly is safe:
//! pause-all, purge and option-set are absorbing, and a force-remove whose
//! target is already gone comes back as `NotFound`, which is terminal and
//! therefore never re-issued.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::warn;

use super::{Backend, BackendError, GlobalStats, Transfer};

/// Bounded exponential backoff parameters.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Wraps a backend so every remote call gets the retry policy.
pub struct RetryingBackend<B> {
    inner: B,
    policy: RetryPolicy,
}

impl<B: Backend> RetryingBackend<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(inner: B, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    async fn run<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T, BackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let mut delay = self.policy.base_delay;
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    warn!(
                        backend = self.inner.name(),
                        op,
                        attempt,
                        error = %e,
                        "Transient backend fault, retrying"
                    );
                    sleep(delay).await;
                    delay = (delay * 2).min(self.policy.max_delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<B: Backend> Backend for RetryingBackend<B> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    // Read-only.
    async fn list_active(&self) -> Result<Vec<Transfer>, BackendError> {
        self.run("list_active", || self.inner.list_active()).await
    }

    // Read-only.
    async fn list_waiting(&self, offset: u32, count: u32) -> Result<Vec<Transfer>, BackendError> {
        self.run("list_waiting", || self.inner.list_waiting(offset, count))
            .await
    }

    // Absorbing: pausing a paused transfer is a no-op.
    async fn pause_all(&self) -> Result<(), BackendError> {
        self.run("pause_all", || self.inner.pause_all()).await
    }

    // Idempotent-safe: a repeat of an already-applied removal surfaces as
    // NotFound, which is terminal and stops the loop.
    async fn remove(&self, id: &str) -> Result<(), BackendError> {
        self.run("remove", || self.inner.remove(id)).await
    }

    // Absorbing: purging an empty result list is a no-op.
    async fn purge_results(&self) -> Result<(), BackendError> {
        self.run("purge_results", || self.inner.purge_results()).await
    }

    // Read-only.
    async fn global_stats(&self) -> Result<GlobalStats, BackendError> {
        self.run("global_stats", || self.inner.global_stats()).await
    }

    // Absorbing: setting the same value twice is a no-op.
    async fn set_option(&self, id: &str, key: &str, value: &str) -> Result<(), BackendError> {
        self.run("set_option", || self.inner.set_option(id, key, value))
            .await
    }

    // Absorbing: setting the same value twice is a no-op.
    async fn set_global_option(&self, key: &str, value: &str) -> Result<(), BackendError> {
        self.run("set_global_option", || {
            self.inner.set_global_option(key, value)
        })
        .await
    }

    // Teardown runs once; a failed close is not worth keeping the process
    // around for.
    async fn close(&self) -> Result<(), BackendError> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_transient_faults_are_retried_until_success() {
        let mock = MockBackend::new("aria2");
        mock.fail_next("global_stats", BackendError::Timeout).await;
        mock.fail_next("global_stats", BackendError::Connection("reset".into()))
            .await;
        mock.set_global_stats(GlobalStats {
            download_speed: 100,
            upload_speed: 7,
        })
        .await;

        let backend = RetryingBackend::new(mock);
        let start = Instant::now();
        let stats = backend.global_stats().await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(stats.download_speed, 100);
        assert_eq!(stats.upload_speed, 7);
        // Backoff: 1s after the first failure, 2s after the second.
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed < Duration::from_millis(3100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_attempts_surface_the_last_fault() {
        let mock = MockBackend::new("aria2");
        for _ in 0..3 {
            mock.fail_next("global_stats", BackendError::Timeout).await;
        }

        let backend = RetryingBackend::new(mock);
        let result = backend.global_stats().await;

        assert!(matches!(result, Err(BackendError::Timeout)));
        assert_eq!(backend.inner.call_count("global_stats").await, 3);
    }

    #[tokio::test]
    async fn test_terminal_faults_are_not_retried() {
        let mock = MockBackend::new("aria2");
        mock.fail_next("global_stats", BackendError::Rpc("bad request".into()))
            .await;

        let backend = RetryingBackend::new(mock);
        let result = backend.global_stats().await;

        assert!(matches!(result, Err(BackendError::Rpc(_))));
        assert_eq!(backend.inner.call_count("global_stats").await, 1);
    }

    #[tokio::test]
    async fn test_remove_of_missing_id_is_not_retried() {
        let mock = MockBackend::new("aria2");

        let backend = RetryingBackend::new(mock);
        let result = backend.remove("no-such-gid").await;

        assert!(matches!(result, Err(BackendError::NotFound(_))));
        assert_eq!(backend.inner.call_count("remove").await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_delay_is_capped() {
        let mock = MockBackend::new("aria2");
        for _ in 0..5 {
            mock.fail_next("global_stats", BackendError::Timeout).await;
        }

        let policy = RetryPolicy {
            max_attempts: 5,
            ..RetryPolicy::default()
        };
        let backend = RetryingBackend::with_policy(mock, policy);
        let start = Instant::now();
        let _ = backend.global_stats().await;
        let elapsed = start.elapsed();

        // 1 + 2 + 4 + 5 (capped), not 1 + 2 + 4 + 8.
        assert!(elapsed >= Duration::from_secs(12));
        assert!(elapsed < Duration::from_millis(12100));
    }
}
