//! Retry-with-backoff adapter.

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::{Backend, ChildrenWatch, DataWatch, LockGuard, PutOptions, PutOutcome, StoreResult};

// =============================================================================
// Backoff Policy
// =============================================================================

/// Exponential backoff configuration.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Base delay for first retry.
    pub base: Duration,

    /// Maximum delay.
    pub max: Duration,

    /// Jitter factor (0.0 to 1.0).
    pub jitter: f64,

    /// Attempts before giving up, including the first.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            max: Duration::from_secs(10),
            jitter: 0.25,
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// Calculate delay for the given attempt number.
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = self.base.as_millis() as f64 * 2.0_f64.powi(attempt.min(30) as i32);
        let delay = delay.min(self.max.as_millis() as f64);

        let jitter_range = delay * self.jitter.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            rand::random_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        Duration::from_millis((delay + jitter).max(0.0) as u64)
    }
}

// =============================================================================
// Store Adapter
// =============================================================================

/// Wraps a backend and retries operations failing with
/// [`crate::StoreError::Unavailable`].
///
/// Watches and locks are retried only while being established. Sequence
/// puts are never retried.
pub struct StoreAdapter<B> {
    inner: B,
    policy: BackoffPolicy,
}

impl<B: Backend> StoreAdapter<B> {
    pub fn new(inner: B, policy: BackoffPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    async fn retry<'a, T, F, Fut>(&'a self, op: &str, path: &str, mut f: F) -> StoreResult<T>
    where
        F: FnMut(&'a B) -> Fut,
        Fut: std::future::Future<Output = StoreResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match f(&self.inner).await {
                Err(e) if e.is_transient() && attempt + 1 < self.policy.max_attempts => {
                    let delay = self.policy.delay(attempt);
                    warn!(
                        op = %op,
                        path = %path,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Store unavailable, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl<B: Backend> Backend for StoreAdapter<B> {
    async fn ensure_exists(&self, path: &str) -> StoreResult<()> {
        self.retry("ensure_exists", path, |b| b.ensure_exists(path))
            .await
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        self.retry("exists", path, |b| b.exists(path)).await
    }

    async fn get(&self, path: &str) -> StoreResult<Option<Vec<u8>>> {
        self.retry("get", path, |b| b.get(path)).await
    }

    async fn put(&self, path: &str, data: Vec<u8>, opts: PutOptions) -> StoreResult<PutOutcome> {
        // A failed sequence put may still have created its node. Retrying
        // would create a second one, so the caller gets the error instead.
        if opts.sequence {
            return self.inner.put(path, data, opts).await;
        }
        self.retry("put", path, |b| b.put(path, data.clone(), opts.clone()))
            .await
    }

    async fn delete(&self, path: &str) -> StoreResult<bool> {
        self.retry("delete", path, |b| b.delete(path)).await
    }

    async fn list(&self, path: &str) -> StoreResult<Vec<String>> {
        self.retry("list", path, |b| b.list(path)).await
    }

    async fn watch_children(&self, path: &str) -> StoreResult<ChildrenWatch> {
        self.retry("watch_children", path, |b| b.watch_children(path))
            .await
    }

    async fn watch_data(&self, path: &str) -> StoreResult<DataWatch> {
        self.retry("watch_data", path, |b| b.watch_data(path)).await
    }

    async fn lock(&self, path: &str, identity: &str) -> StoreResult<LockGuard> {
        self.retry("lock", path, |b| b.lock(path, identity)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBackend;

    fn fast() -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(1),
            max: Duration::from_millis(5),
            jitter: 0.0,
            max_attempts: 3,
        }
    }

    #[test]
    fn test_backoff_delay_is_capped() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(100),
            max: Duration::from_secs(1),
            jitter: 0.0,
            max_attempts: 5,
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(10), Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_jitter_in_range() {
        let policy = BackoffPolicy::default();
        for _ in 0..100 {
            let d = policy.delay(2).as_millis();
            assert!((300..=500).contains(&d), "delay {d} out of range");
        }
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let memory = MemoryBackend::new();
        memory.set_offline(true);
        let adapter = StoreAdapter::new(memory, fast());
        let err = adapter.get("/a").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_sequence_put_is_not_retried() {
        let memory = MemoryBackend::new();
        memory.set_offline(true);
        let adapter = StoreAdapter::new(
            memory.clone(),
            BackoffPolicy {
                base: Duration::from_millis(20),
                max: Duration::from_millis(20),
                jitter: 0.0,
                max_attempts: 10,
            },
        );
        let restore = tokio::spawn({
            let memory = memory.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                memory.set_offline(false);
            }
        });

        let err = adapter
            .put("/events/000-cell-", Vec::new(), PutOptions::sequence())
            .await
            .unwrap_err();
        assert!(err.is_transient());

        restore.await.unwrap();
        assert!(memory.list("/events").await.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn test_passes_through_success() {
        let adapter = StoreAdapter::new(MemoryBackend::new(), fast());
        adapter
            .put("/a", b"1".to_vec(), PutOptions::default())
            .await
            .unwrap();
        assert_eq!(adapter.get("/a").await.unwrap(), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn test_recovers_when_backend_returns() {
        let memory = MemoryBackend::new();
        memory.set_offline(true);
        let adapter = StoreAdapter::new(
            memory.clone(),
            BackoffPolicy {
                base: Duration::from_millis(20),
                max: Duration::from_millis(20),
                jitter: 0.0,
                max_attempts: 10,
            },
        );
        let restore = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            memory.set_offline(false);
        });
        assert!(!adapter.exists("/a").await.unwrap());
        restore.await.unwrap();
    }
}
