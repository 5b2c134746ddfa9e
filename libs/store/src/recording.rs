//! Call-order recording wrapper.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::{
    Backend, ChildrenWatch, DataWatch, LockGuard, PutOptions, PutOutcome, StoreError, StoreResult,
};

/// A mutating call observed by [`RecordingBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedOp {
    EnsureExists(String),
    /// Path actually written, including any sequence suffix.
    Put(String),
    /// Only deletes that removed something are recorded.
    Delete(String),
}

impl RecordedOp {
    pub fn path(&self) -> &str {
        match self {
            Self::EnsureExists(p) | Self::Put(p) | Self::Delete(p) => p,
        }
    }
}

#[derive(Debug, Default)]
struct Recorder {
    ops: Vec<RecordedOp>,
    puts_remaining: Option<usize>,
}

/// Wraps a backend and records the order of mutating calls.
///
/// Optionally fails every put after a budget is spent, to exercise partial
/// batch behaviour.
#[derive(Debug)]
pub struct RecordingBackend<B> {
    inner: B,
    recorder: Mutex<Recorder>,
}

impl<B: Backend> RecordingBackend<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            recorder: Mutex::new(Recorder::default()),
        }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    fn recorder(&self) -> MutexGuard<'_, Recorder> {
        self.recorder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// All recorded operations, oldest first.
    pub fn ops(&self) -> Vec<RecordedOp> {
        self.recorder().ops.clone()
    }

    /// Paths written by put, oldest first.
    pub fn puts(&self) -> Vec<String> {
        self.recorder()
            .ops
            .iter()
            .filter_map(|op| match op {
                RecordedOp::Put(p) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }

    /// Paths removed by delete, oldest first.
    pub fn deletes(&self) -> Vec<String> {
        self.recorder()
            .ops
            .iter()
            .filter_map(|op| match op {
                RecordedOp::Delete(p) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }

    /// Index of the first recorded op equal to `op`.
    pub fn position(&self, op: &RecordedOp) -> Option<usize> {
        self.recorder().ops.iter().position(|o| o == op)
    }

    pub fn clear(&self) {
        self.recorder().ops.clear();
    }

    /// Lets `count` more puts through, then fails puts as unavailable.
    pub fn fail_puts_after(&self, count: usize) {
        self.recorder().puts_remaining = Some(count);
    }

    fn record(&self, op: RecordedOp) {
        self.recorder().ops.push(op);
    }
}

#[async_trait]
impl<B: Backend> Backend for RecordingBackend<B> {
    async fn ensure_exists(&self, path: &str) -> StoreResult<()> {
        self.inner.ensure_exists(path).await?;
        self.record(RecordedOp::EnsureExists(path.to_string()));
        Ok(())
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        self.inner.exists(path).await
    }

    async fn get(&self, path: &str) -> StoreResult<Option<Vec<u8>>> {
        self.inner.get(path).await
    }

    async fn put(&self, path: &str, data: Vec<u8>, opts: PutOptions) -> StoreResult<PutOutcome> {
        {
            let mut recorder = self.recorder();
            match recorder.puts_remaining {
                Some(0) => {
                    return Err(StoreError::Unavailable(format!(
                        "injected put failure: {path}"
                    )))
                }
                Some(ref mut n) => *n -= 1,
                None => {}
            }
        }
        let outcome = self.inner.put(path, data, opts).await?;
        if outcome.changed {
            self.record(RecordedOp::Put(outcome.path.clone()));
        }
        Ok(outcome)
    }

    async fn delete(&self, path: &str) -> StoreResult<bool> {
        let existed = self.inner.delete(path).await?;
        if existed {
            self.record(RecordedOp::Delete(path.to_string()));
        }
        Ok(existed)
    }

    async fn list(&self, path: &str) -> StoreResult<Vec<String>> {
        self.inner.list(path).await
    }

    async fn watch_children(&self, path: &str) -> StoreResult<ChildrenWatch> {
        self.inner.watch_children(path).await
    }

    async fn watch_data(&self, path: &str) -> StoreResult<DataWatch> {
        self.inner.watch_data(path).await
    }

    async fn lock(&self, path: &str, identity: &str) -> StoreResult<LockGuard> {
        self.inner.lock(path, identity).await
    }
}
