//! The coordination store contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::StoreResult;

// =============================================================================
// Put Options
// =============================================================================

/// An access control entry attached to a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acl {
    /// Principal the entry applies to, e.g. `user:treadmld` or `role:servers`.
    pub principal: String,
    /// Permission letters, a subset of `rwcda`.
    pub perms: String,
}

impl Acl {
    pub fn new(principal: impl Into<String>, perms: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            perms: perms.into(),
        }
    }
}

/// Options for [`Backend::put`].
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Treat the last path segment as a prefix and append a sequence suffix.
    pub sequence: bool,
    /// Skip the write when the stored value is identical.
    pub check_content: bool,
    /// ACL entries for the node.
    pub acl: Vec<Acl>,
}

impl PutOptions {
    pub fn sequence() -> Self {
        Self {
            sequence: true,
            ..Self::default()
        }
    }

    pub fn check_content() -> Self {
        Self {
            check_content: true,
            ..Self::default()
        }
    }

    pub fn with_acl(mut self, acl: Acl) -> Self {
        self.acl.push(acl);
        self
    }
}

/// Result of a put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    /// The path written. For sequence puts this includes the suffix.
    pub path: String,
    /// False when `check_content` found the value unchanged.
    pub changed: bool,
}

// =============================================================================
// Watches
// =============================================================================

/// A stream of children snapshots for one path.
///
/// The first snapshot is the current list, delivered as soon as the watch
/// is established. Later snapshots are delivered when the children set
/// changes; intermediate states may be coalesced.
#[derive(Debug)]
pub struct ChildrenWatch {
    path: String,
    rx: mpsc::Receiver<Vec<String>>,
}

impl ChildrenWatch {
    pub fn new(path: impl Into<String>, rx: mpsc::Receiver<Vec<String>>) -> Self {
        Self {
            path: path.into(),
            rx,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Waits for the next snapshot. `None` means the watch is gone.
    pub async fn next(&mut self) -> Option<Vec<String>> {
        self.rx.recv().await
    }
}

/// A stream of data snapshots for one node. `None` items mean the node is
/// absent.
#[derive(Debug)]
pub struct DataWatch {
    path: String,
    rx: mpsc::Receiver<Option<Vec<u8>>>,
}

impl DataWatch {
    pub fn new(path: impl Into<String>, rx: mpsc::Receiver<Option<Vec<u8>>>) -> Self {
        Self {
            path: path.into(),
            rx,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Waits for the next snapshot. The outer `None` means the watch is gone.
    pub async fn next(&mut self) -> Option<Option<Vec<u8>>> {
        self.rx.recv().await
    }
}

// =============================================================================
// Locks
// =============================================================================

type ReleaseFn = Box<dyn FnOnce() + Send>;

/// A held distributed lock. Dropping the guard releases the lock.
pub struct LockGuard {
    path: String,
    identity: String,
    lost: watch::Receiver<bool>,
    release: Option<ReleaseFn>,
}

impl LockGuard {
    pub fn new(
        path: impl Into<String>,
        identity: impl Into<String>,
        lost: watch::Receiver<bool>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            path: path.into(),
            identity: identity.into(),
            lost,
            release: Some(Box::new(release)),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn is_lost(&self) -> bool {
        *self.lost.borrow() || self.lost.has_changed().is_err()
    }

    /// Resolves once the lock has been lost.
    pub async fn lost(&mut self) {
        while !*self.lost.borrow_and_update() {
            if self.lost.changed().await.is_err() {
                return;
            }
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("path", &self.path)
            .field("identity", &self.identity)
            .field("lost", &*self.lost.borrow())
            .finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

// =============================================================================
// Backend Trait
// =============================================================================

/// Hierarchical, watchable key-value store.
///
/// Reads of missing nodes are not errors. Connectivity failures surface as
/// [`crate::StoreError::Unavailable`].
#[async_trait]
pub trait Backend: Send + Sync {
    /// Creates the node and its ancestors if missing.
    async fn ensure_exists(&self, path: &str) -> StoreResult<()>;

    async fn exists(&self, path: &str) -> StoreResult<bool>;

    /// Returns the node data, `None` if the node does not exist.
    async fn get(&self, path: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Creates or overwrites a node, creating ancestors as needed.
    async fn put(&self, path: &str, data: Vec<u8>, opts: PutOptions) -> StoreResult<PutOutcome>;

    /// Deletes the node and its subtree. Returns whether it existed.
    async fn delete(&self, path: &str) -> StoreResult<bool>;

    /// Lists children names, sorted. Empty when the node does not exist.
    async fn list(&self, path: &str) -> StoreResult<Vec<String>>;

    async fn watch_children(&self, path: &str) -> StoreResult<ChildrenWatch>;

    async fn watch_data(&self, path: &str) -> StoreResult<DataWatch>;

    /// Blocks until the lock at `path` is held by `identity`.
    async fn lock(&self, path: &str, identity: &str) -> StoreResult<LockGuard>;
}
