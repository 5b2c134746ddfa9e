//! In-process backend.
//!
//! The whole tree lives behind one mutex. Watches are `tokio::sync::watch`
//! channels kept per path and forwarded into the [`ChildrenWatch`] and
//! [`DataWatch`] streams by small tasks.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, info};

use crate::path::{self, ROOT};
use crate::{
    Acl, Backend, ChildrenWatch, DataWatch, LockGuard, PutOptions, PutOutcome, StoreError,
    StoreResult,
};

#[derive(Debug, Default)]
struct Node {
    data: Vec<u8>,
    acl: Vec<Acl>,
}

#[derive(Debug)]
struct LockEntry {
    identity: String,
    token: u64,
    lost: watch::Sender<bool>,
}

#[derive(Debug, Default)]
struct State {
    nodes: BTreeMap<String, Node>,
    sequences: HashMap<String, u64>,
    children_tx: HashMap<String, watch::Sender<Vec<String>>>,
    data_tx: HashMap<String, watch::Sender<Option<Vec<u8>>>>,
    locks: HashMap<String, LockEntry>,
    lock_notify: HashMap<String, Arc<Notify>>,
    next_token: u64,
}

impl State {
    fn contains(&self, path: &str) -> bool {
        path == ROOT || self.nodes.contains_key(path)
    }

    fn children(&self, path: &str) -> Vec<String> {
        let prefix = if path == ROOT {
            ROOT.to_string()
        } else {
            format!("{path}/")
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| &key[prefix.len()..])
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect()
    }

    fn notify_children(&self, path: &str) {
        if let Some(tx) = self.children_tx.get(path) {
            tx.send_replace(self.children(path));
        }
    }

    fn notify_data(&self, path: &str) {
        if let Some(tx) = self.data_tx.get(path) {
            tx.send_replace(self.nodes.get(path).map(|n| n.data.clone()));
        }
    }

    /// Inserts a node if missing. Returns true if it was created.
    fn create(&mut self, path: &str) -> bool {
        if self.contains(path) {
            return false;
        }
        for ancestor in path::ancestors(path) {
            if !self.contains(ancestor) {
                self.nodes.insert(ancestor.to_string(), Node::default());
                self.notify_parent(ancestor);
            }
        }
        self.nodes.insert(path.to_string(), Node::default());
        self.notify_parent(path);
        true
    }

    fn notify_parent(&self, path: &str) {
        if let Some(parent) = path::parent(path) {
            self.notify_children(parent);
        }
    }

    fn next_sequence(&mut self, parent: &str) -> u64 {
        let counter = self.sequences.entry(parent.to_string()).or_insert(0);
        let seq = *counter;
        *counter += 1;
        seq
    }

    fn release_lock(&mut self, path: &str, token: u64) {
        if self.locks.get(path).is_some_and(|entry| entry.token == token) {
            self.locks.remove(path);
            debug!(path = %path, "Lock released");
            if let Some(notify) = self.lock_notify.get(path) {
                notify.notify_one();
            }
        }
    }

    fn expire_lock(&mut self, path: &str) -> bool {
        let Some(entry) = self.locks.remove(path) else {
            return false;
        };
        info!(path = %path, identity = %entry.identity, "Lock expired");
        entry.lost.send_replace(true);
        if let Some(notify) = self.lock_notify.get(path) {
            notify.notify_one();
        }
        true
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<State>,
    offline: AtomicBool,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory [`Backend`]. Clones share the same tree.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates losing (or regaining) connectivity. Going offline expires
    /// every held lock.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
        if offline {
            let mut state = self.inner.state();
            let held: Vec<String> = state.locks.keys().cloned().collect();
            for path in held {
                state.expire_lock(&path);
            }
        }
    }

    /// Forcibly expires the lock at `path`, signalling its holder.
    pub fn expire_lock(&self, path: &str) -> bool {
        self.inner.state().expire_lock(path)
    }

    /// Identity currently holding the lock at `path`.
    pub fn lock_holder(&self, path: &str) -> Option<String> {
        self.inner
            .state()
            .locks
            .get(path)
            .map(|entry| entry.identity.clone())
    }

    /// ACL entries stored on a node.
    pub fn acl(&self, path: &str) -> Option<Vec<Acl>> {
        self.inner.state().nodes.get(path).map(|n| n.acl.clone())
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory backend offline".to_string()));
        }
        Ok(())
    }

    fn check(&self, path: &str) -> StoreResult<()> {
        self.check_online()?;
        path::validate(path)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn ensure_exists(&self, path: &str) -> StoreResult<()> {
        self.check(path)?;
        self.inner.state().create(path);
        Ok(())
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        self.check(path)?;
        Ok(self.inner.state().contains(path))
    }

    async fn get(&self, path: &str) -> StoreResult<Option<Vec<u8>>> {
        self.check(path)?;
        let state = self.inner.state();
        if path == ROOT {
            return Ok(Some(Vec::new()));
        }
        Ok(state.nodes.get(path).map(|n| n.data.clone()))
    }

    async fn put(&self, path: &str, data: Vec<u8>, opts: PutOptions) -> StoreResult<PutOutcome> {
        self.check(path)?;
        if path == ROOT {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        let mut state = self.inner.state();

        let path = if opts.sequence {
            let parent = path::parent(path).unwrap_or(ROOT);
            let prefix = path::basename(path);
            let seq = state.next_sequence(parent);
            path::join(parent, &format!("{prefix}{seq:010}"))
        } else {
            path.to_string()
        };

        if opts.check_content && state.nodes.get(&path).is_some_and(|n| n.data == data) {
            return Ok(PutOutcome {
                path,
                changed: false,
            });
        }

        state.create(&path);
        if let Some(node) = state.nodes.get_mut(&path) {
            node.data = data;
            node.acl = opts.acl;
        }
        state.notify_data(&path);

        Ok(PutOutcome {
            path,
            changed: true,
        })
    }

    async fn delete(&self, path: &str) -> StoreResult<bool> {
        self.check(path)?;
        if path == ROOT {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        let mut state = self.inner.state();
        if !state.nodes.contains_key(path) {
            return Ok(false);
        }

        let prefix = format!("{path}/");
        let mut removed = vec![path.to_string()];
        removed.extend(
            state
                .nodes
                .range(prefix.clone()..)
                .take_while(|(key, _)| key.starts_with(&prefix))
                .map(|(key, _)| key.clone()),
        );
        for key in &removed {
            state.nodes.remove(key);
        }
        for key in &removed {
            state.notify_data(key);
            state.notify_children(key);
        }
        state.notify_parent(path);
        Ok(true)
    }

    async fn list(&self, path: &str) -> StoreResult<Vec<String>> {
        self.check(path)?;
        Ok(self.inner.state().children(path))
    }

    async fn watch_children(&self, path: &str) -> StoreResult<ChildrenWatch> {
        self.check(path)?;
        let mut sub = {
            let mut state = self.inner.state();
            let current = state.children(path);
            state
                .children_tx
                .entry(path.to_string())
                .or_insert_with(|| watch::channel(current).0)
                .subscribe()
        };

        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let initial = sub.borrow_and_update().clone();
            if tx.send(initial).await.is_err() {
                return;
            }
            while sub.changed().await.is_ok() {
                let snapshot = sub.borrow_and_update().clone();
                if tx.send(snapshot).await.is_err() {
                    break;
                }
            }
        });
        Ok(ChildrenWatch::new(path, rx))
    }

    async fn watch_data(&self, path: &str) -> StoreResult<DataWatch> {
        self.check(path)?;
        let mut sub = {
            let mut state = self.inner.state();
            let current = state.nodes.get(path).map(|n| n.data.clone());
            state
                .data_tx
                .entry(path.to_string())
                .or_insert_with(|| watch::channel(current).0)
                .subscribe()
        };

        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let initial = sub.borrow_and_update().clone();
            if tx.send(initial).await.is_err() {
                return;
            }
            while sub.changed().await.is_ok() {
                let snapshot = sub.borrow_and_update().clone();
                if tx.send(snapshot).await.is_err() {
                    break;
                }
            }
        });
        Ok(DataWatch::new(path, rx))
    }

    async fn lock(&self, path: &str, identity: &str) -> StoreResult<LockGuard> {
        self.check(path)?;
        loop {
            self.check_online()?;
            let notify = {
                let mut state = self.inner.state();
                if !state.locks.contains_key(path) {
                    state.next_token += 1;
                    let token = state.next_token;
                    let (lost_tx, lost_rx) = watch::channel(false);
                    state.locks.insert(
                        path.to_string(),
                        LockEntry {
                            identity: identity.to_string(),
                            token,
                            lost: lost_tx,
                        },
                    );
                    info!(path = %path, identity = %identity, "Lock acquired");

                    let inner = Arc::downgrade(&self.inner);
                    let lock_path = path.to_string();
                    return Ok(LockGuard::new(path, identity, lost_rx, move || {
                        if let Some(inner) = inner.upgrade() {
                            inner.state().release_lock(&lock_path, token);
                        }
                    }));
                }
                Arc::clone(state.lock_notify.entry(path.to_string()).or_default())
            };
            notify.notified().await;
        }
    }
}
