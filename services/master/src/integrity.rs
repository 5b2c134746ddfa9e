//! Pending-start quarantine.
//!
//! A placed app that the node agent has not reported running is tracked
//! with the time it was first seen on its current server. When any app has
//! been pending longer than the start interval, its server is frozen along
//! with every app pending on it.

use std::collections::{BTreeMap, BTreeSet};

use treadmill_events::ServerState;
use treadmill_id::InstanceId;

use crate::model::Cell;

#[derive(Debug, Default)]
pub struct PendingStartTracker {
    /// instance -> (server, first seen unix seconds)
    pending: BTreeMap<InstanceId, (String, i64)>,
}

impl PendingStartTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn first_seen(&self, id: &InstanceId) -> Option<(&str, i64)> {
        self.pending.get(id).map(|(s, t)| (s.as_str(), *t))
    }

    /// Updates the pending set and returns the servers to freeze, each with
    /// the apps pending on it.
    ///
    /// An app is overdue once `now - first_seen > interval`. Servers already
    /// frozen are not returned again.
    pub fn check(
        &mut self,
        cell: &Cell,
        running: &BTreeSet<InstanceId>,
        now: i64,
        interval: i64,
    ) -> BTreeMap<String, Vec<InstanceId>> {
        let mut next = BTreeMap::new();
        for app in cell.apps.values() {
            let Some(server_name) = &app.server else {
                continue;
            };
            let Some(server) = cell.servers.get(server_name) else {
                continue;
            };
            if server.is_down() || running.contains(&app.id) {
                continue;
            }
            let first_seen = match self.pending.get(&app.id) {
                Some((previous, seen)) if previous == server_name => *seen,
                _ => now,
            };
            next.insert(app.id.clone(), (server_name.clone(), first_seen));
        }
        self.pending = next;

        let overdue: BTreeSet<&str> = self
            .pending
            .values()
            .filter(|(_, seen)| now - seen > interval)
            .map(|(server, _)| server.as_str())
            .filter(|server| {
                cell.servers
                    .get(*server)
                    .is_some_and(|s| s.state != ServerState::Frozen)
            })
            .collect();

        let mut freeze: BTreeMap<String, Vec<InstanceId>> = BTreeMap::new();
        for (id, (server, _)) in &self.pending {
            if overdue.contains(server.as_str()) {
                freeze.entry(server.clone()).or_default().push(id.clone());
            }
        }
        freeze
    }
}
