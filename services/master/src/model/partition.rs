//! Partitions and reboot scheduling.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use treadmill_events::ServerState;

use super::Cell;

fn default_down_threshold() -> usize {
    1
}

fn default_reboot_window() -> i64 {
    24 * 3600
}

fn default_max_lease() -> u64 {
    7 * 24 * 3600
}

/// Persisted partition record, `/partitions/<name>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionRecord {
    /// Servers allowed to be down or rebooting at once.
    #[serde(default = "default_down_threshold")]
    pub down_threshold: usize,

    /// Seconds before `valid_until` a server becomes a reboot candidate.
    #[serde(default = "default_reboot_window")]
    pub reboot_window: i64,

    /// Upper bound on app placement leases, seconds.
    #[serde(default = "default_max_lease")]
    pub max_lease: u64,
}

impl Default for PartitionRecord {
    fn default() -> Self {
        Self {
            down_threshold: default_down_threshold(),
            reboot_window: default_reboot_window(),
            max_lease: default_max_lease(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub name: String,
    pub down_threshold: usize,
    pub reboot_window: i64,
    pub max_lease: u64,
}

impl Partition {
    pub fn new(name: &str) -> Self {
        Self::from_record(name, &PartitionRecord::default())
    }

    pub fn from_record(name: &str, record: &PartitionRecord) -> Self {
        Self {
            name: name.to_string(),
            down_threshold: record.down_threshold,
            reboot_window: record.reboot_window,
            max_lease: record.max_lease,
        }
    }
}

/// Reboot marks to add and remove.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebootPlan {
    pub mark: Vec<String>,
    pub cancel: Vec<String>,
}

impl Cell {
    fn partition_names(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = self.partitions.keys().cloned().collect();
        names.extend(self.servers.values().map(|s| s.partition.clone()));
        names
    }

    /// Partition reboot tick: servers to mark for reboot.
    ///
    /// Candidates are up servers inside their reboot window that are not
    /// already marked. Each partition marks oldest deadlines first while
    /// its down and rebooting servers stay under the threshold.
    pub fn reboot_tick(&self, now: i64, pending: &BTreeSet<String>) -> Vec<String> {
        let mut marks = Vec::new();
        for name in self.partition_names() {
            let partition = self.partition(&name);
            let members: Vec<_> = self
                .servers
                .values()
                .filter(|s| s.partition == name)
                .collect();

            let down = members
                .iter()
                .filter(|s| s.is_down() && !pending.contains(&s.name))
                .count();
            let rebooting = members.iter().filter(|s| pending.contains(&s.name)).count();
            let budget = partition.down_threshold.saturating_sub(down + rebooting);
            if budget == 0 {
                continue;
            }

            let mut candidates: Vec<_> = members
                .iter()
                .filter(|s| s.state == ServerState::Up && !pending.contains(&s.name))
                .filter_map(|s| {
                    let valid_until = s.valid_until?;
                    (valid_until - partition.reboot_window <= now).then_some((valid_until, &s.name))
                })
                .collect();
            candidates.sort();
            marks.extend(
                candidates
                    .into_iter()
                    .take(budget)
                    .map(|(_, name)| name.clone()),
            );
        }
        marks
    }

    /// Cell-wide reboot check.
    ///
    /// At most one pending reboot is kept per parent bucket, the one with
    /// the earliest deadline. Servers past their deadline are marked
    /// regardless of thresholds.
    pub fn reboot_check(&self, now: i64, pending: &BTreeSet<String>) -> RebootPlan {
        let mut plan = RebootPlan::default();

        let mut by_parent: BTreeMap<&str, Vec<(i64, &str)>> = BTreeMap::new();
        for name in pending {
            if let Some(server) = self.servers.get(name) {
                by_parent
                    .entry(server.parent.as_str())
                    .or_default()
                    .push((server.valid_until.unwrap_or(i64::MAX), name.as_str()));
            }
        }
        for (_, mut group) in by_parent {
            group.sort();
            plan.cancel
                .extend(group.into_iter().skip(1).map(|(_, name)| name.to_string()));
        }

        for server in self.servers.values() {
            let expired = server.valid_until.is_some_and(|v| v <= now);
            if !expired {
                continue;
            }
            if let Some(pos) = plan.cancel.iter().position(|n| n == &server.name) {
                plan.cancel.remove(pos);
            } else if !pending.contains(&server.name) {
                plan.mark.push(server.name.clone());
            }
        }
        plan
    }
}
