//! In-memory model of the cell.
//!
//! The [`Cell`] is owned by the master loop and is the only mutable copy of
//! scheduling state in the process. It is rebuilt from the store on startup
//! and kept current by the event handlers.

mod allocation;
mod app;
mod bucket;
mod identity;
mod partition;
mod schedule;
mod server;

use std::collections::{BTreeMap, BTreeSet};
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};
use tracing::warn;
use treadmill_id::{AppName, InstanceId};

pub use allocation::{
    Allocation, AllocationRecord, Assignment, AssignmentRecord, Blacklist, DEFAULT_RANK,
};
pub use app::{AffinityLimits, App, AppRecord, DEFAULT_PRIORITY};
pub use bucket::{Bucket, BucketRecord};
pub use identity::{IdentityGroup, IdentityGroupRecord};
pub use partition::{Partition, PartitionRecord, RebootPlan};
pub use schedule::PlacementChange;
pub use server::{Server, ServerRecord, ServerStatus};

/// Partition for servers and apps that do not name one.
pub const DEFAULT_PARTITION: &str = "_default";

/// Allocation for apps that match no assignment.
pub const DEFAULT_ALLOCATION: &str = "_default";

// =============================================================================
// Resources
// =============================================================================

/// A resource vector: cpu in percent of a core, memory and disk in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub cpu: u64,
    #[serde(default)]
    pub memory: u64,
    #[serde(default)]
    pub disk: u64,
}

impl Resources {
    pub fn new(cpu: u64, memory: u64, disk: u64) -> Self {
        Self { cpu, memory, disk }
    }

    /// True if every dimension of `self` fits into `free`.
    pub fn fits_in(&self, free: &Resources) -> bool {
        self.cpu <= free.cpu && self.memory <= free.memory && self.disk <= free.disk
    }

    /// True if any dimension of `self` is larger than `limit`.
    pub fn exceeds(&self, limit: &Resources) -> bool {
        !self.fits_in(limit)
    }

    pub fn saturating_sub(&self, other: &Resources) -> Resources {
        Resources {
            cpu: self.cpu.saturating_sub(other.cpu),
            memory: self.memory.saturating_sub(other.memory),
            disk: self.disk.saturating_sub(other.disk),
        }
    }

    /// Largest per-dimension ratio of `self` to `reserved`.
    ///
    /// A dimension with nothing reserved counts as infinitely utilized once
    /// anything is demanded in it.
    pub fn utilization(&self, reserved: &Resources) -> f64 {
        fn ratio(used: u64, reserved: u64) -> f64 {
            match (used, reserved) {
                (0, _) => 0.0,
                (_, 0) => f64::INFINITY,
                (u, r) => u as f64 / r as f64,
            }
        }
        ratio(self.cpu, reserved.cpu)
            .max(ratio(self.memory, reserved.memory))
            .max(ratio(self.disk, reserved.disk))
    }

    /// Sum of the per-dimension shares of `capacity` left in `self`.
    pub fn share_of(&self, capacity: &Resources) -> f64 {
        fn share(free: u64, total: u64) -> f64 {
            if total == 0 {
                0.0
            } else {
                free as f64 / total as f64
            }
        }
        share(self.cpu, capacity.cpu)
            + share(self.memory, capacity.memory)
            + share(self.disk, capacity.disk)
    }
}

impl Add for Resources {
    type Output = Resources;

    fn add(self, other: Resources) -> Resources {
        Resources {
            cpu: self.cpu.saturating_add(other.cpu),
            memory: self.memory.saturating_add(other.memory),
            disk: self.disk.saturating_add(other.disk),
        }
    }
}

impl AddAssign for Resources {
    fn add_assign(&mut self, other: Resources) {
        *self = *self + other;
    }
}

// =============================================================================
// Cell
// =============================================================================

/// The scheduling domain: topology, servers, policy and apps.
#[derive(Debug, Default)]
pub struct Cell {
    pub buckets: BTreeMap<String, Bucket>,
    /// Buckets attached directly to the cell.
    pub roots: BTreeSet<String>,
    pub servers: BTreeMap<String, Server>,
    pub partitions: BTreeMap<String, Partition>,
    /// Sorted by `(rank, name)`.
    pub allocations: Vec<Allocation>,
    pub apps: BTreeMap<InstanceId, App>,
    pub identity_groups: BTreeMap<String, IdentityGroup>,
    pub apps_blacklist: Blacklist,
    pub blackedout_servers: BTreeSet<String>,
}

impl Cell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Partition by name, falling back to defaults for unknown names.
    pub fn partition(&self, name: &str) -> Partition {
        self.partitions
            .get(name)
            .cloned()
            .unwrap_or_else(|| Partition::new(name))
    }

    pub fn allocation(&self, name: &str) -> Option<&Allocation> {
        self.allocations.iter().find(|a| a.name == name)
    }

    pub fn set_allocations(&mut self, mut allocations: Vec<Allocation>) {
        allocations.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.name.cmp(&b.name)));
        self.allocations = allocations;
    }

    /// Resolves which allocation an app name belongs to.
    ///
    /// Allocations are searched in rank order and the first matching
    /// assignment pattern wins.
    pub fn resolve_assignment(&self, app: &AppName) -> Assignment {
        let name = app.to_string();
        for allocation in &self.allocations {
            if let Some(priority) = allocation.match_priority(&name) {
                return Assignment {
                    allocation: allocation.name.clone(),
                    partition: allocation.partition.clone(),
                    priority: Some(priority),
                };
            }
        }
        Assignment {
            allocation: DEFAULT_ALLOCATION.to_string(),
            partition: DEFAULT_PARTITION.to_string(),
            priority: None,
        }
    }

    /// Adds or refreshes an app from its persisted record.
    ///
    /// Placement and model-only flags of an existing app are kept.
    pub fn upsert_app(&mut self, id: InstanceId, record: &AppRecord) {
        let assignment = self.resolve_assignment(id.app());
        let blacklisted = self.apps_blacklist.is_match(id.app());
        let mut app = App::from_record(id.clone(), record, &assignment);
        app.blacklisted = blacklisted;
        if let Some(existing) = self.apps.remove(&id) {
            app.server = existing.server;
            app.identity = existing.identity;
            app.placement_expiry = existing.placement_expiry;
            app.evicted = existing.evicted;
            app.unschedule = existing.unschedule;
        }
        self.apps.insert(id, app);
    }

    pub fn remove_app(&mut self, id: &InstanceId) -> Option<App> {
        self.apps.remove(id)
    }

    /// Re-evaluates every app's blacklisted flag.
    pub fn restamp_blacklist(&mut self) {
        for app in self.apps.values_mut() {
            app.blacklisted = self.apps_blacklist.is_match(app.id.app());
        }
    }

    /// Server traits plus the traits of every ancestor bucket.
    pub fn effective_traits(&self, server: &Server) -> BTreeSet<String> {
        let mut traits = server.traits.clone();
        let mut seen = BTreeSet::new();
        let mut current = Some(server.parent.clone());
        while let Some(name) = current {
            if !seen.insert(name.clone()) {
                warn!(bucket = %name, server = %server.name, "Bucket parent cycle");
                break;
            }
            let Some(bucket) = self.buckets.get(&name) else {
                break;
            };
            traits.extend(bucket.traits.iter().cloned());
            current = bucket.parent.clone();
        }
        traits
    }

    /// True if following parents from `bucket` reaches a cell root without
    /// revisiting a bucket.
    pub fn is_attached(&self, bucket: &str) -> bool {
        let mut seen = BTreeSet::new();
        let mut current = Some(bucket.to_string());
        while let Some(name) = current {
            if self.roots.contains(&name) {
                return true;
            }
            if !seen.insert(name.clone()) {
                return false;
            }
            current = self.buckets.get(&name).and_then(|b| b.parent.clone());
        }
        false
    }

    pub fn apps_on<'a>(&'a self, server: &'a str) -> impl Iterator<Item = &'a App> + 'a {
        self.apps
            .values()
            .filter(move |app| app.server.as_deref() == Some(server))
    }

    /// Free capacity of a server after its placed apps.
    pub fn free_capacity(&self, server: &Server) -> Resources {
        let used = self
            .apps_on(&server.name)
            .fold(Resources::default(), |acc, app| acc + app.demand);
        server.capacity.saturating_sub(&used)
    }

    /// Scheduled instance count per proid.
    pub fn scheduled_stats(&self) -> BTreeMap<String, u64> {
        let mut stats = BTreeMap::new();
        for id in self.apps.keys() {
            *stats.entry(id.proid().to_string()).or_insert(0) += 1;
        }
        stats
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_resources_fit_and_utilization() {
        let demand = Resources::new(50, 100, 10);
        assert!(demand.fits_in(&Resources::new(50, 100, 10)));
        assert!(demand.exceeds(&Resources::new(49, 100, 10)));
        assert_eq!(demand.utilization(&Resources::new(100, 100, 100)), 1.0);
        assert_eq!(
            demand.utilization(&Resources::new(100, 0, 100)),
            f64::INFINITY
        );
        assert_eq!(Resources::default().utilization(&Resources::default()), 0.0);
    }

    #[test]
    fn test_effective_traits_include_ancestors() {
        let mut cell = cell_with(vec![server("s1", "rack1", Resources::default())], vec![]);
        cell.servers.get_mut("s1").unwrap().traits.insert("ssd".to_string());
        cell.buckets.insert(
            "rack1".to_string(),
            Bucket {
                name: "rack1".to_string(),
                parent: Some("bldg1".to_string()),
                traits: ["rack".to_string()].into(),
            },
        );
        cell.buckets.insert(
            "bldg1".to_string(),
            Bucket {
                name: "bldg1".to_string(),
                parent: None,
                traits: ["dc1".to_string()].into(),
            },
        );
        cell.roots.insert("bldg1".to_string());

        let traits = cell.effective_traits(&cell.servers["s1"]);
        assert_eq!(
            traits.into_iter().collect::<Vec<_>>(),
            vec!["dc1", "rack", "ssd"]
        );
        assert!(cell.is_attached("rack1"));
    }

    #[test]
    fn test_bucket_cycle_is_not_attached() {
        let mut cell = Cell::new();
        for (name, parent) in [("a", "b"), ("b", "a")] {
            cell.buckets.insert(
                name.to_string(),
                Bucket {
                    name: name.to_string(),
                    parent: Some(parent.to_string()),
                    traits: BTreeSet::new(),
                },
            );
        }
        assert!(!cell.is_attached("a"));
    }

    #[test]
    fn test_upsert_keeps_placement() {
        let mut cell = Cell::new();
        let id: InstanceId = "proid.web#0000000001".parse().unwrap();
        let record = AppRecord {
            cpu: Some(10),
            memory: Some(10),
            disk: Some(10),
            ..Default::default()
        };
        cell.upsert_app(id.clone(), &record);
        cell.apps.get_mut(&id).unwrap().server = Some("s1".to_string());

        let updated = AppRecord {
            priority: Some(80),
            ..record
        };
        cell.upsert_app(id.clone(), &updated);
        let app = &cell.apps[&id];
        assert_eq!(app.priority, 80);
        assert_eq!(app.server.as_deref(), Some("s1"));
    }

    #[test]
    fn test_scheduled_stats() {
        let cell = cell_with(
            vec![],
            vec![
                app("a.web#0000000001", Resources::default(), 1),
                app("a.web#0000000002", Resources::default(), 1),
                app("b.db#0000000001", Resources::default(), 1),
            ],
        );
        let stats = cell.scheduled_stats();
        assert_eq!(stats["a"], 2);
        assert_eq!(stats["b"], 1);
    }
}
