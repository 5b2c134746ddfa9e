//! Placement engine.
//!
//! A deterministic, rank ordered, greedy best-fit placer with priority
//! preemption. One call to [`Cell::schedule`] is one scheduling pass.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;
use treadmill_id::InstanceId;

use super::{App, Cell, IdentityGroup, Resources, Server, DEFAULT_RANK};

/// Placement of one app before and after a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementChange {
    pub app: InstanceId,
    pub before: Option<String>,
    pub before_expiry: Option<i64>,
    pub after: Option<String>,
    pub after_expiry: Option<i64>,
}

impl PlacementChange {
    pub fn is_changed(&self) -> bool {
        self.before != self.after || self.before_expiry != self.after_expiry
    }
}

/// Queue order: effective rank, then priority descending, then id.
type QueueKey = (u32, Reverse<u8>, InstanceId);

// =============================================================================
// Usage
// =============================================================================

/// Running totals of what is placed where.
#[derive(Debug, Default)]
struct Usage {
    free: BTreeMap<String, Resources>,
    server_affinity: HashMap<(String, String), usize>,
    rack_affinity: HashMap<(String, String), usize>,
    identities: HashMap<String, BTreeSet<u32>>,
}

impl Usage {
    fn build(servers: &BTreeMap<String, Server>, apps: &BTreeMap<InstanceId, App>) -> Self {
        let mut usage = Usage {
            free: servers
                .values()
                .map(|s| (s.name.clone(), s.capacity))
                .collect(),
            ..Default::default()
        };
        for app in apps.values() {
            if let Some(server) = &app.server {
                usage.add(servers, app, server);
            }
        }
        usage
    }

    fn free_of(&self, server: &str) -> Resources {
        self.free.get(server).copied().unwrap_or_default()
    }

    fn affinity_on(&self, server: &str, affinity: &str) -> usize {
        self.server_affinity
            .get(&(server.to_string(), affinity.to_string()))
            .copied()
            .unwrap_or(0)
    }

    fn affinity_in(&self, rack: &str, affinity: &str) -> usize {
        self.rack_affinity
            .get(&(rack.to_string(), affinity.to_string()))
            .copied()
            .unwrap_or(0)
    }

    fn add(&mut self, servers: &BTreeMap<String, Server>, app: &App, server: &str) {
        if let Some(free) = self.free.get_mut(server) {
            *free = free.saturating_sub(&app.demand);
        }
        *self
            .server_affinity
            .entry((server.to_string(), app.affinity.clone()))
            .or_default() += 1;
        if let Some(rack) = servers.get(server).map(|s| s.parent.clone()) {
            *self
                .rack_affinity
                .entry((rack, app.affinity.clone()))
                .or_default() += 1;
        }
        if let (Some(group), Some(identity)) = (&app.identity_group, app.identity) {
            self.identities
                .entry(group.clone())
                .or_default()
                .insert(identity);
        }
    }

    fn remove(&mut self, servers: &BTreeMap<String, Server>, app: &App, server: &str) {
        if let Some(free) = self.free.get_mut(server) {
            *free += app.demand;
        }
        if let Some(count) = self
            .server_affinity
            .get_mut(&(server.to_string(), app.affinity.clone()))
        {
            *count = count.saturating_sub(1);
        }
        if let Some(rack) = servers.get(server).map(|s| s.parent.clone()) {
            if let Some(count) = self.rack_affinity.get_mut(&(rack, app.affinity.clone())) {
                *count = count.saturating_sub(1);
            }
        }
        if let (Some(group), Some(identity)) = (&app.identity_group, app.identity) {
            if let Some(used) = self.identities.get_mut(group) {
                used.remove(&identity);
            }
        }
    }
}

// =============================================================================
// Placer
// =============================================================================

/// Read-only view of the cell used while apps are being moved.
struct Placer<'a> {
    servers: &'a BTreeMap<String, Server>,
    traits: BTreeMap<String, BTreeSet<String>>,
    allocation_traits: HashMap<String, Vec<String>>,
    blackedout: &'a BTreeSet<String>,
    identity_groups: &'a BTreeMap<String, IdentityGroup>,
    max_leases: BTreeMap<String, u64>,
    now: i64,
}

impl Placer<'_> {
    fn is_eligible(&self, server: &Server, app: &App, usage: &Usage) -> bool {
        if !server.is_available()
            || self.blackedout.contains(&server.name)
            || server.partition != app.partition
        {
            return false;
        }

        let Some(server_traits) = self.traits.get(&server.name) else {
            return false;
        };
        let allocation_traits = self
            .allocation_traits
            .get(&app.allocation)
            .map(Vec::as_slice)
            .unwrap_or_default();
        if !app
            .traits
            .iter()
            .chain(allocation_traits)
            .all(|t| server_traits.contains(t))
        {
            return false;
        }

        if let Some(limit) = app.affinity_limits.server {
            if usage.affinity_on(&server.name, &app.affinity) >= limit {
                return false;
            }
        }
        if let Some(limit) = app.affinity_limits.rack {
            if usage.affinity_in(&server.parent, &app.affinity) >= limit {
                return false;
            }
        }
        true
    }

    fn lease_expiry(&self, app: &App) -> i64 {
        let max_lease = self
            .max_leases
            .get(&app.partition)
            .copied()
            .unwrap_or(u64::MAX);
        let lease = app.lease.min(max_lease).min(i64::MAX as u64) as i64;
        self.now.saturating_add(lease)
    }

    /// Server whose lower priority apps can be evicted to make room, with
    /// the fewest evictions.
    fn preemption_target(
        &self,
        apps: &BTreeMap<InstanceId, App>,
        usage: &Usage,
        app: &App,
        candidates: &[&Server],
    ) -> Option<(String, Vec<InstanceId>)> {
        let mut best: Option<(String, Vec<InstanceId>)> = None;
        for server in candidates {
            let mut lower: Vec<&App> = apps
                .values()
                .filter(|a| a.server.as_deref() == Some(server.name.as_str()))
                .filter(|a| a.priority < app.priority)
                .collect();
            lower.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| b.id.cmp(&a.id)));

            let mut free = usage.free_of(&server.name);
            let mut victims = Vec::new();
            for victim in lower {
                if app.demand.fits_in(&free) {
                    break;
                }
                free += victim.demand;
                victims.push(victim.id.clone());
            }
            if !app.demand.fits_in(&free) {
                continue;
            }
            if best.as_ref().is_none_or(|(_, v)| victims.len() < v.len()) {
                best = Some((server.name.clone(), victims));
            }
        }
        best
    }

    /// Tries to place one app. Returns the apps preempted to make room.
    fn place(
        &self,
        apps: &mut BTreeMap<InstanceId, App>,
        usage: &mut Usage,
        id: &InstanceId,
    ) -> Vec<InstanceId> {
        let Some(app) = apps.get(id).cloned() else {
            return Vec::new();
        };

        let identity = match &app.identity_group {
            Some(group) => {
                let used = usage.identities.get(group).cloned().unwrap_or_default();
                let slot = self
                    .identity_groups
                    .get(group)
                    .and_then(|g| g.free_slot(&used));
                if slot.is_none() {
                    debug!(instance_id = %id, identity_group = %group, "No free identity");
                    return Vec::new();
                }
                slot
            }
            None => None,
        };

        let candidates: Vec<&Server> = self
            .servers
            .values()
            .filter(|s| self.is_eligible(s, &app, usage))
            .collect();

        let best_fit = candidates
            .iter()
            .filter(|s| app.demand.fits_in(&usage.free_of(&s.name)))
            .map(|s| {
                let remaining = usage.free_of(&s.name).saturating_sub(&app.demand);
                (remaining.share_of(&s.capacity), s.name.clone())
            })
            .min_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        let (server, victims) = match best_fit {
            Some((_, name)) => (name, Vec::new()),
            None => match self.preemption_target(apps, usage, &app, &candidates) {
                Some(target) => target,
                None => {
                    debug!(instance_id = %id, "No eligible server");
                    return Vec::new();
                }
            },
        };

        for victim_id in &victims {
            if let Some(victim) = apps.get_mut(victim_id) {
                usage.remove(self.servers, victim, &server);
                debug!(instance_id = %victim_id, server = %server, preempted_by = %id, "Preempted");
                victim.server = None;
                victim.identity = None;
                victim.placement_expiry = None;
                victim.evicted = true;
            }
        }

        if let Some(placed) = apps.get_mut(id) {
            placed.server = Some(server.clone());
            placed.identity = identity;
            placed.placement_expiry = Some(self.lease_expiry(placed));
            placed.renew = false;
            usage.add(self.servers, placed, &server);
        }
        victims
    }
}

// =============================================================================
// Cell::schedule
// =============================================================================

impl Cell {
    /// Runs one scheduling pass at unix time `now`.
    ///
    /// Returns the before and after placement of every app, changed or not.
    pub fn schedule(&mut self, now: i64) -> Vec<PlacementChange> {
        let before: BTreeMap<InstanceId, (Option<String>, Option<i64>)> = self
            .apps
            .iter()
            .map(|(id, app)| (id.clone(), (app.server.clone(), app.placement_expiry)))
            .collect();

        self.evict();
        let ranks = self.effective_ranks();

        let traits = self
            .servers
            .values()
            .map(|s| (s.name.clone(), self.effective_traits(s)))
            .collect();
        let allocation_traits = self
            .allocations
            .iter()
            .map(|a| (a.name.clone(), a.traits.clone()))
            .collect();
        let max_leases = self
            .apps
            .values()
            .map(|a| a.partition.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|p| {
                let max_lease = self.partition(&p).max_lease;
                (p, max_lease)
            })
            .collect();

        let placer = Placer {
            servers: &self.servers,
            traits,
            allocation_traits,
            blackedout: &self.blackedout_servers,
            identity_groups: &self.identity_groups,
            max_leases,
            now,
        };
        let apps = &mut self.apps;
        let mut usage = Usage::build(placer.servers, apps);

        let queue_key = |app: &App| -> Option<QueueKey> {
            if app.server.is_some() || !app.is_schedulable() {
                return None;
            }
            let rank = ranks.get(&app.id).copied().flatten()?;
            Some((rank, Reverse(app.priority), app.id.clone()))
        };

        let mut queue: BTreeSet<QueueKey> = apps.values().filter_map(queue_key).collect();
        while let Some((_, _, id)) = queue.pop_first() {
            for victim in placer.place(apps, &mut usage, &id) {
                if let Some(key) = apps.get(&victim).and_then(queue_key) {
                    queue.insert(key);
                }
            }
        }

        for app in apps.values_mut() {
            if app.renew && app.server.is_some() {
                app.placement_expiry = Some(placer.lease_expiry(app));
                app.renew = false;
            }
        }

        apps.iter()
            .map(|(id, app)| {
                let (before, before_expiry) = before.get(id).cloned().unwrap_or_default();
                PlacementChange {
                    app: id.clone(),
                    before,
                    before_expiry,
                    after: app.server.clone(),
                    after_expiry: app.placement_expiry,
                }
            })
            .collect()
    }

    /// Removes apps from servers they may no longer run on.
    fn evict(&mut self) {
        for app in self.apps.values_mut() {
            let Some(name) = app.server.clone() else {
                app.unschedule = false;
                continue;
            };
            app.evicted = false;

            let evicted = match self.servers.get(&name) {
                None => Some(true),
                Some(server) if server.is_down() => Some(true),
                Some(server) if server.partition != app.partition => Some(true),
                Some(_) if app.unschedule => Some(true),
                Some(_) if app.blacklisted || app.priority == 0 => Some(false),
                Some(_) => None,
            };
            app.unschedule = false;

            if let Some(evicted) = evicted {
                debug!(instance_id = %app.id, server = %name, evicted, "Removed from server");
                app.server = None;
                app.identity = None;
                app.placement_expiry = None;
                app.evicted = evicted;
            }
        }
    }

    /// Effective rank per schedulable app, `None` when over the
    /// allocation's utilization cap.
    fn effective_ranks(&self) -> HashMap<InstanceId, Option<u32>> {
        let mut by_allocation: BTreeMap<&str, Vec<&App>> = BTreeMap::new();
        for app in self.apps.values().filter(|a| a.is_schedulable()) {
            by_allocation
                .entry(app.allocation.as_str())
                .or_default()
                .push(app);
        }

        let mut ranks = HashMap::new();
        for (name, mut group) in by_allocation {
            group.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
            let (rank, adjustment, reserved, max_utilization) = match self.allocation(name) {
                Some(a) => (a.rank, a.rank_adjustment, a.reserved, a.max_utilization),
                None => (DEFAULT_RANK, 0, Resources::default(), None),
            };

            let mut cumulative = Resources::default();
            for app in group {
                cumulative += app.demand;
                let placeable =
                    max_utilization.is_none_or(|max| cumulative.utilization(&reserved) <= max);
                let effective = if cumulative.exceeds(&reserved) {
                    rank.saturating_add(adjustment)
                } else {
                    rank
                };
                ranks.insert(app.id.clone(), placeable.then_some(effective));
            }
        }
        ranks
    }
}
