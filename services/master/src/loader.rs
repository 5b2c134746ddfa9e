//! Loads the cell model from the store.
//!
//! Each function reloads one slice of the model. Records that vanish between
//! `list` and `get` are treated as deleted.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};
use treadmill_id::InstanceId;
use treadmill_store::{json, Backend};

use crate::model::{
    Allocation, AllocationRecord, AppRecord, Blacklist, Bucket, BucketRecord, Cell, IdentityGroup,
    IdentityGroupRecord, Partition, PartitionRecord, Server, ServerRecord,
};
use crate::persist;
use crate::{paths, MasterResult};

/// Full model load, in dependency order.
pub async fn load_model(store: &dyn Backend, cell: &mut Cell) -> MasterResult<()> {
    load_cell(store, cell).await?;
    load_servers(store, cell).await?;
    load_presence(store, cell).await?;
    load_blackedout_servers(store, cell).await?;
    load_allocations(store, cell).await?;
    load_apps_blacklist(store, cell).await?;
    load_identity_groups(store, cell).await?;
    load_apps(store, cell).await?;
    info!(
        servers = cell.servers.len(),
        buckets = cell.buckets.len(),
        apps = cell.apps.len(),
        "Model loaded"
    );
    Ok(())
}

// =============================================================================
// Topology
// =============================================================================

/// Buckets, cell roots and partitions.
pub async fn load_cell(store: &dyn Backend, cell: &mut Cell) -> MasterResult<()> {
    load_buckets(store, cell).await?;

    cell.roots = store.list(paths::CELL).await?.into_iter().collect();
    for root in &cell.roots {
        if !cell.buckets.contains_key(root) {
            warn!(bucket = %root, "Cell references unknown bucket");
        }
    }

    let mut partitions = BTreeMap::new();
    for name in store.list(paths::PARTITIONS).await? {
        let record: Option<PartitionRecord> =
            json::get_json(store, &paths::partition(&name)).await?;
        let record = record.unwrap_or_default();
        partitions.insert(name.clone(), Partition::from_record(&name, &record));
    }
    cell.partitions = partitions;
    Ok(())
}

pub async fn load_buckets(store: &dyn Backend, cell: &mut Cell) -> MasterResult<()> {
    let mut buckets = BTreeMap::new();
    for name in store.list(paths::BUCKETS).await? {
        if let Some(record) = json::get_json::<BucketRecord>(store, &paths::bucket(&name)).await? {
            buckets.insert(name.clone(), Bucket::from_record(&name, &record));
        }
    }
    cell.buckets = buckets;
    Ok(())
}

// =============================================================================
// Servers
// =============================================================================

async fn presence_set(store: &dyn Backend) -> MasterResult<BTreeSet<String>> {
    Ok(store
        .list(paths::SERVER_PRESENCE)
        .await?
        .iter()
        .map(|node| paths::presence_server_name(node).to_string())
        .collect())
}

/// Reloads one server. Returns false, and drops it from the model, when its
/// record is gone.
pub async fn load_server(store: &dyn Backend, cell: &mut Cell, name: &str) -> MasterResult<bool> {
    let Some(record) = json::get_json::<ServerRecord>(store, &paths::server(name)).await? else {
        if cell.servers.remove(name).is_some() {
            info!(server = %name, "Server removed");
        }
        return Ok(false);
    };
    let status = persist::read_server_status(store, name).await?;
    let presence = match cell.servers.get(name) {
        Some(existing) => existing.presence,
        None => presence_set(store).await?.contains(name),
    };

    let mut server = Server::from_record(name, &record, status);
    server.presence = presence;
    if !cell.buckets.contains_key(&server.parent) {
        warn!(server = %name, parent = %server.parent, "Server parent bucket unknown");
    }
    debug!(server = %name, state = %server.state, presence, "Server loaded");
    cell.servers.insert(name.to_string(), server);
    Ok(true)
}

pub async fn load_servers(store: &dyn Backend, cell: &mut Cell) -> MasterResult<()> {
    let names: BTreeSet<String> = store.list(paths::SERVERS).await?.into_iter().collect();
    cell.servers.retain(|name, _| names.contains(name));
    for name in &names {
        load_server(store, cell, name).await?;
    }
    Ok(())
}

/// Sets every server's presence flag from the presence namespace.
pub async fn load_presence(store: &dyn Backend, cell: &mut Cell) -> MasterResult<()> {
    let present = presence_set(store).await?;
    for server in cell.servers.values_mut() {
        server.presence = present.contains(&server.name);
    }
    Ok(())
}

pub async fn load_blackedout_servers(store: &dyn Backend, cell: &mut Cell) -> MasterResult<()> {
    cell.blackedout_servers = store
        .list(paths::BLACKEDOUT_SERVERS)
        .await?
        .into_iter()
        .collect();
    Ok(())
}

// =============================================================================
// Policy
// =============================================================================

/// Reloads allocations. Entries with invalid patterns are skipped.
pub async fn load_allocations(store: &dyn Backend, cell: &mut Cell) -> MasterResult<()> {
    let records: Vec<AllocationRecord> = json::get_json(store, paths::ALLOCATIONS)
        .await?
        .unwrap_or_default();
    let mut allocations = Vec::with_capacity(records.len());
    for record in &records {
        match Allocation::try_from_record(record) {
            Ok(allocation) => allocations.push(allocation),
            Err(e) => warn!(allocation = %record.name, error = %e, "Skipping invalid allocation"),
        }
    }
    cell.set_allocations(allocations);
    Ok(())
}

/// Reloads the apps blacklist and re-stamps every app.
pub async fn load_apps_blacklist(store: &dyn Backend, cell: &mut Cell) -> MasterResult<()> {
    let reasons: BTreeMap<String, String> = json::get_json(store, paths::BLACKEDOUT_APPS)
        .await?
        .unwrap_or_default();
    cell.apps_blacklist = Blacklist::new(reasons);
    cell.restamp_blacklist();
    Ok(())
}

pub async fn load_identity_groups(store: &dyn Backend, cell: &mut Cell) -> MasterResult<()> {
    let mut groups = BTreeMap::new();
    for name in store.list(paths::IDENTITY_GROUPS).await? {
        let record: Option<IdentityGroupRecord> =
            json::get_json(store, &paths::identity_group(&name)).await?;
        if let Some(record) = record {
            groups.insert(name.clone(), IdentityGroup::from_record(&name, &record));
        }
    }
    cell.identity_groups = groups;
    Ok(())
}

// =============================================================================
// Apps
// =============================================================================

/// Instance ids under the scheduled namespace. Unparseable names are
/// skipped.
pub async fn list_scheduled(store: &dyn Backend) -> MasterResult<Vec<InstanceId>> {
    Ok(parse_ids(store.list(paths::SCHEDULED).await?))
}

pub(crate) fn parse_ids(names: impl IntoIterator<Item = String>) -> Vec<InstanceId> {
    names
        .into_iter()
        .filter_map(|name| match name.parse() {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(name = %name, error = %e, "Ignoring invalid instance id");
                None
            }
        })
        .collect()
}

/// Reloads one app. Returns false when its record is gone; the caller
/// decides how to retire it.
pub async fn load_app(store: &dyn Backend, cell: &mut Cell, id: &InstanceId) -> MasterResult<bool> {
    let Some(record) = json::get_json::<AppRecord>(store, &paths::scheduled(id)).await? else {
        return Ok(false);
    };
    cell.upsert_app(id.clone(), &record);
    Ok(true)
}

/// Reloads every app. Apps whose records are gone are dropped.
pub async fn load_apps(store: &dyn Backend, cell: &mut Cell) -> MasterResult<()> {
    let ids: BTreeSet<InstanceId> = list_scheduled(store).await?.into_iter().collect();
    cell.apps.retain(|id, _| ids.contains(id));
    for id in &ids {
        if !load_app(store, cell, id).await? {
            cell.remove_app(id);
        }
    }
    Ok(())
}

/// Restores placement from the persisted placement records.
///
/// Only apps without a placement in the model are touched; records for
/// unknown apps are left for the integrity check.
pub async fn restore_placement(store: &dyn Backend, cell: &mut Cell) -> MasterResult<usize> {
    let mut restored = 0;
    for server in store.list(paths::PLACEMENT).await? {
        for id in parse_ids(store.list(&paths::placement_server(&server)).await?) {
            let Some(app) = cell.apps.get_mut(&id) else {
                continue;
            };
            if app.server.is_some() {
                warn!(instance_id = %id, server = %server, "App has more than one placement record");
                continue;
            }
            let record = persist::read_placement(store, &server, &id)
                .await?
                .unwrap_or(persist::PlacementRecord {
                    identity: None,
                    expires: None,
                });
            app.server = Some(server.clone());
            app.identity = record.identity;
            app.placement_expiry = record.expires;
            restored += 1;
        }
    }
    debug!(restored, "Placement restored");
    Ok(restored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Resources;
    use serde_json::json;
    use treadmill_store::{MemoryBackend, PutOptions};

    async fn put(store: &MemoryBackend, path: &str, value: serde_json::Value) {
        json::put_json(store, path, &value, PutOptions::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_load_model() {
        let store = MemoryBackend::new();
        put(&store, "/buckets/rack1", json!({"traits": ["ssd"]})).await;
        store.ensure_exists("/cell/rack1").await.unwrap();
        put(&store, "/partitions/_default", json!({"down_threshold": 2})).await;
        put(
            &store,
            "/servers/host1",
            json!({"parent": "rack1", "cpu": 100, "memory": 100, "disk": 100, "state": "up"}),
        )
        .await;
        store.ensure_exists("/server.presence/host1#0000000000").await.unwrap();
        put(
            &store,
            "/allocations",
            json!([{"name": "t/prod", "assignments": [{"pattern": "proid.*", "priority": 70}]}]),
        )
        .await;
        put(
            &store,
            "/scheduled/proid.web#0000000001",
            json!({"cpu": 10, "memory": 10, "disk": 10}),
        )
        .await;

        let mut cell = Cell::new();
        load_model(&store, &mut cell).await.unwrap();

        assert!(cell.is_attached("rack1"));
        assert_eq!(cell.partition("_default").down_threshold, 2);
        let server = &cell.servers["host1"];
        assert!(server.presence);
        assert!(server.is_available());
        let app = cell.apps.values().next().unwrap();
        assert_eq!(app.allocation, "t/prod");
        assert_eq!(app.priority, 70);
        assert_eq!(app.demand, Resources::new(10, 10, 10));
    }

    #[tokio::test]
    async fn test_persisted_status_wins_over_record() {
        let store = MemoryBackend::new();
        put(&store, "/servers/host1", json!({"parent": "rack1", "state": "up"})).await;
        put(&store, "/placement/host1", json!({"state": "frozen", "since": 42})).await;

        let mut cell = Cell::new();
        load_servers(&store, &mut cell).await.unwrap();
        assert_eq!(cell.servers["host1"].state.as_str(), "frozen");
        assert_eq!(cell.servers["host1"].since, 42);
    }

    #[tokio::test]
    async fn test_vanished_records_are_dropped() {
        let store = MemoryBackend::new();
        put(&store, "/servers/host1", json!({"parent": "rack1"})).await;
        let mut cell = Cell::new();
        load_servers(&store, &mut cell).await.unwrap();
        assert!(cell.servers.contains_key("host1"));

        store.delete("/servers/host1").await.unwrap();
        assert!(!load_server(&store, &mut cell, "host1").await.unwrap());
        assert!(cell.servers.is_empty());
    }

    #[tokio::test]
    async fn test_restore_placement() {
        let store = MemoryBackend::new();
        put(&store, "/scheduled/proid.web#0000000001", json!({"cpu": 1, "memory": 1, "disk": 1}))
            .await;
        put(
            &store,
            "/placement/host1/proid.web#0000000001",
            json!({"identity": 3, "expires": 99}),
        )
        .await;
        put(&store, "/placement/host1/proid.gone#0000000001", json!({})).await;

        let mut cell = Cell::new();
        load_apps(&store, &mut cell).await.unwrap();
        assert_eq!(restore_placement(&store, &mut cell).await.unwrap(), 1);

        let app = cell.apps.values().next().unwrap();
        assert_eq!(app.server.as_deref(), Some("host1"));
        assert_eq!(app.identity, Some(3));
        assert_eq!(app.placement_expiry, Some(99));
    }

    #[tokio::test]
    async fn test_invalid_allocation_skipped() {
        let store = MemoryBackend::new();
        put(
            &store,
            "/allocations",
            json!([
                {"name": "t/bad", "assignments": [{"pattern": "a[", "priority": 1}]},
                {"name": "t/good"},
            ]),
        )
        .await;
        let mut cell = Cell::new();
        load_allocations(&store, &mut cell).await.unwrap();
        assert_eq!(cell.allocations.len(), 1);
        assert_eq!(cell.allocations[0].name, "t/good");
    }
}
