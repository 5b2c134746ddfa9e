//! Topology buckets, cell membership and partitions.

use std::collections::BTreeMap;

use tracing::info;
use treadmill_store::{json, Backend, PutOptions};

use super::events::notify;
use crate::dispatch::Resource;
use crate::model::{BucketRecord, PartitionRecord};
use crate::{paths, MasterResult};

// =============================================================================
// Buckets
// =============================================================================

/// Creates or updates a bucket.
pub async fn create_bucket(
    store: &dyn Backend,
    name: &str,
    record: &BucketRecord,
) -> MasterResult<bool> {
    let outcome =
        json::put_json(store, &paths::bucket(name), record, PutOptions::check_content()).await?;
    if outcome.changed {
        notify(store, Resource::Buckets, None).await?;
        info!(bucket = %name, "Bucket updated");
    }
    Ok(outcome.changed)
}

pub async fn delete_bucket(store: &dyn Backend, name: &str) -> MasterResult<bool> {
    let existed = store.delete(&paths::bucket(name)).await?;
    if existed {
        notify(store, Resource::Buckets, None).await?;
        info!(bucket = %name, "Bucket deleted");
    }
    Ok(existed)
}

pub async fn get_bucket(store: &dyn Backend, name: &str) -> MasterResult<Option<BucketRecord>> {
    Ok(json::get_json(store, &paths::bucket(name)).await?)
}

pub async fn list_buckets(store: &dyn Backend) -> MasterResult<Vec<String>> {
    Ok(store.list(paths::BUCKETS).await?)
}

// =============================================================================
// Cell
// =============================================================================

/// Attaches a top-level bucket to the cell.
pub async fn cell_insert_bucket(store: &dyn Backend, name: &str) -> MasterResult<bool> {
    let path = paths::cell_bucket(name);
    if store.exists(&path).await? {
        return Ok(false);
    }
    store.ensure_exists(&path).await?;
    notify(store, Resource::Cell, None).await?;
    info!(bucket = %name, "Bucket attached to cell");
    Ok(true)
}

pub async fn cell_remove_bucket(store: &dyn Backend, name: &str) -> MasterResult<bool> {
    let existed = store.delete(&paths::cell_bucket(name)).await?;
    if existed {
        notify(store, Resource::Cell, None).await?;
        info!(bucket = %name, "Bucket detached from cell");
    }
    Ok(existed)
}

pub async fn cell_buckets(store: &dyn Backend) -> MasterResult<Vec<String>> {
    Ok(store.list(paths::CELL).await?)
}

// =============================================================================
// Partitions
// =============================================================================

pub async fn update_partition(
    store: &dyn Backend,
    name: &str,
    record: &PartitionRecord,
) -> MasterResult<bool> {
    let outcome =
        json::put_json(store, &paths::partition(name), record, PutOptions::check_content())
            .await?;
    if outcome.changed {
        notify(store, Resource::Cell, None).await?;
        info!(partition = %name, "Partition updated");
    }
    Ok(outcome.changed)
}

pub async fn delete_partition(store: &dyn Backend, name: &str) -> MasterResult<bool> {
    let existed = store.delete(&paths::partition(name)).await?;
    if existed {
        notify(store, Resource::Cell, None).await?;
        info!(partition = %name, "Partition deleted");
    }
    Ok(existed)
}

pub async fn get_partition(
    store: &dyn Backend,
    name: &str,
) -> MasterResult<Option<PartitionRecord>> {
    Ok(json::get_json(store, &paths::partition(name)).await?)
}

pub async fn list_partitions(
    store: &dyn Backend,
) -> MasterResult<BTreeMap<String, PartitionRecord>> {
    let mut partitions = BTreeMap::new();
    for name in store.list(paths::PARTITIONS).await? {
        if let Some(record) = get_partition(store, &name).await? {
            partitions.insert(name, record);
        }
    }
    Ok(partitions)
}
