//! Seeding a store from a JSON file.
//!
//! Lets a single process run a cell against the in-memory backend: the
//! file describes topology and policy, which is written through the master
//! API before the master starts.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;
use treadmill_store::Backend;

use crate::api;
use crate::model::{AllocationRecord, BucketRecord, PartitionRecord, ServerRecord};
use crate::{paths, MasterResult};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Seed {
    /// Top-level buckets attached to the cell.
    #[serde(default)]
    pub cell: Vec<String>,
    #[serde(default)]
    pub buckets: BTreeMap<String, BucketRecord>,
    #[serde(default)]
    pub partitions: BTreeMap<String, PartitionRecord>,
    #[serde(default)]
    pub servers: BTreeMap<String, ServerRecord>,
    #[serde(default)]
    pub allocations: Vec<AllocationRecord>,
    /// Identity group sizes.
    #[serde(default)]
    pub identity_groups: BTreeMap<String, u32>,
    /// Servers registered as present, standing in for their node agents.
    #[serde(default)]
    pub present: Vec<String>,
}

pub fn load_seed(path: &Path) -> Result<Seed> {
    let data = std::fs::read(path)
        .with_context(|| format!("failed to read bootstrap file {}", path.display()))?;
    serde_json::from_slice(&data)
        .with_context(|| format!("invalid bootstrap file {}", path.display()))
}

pub async fn apply_seed(store: &dyn Backend, seed: &Seed) -> MasterResult<()> {
    for (name, record) in &seed.buckets {
        api::create_bucket(store, name, record).await?;
    }
    for name in &seed.cell {
        api::cell_insert_bucket(store, name).await?;
    }
    for (name, record) in &seed.partitions {
        api::update_partition(store, name, record).await?;
    }
    for (name, record) in &seed.servers {
        api::create_server(store, name, record).await?;
    }
    if !seed.allocations.is_empty() {
        api::update_allocations(store, &seed.allocations).await?;
    }
    for (name, count) in &seed.identity_groups {
        api::update_identity_group(store, name, *count).await?;
    }
    for name in &seed.present {
        store.ensure_exists(&paths::server_presence(name)).await?;
    }
    info!(
        servers = seed.servers.len(),
        buckets = seed.buckets.len(),
        allocations = seed.allocations.len(),
        "Bootstrap seed applied"
    );
    Ok(())
}
