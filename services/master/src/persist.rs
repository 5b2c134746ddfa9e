//! Placement persistence.
//!
//! Per-app placement records under `/placement/<server>` are what external
//! readers consult. The compressed snapshot at `/placement` and the state
//! reports are write-only forensic artifacts.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tracing::debug;
use treadmill_events::{FinishedState, ServerState};
use treadmill_id::InstanceId;
use treadmill_store::{json, Backend, PutOptions, StoreResult};

use crate::model::{App, Cell, Resources, ServerStatus};
use crate::paths;
use crate::MasterResult;

// =============================================================================
// Placement Records
// =============================================================================

/// Data of `/placement/<server>/<instance>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementRecord {
    #[serde(default)]
    pub identity: Option<u32>,
    #[serde(default)]
    pub expires: Option<i64>,
}

impl PlacementRecord {
    pub fn of(app: &App) -> Self {
        Self {
            identity: app.identity,
            expires: app.placement_expiry,
        }
    }
}

/// Writes the placement record of a placed app. Unplaced apps are skipped.
pub async fn write_placement(store: &dyn Backend, app: &App) -> StoreResult<bool> {
    let Some(server) = &app.server else {
        return Ok(false);
    };
    let outcome = json::put_json(
        store,
        &paths::placement(server, &app.id),
        &PlacementRecord::of(app),
        PutOptions::check_content(),
    )
    .await?;
    Ok(outcome.changed)
}

pub async fn delete_placement(
    store: &dyn Backend,
    server: &str,
    id: &InstanceId,
) -> StoreResult<bool> {
    store.delete(&paths::placement(server, id)).await
}

pub async fn read_placement(
    store: &dyn Backend,
    server: &str,
    id: &InstanceId,
) -> StoreResult<Option<PlacementRecord>> {
    json::get_json(store, &paths::placement(server, id)).await
}

/// Persists `{state, since}` on the server's placement node.
pub async fn write_server_status(
    store: &dyn Backend,
    server: &str,
    status: ServerStatus,
) -> StoreResult<bool> {
    let outcome = json::put_json(
        store,
        &paths::placement_server(server),
        &status,
        PutOptions::check_content(),
    )
    .await?;
    Ok(outcome.changed)
}

pub async fn read_server_status(
    store: &dyn Backend,
    server: &str,
) -> StoreResult<Option<ServerStatus>> {
    json::get_json(store, &paths::placement_server(server)).await
}

// =============================================================================
// Finished Records
// =============================================================================

/// Data of `/finished/<instance>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinishedRecord {
    pub state: FinishedState,
    pub data: String,
    /// Unix seconds.
    pub when: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

/// Records how an instance finished unless the node agent already did.
pub async fn write_finished_if_absent(
    store: &dyn Backend,
    id: &InstanceId,
    record: &FinishedRecord,
) -> StoreResult<bool> {
    let path = paths::finished(id);
    if store.exists(&path).await? {
        return Ok(false);
    }
    json::put_json(store, &path, record, PutOptions::default()).await?;
    Ok(true)
}

// =============================================================================
// Snapshot
// =============================================================================

/// One row of the placement snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementEntry {
    pub app: InstanceId,
    pub server: Option<String>,
    pub identity: Option<u32>,
    pub expires: Option<i64>,
}

type SnapshotRow = (InstanceId, Option<String>, Option<u32>, Option<i64>);

/// Every app of the cell in id order.
pub fn snapshot_entries(cell: &Cell) -> Vec<PlacementEntry> {
    cell.apps
        .values()
        .map(|app| PlacementEntry {
            app: app.id.clone(),
            server: app.server.clone(),
            identity: app.identity,
            expires: app.placement_expiry,
        })
        .collect()
}

/// JSON list of `[app, server, identity, expires]` rows, zlib compressed.
pub fn encode_snapshot(entries: &[PlacementEntry]) -> MasterResult<Vec<u8>> {
    let rows: Vec<SnapshotRow> = entries
        .iter()
        .map(|e| (e.app.clone(), e.server.clone(), e.identity, e.expires))
        .collect();
    compress(&serde_json::to_vec(&rows)?)
}

pub fn decode_snapshot(data: &[u8]) -> MasterResult<Vec<PlacementEntry>> {
    let rows: Vec<SnapshotRow> = serde_json::from_slice(&decompress(data)?)?;
    Ok(rows
        .into_iter()
        .map(|(app, server, identity, expires)| PlacementEntry {
            app,
            server,
            identity,
            expires,
        })
        .collect())
}

pub async fn write_snapshot(store: &dyn Backend, cell: &Cell) -> MasterResult<()> {
    let entries = snapshot_entries(cell);
    let data = encode_snapshot(&entries)?;
    let outcome = store
        .put(paths::PLACEMENT, data, PutOptions::check_content())
        .await?;
    debug!(apps = entries.len(), changed = outcome.changed, "Placement snapshot written");
    Ok(())
}

pub async fn read_snapshot(store: &dyn Backend) -> MasterResult<Option<Vec<PlacementEntry>>> {
    match store.get(paths::PLACEMENT).await? {
        Some(data) if !data.is_empty() => Ok(Some(decode_snapshot(&data)?)),
        _ => Ok(None),
    }
}

fn compress(data: &[u8]) -> MasterResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn decompress(data: &[u8]) -> MasterResult<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

// =============================================================================
// State Reports
// =============================================================================

/// `[server, partition, state, presence, cpu_free, memory_free, disk_free, app_count]`
pub type ServerReportRow = (String, String, ServerState, bool, u64, u64, u64, usize);

/// `[allocation, app_count, demand]`
pub type AllocationReportRow = (String, usize, Resources);

pub fn server_report(cell: &Cell) -> Vec<ServerReportRow> {
    cell.servers
        .values()
        .map(|server| {
            let free = cell.free_capacity(server);
            (
                server.name.clone(),
                server.partition.clone(),
                server.state,
                server.presence,
                free.cpu,
                free.memory,
                free.disk,
                cell.apps_on(&server.name).count(),
            )
        })
        .collect()
}

pub fn allocation_report(cell: &Cell) -> Vec<AllocationReportRow> {
    let mut totals: BTreeMap<&str, (usize, Resources)> = BTreeMap::new();
    for app in cell.apps.values() {
        let entry = totals.entry(app.allocation.as_str()).or_default();
        entry.0 += 1;
        entry.1 += app.demand;
    }
    totals
        .into_iter()
        .map(|(name, (count, demand))| (name.to_string(), count, demand))
        .collect()
}

pub async fn write_state_reports(store: &dyn Backend, cell: &Cell) -> MasterResult<()> {
    let servers = compress(&serde_json::to_vec(&server_report(cell))?)?;
    store
        .put(paths::SERVERS_REPORT, servers, PutOptions::check_content())
        .await?;
    let allocations = compress(&serde_json::to_vec(&allocation_report(cell))?)?;
    store
        .put(paths::ALLOCATIONS_REPORT, allocations, PutOptions::check_content())
        .await?;
    Ok(())
}

pub fn decode_report<T: serde::de::DeserializeOwned>(data: &[u8]) -> MasterResult<T> {
    Ok(serde_json::from_slice(&decompress(data)?)?)
}
