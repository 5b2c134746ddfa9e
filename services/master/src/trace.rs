//! Trace emission and reading.
//!
//! Every record is a sequence node under a shard of `/trace` (instances) or
//! `/server-trace` (servers). The node name carries the whole event so
//! readers never need the node data, which only holds the optional payload.

use chrono::Utc;
use tracing::{debug, warn};
use treadmill_events::{AppEvent, ServerEvent, TraceRecord};
use treadmill_id::InstanceId;
use treadmill_store::path::join;
use treadmill_store::{json, Backend, PutOptions, StoreResult};

use crate::paths;

/// Writes trace records on behalf of one source.
#[derive(Debug, Clone)]
pub struct TracePublisher {
    source: String,
}

impl TracePublisher {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub async fn app(
        &self,
        store: &dyn Backend,
        id: &InstanceId,
        event: AppEvent,
    ) -> StoreResult<()> {
        let record = TraceRecord::app(id, &self.source, Utc::now(), &event);
        publish(store, paths::TRACE, record).await
    }

    pub async fn server(
        &self,
        store: &dyn Backend,
        server: &str,
        event: ServerEvent,
    ) -> StoreResult<()> {
        let record = TraceRecord::server(server, &self.source, Utc::now(), &event);
        publish(store, paths::SERVER_TRACE, record).await
    }
}

async fn publish(store: &dyn Backend, root: &str, record: TraceRecord) -> StoreResult<()> {
    let shard = join(root, &paths::trace_shard(&record.subject));
    let name = format!("{},", record.node_name().replace('/', "_"));
    let data = match &record.payload {
        Some(payload) => json::encode(payload)?,
        None => Vec::new(),
    };
    let outcome = store
        .put(&join(&shard, &name), data, PutOptions::sequence())
        .await?;
    debug!(
        subject = %record.subject,
        event_type = %record.event_type,
        event_data = %record.event_data,
        path = %outcome.path,
        "Trace published"
    );
    Ok(())
}

/// Reads a subject's records in publication order.
async fn read(store: &dyn Backend, root: &str, subject: &str) -> StoreResult<Vec<TraceRecord>> {
    let shard = join(root, &paths::trace_shard(subject));
    let prefix = format!("{},", subject.replace('/', "_"));

    let mut records = Vec::new();
    for name in store.list(&shard).await? {
        if !name.starts_with(&prefix) {
            continue;
        }
        let Some((body, seq)) = name.rsplit_once(',') else {
            continue;
        };
        let Ok(seq) = seq.parse::<u64>() else {
            continue;
        };
        match TraceRecord::parse_node_name(body) {
            Ok(record) => records.push((seq, record)),
            Err(e) => warn!(name = %name, error = %e, "Skipping malformed trace record"),
        }
    }
    records.sort_by_key(|(seq, _)| *seq);
    Ok(records.into_iter().map(|(_, r)| r).collect())
}

/// Instance trace, oldest first.
pub async fn app_trace(store: &dyn Backend, id: &InstanceId) -> StoreResult<Vec<TraceRecord>> {
    read(store, paths::TRACE, &id.to_string()).await
}

/// Instance trace decoded into events, oldest first.
pub async fn app_events(store: &dyn Backend, id: &InstanceId) -> StoreResult<Vec<AppEvent>> {
    Ok(app_trace(store, id)
        .await?
        .iter()
        .filter_map(|r| r.app_event().ok())
        .collect())
}

/// Server trace, oldest first.
pub async fn server_trace(store: &dyn Backend, server: &str) -> StoreResult<Vec<TraceRecord>> {
    read(store, paths::SERVER_TRACE, server).await
}
