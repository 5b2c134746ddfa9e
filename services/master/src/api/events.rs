//! Event markers.

use serde_json::Value;
use tracing::debug;
use treadmill_id::MarkerName;
use treadmill_store::{json, path, Backend, PutOptions};

use crate::dispatch::Resource;
use crate::{paths, MasterResult};

/// Enqueues a marker for `resource` and returns its node name.
///
/// Markers are handled in `(priority, sequence)` order, lower first.
pub async fn create_event(
    store: &dyn Backend,
    priority: u8,
    resource: Resource,
    payload: Option<&Value>,
) -> MasterResult<String> {
    let prefix = MarkerName::prefix(priority, resource.as_str())?;
    let data = match payload {
        Some(payload) => json::encode(payload)?,
        None => Vec::new(),
    };
    let outcome = store
        .put(&path::join(paths::EVENTS, &prefix), data, PutOptions::sequence())
        .await?;
    let name = path::basename(&outcome.path).to_string();
    debug!(marker = %name, resource = %resource, "Event marker created");
    Ok(name)
}

/// Enqueues a marker at the resource's default priority.
pub(crate) async fn notify(
    store: &dyn Backend,
    resource: Resource,
    payload: Option<Value>,
) -> MasterResult<String> {
    create_event(store, resource.default_priority(), resource, payload.as_ref()).await
}
