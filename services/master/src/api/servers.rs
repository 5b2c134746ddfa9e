//! Servers, their state, blackouts and reboots.

use serde_json::json;
use tracing::info;
use treadmill_events::ServerState;
use treadmill_id::InstanceId;
use treadmill_store::{json, Backend, PutOptions};

use super::events::notify;
use crate::dispatch::{Resource, ServerStateChange};
use crate::master::RebootRecord;
use crate::model::{Resources, ServerRecord};
use crate::{paths, MasterError, MasterResult};

/// Partial update of a server record. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerAttrs {
    pub parent: Option<String>,
    pub partition: Option<String>,
    pub traits: Option<Vec<String>>,
    pub capacity: Option<Resources>,
    pub valid_until: Option<i64>,
}

impl ServerAttrs {
    fn apply(&self, record: &mut ServerRecord) {
        if let Some(parent) = &self.parent {
            record.parent = parent.clone();
        }
        if let Some(partition) = &self.partition {
            record.partition = partition.clone();
        }
        if let Some(traits) = &self.traits {
            record.traits = traits.clone();
        }
        if let Some(capacity) = self.capacity {
            record.capacity = capacity;
        }
        if let Some(valid_until) = self.valid_until {
            record.valid_until = Some(valid_until);
        }
    }
}

async fn notify_servers(store: &dyn Backend, name: &str) -> MasterResult<()> {
    notify(store, Resource::Servers, Some(json!([name]))).await?;
    Ok(())
}

/// Creates or replaces a server record.
pub async fn create_server(
    store: &dyn Backend,
    name: &str,
    record: &ServerRecord,
) -> MasterResult<bool> {
    let outcome =
        json::put_json(store, &paths::server(name), record, PutOptions::check_content()).await?;
    if outcome.changed {
        notify_servers(store, name).await?;
        info!(server = %name, "Server updated");
    }
    Ok(outcome.changed)
}

/// Deletes a server record and its placement subtree.
pub async fn delete_server(store: &dyn Backend, name: &str) -> MasterResult<bool> {
    let existed = store.delete(&paths::server(name)).await?;
    store.delete(&paths::placement_server(name)).await?;
    if existed {
        notify_servers(store, name).await?;
        info!(server = %name, "Server deleted");
    }
    Ok(existed)
}

/// Updates attributes of an existing server.
pub async fn update_server_attrs(
    store: &dyn Backend,
    name: &str,
    attrs: &ServerAttrs,
) -> MasterResult<bool> {
    let mut record = get_server(store, name)
        .await?
        .ok_or_else(|| MasterError::NotFound(format!("server {name}")))?;
    attrs.apply(&mut record);
    create_server(store, name, &record).await
}

pub async fn update_server_capacity(
    store: &dyn Backend,
    name: &str,
    capacity: Resources,
) -> MasterResult<bool> {
    let attrs = ServerAttrs {
        capacity: Some(capacity),
        ..Default::default()
    };
    update_server_attrs(store, name, &attrs).await
}

pub async fn update_server_traits(
    store: &dyn Backend,
    name: &str,
    traits: Vec<String>,
) -> MasterResult<bool> {
    let attrs = ServerAttrs {
        traits: Some(traits),
        ..Default::default()
    };
    update_server_attrs(store, name, &attrs).await
}

pub async fn update_server_parent(
    store: &dyn Backend,
    name: &str,
    parent: &str,
) -> MasterResult<bool> {
    let attrs = ServerAttrs {
        parent: Some(parent.to_string()),
        ..Default::default()
    };
    update_server_attrs(store, name, &attrs).await
}

pub async fn get_server(store: &dyn Backend, name: &str) -> MasterResult<Option<ServerRecord>> {
    Ok(json::get_json(store, &paths::server(name)).await?)
}

pub async fn list_servers(store: &dyn Backend) -> MasterResult<Vec<String>> {
    Ok(store.list(paths::SERVERS).await?)
}

// =============================================================================
// State
// =============================================================================

/// Asks the master to move a server to `state`.
///
/// `apps` only matters when freezing: they are removed from the server.
pub async fn update_server_state(
    store: &dyn Backend,
    name: &str,
    state: ServerState,
    apps: &[InstanceId],
) -> MasterResult<String> {
    if !store.exists(&paths::server(name)).await? {
        return Err(MasterError::NotFound(format!("server {name}")));
    }
    let change = ServerStateChange {
        server: name.to_string(),
        state: state.as_str().to_string(),
        apps: apps.iter().map(ToString::to_string).collect(),
    };
    let marker = notify(store, Resource::ServerState, Some(change.to_payload())).await?;
    info!(server = %name, state = %state, "Server state change requested");
    Ok(marker)
}

pub async fn freeze_server(
    store: &dyn Backend,
    name: &str,
    apps: &[InstanceId],
) -> MasterResult<String> {
    update_server_state(store, name, ServerState::Frozen, apps).await
}

pub async fn unfreeze_server(store: &dyn Backend, name: &str) -> MasterResult<String> {
    update_server_state(store, name, ServerState::Up, &[]).await
}

// =============================================================================
// Blackout
// =============================================================================

/// Blacks out a server. It keeps its apps but receives no new ones.
pub async fn blackout_server(
    store: &dyn Backend,
    name: &str,
    reason: &str,
) -> MasterResult<bool> {
    let outcome = store
        .put(
            &paths::blackedout_server(name),
            reason.as_bytes().to_vec(),
            PutOptions::check_content(),
        )
        .await?;
    if outcome.changed {
        info!(server = %name, reason = %reason, "Server blacked out");
    }
    Ok(outcome.changed)
}

pub async fn clear_server_blackout(store: &dyn Backend, name: &str) -> MasterResult<bool> {
    let existed = store.delete(&paths::blackedout_server(name)).await?;
    if existed {
        info!(server = %name, "Server blackout cleared");
    }
    Ok(existed)
}

pub async fn list_blackedout_servers(store: &dyn Backend) -> MasterResult<Vec<String>> {
    Ok(store.list(paths::BLACKEDOUT_SERVERS).await?)
}

// =============================================================================
// Reboots
// =============================================================================

/// Marks a server for reboot.
pub async fn reboot_server(store: &dyn Backend, name: &str, when: i64) -> MasterResult<bool> {
    let outcome = json::put_json(
        store,
        &paths::reboot(name),
        &RebootRecord { when },
        PutOptions::check_content(),
    )
    .await?;
    if outcome.changed {
        info!(server = %name, "Server reboot requested");
    }
    Ok(outcome.changed)
}

pub async fn list_reboots(store: &dyn Backend) -> MasterResult<Vec<String>> {
    Ok(store.list(paths::REBOOTS).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use treadmill_store::{path, MemoryBackend};

    fn record() -> ServerRecord {
        ServerRecord::new("rack1", Resources::new(100, 1000, 1000))
    }

    async fn marker_payloads(store: &dyn Backend) -> Vec<(String, Option<Value>)> {
        let mut out = Vec::new();
        for name in store.list(paths::EVENTS).await.unwrap() {
            let payload = json::get_json(store, &path::join(paths::EVENTS, &name))
                .await
                .unwrap();
            out.push((name, payload));
        }
        out
    }

    #[tokio::test]
    async fn test_create_server_notifies_with_name() {
        let store = MemoryBackend::new();
        assert!(create_server(&store, "host1", &record()).await.unwrap());
        assert!(!create_server(&store, "host1", &record()).await.unwrap());
        assert_eq!(marker_payloads(&store).await, vec![(
            "000-servers-0000000000".to_string(),
            Some(json!(["host1"]))
        )]);
    }

    #[tokio::test]
    async fn test_update_attrs_requires_server() {
        let store = MemoryBackend::new();
        let err = update_server_traits(&store, "ghost", vec!["gpu".to_string()])
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        create_server(&store, "host1", &record()).await.unwrap();
        assert!(update_server_capacity(&store, "host1", Resources::new(1, 2, 3))
            .await
            .unwrap());
        assert!(update_server_parent(&store, "host1", "rack2").await.unwrap());
        let stored = get_server(&store, "host1").await.unwrap().unwrap();
        assert_eq!(stored.capacity, Resources::new(1, 2, 3));
        assert_eq!(stored.parent, "rack2");
    }

    #[tokio::test]
    async fn test_delete_server_removes_placement() {
        let store = MemoryBackend::new();
        create_server(&store, "host1", &record()).await.unwrap();
        store
            .put("/placement/host1/alice.web#0000000001", Vec::new(), PutOptions::default())
            .await
            .unwrap();
        assert!(delete_server(&store, "host1").await.unwrap());
        assert!(!store.exists("/placement/host1").await.unwrap());
        assert!(list_servers(&store).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_freeze_server_payload() {
        let store = MemoryBackend::new();
        create_server(&store, "host1", &record()).await.unwrap();
        let app: InstanceId = "alice.web#0000000001".parse().unwrap();
        let marker = freeze_server(&store, "host1", &[app]).await.unwrap();
        assert!(marker.starts_with("000-server_state-"));

        let payload: Option<Value> = json::get_json(&store, &path::join(paths::EVENTS, &marker))
            .await
            .unwrap();
        assert_eq!(payload, Some(json!(["host1", "frozen", ["alice.web#0000000001"]])));
    }

    #[tokio::test]
    async fn test_blackout_and_reboot() {
        let store = MemoryBackend::new();
        assert!(blackout_server(&store, "host1", "disk failure").await.unwrap());
        assert_eq!(list_blackedout_servers(&store).await.unwrap(), vec!["host1"]);
        assert!(clear_server_blackout(&store, "host1").await.unwrap());
        assert!(!clear_server_blackout(&store, "host1").await.unwrap());

        assert!(reboot_server(&store, "host1", 1_700_000_000).await.unwrap());
        assert_eq!(list_reboots(&store).await.unwrap(), vec!["host1"]);
    }
}
