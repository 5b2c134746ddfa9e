//! Identity groups.

use std::collections::BTreeMap;

use tracing::info;
use treadmill_store::{json, Backend, PutOptions};

use super::events::notify;
use crate::dispatch::Resource;
use crate::model::IdentityGroupRecord;
use crate::{paths, MasterResult};

pub async fn update_identity_group(
    store: &dyn Backend,
    name: &str,
    count: u32,
) -> MasterResult<bool> {
    let outcome = json::put_json(
        store,
        &paths::identity_group(name),
        &IdentityGroupRecord { count },
        PutOptions::check_content(),
    )
    .await?;
    if outcome.changed {
        notify(store, Resource::IdentityGroups, None).await?;
        info!(identity_group = %name, count, "Identity group updated");
    }
    Ok(outcome.changed)
}

pub async fn delete_identity_group(store: &dyn Backend, name: &str) -> MasterResult<bool> {
    let existed = store.delete(&paths::identity_group(name)).await?;
    if existed {
        notify(store, Resource::IdentityGroups, None).await?;
        info!(identity_group = %name, "Identity group deleted");
    }
    Ok(existed)
}

pub async fn get_identity_group(
    store: &dyn Backend,
    name: &str,
) -> MasterResult<Option<IdentityGroupRecord>> {
    Ok(json::get_json(store, &paths::identity_group(name)).await?)
}

pub async fn list_identity_groups(
    store: &dyn Backend,
) -> MasterResult<BTreeMap<String, IdentityGroupRecord>> {
    let mut groups = BTreeMap::new();
    for name in store.list(paths::IDENTITY_GROUPS).await? {
        if let Some(record) = get_identity_group(store, &name).await? {
            groups.insert(name, record);
        }
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use treadmill_store::MemoryBackend;

    #[tokio::test]
    async fn test_identity_group_lifecycle() {
        let store = MemoryBackend::new();
        assert!(update_identity_group(&store, "alice.ids", 3).await.unwrap());
        assert!(!update_identity_group(&store, "alice.ids", 3).await.unwrap());
        assert_eq!(
            get_identity_group(&store, "alice.ids").await.unwrap(),
            Some(IdentityGroupRecord { count: 3 })
        );
        assert_eq!(list_identity_groups(&store).await.unwrap().len(), 1);
        assert!(delete_identity_group(&store, "alice.ids").await.unwrap());

        let markers = store.list(paths::EVENTS).await.unwrap();
        assert_eq!(markers, vec![
            "000-identity_groups-0000000000",
            "000-identity_groups-0000000001",
        ]);
    }
}
