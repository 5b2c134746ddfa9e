//! Allocations.

use std::collections::BTreeSet;

use tracing::info;
use treadmill_store::{json, Backend, PutOptions};

use super::events::notify;
use crate::dispatch::Resource;
use crate::model::{Allocation, AllocationRecord};
use crate::{paths, MasterError, MasterResult};

/// Replaces the allocation list.
///
/// Every entry must have a unique `<tenant>/<allocation>` name and valid
/// assignment patterns.
pub async fn update_allocations(
    store: &dyn Backend,
    allocations: &[AllocationRecord],
) -> MasterResult<bool> {
    let mut names = BTreeSet::new();
    for record in allocations {
        if !record.name.contains('/') {
            return Err(MasterError::validation(format!(
                "allocation name '{}' must be <tenant>/<allocation>",
                record.name
            )));
        }
        if !names.insert(record.name.as_str()) {
            return Err(MasterError::validation(format!(
                "duplicate allocation '{}'",
                record.name
            )));
        }
        if let Some(max) = record.max_utilization {
            if !max.is_finite() || max <= 0.0 {
                return Err(MasterError::validation(format!(
                    "allocation '{}' max_utilization must be positive",
                    record.name
                )));
            }
        }
        Allocation::try_from_record(record).map_err(|e| {
            MasterError::validation(format!("allocation '{}': {e}", record.name))
        })?;
    }

    let outcome =
        json::put_json(store, paths::ALLOCATIONS, allocations, PutOptions::check_content())
            .await?;
    if outcome.changed {
        notify(store, Resource::Allocations, None).await?;
        info!(count = allocations.len(), "Allocations updated");
    }
    Ok(outcome.changed)
}

pub async fn get_allocations(store: &dyn Backend) -> MasterResult<Vec<AllocationRecord>> {
    Ok(json::get_json(store, paths::ALLOCATIONS)
        .await?
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use treadmill_store::MemoryBackend;

    fn record(name: &str) -> AllocationRecord {
        serde_json::from_value(json!({
            "name": name,
            "cpu": 100,
            "memory": 1000,
            "disk": 1000,
            "assignments": [{"pattern": "alice.*", "priority": 10}],
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_update_allocations() {
        let store = MemoryBackend::new();
        let records = vec![record("tenant/prod")];
        assert!(update_allocations(&store, &records).await.unwrap());
        assert!(!update_allocations(&store, &records).await.unwrap());
        assert_eq!(get_allocations(&store).await.unwrap(), records);
        assert_eq!(store.list(paths::EVENTS).await.unwrap(), vec![
            "000-allocations-0000000000"
        ]);
    }

    #[tokio::test]
    async fn test_update_allocations_rejects_duplicates_and_bad_names() {
        let store = MemoryBackend::new();
        let dup = vec![record("tenant/prod"), record("tenant/prod")];
        assert!(update_allocations(&store, &dup).await.unwrap_err().is_validation());
        let bad = vec![record("prod")];
        assert!(update_allocations(&store, &bad).await.unwrap_err().is_validation());
        assert!(!store.exists(paths::ALLOCATIONS).await.unwrap());
    }
}
