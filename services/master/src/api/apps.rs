//! Scheduled apps.

use std::collections::BTreeMap;

use globset::Glob;
use serde_json::json;
use tracing::{info, warn};
use treadmill_events::AppEvent;
use treadmill_id::{AppName, InstanceId, MAX_PRIORITY};
use treadmill_store::{json, path, Backend, PutOptions};

use super::events::notify;
use super::quotas;
use super::traces;
use crate::config::QuotaLimits;
use crate::dispatch::Resource;
use crate::model::AppRecord;
use crate::{loader, paths, MasterError, MasterResult};

fn reason(by: Option<&str>, what: &str) -> String {
    match by {
        Some(by) => format!("{by}:{what}"),
        None => what.to_string(),
    }
}

/// Creates `count` instances of `app` from `manifest`.
///
/// The manifest and quotas are validated before anything is written. If
/// the store fails part way the instances created so far are returned; a
/// failure on the first instance is an error.
pub async fn create_apps(
    store: &dyn Backend,
    app: &AppName,
    manifest: &AppRecord,
    count: usize,
    created_by: Option<&str>,
    quotas: &QuotaLimits,
) -> MasterResult<Vec<InstanceId>> {
    if count == 0 {
        return Err(MasterError::validation("count must be at least 1"));
    }
    let missing = manifest.missing_attributes();
    if !missing.is_empty() {
        return Err(MasterError::validation(format!(
            "manifest is missing {}",
            missing.join(", ")
        )));
    }
    if let Some(priority) = manifest.priority {
        if priority > MAX_PRIORITY {
            return Err(MasterError::validation(format!(
                "priority {priority} out of range 0..={MAX_PRIORITY}"
            )));
        }
    }

    let stats = quotas::scheduled_stats(store).await?;
    if let Some(exceeded) = quotas::check_quota(&stats, quotas, app.proid(), count as u64) {
        warn!(app = %app, dimension = %exceeded.dimension, "Instance quota exceeded");
        return Err(MasterError::QuotaExceeded(exceeded));
    }

    let data = json::encode(manifest)?;
    let prefix = path::join(paths::SCHEDULED, &format!("{app}#"));
    let why = reason(created_by, "created");
    let traces = traces();

    let mut created = Vec::with_capacity(count);
    for _ in 0..count {
        let result = async {
            let outcome = store
                .put(&prefix, data.clone(), PutOptions::sequence())
                .await?;
            let id = InstanceId::parse(path::basename(&outcome.path))?;
            traces
                .app(store, &id, AppEvent::Pending { why: why.clone() })
                .await?;
            Ok::<_, MasterError>(id)
        }
        .await;

        match result {
            Ok(id) => created.push(id),
            Err(e) if created.is_empty() => return Err(e),
            Err(e) => {
                warn!(app = %app, created = created.len(), requested = count, error = %e, "App creation stopped early");
                break;
            }
        }
    }

    info!(app = %app, count = created.len(), "Apps created");
    Ok(created)
}

/// Deletes instances. Already deleted instances are not an error.
pub async fn delete_apps(
    store: &dyn Backend,
    ids: &[InstanceId],
    deleted_by: Option<&str>,
) -> MasterResult<()> {
    let why = reason(deleted_by, "deleted");
    let traces = traces();
    for id in ids {
        let existed = store.delete(&paths::scheduled(id)).await?;
        traces
            .app(store, id, AppEvent::PendingDelete { why: why.clone() })
            .await?;
        info!(instance_id = %id, existed, "App deleted");
    }
    Ok(())
}

/// Updates instance priorities and returns the ids that changed.
///
/// The whole batch is validated before any write. Unknown ids are skipped.
pub async fn update_app_priorities(
    store: &dyn Backend,
    priorities: &BTreeMap<InstanceId, i64>,
) -> MasterResult<Vec<InstanceId>> {
    let mut validated = Vec::with_capacity(priorities.len());
    for (id, priority) in priorities {
        match u8::try_from(*priority) {
            Ok(p) if p <= MAX_PRIORITY => validated.push((id, p)),
            _ => {
                return Err(MasterError::validation(format!(
                    "priority {priority} of {id} out of range 0..={MAX_PRIORITY}"
                )))
            }
        }
    }

    let mut modified = Vec::new();
    for (id, priority) in validated {
        let node = paths::scheduled(id);
        let Some(mut record) = json::get_json::<AppRecord>(store, &node).await? else {
            continue;
        };
        record.priority = Some(priority);
        let outcome = json::put_json(store, &node, &record, PutOptions::check_content()).await?;
        if outcome.changed {
            modified.push(id.clone());
        }
    }

    if !modified.is_empty() {
        let names: Vec<String> = modified.iter().map(ToString::to_string).collect();
        notify(store, Resource::Apps, Some(json!(names))).await?;
        info!(count = modified.len(), "App priorities updated");
    }
    Ok(modified)
}

pub async fn get_app(store: &dyn Backend, id: &InstanceId) -> MasterResult<Option<AppRecord>> {
    Ok(json::get_json(store, &paths::scheduled(id)).await?)
}

pub async fn list_scheduled(store: &dyn Backend) -> MasterResult<Vec<InstanceId>> {
    loader::list_scheduled(store).await
}

/// Instances the node agents report as running.
pub async fn list_running(store: &dyn Backend) -> MasterResult<Vec<InstanceId>> {
    let mut ids = loader::parse_ids(store.list(paths::RUNNING).await?);
    ids.sort();
    Ok(ids)
}

pub async fn get_scheduled_stats(store: &dyn Backend) -> MasterResult<BTreeMap<String, u64>> {
    quotas::scheduled_stats(store).await
}

/// Replaces the `pattern -> reason` blacklist of app names.
pub async fn update_apps_blacklist(
    store: &dyn Backend,
    blacklist: &BTreeMap<String, String>,
) -> MasterResult<bool> {
    for pattern in blacklist.keys() {
        Glob::new(pattern).map_err(|e| {
            MasterError::validation(format!("invalid blacklist pattern '{pattern}': {e}"))
        })?;
    }
    let outcome = json::put_json(
        store,
        paths::BLACKEDOUT_APPS,
        blacklist,
        PutOptions::check_content(),
    )
    .await?;
    if outcome.changed {
        notify(store, Resource::AppsBlacklist, None).await?;
        info!(patterns = blacklist.len(), "Apps blacklist updated");
    }
    Ok(outcome.changed)
}

pub async fn get_apps_blacklist(store: &dyn Backend) -> MasterResult<BTreeMap<String, String>> {
    Ok(json::get_json(store, paths::BLACKEDOUT_APPS)
        .await?
        .unwrap_or_default())
}
