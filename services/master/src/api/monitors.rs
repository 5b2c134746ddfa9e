//! App monitors.
//!
//! A monitor keeps `count` instances of an app running. The master does not
//! read monitors, so changing one sends no marker.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use treadmill_store::{json, Backend, PutOptions};

use crate::{paths, MasterResult};

/// Longest suspension after repeated failures, seconds.
const MAX_BACKOFF: i64 = 3600;
const BASE_BACKOFF: i64 = 60;

/// Which instances a monitor removes when scaling down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorPolicy {
    #[default]
    Fifo,
    Lifo,
}

/// Data of `/appmonitors/<app>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMonitorRecord {
    pub count: u32,
    #[serde(default)]
    pub policy: MonitorPolicy,
    /// Unix seconds until which the monitor is suspended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspend_until: Option<i64>,
    #[serde(default)]
    pub failures: u32,
}

fn backoff(failures: u32) -> i64 {
    // 2^6 * 60 is already past the cap.
    let factor = 1i64 << failures.min(6);
    (factor * BASE_BACKOFF).min(MAX_BACKOFF)
}

/// Sets a monitor's count and policy, keeping its failure state.
pub async fn update_appmonitor(
    store: &dyn Backend,
    name: &str,
    count: u32,
    policy: MonitorPolicy,
) -> MasterResult<bool> {
    let mut record = get_appmonitor(store, name).await?.unwrap_or_default();
    record.count = count;
    record.policy = policy;
    let outcome = json::put_json(
        store,
        &paths::appmonitor(name),
        &record,
        PutOptions::check_content(),
    )
    .await?;
    if outcome.changed {
        info!(monitor = %name, count, "App monitor updated");
    }
    Ok(outcome.changed)
}

pub async fn delete_appmonitor(store: &dyn Backend, name: &str) -> MasterResult<bool> {
    Ok(store.delete(&paths::appmonitor(name)).await?)
}

pub async fn get_appmonitor(
    store: &dyn Backend,
    name: &str,
) -> MasterResult<Option<AppMonitorRecord>> {
    Ok(json::get_json(store, &paths::appmonitor(name)).await?)
}

pub async fn list_appmonitors(
    store: &dyn Backend,
) -> MasterResult<BTreeMap<String, AppMonitorRecord>> {
    let mut monitors = BTreeMap::new();
    for name in store.list(paths::APPMONITORS).await? {
        if let Some(record) = get_appmonitor(store, &name).await? {
            monitors.insert(name, record);
        }
    }
    Ok(monitors)
}

/// Records a failed start and suspends the monitor with exponential
/// backoff. Returns the updated record, or `None` for an unknown monitor.
pub async fn appmonitor_failed(
    store: &dyn Backend,
    name: &str,
    now: i64,
) -> MasterResult<Option<AppMonitorRecord>> {
    let Some(mut record) = get_appmonitor(store, name).await? else {
        return Ok(None);
    };
    let delay = backoff(record.failures);
    record.suspend_until = Some(now + delay);
    record.failures = record.failures.saturating_add(1);
    json::put_json(store, &paths::appmonitor(name), &record, PutOptions::default()).await?;
    warn!(monitor = %name, failures = record.failures, delay, "App monitor suspended");
    Ok(Some(record))
}

/// Clears the failure state of a monitor.
pub async fn appmonitor_succeeded(store: &dyn Backend, name: &str) -> MasterResult<bool> {
    let Some(mut record) = get_appmonitor(store, name).await? else {
        return Ok(false);
    };
    record.failures = 0;
    record.suspend_until = None;
    let outcome = json::put_json(
        store,
        &paths::appmonitor(name),
        &record,
        PutOptions::check_content(),
    )
    .await?;
    Ok(outcome.changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use treadmill_store::MemoryBackend;

    #[rstest]
    #[case(0, 60)]
    #[case(1, 120)]
    #[case(5, 1920)]
    #[case(6, 3600)]
    #[case(64, 3600)]
    fn test_backoff(#[case] failures: u32, #[case] expected: i64) {
        assert_eq!(backoff(failures), expected);
    }

    #[tokio::test]
    async fn test_failures_suspend_then_reset() {
        let store = MemoryBackend::new();
        update_appmonitor(&store, "alice.web", 3, MonitorPolicy::Lifo)
            .await
            .unwrap();

        let first = appmonitor_failed(&store, "alice.web", 1000).await.unwrap().unwrap();
        assert_eq!(first.failures, 1);
        assert_eq!(first.suspend_until, Some(1060));

        let second = appmonitor_failed(&store, "alice.web", 2000).await.unwrap().unwrap();
        assert_eq!(second.failures, 2);
        assert_eq!(second.suspend_until, Some(2120));

        assert!(appmonitor_succeeded(&store, "alice.web").await.unwrap());
        let reset = get_appmonitor(&store, "alice.web").await.unwrap().unwrap();
        assert_eq!(reset, AppMonitorRecord {
            count: 3,
            policy: MonitorPolicy::Lifo,
            suspend_until: None,
            failures: 0,
        });
        assert!(store.list(paths::EVENTS).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_monitor() {
        let store = MemoryBackend::new();
        assert!(appmonitor_failed(&store, "ghost", 0).await.unwrap().is_none());
        assert!(!appmonitor_succeeded(&store, "ghost").await.unwrap());
        assert!(list_appmonitors(&store).await.unwrap().is_empty());
    }
}
