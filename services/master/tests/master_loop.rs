use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::watch;
use treadmill_events::{AppEvent, FinishedState, ServerEvent, ServerState};
use treadmill_id::{AppName, InstanceId};
use treadmill_master::config::{MasterConfig, QuotaLimits};
use treadmill_master::dispatch::{Resource, WatchedPath};
use treadmill_master::model::{AllocationRecord, AppRecord, AssignmentRecord, Resources, ServerRecord};
use treadmill_master::persist::{self, FinishedRecord};
use treadmill_master::master::RebootRecord;
use treadmill_master::{api, paths, trace, Master};
use treadmill_store::{json, path, Backend, MemoryBackend, PutOptions, RecordedOp, RecordingBackend};

const T0: i64 = 1_700_000_000;

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(T0 + secs, 0).unwrap()
}

fn manifest(size: u64) -> AppRecord {
    AppRecord {
        cpu: Some(size),
        memory: Some(size),
        disk: Some(size),
        ..Default::default()
    }
}

async fn add_servers(store: &dyn Backend, names: &[&str]) {
    for name in names {
        let record = ServerRecord::new("rack1", Resources::new(100, 100, 100));
        api::create_server(store, name, &record).await.unwrap();
        store
            .ensure_exists(&paths::server_presence(name))
            .await
            .unwrap();
    }
}

async fn add_apps(store: &dyn Backend, name: &str, record: &AppRecord, count: usize) -> Vec<InstanceId> {
    let app = AppName::parse(name).unwrap();
    api::create_apps(store, &app, record, count, None, &QuotaLimits::default())
        .await
        .unwrap()
}

/// Drops a server's presence node and tells the master.
async fn lose_presence(master: &mut Master, store: &dyn Backend, name: &str, now: DateTime<Utc>) {
    store.delete(&paths::server_presence(name)).await.unwrap();
    let children = store.list(paths::SERVER_PRESENCE).await.unwrap();
    master
        .handle_event(WatchedPath::ServerPresence, &children, now)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_bootstrap_places_apps_and_persists_them() {
    let store = Arc::new(MemoryBackend::new());
    add_servers(store.as_ref(), &["host1"]).await;
    let ids = add_apps(store.as_ref(), "alice.web", &manifest(30), 2).await;

    let mut master = Master::new(store.clone(), MasterConfig::default());
    master.bootstrap(at(0)).await.unwrap();
    assert!(master.is_up_to_date());

    for id in &ids {
        assert_eq!(master.cell().apps[id].server.as_deref(), Some("host1"));
        assert!(persist::read_placement(store.as_ref(), "host1", id)
            .await
            .unwrap()
            .is_some());
        let events = trace::app_events(store.as_ref(), id).await.unwrap();
        assert_eq!(events.last(), Some(&AppEvent::Scheduled {
            server: "host1".to_string(),
            why: String::new(),
        }));
    }

    let stats = api::get_scheduled_stats(store.as_ref()).await.unwrap();
    assert_eq!(stats.get("alice"), Some(&2));
    assert!(store.exists(paths::TIMEZONE).await.unwrap());
}

#[tokio::test]
async fn test_unschedule_happens_before_reschedule() {
    let store = Arc::new(RecordingBackend::new(MemoryBackend::new()));
    add_servers(store.as_ref(), &["host1", "host2"]).await;
    let ids = add_apps(store.as_ref(), "alice.web", &manifest(30), 2).await;

    let mut master = Master::new(store.clone(), MasterConfig::default());
    master.bootstrap(at(0)).await.unwrap();
    for id in &ids {
        assert_eq!(master.cell().apps[id].server.as_deref(), Some("host1"));
    }

    lose_presence(&mut master, store.as_ref(), "host1", at(10)).await;
    store.clear();
    let transitions = master.reschedule(at(10)).await.unwrap();

    assert_eq!(transitions.len(), 2);
    for transition in &transitions {
        assert_eq!(transition.before.as_deref(), Some("host1"));
        assert_eq!(transition.after.as_deref(), Some("host2"));
        assert_eq!(transition.why, "host1:down");
    }

    let last_delete = ids
        .iter()
        .map(|id| {
            store
                .position(&RecordedOp::Delete(paths::placement("host1", id)))
                .unwrap()
        })
        .max()
        .unwrap();
    let first_put = ids
        .iter()
        .map(|id| {
            store
                .position(&RecordedOp::Put(paths::placement("host2", id)))
                .unwrap()
        })
        .min()
        .unwrap();
    assert!(last_delete < first_put);
}

#[tokio::test]
async fn test_markers_are_handled_in_priority_then_sequence_order() {
    let store = Arc::new(RecordingBackend::new(MemoryBackend::new()));
    let mut master = Master::new(store.clone(), MasterConfig::default());
    master.bootstrap(at(0)).await.unwrap();

    api::create_event(store.as_ref(), 5, Resource::Servers, None).await.unwrap();
    api::create_event(store.as_ref(), 1, Resource::Apps, None).await.unwrap();
    api::create_event(store.as_ref(), 5, Resource::Cell, None).await.unwrap();
    api::create_event(store.as_ref(), 0, Resource::Buckets, None).await.unwrap();
    store
        .put(&path::join(paths::EVENTS, "002-bogus-"), Vec::new(), PutOptions::sequence())
        .await
        .unwrap();
    store
        .put(&path::join(paths::EVENTS, "junk"), Vec::new(), PutOptions::default())
        .await
        .unwrap();

    store.clear();
    master.sync_all(at(1)).await.unwrap();

    let deleted: Vec<String> = store
        .deletes()
        .into_iter()
        .filter_map(|p| p.strip_prefix("/events/").map(str::to_string))
        .collect();
    assert_eq!(deleted, vec![
        "junk",
        "000-buckets-0000000003",
        "001-apps-0000000001",
        "002-bogus-0000000004",
        "005-servers-0000000000",
        "005-cell-0000000002",
    ]);
    assert!(store.list(paths::EVENTS).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_frozen_server_keeps_no_unscheduled_apps() {
    let store = Arc::new(MemoryBackend::new());
    add_servers(store.as_ref(), &["host1"]).await;
    let ids = add_apps(store.as_ref(), "alice.web", &manifest(30), 1).await;

    let mut master = Master::new(store.clone(), MasterConfig::default());
    master.bootstrap(at(0)).await.unwrap();
    assert_eq!(master.cell().apps[&ids[0]].server.as_deref(), Some("host1"));

    api::freeze_server(store.as_ref(), "host1", &ids).await.unwrap();
    master.sync_all(at(5)).await.unwrap();
    assert_eq!(master.cell().servers["host1"].state, ServerState::Frozen);

    let transitions = master.reschedule(at(5)).await.unwrap();
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].after, None);
    assert!(transitions[0].why.contains("frozen"));
    assert!(persist::read_placement(store.as_ref(), "host1", &ids[0])
        .await
        .unwrap()
        .is_none());

    let status = persist::read_server_status(store.as_ref(), "host1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.state, ServerState::Frozen);
    assert_eq!(status.since, T0 + 5);

    let server_events: Vec<ServerEvent> = trace::server_trace(store.as_ref(), "host1")
        .await
        .unwrap()
        .iter()
        .map(|r| r.server_event().unwrap())
        .collect();
    assert_eq!(server_events, vec![ServerEvent::State {
        state: ServerState::Frozen
    }]);

    // Frozen servers take no new apps either.
    let more = add_apps(store.as_ref(), "alice.web", &manifest(10), 1).await;
    master.sync_all(at(6)).await.unwrap();
    master.reschedule(at(6)).await.unwrap();
    assert_eq!(master.cell().apps[&more[0]].server, None);
}

#[tokio::test]
async fn test_pending_start_freezes_after_interval() {
    let store = Arc::new(MemoryBackend::new());
    add_servers(store.as_ref(), &["host1"]).await;
    let ids = add_apps(store.as_ref(), "alice.web", &manifest(30), 1).await;

    let mut master = Master::new(store.clone(), MasterConfig::default());
    master.bootstrap(at(0)).await.unwrap();

    master.check_pending_start(at(0)).await.unwrap();
    master.check_pending_start(at(299)).await.unwrap();
    master.check_pending_start(at(300)).await.unwrap();
    assert_eq!(master.cell().servers["host1"].state, ServerState::Up);

    master.check_pending_start(at(301)).await.unwrap();
    assert_eq!(master.cell().servers["host1"].state, ServerState::Frozen);
    assert!(master.cell().apps[&ids[0]].unschedule);

    let transitions = master.reschedule(at(301)).await.unwrap();
    assert_eq!(transitions[0].why, "host1:frozen");
}

#[tokio::test]
async fn test_running_apps_are_not_quarantined() {
    let store = Arc::new(MemoryBackend::new());
    add_servers(store.as_ref(), &["host1"]).await;
    let ids = add_apps(store.as_ref(), "alice.web", &manifest(30), 1).await;

    let mut master = Master::new(store.clone(), MasterConfig::default());
    master.bootstrap(at(0)).await.unwrap();

    master.check_pending_start(at(0)).await.unwrap();
    store.ensure_exists(&paths::running(&ids[0])).await.unwrap();
    master.check_pending_start(at(1000)).await.unwrap();
    assert_eq!(master.cell().servers["host1"].state, ServerState::Up);
}

#[tokio::test]
async fn test_schedule_once_app_terminates_on_eviction() {
    let store = Arc::new(MemoryBackend::new());
    add_servers(store.as_ref(), &["host1", "host2"]).await;
    let once = AppRecord {
        schedule_once: true,
        ..manifest(30)
    };
    let ids = add_apps(store.as_ref(), "alice.batch", &once, 1).await;
    let id = &ids[0];

    let mut master = Master::new(store.clone(), MasterConfig::default());
    master.bootstrap(at(0)).await.unwrap();
    assert_eq!(master.cell().apps[id].server.as_deref(), Some("host1"));

    lose_presence(&mut master, store.as_ref(), "host1", at(10)).await;
    let transitions = master.reschedule(at(10)).await.unwrap();
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].after, None);
    assert_eq!(transitions[0].why, "host1:down");

    assert!(!master.cell().apps.contains_key(id));
    assert!(api::get_app(store.as_ref(), id).await.unwrap().is_none());
    assert!(persist::read_placement(store.as_ref(), "host1", id)
        .await
        .unwrap()
        .is_none());

    let finished: FinishedRecord = json::get_json(store.as_ref(), &paths::finished(id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(finished.state, FinishedState::Terminated);
    assert_eq!(finished.data, "schedule_once");

    let events = trace::app_events(store.as_ref(), id).await.unwrap();
    assert_eq!(events.last(), Some(&AppEvent::Finished {
        state: FinishedState::Terminated,
        data: "schedule_once".to_string(),
    }));
}

#[tokio::test]
async fn test_deleted_app_is_retired() {
    let store = Arc::new(MemoryBackend::new());
    add_servers(store.as_ref(), &["host1"]).await;
    let ids = add_apps(store.as_ref(), "alice.web", &manifest(30), 2).await;

    let mut master = Master::new(store.clone(), MasterConfig::default());
    master.bootstrap(at(0)).await.unwrap();

    api::delete_apps(store.as_ref(), &ids[..1], Some("bob")).await.unwrap();
    master.sync_all(at(1)).await.unwrap();

    assert!(!master.cell().apps.contains_key(&ids[0]));
    assert!(master.cell().apps.contains_key(&ids[1]));
    assert!(persist::read_placement(store.as_ref(), "host1", &ids[0])
        .await
        .unwrap()
        .is_none());
    assert!(store.exists(&paths::finished(&ids[0])).await.unwrap());

    let events = trace::app_events(store.as_ref(), &ids[0]).await.unwrap();
    assert!(events.contains(&AppEvent::PendingDelete {
        why: "bob:deleted".to_string()
    }));
    assert_eq!(events.last(), Some(&AppEvent::Deleted));

    let stats = api::get_scheduled_stats(store.as_ref()).await.unwrap();
    assert_eq!(stats.get("alice"), Some(&1));
}

#[tokio::test]
async fn test_snapshot_matches_model_and_survives_restart() {
    let store = Arc::new(MemoryBackend::new());
    add_servers(store.as_ref(), &["host1", "host2"]).await;
    add_apps(store.as_ref(), "alice.web", &manifest(60), 3).await;

    let mut master = Master::new(store.clone(), MasterConfig::default());
    master.bootstrap(at(0)).await.unwrap();

    let snapshot = persist::read_snapshot(store.as_ref()).await.unwrap().unwrap();
    assert_eq!(snapshot, persist::snapshot_entries(master.cell()));
    assert_eq!(snapshot.iter().filter(|e| e.server.is_some()).count(), 2);

    let mut restarted = Master::new(store.clone(), MasterConfig::default());
    restarted.bootstrap(at(100)).await.unwrap();
    assert_eq!(persist::snapshot_entries(restarted.cell()), snapshot);
}

#[tokio::test]
async fn test_integrity_check_repairs_and_removes_records() {
    let store = Arc::new(MemoryBackend::new());
    add_servers(store.as_ref(), &["host1"]).await;
    let ids = add_apps(store.as_ref(), "alice.web", &manifest(30), 1).await;

    let mut master = Master::new(store.clone(), MasterConfig::default());
    master.bootstrap(at(0)).await.unwrap();

    let stray = AppName::parse("bob.gone").unwrap().instance(7);
    store
        .put(&paths::placement("host1", &stray), Vec::new(), PutOptions::default())
        .await
        .unwrap();
    store.delete(&paths::placement("host1", &ids[0])).await.unwrap();

    master.check_placement_integrity().await.unwrap();
    assert!(persist::read_placement(store.as_ref(), "host1", &ids[0])
        .await
        .unwrap()
        .is_some());
    assert!(!store.exists(&paths::placement("host1", &stray)).await.unwrap());
}

#[tokio::test]
async fn test_blackout_traces_server_events() {
    let store = Arc::new(MemoryBackend::new());
    add_servers(store.as_ref(), &["host1"]).await;
    let mut master = Master::new(store.clone(), MasterConfig::default());
    master.bootstrap(at(0)).await.unwrap();

    api::blackout_server(store.as_ref(), "host1", "maintenance").await.unwrap();
    master.sync_all(at(1)).await.unwrap();
    assert!(master.cell().blackedout_servers.contains("host1"));

    api::clear_server_blackout(store.as_ref(), "host1").await.unwrap();
    master.sync_all(at(2)).await.unwrap();
    assert!(master.cell().blackedout_servers.is_empty());

    let events: Vec<ServerEvent> = trace::server_trace(store.as_ref(), "host1")
        .await
        .unwrap()
        .iter()
        .map(|r| r.server_event().unwrap())
        .collect();
    assert_eq!(events, vec![ServerEvent::Blackout, ServerEvent::BlackoutCleared]);
}

#[tokio::test]
async fn test_run_places_apps_until_shutdown() {
    let store = Arc::new(MemoryBackend::new());
    add_servers(store.as_ref(), &["host1"]).await;

    let config = MasterConfig {
        scheduler_interval: Duration::ZERO,
        check_event_interval: Duration::from_millis(10),
        ..Default::default()
    };
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(Master::new(store.clone(), config).run(shutdown_rx));

    let ids = add_apps(store.as_ref(), "alice.web", &manifest(30), 1).await;
    let placement = paths::placement("host1", &ids[0]);
    let placed = tokio::time::timeout(Duration::from_secs(5), async {
        while !store.exists(&placement).await.unwrap() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(placed.is_ok(), "app was never placed");
    assert!(store.lock_holder(paths::MASTER_LOCK).is_some());

    shutdown_tx.send(true).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_queued_snapshot_is_acknowledged_after_handling() {
    let store = Arc::new(MemoryBackend::new());
    add_servers(store.as_ref(), &["host1"]).await;
    let mut master = Master::new(store.clone(), MasterConfig::default());
    master.bootstrap(at(0)).await.unwrap();

    add_servers(store.as_ref(), &["host2"]).await;
    let markers = store.list(paths::EVENTS).await.unwrap();
    let done = master.enqueue(WatchedPath::Events, markers);

    assert!(master.run_once(at(3)).await.unwrap());
    assert!(done.await.is_ok());
    assert!(master.cell().servers.contains_key("host2"));
    assert!(store.list(paths::EVENTS).await.unwrap().is_empty());
    assert!(master.is_up_to_date());
}

fn server_events(records: &[treadmill_events::TraceRecord]) -> Vec<ServerEvent> {
    records.iter().map(|r| r.server_event().unwrap()).collect()
}

#[tokio::test]
async fn test_unpadded_marker_is_handled_and_deleted() {
    let store = Arc::new(MemoryBackend::new());
    let mut master = Master::new(store.clone(), MasterConfig::default());
    master.bootstrap(at(0)).await.unwrap();

    store
        .put(&path::join(paths::EVENTS, "005-cell-5"), Vec::new(), PutOptions::default())
        .await
        .unwrap();
    master.sync_all(at(1)).await.unwrap();
    assert!(store.list(paths::EVENTS).await.unwrap().is_empty());

    master.sync_all(at(2)).await.unwrap();
    assert!(store.list(paths::EVENTS).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_lease_renewal_rewrites_record_without_trace() {
    let store = Arc::new(MemoryBackend::new());
    add_servers(store.as_ref(), &["host1"]).await;
    let leased = AppRecord {
        lease: Some(100),
        ..manifest(30)
    };
    let ids = add_apps(store.as_ref(), "alice.web", &leased, 1).await;
    let id = &ids[0];

    let mut master = Master::new(store.clone(), MasterConfig::default());
    master.bootstrap(at(0)).await.unwrap();
    let record = persist::read_placement(store.as_ref(), "host1", id).await.unwrap().unwrap();
    assert_eq!(record.expires, Some(T0 + 100));

    let renewed = AppRecord {
        renew: true,
        ..leased
    };
    json::put_json(store.as_ref(), &paths::scheduled(id), &renewed, PutOptions::default())
        .await
        .unwrap();
    api::create_event(store.as_ref(), 1, Resource::Apps, Some(&json!([id.to_string()])))
        .await
        .unwrap();
    master.sync_all(at(50)).await.unwrap();

    let transitions = master.reschedule(at(50)).await.unwrap();
    assert!(transitions.is_empty());
    assert_eq!(master.cell().apps[id].server.as_deref(), Some("host1"));
    let record = persist::read_placement(store.as_ref(), "host1", id).await.unwrap().unwrap();
    assert_eq!(record.expires, Some(T0 + 150));

    let scheduled = trace::app_events(store.as_ref(), id)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| matches!(e, AppEvent::Scheduled { .. }))
        .count();
    assert_eq!(scheduled, 1);
}

#[tokio::test]
async fn test_allocations_marker_reresolves_apps() {
    let store = Arc::new(MemoryBackend::new());
    add_servers(store.as_ref(), &["host1"]).await;
    let ids = add_apps(store.as_ref(), "alice.web", &manifest(30), 1).await;

    let mut master = Master::new(store.clone(), MasterConfig::default());
    master.bootstrap(at(0)).await.unwrap();
    assert_eq!(master.cell().apps[&ids[0]].priority, 1);

    let allocation = AllocationRecord {
        name: "alice/prod".to_string(),
        partition: "_default".to_string(),
        rank: 10,
        rank_adjustment: 0,
        max_utilization: None,
        reserved: Resources::new(100, 100, 100),
        traits: Vec::new(),
        assignments: vec![AssignmentRecord {
            pattern: "alice.*".to_string(),
            priority: 50,
        }],
    };
    assert!(api::update_allocations(store.as_ref(), &[allocation]).await.unwrap());
    master.sync_all(at(1)).await.unwrap();

    let app = &master.cell().apps[&ids[0]];
    assert_eq!(app.priority, 50);
    assert_eq!(app.allocation, "alice/prod");
    assert_eq!(app.server.as_deref(), Some("host1"));
    assert!(!master.is_up_to_date());
    assert!(store.list(paths::EVENTS).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_apps_blacklist_marker_evicts_matching_apps() {
    let store = Arc::new(MemoryBackend::new());
    add_servers(store.as_ref(), &["host1"]).await;
    let alice = add_apps(store.as_ref(), "alice.web", &manifest(30), 1).await;
    let bob = add_apps(store.as_ref(), "bob.web", &manifest(30), 1).await;

    let mut master = Master::new(store.clone(), MasterConfig::default());
    master.bootstrap(at(0)).await.unwrap();

    let blacklist = BTreeMap::from([("alice.*".to_string(), "abuse".to_string())]);
    assert!(api::update_apps_blacklist(store.as_ref(), &blacklist).await.unwrap());
    master.sync_all(at(1)).await.unwrap();
    assert!(master.cell().apps[&alice[0]].blacklisted);
    assert!(!master.cell().apps[&bob[0]].blacklisted);

    let transitions = master.reschedule(at(1)).await.unwrap();
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].app, alice[0]);
    assert_eq!(transitions[0].after, None);
    assert_eq!(transitions[0].why, "blacklisted");
    assert_eq!(master.cell().apps[&bob[0]].server.as_deref(), Some("host1"));
}

#[tokio::test]
async fn test_servers_marker_without_names_reloads_difference() {
    let store = Arc::new(MemoryBackend::new());
    add_servers(store.as_ref(), &["host1", "host2"]).await;
    let mut master = Master::new(store.clone(), MasterConfig::default());
    master.bootstrap(at(0)).await.unwrap();

    // Change the store behind the API's back, then send a bare marker.
    json::put_json(
        store.as_ref(),
        &paths::server("host3"),
        &ServerRecord::new("rack1", Resources::new(100, 100, 100)),
        PutOptions::default(),
    )
    .await
    .unwrap();
    store.delete(&paths::server("host2")).await.unwrap();
    api::create_event(store.as_ref(), 0, Resource::Servers, None)
        .await
        .unwrap();
    master.sync_all(at(1)).await.unwrap();

    let names: Vec<&str> = master.cell().servers.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["host1", "host3"]);
}

#[tokio::test]
async fn test_server_state_markers_set_state() {
    let store = Arc::new(MemoryBackend::new());
    add_servers(store.as_ref(), &["host1"]).await;
    let mut master = Master::new(store.clone(), MasterConfig::default());
    master.bootstrap(at(0)).await.unwrap();

    api::update_server_state(store.as_ref(), "host1", ServerState::Down, &[])
        .await
        .unwrap();
    master.sync_all(at(5)).await.unwrap();
    assert_eq!(master.cell().servers["host1"].state, ServerState::Down);
    let status = persist::read_server_status(store.as_ref(), "host1").await.unwrap().unwrap();
    assert_eq!((status.state, status.since), (ServerState::Down, T0 + 5));

    api::create_event(
        store.as_ref(),
        0,
        Resource::ServerState,
        Some(&json!(["host1", "exploded", []])),
    )
    .await
    .unwrap();
    master.sync_all(at(7)).await.unwrap();
    assert_eq!(master.cell().servers["host1"].state, ServerState::Down);
    assert!(store.list(paths::EVENTS).await.unwrap().is_empty());

    api::update_server_state(store.as_ref(), "host1", ServerState::Up, &[])
        .await
        .unwrap();
    master.sync_all(at(9)).await.unwrap();
    assert_eq!(master.cell().servers["host1"].state, ServerState::Up);
    let status = persist::read_server_status(store.as_ref(), "host1").await.unwrap().unwrap();
    assert_eq!((status.state, status.since), (ServerState::Up, T0 + 9));

    let records = trace::server_trace(store.as_ref(), "host1").await.unwrap();
    assert_eq!(server_events(&records), vec![
        ServerEvent::State {
            state: ServerState::Down
        },
        ServerEvent::State {
            state: ServerState::Up
        },
    ]);
}

#[tokio::test]
async fn test_reboot_tick_and_check_manage_marks() {
    let store = Arc::new(MemoryBackend::new());
    for (name, valid_until) in [("host1", T0 + 1000), ("host2", T0 + 2000)] {
        let record = ServerRecord {
            valid_until: Some(valid_until),
            ..ServerRecord::new("rack1", Resources::new(100, 100, 100))
        };
        api::create_server(store.as_ref(), name, &record).await.unwrap();
        store.ensure_exists(&paths::server_presence(name)).await.unwrap();
    }
    let mut master = Master::new(store.clone(), MasterConfig::default());
    master.bootstrap(at(0)).await.unwrap();

    // One server down at a time in the default partition.
    let marked = master.reboot_tick(at(0)).await.unwrap();
    assert_eq!(marked, vec!["host1"]);
    let mark: RebootRecord = json::get_json(store.as_ref(), &paths::reboot("host1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mark.when, T0);
    assert!(master.reboot_tick(at(1)).await.unwrap().is_empty());

    // Two reboots under one parent: the later deadline is cancelled.
    api::reboot_server(store.as_ref(), "host2", T0 + 10).await.unwrap();
    master.reboot_check(at(10)).await.unwrap();
    assert_eq!(api::list_reboots(store.as_ref()).await.unwrap(), vec!["host1"]);

    // Past their deadline, servers are marked regardless.
    store.delete(&paths::reboot("host1")).await.unwrap();
    master.reboot_check(at(3000)).await.unwrap();
    assert_eq!(api::list_reboots(store.as_ref()).await.unwrap(), vec!["host1", "host2"]);
}
