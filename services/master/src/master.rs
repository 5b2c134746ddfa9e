//! The master control loop.
//!
//! The [`Master`] owns the cell model and is its only writer. Watch tasks
//! feed children snapshots through the event queue; the loop drains them,
//! updates the model, and periodically reschedules and persists the
//! resulting placement.
//!
//! Every error returned from the loop is fatal. Recovery is a restart that
//! reloads the model from the store.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use treadmill_events::{AppEvent, FinishedState, ServerEvent, ServerState};
use treadmill_id::{InstanceId, MarkerName};
use treadmill_store::{json, path, Backend, PutOptions};

use crate::config::MasterConfig;
use crate::dispatch::{
    self, names_payload, sort_markers, EventReceiver, EventSender, Resource, ServerStateChange,
    WatchEvent, WatchedPath,
};
use crate::integrity::PendingStartTracker;
use crate::loader;
use crate::model::{App, Cell, PlacementChange, ServerStatus};
use crate::persist::{self, FinishedRecord};
use crate::trace::TracePublisher;
use crate::{paths, MasterError, MasterResult};

/// A placement change as persisted and traced by [`Master::reschedule`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub app: InstanceId,
    pub before: Option<String>,
    pub after: Option<String>,
    pub why: String,
}

/// Data of `/reboots/<server>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebootRecord {
    /// Unix seconds the reboot was requested.
    pub when: i64,
}

// =============================================================================
// Timers
// =============================================================================

#[derive(Debug)]
struct Timer {
    interval: Duration,
    last: Option<DateTime<Utc>>,
}

impl Timer {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last {
            None => true,
            Some(last) => {
                (now - last).num_milliseconds() >= self.interval.as_millis() as i64
            }
        }
    }

    fn reset(&mut self, now: DateTime<Utc>) {
        self.last = Some(now);
    }

    /// Resets and returns true when due.
    fn fire(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_due(now) {
            self.reset(now);
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
struct Timers {
    schedule: Timer,
    state_report: Timer,
    pending_start: Timer,
    reboot_tick: Timer,
    reboot_check: Timer,
}

impl Timers {
    fn new(config: &MasterConfig) -> Self {
        Self {
            schedule: Timer::new(config.scheduler_interval),
            state_report: Timer::new(config.state_report_interval),
            pending_start: Timer::new(config.integrity_check_interval),
            reboot_tick: Timer::new(config.reboot_tick_interval),
            reboot_check: Timer::new(config.reboot_check_interval),
        }
    }

    fn reset_all(&mut self, now: DateTime<Utc>) {
        self.schedule.reset(now);
        self.state_report.reset(now);
        self.pending_start.reset(now);
        self.reboot_tick.reset(now);
        self.reboot_check.reset(now);
    }
}

// =============================================================================
// Master
// =============================================================================

pub struct Master {
    store: Arc<dyn Backend>,
    config: MasterConfig,
    cell: Cell,
    traces: TracePublisher,
    events_tx: EventSender,
    events_rx: EventReceiver,
    up_to_date: bool,
    pending_start: PendingStartTracker,
    timers: Timers,
    watchers: Vec<(WatchedPath, JoinHandle<MasterResult<()>>)>,
}

impl Master {
    pub fn new(store: Arc<dyn Backend>, config: MasterConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            traces: TracePublisher::new(config.cell.clone()),
            timers: Timers::new(&config),
            store,
            config,
            cell: Cell::new(),
            events_tx,
            events_rx,
            up_to_date: false,
            pending_start: PendingStartTracker::new(),
            watchers: Vec::new(),
        }
    }

    pub fn cell(&self) -> &Cell {
        &self.cell
    }

    pub fn store(&self) -> &dyn Backend {
        self.store.as_ref()
    }

    pub fn is_up_to_date(&self) -> bool {
        self.up_to_date
    }

    /// Takes the leader lock, bootstraps, and runs until shutdown or a
    /// fatal error.
    #[instrument(skip(self, shutdown))]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> MasterResult<()> {
        let identity = self.config.lock_identity();
        info!(identity = %identity, "Waiting for leader lock");
        let store = self.store.clone();
        let mut lock = tokio::select! {
            lock = store.lock(paths::MASTER_LOCK, &identity) => lock?,
            _ = shutdown.changed() => {
                info!("Shutdown requested before leadership");
                return Ok(());
            }
        };
        info!(identity = %identity, "Leader lock acquired");

        self.bootstrap(Utc::now()).await?;
        self.attach_watches().await?;

        loop {
            if *shutdown.borrow() {
                info!("Master shutting down");
                return Ok(());
            }
            if lock.is_lost() {
                error!("Leader lock lost");
                return Err(MasterError::LockLost);
            }
            self.check_watchers()?;

            if self.run_once(Utc::now()).await? {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.check_event_interval) => {}
                _ = lock.lost() => {
                    error!("Leader lock lost");
                    return Err(MasterError::LockLost);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Master shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// One loop iteration. Returns whether any events were handled.
    pub async fn run_once(&mut self, now: DateTime<Utc>) -> MasterResult<bool> {
        let handled = self.process_events(now).await?;

        if !self.up_to_date && self.timers.schedule.is_due(now) {
            self.reschedule(now).await?;
            self.check_placement_integrity().await?;
        }
        if self.timers.state_report.fire(now) {
            persist::write_state_reports(self.store.as_ref(), &self.cell).await?;
        }
        if self.timers.pending_start.fire(now) {
            self.check_pending_start(now).await?;
        }
        if self.timers.reboot_tick.fire(now) {
            self.reboot_tick(now).await?;
        }
        if self.timers.reboot_check.fire(now) {
            self.reboot_check(now).await?;
        }
        Ok(handled > 0)
    }

    // =========================================================================
    // Bootstrap
    // =========================================================================

    /// Creates namespaces, loads the model and reconciles persisted
    /// placement with one unconditional scheduling pass.
    #[instrument(skip(self))]
    pub async fn bootstrap(&mut self, now: DateTime<Utc>) -> MasterResult<()> {
        let store = self.store.as_ref();
        for namespace in paths::NAMESPACES {
            store.ensure_exists(namespace).await?;
        }

        let timezone =
            std::env::var("TZ").unwrap_or_else(|_| Local::now().offset().to_string());
        store
            .put(paths::TIMEZONE, timezone.into_bytes(), PutOptions::check_content())
            .await?;

        loader::load_model(store, &mut self.cell).await?;
        let restored = loader::restore_placement(store, &mut self.cell).await?;
        self.write_scheduled_stats().await?;
        info!(restored, "Bootstrap loaded model");

        self.reschedule(now).await?;
        self.check_placement_integrity().await?;
        self.timers.reset_all(now);
        Ok(())
    }

    /// Starts one forwarding task per watched path.
    pub async fn attach_watches(&mut self) -> MasterResult<()> {
        for path in WatchedPath::ALL {
            let watch = self.store.watch_children(path.path()).await?;
            let handle = tokio::spawn(dispatch::forward(path, watch, self.events_tx.clone()));
            self.watchers.push((path, handle));
        }
        info!(watches = self.watchers.len(), "Watches attached");
        Ok(())
    }

    fn check_watchers(&self) -> MasterResult<()> {
        match self.watchers.iter().find(|(_, handle)| handle.is_finished()) {
            Some((path, _)) => {
                error!(path = %path, "Watch task ended");
                Err(MasterError::WatchClosed(path.path().to_string()))
            }
            None => Ok(()),
        }
    }

    // =========================================================================
    // Event Handling
    // =========================================================================

    /// Handles up to one batch of queued snapshots.
    pub async fn process_events(&mut self, now: DateTime<Utc>) -> MasterResult<usize> {
        let mut handled = 0;
        while handled < self.config.event_batch_size {
            let Ok(event) = self.events_rx.try_recv() else {
                break;
            };
            self.handle_event(event.path, &event.children, now).await?;
            event.complete();
            handled += 1;
        }
        Ok(handled)
    }

    /// Handles a fresh snapshot of every watched path, bypassing the queue.
    pub async fn sync_all(&mut self, now: DateTime<Utc>) -> MasterResult<()> {
        for path in WatchedPath::ALL {
            let children = self.store.list(path.path()).await?;
            self.handle_event(path, &children, now).await?;
        }
        Ok(())
    }

    /// Queues a snapshot as a watch would. The receiver resolves once the
    /// loop has handled it.
    pub fn enqueue(
        &self,
        path: WatchedPath,
        children: Vec<String>,
    ) -> tokio::sync::oneshot::Receiver<()> {
        let (event, done) = WatchEvent::new(path, children);
        let _ = self.events_tx.send(event);
        done
    }

    #[instrument(skip(self, children, now), fields(children = children.len()))]
    pub async fn handle_event(
        &mut self,
        path: WatchedPath,
        children: &[String],
        now: DateTime<Utc>,
    ) -> MasterResult<()> {
        match path {
            WatchedPath::ServerPresence => self.handle_presence(children),
            WatchedPath::Scheduled => self.handle_scheduled(children, now).await?,
            WatchedPath::Events => self.handle_markers(children, now).await?,
            WatchedPath::BlackedoutServers => self.handle_blackedout(children).await?,
        }
        self.up_to_date = false;
        Ok(())
    }

    fn handle_presence(&mut self, children: &[String]) {
        let present: BTreeSet<&str> = children
            .iter()
            .map(|node| paths::presence_server_name(node))
            .collect();
        for server in self.cell.servers.values_mut() {
            let presence = present.contains(server.name.as_str());
            if server.presence != presence {
                info!(server = %server.name, presence, "Server presence changed");
                server.presence = presence;
            }
        }
    }

    async fn handle_scheduled(&mut self, children: &[String], now: DateTime<Utc>) -> MasterResult<()> {
        let current: BTreeSet<InstanceId> = loader::parse_ids(children.iter().cloned())
            .into_iter()
            .collect();

        let removed: Vec<InstanceId> = self
            .cell
            .apps
            .keys()
            .filter(|id| !current.contains(*id))
            .cloned()
            .collect();
        for id in removed {
            self.retire_app(&id, now).await?;
        }

        for id in &current {
            if self.cell.apps.contains_key(id) {
                continue;
            }
            if loader::load_app(self.store.as_ref(), &mut self.cell, id).await? {
                debug!(instance_id = %id, "App loaded");
            }
        }

        self.write_scheduled_stats().await
    }

    /// Drops an app whose scheduled record is gone.
    async fn retire_app(&mut self, id: &InstanceId, now: DateTime<Utc>) -> MasterResult<()> {
        let Some(app) = self.cell.remove_app(id) else {
            return Ok(());
        };
        let store = self.store.as_ref();
        if let Some(server) = &app.server {
            persist::delete_placement(store, server, id).await?;
        }
        persist::write_finished_if_absent(
            store,
            id,
            &FinishedRecord {
                state: FinishedState::Terminated,
                data: "deleted".to_string(),
                when: now.timestamp(),
                host: app.server.clone(),
            },
        )
        .await?;
        self.traces.app(store, id, AppEvent::Deleted).await?;
        info!(instance_id = %id, server = ?app.server, "App deleted");
        Ok(())
    }

    async fn write_scheduled_stats(&self) -> MasterResult<()> {
        json::put_json(
            self.store.as_ref(),
            paths::SCHEDULED_STATS,
            &self.cell.scheduled_stats(),
            PutOptions::check_content(),
        )
        .await?;
        Ok(())
    }

    async fn handle_blackedout(&mut self, children: &[String]) -> MasterResult<()> {
        let current: BTreeSet<String> = children.iter().cloned().collect();
        let store = self.store.as_ref();

        for server in current.difference(&self.cell.blackedout_servers) {
            info!(server = %server, "Server blacked out");
            self.traces.server(store, server, ServerEvent::Blackout).await?;
        }
        for server in self.cell.blackedout_servers.difference(&current) {
            info!(server = %server, "Server blackout cleared");
            self.traces
                .server(store, server, ServerEvent::BlackoutCleared)
                .await?;
        }
        self.cell.blackedout_servers = current;
        Ok(())
    }

    /// Handles every marker in `(priority, sequence)` order, then deletes
    /// it. Unknown and invalid markers are dropped.
    async fn handle_markers(&mut self, children: &[String], now: DateTime<Utc>) -> MasterResult<()> {
        let (markers, invalid) = sort_markers(children);
        for name in invalid {
            self.store.delete(&path::join(paths::EVENTS, &name)).await?;
        }

        for (marker, name) in markers {
            let node = path::join(paths::EVENTS, &name);
            if !self.store.exists(&node).await? {
                continue;
            }
            let payload: Option<Value> = json::get_json(self.store.as_ref(), &node).await?;
            self.handle_marker(&marker, payload, now).await?;
            self.store.delete(&node).await?;
        }
        Ok(())
    }

    #[instrument(skip(self, marker, payload, now), fields(marker = %marker))]
    async fn handle_marker(
        &mut self,
        marker: &MarkerName,
        payload: Option<Value>,
        now: DateTime<Utc>,
    ) -> MasterResult<()> {
        let Some(resource) = Resource::parse(marker.resource()) else {
            warn!(resource = %marker.resource(), "Dropping marker for unknown resource");
            return Ok(());
        };
        info!(resource = %resource, "Handling event marker");

        let store = self.store.as_ref();
        match resource {
            Resource::Allocations => {
                loader::load_allocations(store, &mut self.cell).await?;
                loader::load_apps(store, &mut self.cell).await?;
            }
            Resource::AppsBlacklist => {
                loader::load_apps_blacklist(store, &mut self.cell).await?;
            }
            Resource::Apps => {
                let ids = loader::parse_ids(names_payload(payload).unwrap_or_default());
                for id in &ids {
                    loader::load_app(store, &mut self.cell, id).await?;
                }
            }
            Resource::Servers => {
                let names = match names_payload(payload) {
                    Some(names) => names,
                    None => self.server_difference().await?,
                };
                for name in &names {
                    loader::load_server(store, &mut self.cell, name).await?;
                }
            }
            Resource::ServerState => {
                if let Some(change) = ServerStateChange::from_payload(payload) {
                    self.apply_server_state(change, now).await?;
                }
            }
            Resource::Cell => loader::load_cell(store, &mut self.cell).await?,
            Resource::Buckets => loader::load_buckets(store, &mut self.cell).await?,
            Resource::IdentityGroups => {
                loader::load_identity_groups(store, &mut self.cell).await?;
            }
        }
        Ok(())
    }

    /// Servers known to the model or the store but not both.
    async fn server_difference(&self) -> MasterResult<Vec<String>> {
        let stored: BTreeSet<String> = self.store.list(paths::SERVERS).await?.into_iter().collect();
        let known: BTreeSet<String> = self.cell.servers.keys().cloned().collect();
        Ok(stored.symmetric_difference(&known).cloned().collect())
    }

    async fn apply_server_state(
        &mut self,
        change: ServerStateChange,
        now: DateTime<Utc>,
    ) -> MasterResult<()> {
        let Some(state) = ServerState::parse(&change.state) else {
            warn!(server = %change.server, state = %change.state, "Ignoring unknown server state");
            return Ok(());
        };
        if !self.cell.servers.contains_key(&change.server) {
            warn!(server = %change.server, "Ignoring state change for unknown server");
            return Ok(());
        }
        match state {
            ServerState::Frozen => {
                let apps = loader::parse_ids(change.apps);
                self.freeze_server(&change.server, &apps, now).await
            }
            state => self.set_server_state(&change.server, state, now).await,
        }
    }

    // =========================================================================
    // Server State
    // =========================================================================

    /// Freezes a server and marks the named apps for removal from it.
    pub async fn freeze_server(
        &mut self,
        name: &str,
        apps: &[InstanceId],
        now: DateTime<Utc>,
    ) -> MasterResult<()> {
        for id in apps {
            match self.cell.apps.get_mut(id) {
                Some(app) => app.unschedule = true,
                None => debug!(instance_id = %id, "Unschedule of unknown app"),
            }
        }
        info!(server = %name, apps = apps.len(), "Freezing server");
        self.set_server_state(name, ServerState::Frozen, now).await
    }

    /// Sets a server's state, persists `{state, since}` and traces it.
    pub async fn set_server_state(
        &mut self,
        name: &str,
        state: ServerState,
        now: DateTime<Utc>,
    ) -> MasterResult<()> {
        let Some(server) = self.cell.servers.get_mut(name) else {
            return Ok(());
        };
        if server.state == state {
            return Ok(());
        }
        let previous = server.state;
        server.state = state;
        server.since = now.timestamp();
        let status = ServerStatus {
            state,
            since: server.since,
        };

        let store = self.store.as_ref();
        persist::write_server_status(store, name, status).await?;
        self.traces
            .server(store, name, ServerEvent::State { state })
            .await?;
        info!(server = %name, from = %previous, to = %state, "Server state changed");
        self.up_to_date = false;
        Ok(())
    }

    // =========================================================================
    // Rescheduling
    // =========================================================================

    /// Runs the placement engine and persists what changed.
    ///
    /// Old placement records are all deleted before any new one is written.
    #[instrument(skip(self, now))]
    pub async fn reschedule(&mut self, now: DateTime<Utc>) -> MasterResult<Vec<Transition>> {
        let changes: Vec<PlacementChange> = self
            .cell
            .schedule(now.timestamp())
            .into_iter()
            .filter(PlacementChange::is_changed)
            .collect();
        let store = self.store.as_ref();

        for change in &changes {
            if let Some(before) = &change.before {
                if change.after.as_ref() != Some(before) {
                    persist::delete_placement(store, before, &change.app).await?;
                }
            }
        }

        let mut transitions = Vec::with_capacity(changes.len());
        for change in changes {
            let Some(app) = self.cell.apps.get(&change.app) else {
                continue;
            };
            if change.before == change.after {
                // Lease renewal: same server, new expiry.
                persist::write_placement(store, app).await?;
                debug!(instance_id = %app.id, expiry = ?change.after_expiry, "Placement renewed");
                continue;
            }
            let why = self.why(app, change.before.as_deref());
            match &change.after {
                Some(server) => {
                    persist::write_placement(store, app).await?;
                    info!(instance_id = %app.id, server = %server, why = %why, "Scheduled");
                    self.traces
                        .app(
                            store,
                            &app.id,
                            AppEvent::Scheduled {
                                server: server.clone(),
                                why: why.clone(),
                            },
                        )
                        .await?;
                }
                None => {
                    info!(instance_id = %app.id, why = %why, "Pending");
                    self.traces
                        .app(store, &app.id, AppEvent::Pending { why: why.clone() })
                        .await?;
                }
            }
            transitions.push(Transition {
                app: change.app,
                before: change.before,
                after: change.after,
                why,
            });
        }

        self.remove_evicted_schedule_once(now).await?;
        persist::write_snapshot(self.store.as_ref(), &self.cell).await?;

        self.up_to_date = true;
        self.timers.schedule.reset(now);
        Ok(transitions)
    }

    /// Reason for a transition, from the previous server's condition first.
    fn why(&self, app: &App, before: Option<&str>) -> String {
        if let Some(name) = before {
            match self.cell.servers.get(name) {
                None => return format!("{name}:down"),
                Some(server) if server.is_down() => return format!("{name}:down"),
                Some(server) if server.state == ServerState::Frozen => {
                    return format!("{name}:frozen")
                }
                Some(_) => {}
            }
        }
        if app.blacklisted {
            "blacklisted".to_string()
        } else if app.evicted {
            "evicted".to_string()
        } else {
            String::new()
        }
    }

    /// Evicted schedule-once apps finish instead of being placed again.
    async fn remove_evicted_schedule_once(&mut self, now: DateTime<Utc>) -> MasterResult<()> {
        let terminal: Vec<InstanceId> = self
            .cell
            .apps
            .values()
            .filter(|app| app.schedule_once && app.evicted && app.server.is_none())
            .map(|app| app.id.clone())
            .collect();

        let store = self.store.as_ref();
        for id in terminal {
            info!(instance_id = %id, "Terminating evicted schedule_once app");
            self.traces
                .app(
                    store,
                    &id,
                    AppEvent::Finished {
                        state: FinishedState::Terminated,
                        data: "schedule_once".to_string(),
                    },
                )
                .await?;
            persist::write_finished_if_absent(
                store,
                &id,
                &FinishedRecord {
                    state: FinishedState::Terminated,
                    data: "schedule_once".to_string(),
                    when: now.timestamp(),
                    host: None,
                },
            )
            .await?;
            store.delete(&paths::scheduled(&id)).await?;
            self.cell.remove_app(&id);
        }
        Ok(())
    }

    // =========================================================================
    // Integrity
    // =========================================================================

    /// Repairs missing placement records and deletes records the model does
    /// not account for.
    pub async fn check_placement_integrity(&mut self) -> MasterResult<()> {
        let store = self.store.as_ref();

        for app in self.cell.apps.values() {
            let Some(server) = &app.server else {
                continue;
            };
            if persist::read_placement(store, server, &app.id).await?.is_none() {
                warn!(instance_id = %app.id, server = %server, "Repairing missing placement record");
                persist::write_placement(store, app).await?;
            }
        }

        for server in store.list(paths::PLACEMENT).await? {
            for node in store.list(&paths::placement_server(&server)).await? {
                let expected = node
                    .parse::<InstanceId>()
                    .ok()
                    .and_then(|id| self.cell.apps.get(&id))
                    .is_some_and(|app| app.server.as_deref() == Some(server.as_str()));
                if !expected {
                    warn!(server = %server, node = %node, "Deleting stray placement record");
                    store
                        .delete(&path::join(&paths::placement_server(&server), &node))
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Freezes servers that fail to start their apps in time.
    pub async fn check_pending_start(&mut self, now: DateTime<Utc>) -> MasterResult<()> {
        let running: BTreeSet<InstanceId> =
            loader::parse_ids(self.store.list(paths::RUNNING).await?)
                .into_iter()
                .collect();
        let interval = self.config.app_start_interval.as_secs() as i64;
        let freeze = self
            .pending_start
            .check(&self.cell, &running, now.timestamp(), interval);

        for (server, apps) in freeze {
            warn!(server = %server, apps = apps.len(), "Apps did not start in time, freezing server");
            self.freeze_server(&server, &apps, now).await?;
        }
        Ok(())
    }

    // =========================================================================
    // Reboots
    // =========================================================================

    async fn pending_reboots(&self) -> MasterResult<BTreeSet<String>> {
        Ok(self.store.list(paths::REBOOTS).await?.into_iter().collect())
    }

    async fn mark_reboot(&self, server: &str, now: DateTime<Utc>) -> MasterResult<()> {
        json::put_json(
            self.store.as_ref(),
            &paths::reboot(server),
            &RebootRecord {
                when: now.timestamp(),
            },
            PutOptions::default(),
        )
        .await?;
        Ok(())
    }

    /// Ticks each partition's reboot scheduler.
    pub async fn reboot_tick(&mut self, now: DateTime<Utc>) -> MasterResult<Vec<String>> {
        let pending = self.pending_reboots().await?;
        let marks = self.cell.reboot_tick(now.timestamp(), &pending);
        for server in &marks {
            info!(server = %server, "Scheduling reboot");
            self.mark_reboot(server, now).await?;
        }
        Ok(marks)
    }

    /// Resolves reboot conflicts and reboots servers past their deadline.
    pub async fn reboot_check(&mut self, now: DateTime<Utc>) -> MasterResult<()> {
        let pending = self.pending_reboots().await?;
        let plan = self.cell.reboot_check(now.timestamp(), &pending);
        for server in &plan.cancel {
            info!(server = %server, "Cancelling conflicting reboot");
            self.store.delete(&paths::reboot(server)).await?;
        }
        for server in &plan.mark {
            info!(server = %server, "Server past its deadline, scheduling reboot");
            self.mark_reboot(server, now).await?;
        }
        Ok(())
    }
}

impl Drop for Master {
    fn drop(&mut self) {
        for (_, handle) in &self.watchers {
            handle.abort();
        }
    }
}
