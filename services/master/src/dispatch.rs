//! Event queue between the watch tasks and the master loop.
//!
//! Each watched path has one forwarding task. A task pushes the latest
//! children snapshot and, before pushing the next one, waits until the loop
//! has finished handling the previous one. At most one unhandled snapshot
//! per path is ever queued.

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use treadmill_id::MarkerName;
use treadmill_store::ChildrenWatch;

use crate::{paths, MasterError, MasterResult};

// =============================================================================
// Watched Paths
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WatchedPath {
    ServerPresence,
    Scheduled,
    Events,
    BlackedoutServers,
}

impl WatchedPath {
    pub const ALL: [WatchedPath; 4] = [
        WatchedPath::ServerPresence,
        WatchedPath::Scheduled,
        WatchedPath::Events,
        WatchedPath::BlackedoutServers,
    ];

    pub fn path(&self) -> &'static str {
        match self {
            Self::ServerPresence => paths::SERVER_PRESENCE,
            Self::Scheduled => paths::SCHEDULED,
            Self::Events => paths::EVENTS,
            Self::BlackedoutServers => paths::BLACKEDOUT_SERVERS,
        }
    }
}

impl std::fmt::Display for WatchedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path())
    }
}

// =============================================================================
// Marker Resources
// =============================================================================

/// Resource kinds named by event markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Allocations,
    AppsBlacklist,
    Apps,
    Servers,
    ServerState,
    Cell,
    Buckets,
    IdentityGroups,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allocations => "allocations",
            Self::AppsBlacklist => "apps_blacklist",
            Self::Apps => "apps",
            Self::Servers => "servers",
            Self::ServerState => "server_state",
            Self::Cell => "cell",
            Self::Buckets => "buckets",
            Self::IdentityGroups => "identity_groups",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "allocations" => Some(Self::Allocations),
            "apps_blacklist" => Some(Self::AppsBlacklist),
            "apps" => Some(Self::Apps),
            "servers" => Some(Self::Servers),
            "server_state" => Some(Self::ServerState),
            "cell" => Some(Self::Cell),
            "buckets" => Some(Self::Buckets),
            "identity_groups" => Some(Self::IdentityGroups),
            _ => None,
        }
    }

    /// Priority API writers use. Topology and server changes go first so
    /// app changes are handled against current servers.
    pub fn default_priority(&self) -> u8 {
        match self {
            Self::Apps => 1,
            _ => 0,
        }
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses marker node names and orders them by `(priority, sequence)`.
///
/// Each parsed marker keeps the node name it came from, which is what must
/// be read and deleted. Names that do not parse are returned separately so
/// they can be dropped.
pub fn sort_markers(children: &[String]) -> (Vec<(MarkerName, String)>, Vec<String>) {
    let mut markers = Vec::with_capacity(children.len());
    let mut invalid = Vec::new();
    for name in children {
        match MarkerName::parse(name) {
            Ok(marker) => markers.push((marker, name.clone())),
            Err(e) => {
                warn!(marker = %name, error = %e, "Invalid event marker");
                invalid.push(name.clone());
            }
        }
    }
    markers.sort();
    (markers, invalid)
}

/// Names carried by `apps` and `servers` markers.
///
/// `None` means the marker named nothing in particular. A malformed payload
/// is treated as an empty list.
pub fn names_payload(payload: Option<Value>) -> Option<Vec<String>> {
    match payload {
        None | Some(Value::Null) => None,
        Some(value) => match serde_json::from_value(value) {
            Ok(names) => Some(names),
            Err(e) => {
                warn!(error = %e, "Malformed marker payload, ignoring");
                Some(Vec::new())
            }
        },
    }
}

/// Payload of a `server_state` marker, `[server, state, [apps]]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStateChange {
    pub server: String,
    pub state: String,
    pub apps: Vec<String>,
}

impl ServerStateChange {
    pub fn from_payload(payload: Option<Value>) -> Option<Self> {
        let value = payload?;
        let parsed: Result<(String, String, Option<Vec<String>>), _> =
            serde_json::from_value(value);
        match parsed {
            Ok((server, state, apps)) => Some(Self {
                server,
                state,
                apps: apps.unwrap_or_default(),
            }),
            Err(e) => {
                warn!(error = %e, "Malformed server_state payload, ignoring");
                None
            }
        }
    }

    pub fn to_payload(&self) -> Value {
        serde_json::json!([self.server, self.state, self.apps])
    }
}

// =============================================================================
// Queue
// =============================================================================

/// One children snapshot of a watched path.
#[derive(Debug)]
pub struct WatchEvent {
    pub path: WatchedPath,
    pub children: Vec<String>,
    ack: oneshot::Sender<()>,
}

impl WatchEvent {
    pub fn new(path: WatchedPath, children: Vec<String>) -> (Self, oneshot::Receiver<()>) {
        let (ack, done) = oneshot::channel();
        (
            Self {
                path,
                children,
                ack,
            },
            done,
        )
    }

    /// Signals the forwarding task that the snapshot was handled.
    pub fn complete(self) {
        let _ = self.ack.send(());
    }
}

pub type EventSender = mpsc::UnboundedSender<WatchEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<WatchEvent>;

/// Forwards snapshots of one watch into the queue.
///
/// Returns `Ok` when the loop has gone away and `WatchClosed` when the
/// store ended the watch.
pub async fn forward(
    path: WatchedPath,
    mut watch: ChildrenWatch,
    tx: EventSender,
) -> MasterResult<()> {
    let mut in_flight: Option<oneshot::Receiver<()>> = None;
    loop {
        let Some(children) = watch.next().await else {
            warn!(path = %path, "Watch closed");
            return Err(MasterError::WatchClosed(path.path().to_string()));
        };
        if let Some(done) = in_flight.take() {
            // An Err here means the event was dropped unhandled; the loop is
            // going away and the send below will say so.
            let _ = done.await;
        }
        debug!(path = %path, children = children.len(), "Watch fired");
        let (event, done) = WatchEvent::new(path, children);
        if tx.send(event).is_err() {
            return Ok(());
        }
        in_flight = Some(done);
    }
}
