//! Servers.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use treadmill_events::ServerState;

use super::{Resources, DEFAULT_PARTITION};

fn default_partition() -> String {
    DEFAULT_PARTITION.to_string()
}

/// Persisted server record, `/servers/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    /// Topology parent bucket.
    pub parent: String,

    #[serde(default = "default_partition")]
    pub partition: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traits: Vec<String>,

    #[serde(flatten)]
    pub capacity: Resources,

    /// Initial state when no placement state has been persisted yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ServerState>,

    /// Unix seconds by which the server must be rebooted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<i64>,
}

impl ServerRecord {
    pub fn new(parent: impl Into<String>, capacity: Resources) -> Self {
        Self {
            parent: parent.into(),
            partition: default_partition(),
            traits: Vec::new(),
            capacity,
            state: Some(ServerState::Up),
            valid_until: None,
        }
    }
}

/// Persisted operational state, the data of `/placement/<name>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub state: ServerState,
    /// Unix seconds of the last transition.
    pub since: i64,
}

/// A server in the model.
#[derive(Debug, Clone, PartialEq)]
pub struct Server {
    pub name: String,
    pub parent: String,
    pub partition: String,
    pub traits: BTreeSet<String>,
    pub capacity: Resources,
    pub state: ServerState,
    pub since: i64,
    pub valid_until: Option<i64>,
    /// Whether the server's agent is reachable. Independent of `state`.
    pub presence: bool,
}

impl Server {
    /// Builds a server from its record and persisted status.
    ///
    /// State comes from the persisted status, then the record, then
    /// defaults to down.
    pub fn from_record(name: &str, record: &ServerRecord, status: Option<ServerStatus>) -> Self {
        let (state, since) = match status {
            Some(status) => (status.state, status.since),
            None => (record.state.unwrap_or_default(), 0),
        };
        Self {
            name: name.to_string(),
            parent: record.parent.clone(),
            partition: record.partition.clone(),
            traits: record.traits.iter().cloned().collect(),
            capacity: record.capacity,
            state,
            since,
            valid_until: record.valid_until,
            presence: false,
        }
    }

    /// Up and present.
    pub fn is_available(&self) -> bool {
        self.state == ServerState::Up && self.presence
    }

    /// Down, or its agent is gone.
    pub fn is_down(&self) -> bool {
        self.state == ServerState::Down || !self.presence
    }
}
