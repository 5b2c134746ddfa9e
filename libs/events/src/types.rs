//! Trace event definitions.
//!
//! Each event knows how to render itself as an `(event_type, event_data)`
//! pair and how to parse itself back. The pair is what ends up in the trace
//! record name, so trace readers can follow a lifecycle without fetching
//! node data.

use serde::{Deserialize, Serialize};

use crate::EventError;

// =============================================================================
// Event Type Constants
// =============================================================================

/// All event type names as constants.
pub mod event_types {
    // Instance
    pub const SCHEDULED: &str = "scheduled";
    pub const PENDING: &str = "pending";
    pub const PENDING_DELETE: &str = "pending_delete";
    pub const CONFIGURED: &str = "configured";
    pub const DELETED: &str = "deleted";
    pub const FINISHED: &str = "finished";
    pub const ABORTED: &str = "aborted";
    pub const KILLED: &str = "killed";
    pub const SERVICE_RUNNING: &str = "service_running";
    pub const SERVICE_EXITED: &str = "service_exited";

    // Server
    pub const SERVER_STATE: &str = "server_state";
    pub const SERVER_BLACKOUT: &str = "server_blackout";
    pub const SERVER_BLACKOUT_CLEARED: &str = "server_blackout_cleared";
}

// =============================================================================
// Status Enums
// =============================================================================

/// Operational state of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Up,
    #[default]
    Down,
    Frozen,
}

impl ServerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Frozen => "frozen",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            "frozen" => Some(Self::Frozen),
            _ => None,
        }
    }
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an instance finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishedState {
    /// The container exited on its own.
    Exited,
    /// The scheduler removed the instance.
    Terminated,
}

impl FinishedState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exited => "exited",
            Self::Terminated => "terminated",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "exited" => Some(Self::Exited),
            "terminated" => Some(Self::Terminated),
            _ => None,
        }
    }
}

// =============================================================================
// Instance Events
// =============================================================================

/// A lifecycle transition of a scheduled instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AppEvent {
    Scheduled { server: String, why: String },
    Pending { why: String },
    PendingDelete { why: String },
    Configured { uniqueid: String },
    Deleted,
    Finished { state: FinishedState, data: String },
    Aborted { why: String },
    Killed { is_oom: bool },
    ServiceRunning { uniqueid: String, service: String },
    ServiceExited {
        uniqueid: String,
        service: String,
        rc: i32,
        signal: i32,
    },
}

impl AppEvent {
    pub fn event_type(&self) -> &'static str {
        use event_types::*;
        match self {
            Self::Scheduled { .. } => SCHEDULED,
            Self::Pending { .. } => PENDING,
            Self::PendingDelete { .. } => PENDING_DELETE,
            Self::Configured { .. } => CONFIGURED,
            Self::Deleted => DELETED,
            Self::Finished { .. } => FINISHED,
            Self::Aborted { .. } => ABORTED,
            Self::Killed { .. } => KILLED,
            Self::ServiceRunning { .. } => SERVICE_RUNNING,
            Self::ServiceExited { .. } => SERVICE_EXITED,
        }
    }

    /// Renders the event-specific data carried in the record name.
    pub fn event_data(&self) -> String {
        match self {
            Self::Scheduled { server, why } if why.is_empty() => server.clone(),
            Self::Scheduled { server, why } => format!("{server}:{why}"),
            Self::Pending { why } | Self::PendingDelete { why } | Self::Aborted { why } => {
                why.clone()
            }
            Self::Configured { uniqueid } => uniqueid.clone(),
            Self::Deleted => String::new(),
            Self::Finished { state, data } => format!("{}:{}", state.as_str(), data),
            Self::Killed { is_oom } => if *is_oom { "oom" } else { "" }.to_string(),
            Self::ServiceRunning { uniqueid, service } => format!("{uniqueid}.{service}"),
            Self::ServiceExited {
                uniqueid,
                service,
                rc,
                signal,
            } => format!("{uniqueid}.{service}.{rc}.{signal}"),
        }
    }

    /// Parses an `(event_type, event_data)` pair.
    pub fn parse(event_type: &str, data: &str) -> Result<Self, EventError> {
        use event_types::*;
        let invalid = || EventError::InvalidData {
            event_type: event_type.to_string(),
            data: data.to_string(),
        };

        let event = match event_type {
            SCHEDULED => match data.split_once(':') {
                Some((server, why)) => Self::Scheduled {
                    server: server.to_string(),
                    why: why.to_string(),
                },
                None => Self::Scheduled {
                    server: data.to_string(),
                    why: String::new(),
                },
            },
            PENDING => Self::Pending {
                why: data.to_string(),
            },
            PENDING_DELETE => Self::PendingDelete {
                why: data.to_string(),
            },
            CONFIGURED => Self::Configured {
                uniqueid: data.to_string(),
            },
            DELETED => Self::Deleted,
            FINISHED => {
                let (state, rest) = data.split_once(':').ok_or_else(invalid)?;
                Self::Finished {
                    state: FinishedState::parse(state).ok_or_else(invalid)?,
                    data: rest.to_string(),
                }
            }
            ABORTED => Self::Aborted {
                why: data.to_string(),
            },
            KILLED => Self::Killed {
                is_oom: data == "oom",
            },
            SERVICE_RUNNING => {
                let (uniqueid, service) = data.split_once('.').ok_or_else(invalid)?;
                Self::ServiceRunning {
                    uniqueid: uniqueid.to_string(),
                    service: service.to_string(),
                }
            }
            SERVICE_EXITED => {
                let mut parts = data.rsplitn(3, '.');
                let signal = parts.next().and_then(|s| s.parse().ok()).ok_or_else(invalid)?;
                let rc = parts.next().and_then(|s| s.parse().ok()).ok_or_else(invalid)?;
                let (uniqueid, service) = parts
                    .next()
                    .and_then(|s| s.split_once('.'))
                    .ok_or_else(invalid)?;
                Self::ServiceExited {
                    uniqueid: uniqueid.to_string(),
                    service: service.to_string(),
                    rc,
                    signal,
                }
            }
            other => return Err(EventError::UnknownEventType(other.to_string())),
        };
        Ok(event)
    }
}

// =============================================================================
// Server Events
// =============================================================================

/// A transition of a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ServerEvent {
    State { state: ServerState },
    Blackout,
    BlackoutCleared,
}

impl ServerEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::State { .. } => event_types::SERVER_STATE,
            Self::Blackout => event_types::SERVER_BLACKOUT,
            Self::BlackoutCleared => event_types::SERVER_BLACKOUT_CLEARED,
        }
    }

    pub fn event_data(&self) -> String {
        match self {
            Self::State { state } => state.as_str().to_string(),
            Self::Blackout | Self::BlackoutCleared => String::new(),
        }
    }

    pub fn parse(event_type: &str, data: &str) -> Result<Self, EventError> {
        match event_type {
            event_types::SERVER_STATE => {
                let state = ServerState::parse(data).ok_or_else(|| EventError::InvalidData {
                    event_type: event_type.to_string(),
                    data: data.to_string(),
                })?;
                Ok(Self::State { state })
            }
            event_types::SERVER_BLACKOUT => Ok(Self::Blackout),
            event_types::SERVER_BLACKOUT_CLEARED => Ok(Self::BlackoutCleared),
            other => Err(EventError::UnknownEventType(other.to_string())),
        }
    }
}
