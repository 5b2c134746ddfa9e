//! Trace record - the common wrapper for all trace events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use treadmill_id::InstanceId;

use crate::{AppEvent, EventError, ServerEvent};

/// The trace record - common metadata for all trace events.
///
/// The record is persisted as a sequence node whose name is
/// `{subject},{timestamp},{source},{event_type},{event_data}` and whose data
/// is the optional JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// When the transition was observed.
    pub timestamp: DateTime<Utc>,

    /// The component that observed the transition.
    pub source: String,

    /// Instance id or server name.
    pub subject: String,

    /// The event type (e.g. "scheduled", "server_state").
    pub event_type: String,

    /// Event-specific data rendered by the event type.
    pub event_data: String,

    /// Free-form payload stored as node data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl TraceRecord {
    /// Creates a record for an instance transition.
    pub fn app(
        instance_id: &InstanceId,
        source: impl Into<String>,
        timestamp: DateTime<Utc>,
        event: &AppEvent,
    ) -> Self {
        Self {
            timestamp,
            source: source.into(),
            subject: instance_id.to_string(),
            event_type: event.event_type().to_string(),
            event_data: event.event_data(),
            payload: None,
        }
    }

    /// Creates a record for a server transition.
    pub fn server(
        server: impl Into<String>,
        source: impl Into<String>,
        timestamp: DateTime<Utc>,
        event: &ServerEvent,
    ) -> Self {
        Self {
            timestamp,
            source: source.into(),
            subject: server.into(),
            event_type: event.event_type().to_string(),
            event_data: event.event_data(),
            payload: None,
        }
    }

    /// Attaches a payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Renders the node name the record is stored under.
    pub fn node_name(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.subject,
            format_timestamp(&self.timestamp),
            self.source,
            self.event_type,
            self.event_data
        )
    }

    /// Parses a node name produced by [`TraceRecord::node_name`].
    ///
    /// Sequence suffixes appended by the store are not stripped here;
    /// callers pass the name without them.
    pub fn parse_node_name(name: &str) -> Result<Self, EventError> {
        let invalid = || EventError::InvalidRecordName(name.to_string());
        let mut parts = name.splitn(5, ',');
        let subject = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let timestamp = parts.next().and_then(parse_timestamp).ok_or_else(invalid)?;
        let source = parts.next().ok_or_else(invalid)?;
        let event_type = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let event_data = parts.next().ok_or_else(invalid)?;

        Ok(Self {
            timestamp,
            source: source.to_string(),
            subject: subject.to_string(),
            event_type: event_type.to_string(),
            event_data: event_data.to_string(),
            payload: None,
        })
    }

    /// Decodes the record as an instance event.
    pub fn app_event(&self) -> Result<AppEvent, EventError> {
        AppEvent::parse(&self.event_type, &self.event_data)
    }

    /// Decodes the record as a server event.
    pub fn server_event(&self) -> Result<ServerEvent, EventError> {
        ServerEvent::parse(&self.event_type, &self.event_data)
    }
}

/// Unix seconds with millisecond precision, e.g. `1700000000.250`.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    format!("{}.{:03}", ts.timestamp(), ts.timestamp_subsec_millis())
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let (secs, millis) = s.split_once('.').unwrap_or((s, "0"));
    let secs: i64 = secs.parse().ok()?;
    let millis: u32 = millis.parse().ok()?;
    DateTime::from_timestamp(secs, millis.checked_mul(1_000_000)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FinishedState, ServerState};

    fn ts() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 250_000_000).unwrap()
    }

    #[test]
    fn test_app_record_node_name() {
        let id: InstanceId = "proid.web#0000000001".parse().unwrap();
        let record = TraceRecord::app(
            &id,
            "master",
            ts(),
            &AppEvent::Scheduled {
                server: "host1".to_string(),
                why: "evicted".to_string(),
            },
        );
        assert_eq!(
            record.node_name(),
            "proid.web#0000000001,1700000000.250,master,scheduled,host1:evicted"
        );
    }

    #[test]
    fn test_node_name_roundtrip() {
        let id: InstanceId = "proid.batch#0000000009".parse().unwrap();
        let record = TraceRecord::app(
            &id,
            "master",
            ts(),
            &AppEvent::Finished {
                state: FinishedState::Terminated,
                data: "schedule_once".to_string(),
            },
        );
        let parsed = TraceRecord::parse_node_name(&record.node_name()).unwrap();
        assert_eq!(parsed, record);
        assert_eq!(parsed.app_event().unwrap(), AppEvent::Finished {
            state: FinishedState::Terminated,
            data: "schedule_once".to_string(),
        });
    }

    #[test]
    fn test_server_record() {
        let record = TraceRecord::server(
            "host1",
            "master",
            ts(),
            &ServerEvent::State {
                state: ServerState::Up,
            },
        );
        let parsed = TraceRecord::parse_node_name(&record.node_name()).unwrap();
        assert_eq!(parsed.server_event().unwrap(), ServerEvent::State {
            state: ServerState::Up
        });
    }

    #[test]
    fn test_parse_rejects_truncated_name() {
        assert!(TraceRecord::parse_node_name("proid.web#0000000001,1700000000.250").is_err());
        assert!(TraceRecord::parse_node_name(",1.0,master,pending,").is_err());
    }
}
