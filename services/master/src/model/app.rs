//! Scheduled applications.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use treadmill_id::InstanceId;

use super::{Assignment, Resources};

/// Priority of apps that neither carry one nor match an assignment.
pub const DEFAULT_PRIORITY: u8 = 1;

/// How many apps of one affinity may share a server or a rack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffinityLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rack: Option<usize>,
}

impl AffinityLimits {
    pub fn is_empty(&self) -> bool {
        self.server.is_none() && self.rack.is_none()
    }
}

/// Persisted app record, `/scheduled/<instance id>`.
///
/// Manifest attributes the scheduler does not interpret are carried in
/// `extra` untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,

    /// Defaults to the app name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<String>,

    #[serde(default, skip_serializing_if = "AffinityLimits::is_empty")]
    pub affinity_limits: AffinityLimits,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traits: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_group: Option<String>,

    /// Placement lease in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease: Option<u64>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub schedule_once: bool,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub renew: bool,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AppRecord {
    pub fn demand(&self) -> Resources {
        Resources {
            cpu: self.cpu.unwrap_or_default(),
            memory: self.memory.unwrap_or_default(),
            disk: self.disk.unwrap_or_default(),
        }
    }

    /// Names of required attributes that are missing.
    pub fn missing_attributes(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.cpu.is_none() {
            missing.push("cpu");
        }
        if self.memory.is_none() {
            missing.push("memory");
        }
        if self.disk.is_none() {
            missing.push("disk");
        }
        missing
    }
}

/// A scheduled instance in the model.
#[derive(Debug, Clone, PartialEq)]
pub struct App {
    pub id: InstanceId,
    pub demand: Resources,
    /// 0 to 100. Zero is never scheduled.
    pub priority: u8,
    pub affinity: String,
    pub affinity_limits: AffinityLimits,
    pub traits: BTreeSet<String>,
    pub identity_group: Option<String>,
    pub identity: Option<u32>,
    pub partition: String,
    pub allocation: String,
    pub schedule_once: bool,
    pub blacklisted: bool,
    /// Removed from a server involuntarily in the last pass.
    pub evicted: bool,
    /// Remove from the current server on the next pass.
    pub unschedule: bool,
    /// Extend the placement lease on the next pass.
    pub renew: bool,
    pub lease: u64,
    pub server: Option<String>,
    pub placement_expiry: Option<i64>,
}

impl App {
    pub fn from_record(id: InstanceId, record: &AppRecord, assignment: &Assignment) -> Self {
        Self {
            affinity: record
                .affinity
                .clone()
                .unwrap_or_else(|| id.app().to_string()),
            demand: record.demand(),
            priority: record
                .priority
                .or(assignment.priority)
                .unwrap_or(DEFAULT_PRIORITY),
            affinity_limits: record.affinity_limits,
            traits: record.traits.iter().cloned().collect(),
            identity_group: record.identity_group.clone(),
            identity: None,
            partition: assignment.partition.clone(),
            allocation: assignment.allocation.clone(),
            schedule_once: record.schedule_once,
            blacklisted: false,
            evicted: false,
            unschedule: false,
            renew: record.renew,
            lease: record.lease.unwrap_or_default(),
            server: None,
            placement_expiry: None,
            id,
        }
    }

    /// Eligible for placement at all.
    pub fn is_schedulable(&self) -> bool {
        self.priority > 0 && !self.blacklisted && !(self.schedule_once && self.evicted)
    }
}
