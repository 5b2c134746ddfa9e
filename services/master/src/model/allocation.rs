//! Allocations and app pattern matching.

use std::collections::BTreeMap;

use globset::{Glob, GlobMatcher, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;
use treadmill_id::AppName;

use super::{Resources, DEFAULT_PARTITION};

fn default_partition() -> String {
    DEFAULT_PARTITION.to_string()
}

/// Rank of allocations that do not set one, and of the default allocation.
pub const DEFAULT_RANK: u32 = 100;

fn default_rank() -> u32 {
    DEFAULT_RANK
}

/// Maps an app name pattern to a priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub pattern: String,
    pub priority: u8,
}

/// One entry of the persisted `/allocations` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRecord {
    /// `<tenant>/<allocation>`.
    pub name: String,

    #[serde(default = "default_partition")]
    pub partition: String,

    /// Lower ranks are scheduled first.
    #[serde(default = "default_rank")]
    pub rank: u32,

    /// Added to the rank of apps beyond the reservation.
    #[serde(default)]
    pub rank_adjustment: u32,

    /// Cap on cumulative demand relative to the reservation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_utilization: Option<f64>,

    /// Reserved capacity.
    #[serde(flatten)]
    pub reserved: Resources,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traits: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assignments: Vec<AssignmentRecord>,
}

/// Where an app belongs, as resolved from the allocations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub allocation: String,
    pub partition: String,
    /// Priority from the matching assignment, if any matched.
    pub priority: Option<u8>,
}

/// An allocation in the model.
#[derive(Debug, Clone)]
pub struct Allocation {
    pub name: String,
    pub partition: String,
    pub rank: u32,
    pub rank_adjustment: u32,
    pub max_utilization: Option<f64>,
    pub reserved: Resources,
    pub traits: Vec<String>,
    assignments: Vec<(GlobMatcher, u8)>,
}

impl Allocation {
    /// Builds an allocation, rejecting invalid patterns.
    pub fn try_from_record(record: &AllocationRecord) -> Result<Self, globset::Error> {
        let assignments = record
            .assignments
            .iter()
            .map(|a| Ok((Glob::new(&a.pattern)?.compile_matcher(), a.priority)))
            .collect::<Result<Vec<_>, globset::Error>>()?;
        Ok(Self {
            name: record.name.clone(),
            partition: record.partition.clone(),
            rank: record.rank,
            rank_adjustment: record.rank_adjustment,
            max_utilization: record.max_utilization,
            reserved: record.reserved,
            traits: record.traits.clone(),
            assignments,
        })
    }

    /// Priority of the first assignment matching `app_name`.
    pub fn match_priority(&self, app_name: &str) -> Option<u8> {
        self.assignments
            .iter()
            .find(|(matcher, _)| matcher.is_match(app_name))
            .map(|(_, priority)| *priority)
    }
}

/// Blacklisted app name patterns, `/blackedout.apps`.
#[derive(Debug, Clone)]
pub struct Blacklist {
    reasons: BTreeMap<String, String>,
    set: GlobSet,
}

impl Default for Blacklist {
    fn default() -> Self {
        Self {
            reasons: BTreeMap::new(),
            set: GlobSet::empty(),
        }
    }
}

impl Blacklist {
    /// Compiles the `pattern -> reason` map. Invalid patterns are skipped.
    pub fn new(reasons: BTreeMap<String, String>) -> Self {
        let mut builder = GlobSetBuilder::new();
        for pattern in reasons.keys() {
            match Glob::new(pattern) {
                Ok(glob) => {
                    builder.add(glob);
                }
                Err(e) => warn!(pattern = %pattern, error = %e, "Invalid blacklist pattern"),
            }
        }
        let set = builder.build().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to compile blacklist");
            GlobSet::empty()
        });
        Self { reasons, set }
    }

    pub fn is_match(&self, app: &AppName) -> bool {
        self.set.is_match(app.to_string())
    }

    pub fn reasons(&self) -> &BTreeMap<String, String> {
        &self.reasons
    }
}
