//! Identity groups.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Persisted identity group, `/identity-groups/<name>`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityGroupRecord {
    pub count: u32,
}

/// A pool of identity slots `0..count`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityGroup {
    pub name: String,
    pub count: u32,
}

impl IdentityGroup {
    pub fn from_record(name: &str, record: &IdentityGroupRecord) -> Self {
        Self {
            name: name.to_string(),
            count: record.count,
        }
    }

    /// Lowest slot not in `used`.
    pub fn free_slot(&self, used: &BTreeSet<u32>) -> Option<u32> {
        (0..self.count).find(|slot| !used.contains(slot))
    }
}
