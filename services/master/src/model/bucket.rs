//! Topology buckets.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Persisted bucket record, `/buckets/<name>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traits: Vec<String>,
}

/// A topology node such as a rack or a building.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub name: String,
    pub parent: Option<String>,
    pub traits: BTreeSet<String>,
}

impl Bucket {
    pub fn from_record(name: &str, record: &BucketRecord) -> Self {
        Self {
            name: name.to_string(),
            parent: record.parent.clone(),
            traits: record.traits.iter().cloned().collect(),
        }
    }
}
