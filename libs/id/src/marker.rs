//! Event marker names.
//!
//! Producers create sequence nodes with the prefix
//! `"{priority:03}-{resource}-"`; the store appends the sequence, giving
//! names such as `007-servers-0000000042`. The prefix format is a wire
//! contract shared with every external producer and must stay bit-exact.
//!
//! Markers order by `(priority, sequence)`. Neither creation time nor the
//! lexical order of the full name matters.

use std::cmp::Ordering;

use crate::types::{format_sequence, parse_sequence};
use crate::{impl_string_codec, IdError};

/// Highest allowed marker priority.
pub const MAX_PRIORITY: u8 = 100;

/// A parsed event marker name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MarkerName {
    priority: u8,
    resource: String,
    seq: u64,
}

impl MarkerName {
    /// Builds a marker name from its parts.
    pub fn new(priority: u8, resource: impl Into<String>, seq: u64) -> Result<Self, IdError> {
        let resource = resource.into();
        validate(priority, &resource)?;
        Ok(Self {
            priority,
            resource,
            seq,
        })
    }

    /// The sequence-node prefix a producer writes for `(priority, resource)`.
    pub fn prefix(priority: u8, resource: &str) -> Result<String, IdError> {
        validate(priority, resource)?;
        Ok(format!("{:03}-{}-", priority, resource))
    }

    /// Parses `{priority}-{resource}-{sequence}`.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        let missing = || IdError::MissingSeparator {
            expected: '-',
            actual: s.to_string(),
        };
        let (priority, rest) = s.split_once('-').ok_or_else(missing)?;
        let (resource, seq) = rest.rsplit_once('-').ok_or_else(missing)?;

        if priority.len() != 3 || !priority.bytes().all(|b| b.is_ascii_digit()) {
            return Err(IdError::InvalidPriority(priority.to_string()));
        }
        let priority: u8 = priority
            .parse()
            .map_err(|_| IdError::InvalidPriority(priority.to_string()))?;

        Self::new(priority, resource, parse_sequence(seq)?)
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

fn validate(priority: u8, resource: &str) -> Result<(), IdError> {
    if priority > MAX_PRIORITY {
        return Err(IdError::InvalidPriority(priority.to_string()));
    }
    if resource.is_empty() || resource.contains('/') {
        return Err(IdError::InvalidFormat {
            message: format!("invalid marker resource '{resource}'"),
        });
    }
    Ok(())
}

impl Ord for MarkerName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then(self.seq.cmp(&other.seq))
            .then_with(|| self.resource.cmp(&other.resource))
    }
}

impl PartialOrd for MarkerName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for MarkerName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:03}-{}-{}",
            self.priority,
            self.resource,
            format_sequence(self.seq)
        )
    }
}

impl_string_codec!(MarkerName);
