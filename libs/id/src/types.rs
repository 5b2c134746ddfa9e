//! Application and instance names.
//!
//! An application is identified by `{proid}.{name}`. Every scheduled copy of
//! it gets a store-assigned sequence, giving `{proid}.{name}#{sequence}`.

use crate::{impl_string_codec, IdError};

/// Width of the zero padded sequence suffix assigned by the store.
pub const SEQUENCE_WIDTH: usize = 10;

/// Formats a sequence number the way the store renders sequence suffixes.
#[must_use]
pub fn format_sequence(seq: u64) -> String {
    format!("{:0width$}", seq, width = SEQUENCE_WIDTH)
}

/// Parses a decimal sequence suffix.
pub fn parse_sequence(s: &str) -> Result<u64, IdError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(IdError::InvalidSequence(s.to_string()));
    }
    s.parse::<u64>()
        .map_err(|_| IdError::InvalidSequence(s.to_string()))
}

fn check_segment(segment: &str, what: &str) -> Result<(), IdError> {
    if segment.is_empty() {
        return Err(IdError::InvalidFormat {
            message: format!("{what} cannot be empty"),
        });
    }
    if let Some(bad) = segment.chars().find(|c| matches!(c, '/' | '#' | ',') || c.is_whitespace())
    {
        return Err(IdError::InvalidFormat {
            message: format!("{what} contains invalid character {bad:?}"),
        });
    }
    Ok(())
}

// =============================================================================
// Application Name
// =============================================================================

/// Application name, `{proid}.{name}`.
///
/// The proid is everything before the first dot; the name may itself
/// contain dots.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AppName {
    proid: String,
    name: String,
}

impl AppName {
    /// Builds an application name from its parts.
    pub fn new(proid: impl Into<String>, name: impl Into<String>) -> Result<Self, IdError> {
        let proid = proid.into();
        let name = name.into();
        check_segment(&proid, "proid")?;
        if proid.contains('.') {
            return Err(IdError::InvalidFormat {
                message: "proid cannot contain '.'".to_string(),
            });
        }
        check_segment(&name, "app name")?;
        Ok(Self { proid, name })
    }

    /// Parses `{proid}.{name}`.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        let Some((proid, name)) = s.split_once('.') else {
            return Err(IdError::MissingSeparator {
                expected: '.',
                actual: s.to_string(),
            });
        };
        Self::new(proid, name)
    }

    /// The tenant identity prefix.
    pub fn proid(&self) -> &str {
        &self.proid
    }

    /// The name part after the proid.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creates the instance id for the given store sequence.
    #[must_use]
    pub fn instance(&self, seq: u64) -> InstanceId {
        InstanceId {
            app: self.clone(),
            seq,
        }
    }
}

impl std::fmt::Display for AppName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.proid, self.name)
    }
}

impl_string_codec!(AppName);

// =============================================================================
// Instance Id
// =============================================================================

/// Scheduled instance id, `{proid}.{name}#{sequence}`.
///
/// Ordering is by application name, then sequence, which matches the
/// order the store lists sequence nodes in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceId {
    app: AppName,
    seq: u64,
}

impl InstanceId {
    /// Parses `{proid}.{name}#{sequence}`.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        let Some((app, seq)) = s.rsplit_once('#') else {
            return Err(IdError::MissingSeparator {
                expected: '#',
                actual: s.to_string(),
            });
        };
        Ok(Self {
            app: AppName::parse(app)?,
            seq: parse_sequence(seq)?,
        })
    }

    /// The application this instance belongs to.
    pub fn app(&self) -> &AppName {
        &self.app
    }

    /// The tenant identity prefix.
    pub fn proid(&self) -> &str {
        self.app.proid()
    }

    /// The store-assigned sequence.
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.app, format_sequence(self.seq))
    }
}

impl_string_codec!(InstanceId);

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_instance_id_roundtrip() {
        let id: InstanceId = "treadmld.web#0000000042".parse().unwrap();
        assert_eq!(id.proid(), "treadmld");
        assert_eq!(id.app().name(), "web");
        assert_eq!(id.seq(), 42);
        assert_eq!(id.to_string(), "treadmld.web#0000000042");
    }

    #[test]
    fn test_instance_id_dotted_name() {
        let id: InstanceId = "proid.foo.bar#0000000001".parse().unwrap();
        assert_eq!(id.proid(), "proid");
        assert_eq!(id.app().name(), "foo.bar");
    }

    #[test]
    fn test_instance_id_missing_sequence() {
        let result: Result<InstanceId, _> = "treadmld.web".parse();
        assert!(matches!(
            result.unwrap_err(),
            IdError::MissingSeparator { expected: '#', .. }
        ));
    }

    #[test]
    fn test_instance_id_bad_sequence() {
        let result: Result<InstanceId, _> = "treadmld.web#12a".parse();
        assert!(matches!(result.unwrap_err(), IdError::InvalidSequence(_)));
    }

    #[test]
    fn test_instance_id_empty() {
        let result: Result<InstanceId, _> = "".parse();
        assert!(result.unwrap_err().is_empty());
    }

    #[test]
    fn test_app_name_missing_proid() {
        let result: Result<AppName, _> = "web".parse();
        assert!(matches!(
            result.unwrap_err(),
            IdError::MissingSeparator { expected: '.', .. }
        ));
    }

    #[test]
    fn test_app_name_rejects_slash() {
        assert!(AppName::parse("proid.a/b").is_err());
        assert!(AppName::new("pro.id", "web").is_err());
    }

    #[test]
    fn test_instance_ids_sort_by_sequence() {
        let app = AppName::parse("proid.web").unwrap();
        let mut ids = vec![app.instance(10), app.instance(2), app.instance(7)];
        ids.sort();
        let seqs: Vec<_> = ids.iter().map(InstanceId::seq).collect();
        assert_eq!(seqs, vec![2, 7, 10]);
    }

    #[test]
    fn test_instance_id_json_roundtrip() {
        let id: InstanceId = "proid.web#0000000003".parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"proid.web#0000000003\"");
        let parsed: InstanceId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    proptest! {
        #[test]
        fn prop_instance_id_parse_format(
            proid in "[a-z][a-z0-9_]{0,7}",
            name in "[a-z][a-z0-9_.-]{0,15}",
            seq in 0u64..10_000_000_000,
        ) {
            let app = AppName::new(proid, name).unwrap();
            let id = app.instance(seq);
            let parsed = InstanceId::parse(&id.to_string()).unwrap();
            prop_assert_eq!(parsed, id);
        }
    }
}
