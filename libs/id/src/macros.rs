//! Macros for string-encoded name types.

/// Implements the string codec for a name type.
///
/// The type must provide `parse(&str) -> Result<Self, IdError>` and a
/// `Display` implementation producing the canonical form. This generates:
/// - `FromStr`
/// - `Serialize` and `Deserialize` as a plain string
/// - `TryFrom<&str>` and `TryFrom<String>`
///
/// # Example
///
/// ```ignore
/// impl_string_codec!(InstanceId);
///
/// let id: InstanceId = "treadmld.web#0000000001".parse()?;
/// ```
#[macro_export]
macro_rules! impl_string_codec {
    ($name:ident) => {
        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = $crate::IdError;

            fn try_from(s: &str) -> Result<Self, Self::Error> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = $crate::IdError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::parse(&s)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.collect_str(self)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}
