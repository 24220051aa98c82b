//! Newtype identifiers for managed resources and operations.
//!
//! A remote object can be addressed by two keys: the identifier assigned by the
//! remote API ([`ResourceId`]) and the human-readable display name
//! ([`ResourceName`]). Keeping them as distinct types prevents passing a name
//! where an identifier is expected, which matters because the dual-key
//! resolver treats them very differently.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A key was empty or whitespace only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{kind} must not be blank")]
pub struct BlankKey {
    pub kind: &'static str,
}

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display, and a
// TryFrom<String> that serde deserializes through, so blank keys are rejected
// on every path.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new key, returning `None` if the value is empty or
            /// whitespace only.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.trim().is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the key as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = BlankKey;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value).ok_or(BlankKey { kind: stringify!($name) })
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Resource keys
// ---------------------------------------------------------------------------

string_id! {
    /// Identifier assigned by the remote management API.
    ///
    /// The authoritative key for a remote object, but it goes stale when the
    /// object is recreated out-of-band.
    ResourceId
}

string_id! {
    /// Display name of a remote object.
    ///
    /// Best-effort fallback key used to relocate an object whose identifier no
    /// longer resolves.
    ResourceName
}

string_id! {
    /// Resource type name as registered with the host (e.g. `"department"`).
    ///
    /// Used as the lookup key for per-type timeout overrides and as a logging field.
    ResourceType
}

// ---------------------------------------------------------------------------
// Operation correlation
// ---------------------------------------------------------------------------

/// Identifies one top-level resource operation (a single create, read, update,
/// or delete call from the host).
///
/// Generated fresh per operation and recorded on the operation's tracing span
/// so every attempt, backoff and confirmation read can be correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Generates a new random operation identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying [`Uuid`].
    pub fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn rejects_blank_keys() {
        assert_eq!(ResourceId::new(""), None);
        assert_eq!(ResourceName::new("   "), None);
    }

    #[test]
    fn keeps_key_text_verbatim() {
        let name = ResourceName::new(" Engineering ").unwrap();
        assert_eq!(name.as_str(), " Engineering ");
        assert_eq!(name.to_string(), " Engineering ");
    }

    #[test]
    fn deserializing_rejects_blank_keys() {
        let err = serde_json::from_str::<ResourceId>(r#""""#).unwrap_err();
        assert!(err.to_string().contains("ResourceId must not be blank"), "{err}");
        assert!(serde_json::from_str::<ResourceName>(r#""  ""#).is_err());

        let id: ResourceId = serde_json::from_str(r#""42""#).unwrap();
        assert_eq!(id.as_str(), "42");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""42""#);
    }

    #[test]
    fn operation_ids_are_unique() {
        assert_ne!(OperationId::new_random(), OperationId::new_random());
    }
}
