//! The host's per-resource attribute store.
//!
//! The orchestration host hands each operation a bag of attributes and reads
//! it back afterwards. Two attributes are structural: `id` (the remote
//! identifier) and `name` (the display name used for fallback lookups).
//! Everything else belongs to the resource's mapper.

use reconcile::{ResourceId, ResourceName};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Attribute holding the remote identifier.
pub const ID_ATTRIBUTE: &str = "id";
/// Attribute holding the display name.
pub const NAME_ATTRIBUTE: &str = "name";

/// Label used in messages when a resource has no identifier yet.
const UNKNOWN_ID: &str = "unknown";

/// Failure reading or writing the attribute store.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("resource state must be a JSON object")]
    NotAnObject,

    #[error("attribute {key:?} has an unexpected shape: {source}")]
    Attribute {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Attributes of one managed resource instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceState {
    attributes: Map<String, Value>,
    #[serde(skip)]
    removed: bool,
}

impl ResourceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds state from a JSON object.
    pub fn from_value(value: Value) -> Result<Self, StateError> {
        match value {
            Value::Object(attributes) => Ok(Self {
                attributes,
                removed: false,
            }),
            _ => Err(StateError::NotAnObject),
        }
    }

    /// The stored remote identifier. Numeric identifiers are accepted and
    /// rendered as strings.
    pub fn id(&self) -> Option<ResourceId> {
        match self.attributes.get(ID_ATTRIBUTE)? {
            Value::String(s) => ResourceId::new(s.as_str()),
            Value::Number(n) => ResourceId::new(n.to_string()),
            _ => None,
        }
    }

    pub fn name(&self) -> Option<ResourceName> {
        match self.attributes.get(NAME_ATTRIBUTE)? {
            Value::String(s) => ResourceName::new(s.as_str()),
            _ => None,
        }
    }

    /// The identifier for use in messages, `"unknown"` when absent.
    pub fn id_label(&self) -> String {
        self.id()
            .map(|id| id.to_string())
            .unwrap_or_else(|| UNKNOWN_ID.to_string())
    }

    pub fn set_id(&mut self, id: &ResourceId) {
        self.attributes
            .insert(ID_ATTRIBUTE.to_string(), Value::String(id.to_string()));
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Reads a typed attribute. Absent and `null` both read as `None`.
    pub fn attribute<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StateError> {
        match self.attributes.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|source| StateError::Attribute {
                    key: key.to_string(),
                    source,
                }),
        }
    }

    pub fn set_attribute<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<(), StateError> {
        let value = serde_json::to_value(value).map_err(|source| StateError::Attribute {
            key: key.to_string(),
            source,
        })?;
        self.attributes.insert(key.to_string(), value);
        Ok(())
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    /// Drops every attribute and marks the resource as gone, so the host
    /// plans a recreate.
    pub fn remove_from_state(&mut self) {
        self.attributes.clear();
        self.removed = true;
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn reads_string_and_numeric_identifiers() {
        let state = ResourceState::from_value(json!({"id": "17", "name": "Sales"})).unwrap();
        assert_eq!(state.id(), ResourceId::new("17"));
        assert_eq!(state.name(), ResourceName::new("Sales"));

        let state = ResourceState::from_value(json!({"id": 42})).unwrap();
        assert_eq!(state.id_label(), "42");
    }

    #[test]
    fn missing_or_blank_identifier_is_labelled_unknown() {
        assert_eq!(ResourceState::new().id_label(), "unknown");

        let state = ResourceState::from_value(json!({"id": "", "name": null})).unwrap();
        assert_eq!(state.id(), None);
        assert_eq!(state.name(), None);
        assert_eq!(state.id_label(), "unknown");
    }

    #[test]
    fn rejects_non_object_state() {
        assert!(matches!(
            ResourceState::from_value(json!(["id"])),
            Err(StateError::NotAnObject)
        ));
    }

    #[test]
    fn typed_attributes_round_trip() {
        let mut state = ResourceState::new();
        state.set_attribute("priority", &7u32).unwrap();
        assert_eq!(state.attribute::<u32>("priority").unwrap(), Some(7));
        assert_eq!(state.attribute::<u32>("absent").unwrap(), None);

        let err = state.attribute::<String>("priority").unwrap_err();
        assert!(err.to_string().contains("priority"));
    }

    #[test]
    fn removal_clears_attributes() {
        let mut state = ResourceState::from_value(json!({"id": "1", "name": "x"})).unwrap();
        state.remove_from_state();
        assert!(state.is_removed());
        assert!(state.attributes().is_empty());
        assert_eq!(state.id(), None);
    }
}
