//! # World Objects
//!
//! `VRObject` is the base state every shared object carries: identity,
//! position, world binding, lifecycle flags and a free-form property bag for
//! application state. Clients embed it; plain objects are nothing but it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::WorldError;
use crate::events::EventListener;
use crate::types::{Identity, Point, UNASSIGNED_ID};

/// Property names that events may never overwrite.
const PROTECTED_PROPERTIES: &[&str] = &["id", "kind", "world_id"];

/// Base state of a shared world object.
///
/// The listener set is runtime-only: it holds the delivery handles of every
/// scene currently observing this object and is never serialized or stored.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VRObject {
    /// Store-assigned id, zero until first persisted.
    #[serde(default)]
    pub id: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Point>,

    /// Id of the world this object lives in, if bound to one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world_id: Option<u64>,

    /// Permanent objects are visible everywhere in their world, regardless of
    /// scene range.
    #[serde(default)]
    pub permanent: bool,

    /// Temporary objects are destroyed when their owner disconnects. `None`
    /// means "not decided yet" - creation defaults it for guest owners.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporary: Option<bool>,

    /// Free-form application state, mutated by broadcast events.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,

    #[serde(skip)]
    pub listeners: HashMap<Identity, Arc<dyn EventListener>>,
}

impl VRObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an object from a creation template.
    pub fn from_template(template: ObjectTemplate) -> Self {
        Self {
            id: UNASSIGNED_ID,
            position: template.position,
            world_id: None,
            permanent: template.permanent,
            temporary: template.temporary,
            properties: template.properties,
            listeners: HashMap::new(),
        }
    }

    pub fn is_temporary(&self) -> bool {
        self.temporary.unwrap_or(false)
    }

    /// Apply an event's change set to this object.
    ///
    /// Well-known fields are decoded into their typed form; anything else
    /// lands in the property bag. Identity-defining fields are rejected.
    pub fn apply_changes(&mut self, changes: &Map<String, Value>) -> Result<(), WorldError> {
        for (key, value) in changes {
            if PROTECTED_PROPERTIES.contains(&key.as_str()) {
                return Err(WorldError::InvalidArgument(format!(
                    "Property is read-only: {key}"
                )));
            }
            match key.as_str() {
                "position" => {
                    self.position = Some(decode(key, value)?);
                }
                "permanent" => {
                    self.permanent = decode(key, value)?;
                }
                "temporary" => {
                    self.temporary = Some(decode(key, value)?);
                }
                _ => {
                    self.properties.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(())
    }

    pub fn add_listener(&mut self, id: Identity, listener: Arc<dyn EventListener>) {
        self.listeners.insert(id, listener);
    }

    pub fn remove_listener(&mut self, id: &Identity) {
        self.listeners.remove(id);
    }

    pub fn clear_listeners(&mut self) {
        self.listeners.clear();
    }

    pub fn listener_handles(&self) -> Vec<Arc<dyn EventListener>> {
        self.listeners.values().cloned().collect()
    }
}

pub(crate) fn decode<T: serde::de::DeserializeOwned>(
    key: &str,
    value: &Value,
) -> Result<T, WorldError> {
    serde_json::from_value(value.clone())
        .map_err(|e| WorldError::InvalidArgument(format!("Bad value for {key}: {e}")))
}

/// Client-supplied description of an object to create.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ObjectTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Point>,

    #[serde(default)]
    pub permanent: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporary: Option<bool>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn changes(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn applies_typed_position() {
        let mut obj = VRObject::new();
        obj.apply_changes(&changes(json!({"position": {"x": 1.0, "y": 2.0, "z": 3.0}})))
            .unwrap();
        assert_eq!(obj.position, Some(Point::new(1.0, 2.0, 3.0)));
    }

    #[test]
    fn unknown_keys_land_in_property_bag() {
        let mut obj = VRObject::new();
        obj.apply_changes(&changes(json!({"color": "red", "speed": 4})))
            .unwrap();
        assert_eq!(obj.properties["color"], "red");
        assert_eq!(obj.properties["speed"], 4);
    }

    #[test]
    fn rejects_protected_keys() {
        let mut obj = VRObject::new();
        let err = obj
            .apply_changes(&changes(json!({"id": 99})))
            .unwrap_err();
        assert!(matches!(err, WorldError::InvalidArgument(_)));
        assert_eq!(obj.id, 0);
    }

    #[test]
    fn rejects_malformed_typed_value() {
        let mut obj = VRObject::new();
        let err = obj
            .apply_changes(&changes(json!({"position": "somewhere"})))
            .unwrap_err();
        assert!(matches!(err, WorldError::InvalidArgument(_)));
    }

    #[test]
    fn listeners_never_serialize() {
        let obj = VRObject::new();
        let value = serde_json::to_value(&obj).unwrap();
        assert!(value.get("listeners").is_none());
    }
}
