//! # Clients
//!
//! A `Client` is a user (or remote server) known to the runtime. It extends
//! the base object state with identity and lifecycle fields plus the runtime
//! handles a connected client carries: its transport session, its scene and
//! its write-back buffer. The runtime handles never serialize and never
//! persist; the client persistence adaptor clears them on load.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::object::{decode, VRObject};
use crate::config::SceneProperties;
use crate::error::WorldError;
use crate::scene::Scene;
use crate::session::ClientSession;
use crate::types::Identity;
use crate::writeback::WriteBack;

/// What kind of peer this client represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ClientKind {
    /// A regular user connection.
    #[default]
    User,
    /// Another server federating into this one.
    RemoteServer,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Client {
    #[serde(flatten)]
    pub base: VRObject,

    /// Display name, unique among live sessions while tracked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Guests are created ad hoc for unauthenticated connections and removed
    /// again at logout, together with everything they own.
    #[serde(default)]
    pub guest: bool,

    /// True between session start and exit.
    #[serde(default)]
    pub active: bool,

    #[serde(default)]
    pub client_kind: ClientKind,

    /// Private key/value data (e.g. streaming credentials), only ever shown
    /// to the client itself.
    #[serde(skip)]
    pub tokens: HashMap<String, String>,

    #[serde(skip)]
    pub session: Option<Arc<dyn ClientSession>>,

    #[serde(skip)]
    pub scene: Option<Arc<Scene>>,

    #[serde(skip)]
    pub write_back: Option<Arc<WriteBack>>,

    /// Scene parameters assigned at login; falls back to server defaults.
    #[serde(skip)]
    pub scene_properties: Option<SceneProperties>,
}

impl Client {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn identity(&self) -> Identity {
        Identity::client(self.base.id)
    }

    pub fn world_id(&self) -> Option<u64> {
        self.base.world_id
    }

    /// Apply an event's change set. Client-level fields are intercepted,
    /// everything else goes through the base object rules.
    pub fn apply_changes(&mut self, changes: &Map<String, Value>) -> Result<(), WorldError> {
        let mut rest = Map::new();
        for (key, value) in changes {
            match key.as_str() {
                "name" => {
                    self.name = decode(key, value)?;
                }
                "active" => {
                    self.active = decode(key, value)?;
                }
                "guest" | "client_kind" | "tokens" => {
                    return Err(WorldError::InvalidArgument(format!(
                        "Property is read-only: {key}"
                    )));
                }
                _ => {
                    rest.insert(key.clone(), value.clone());
                }
            }
        }
        if !rest.is_empty() {
            self.base.apply_changes(&rest)?;
        }
        Ok(())
    }

    /// Extend the owner-view snapshot with private fields.
    pub(crate) fn extend_owner_view(&self, value: &mut Value) {
        if let Value::Object(map) = value {
            map.insert("tokens".to_string(), json!(self.tokens));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn runtime_handles_never_serialize() {
        let mut client = Client::named("alice");
        client.tokens.insert("stream".to_string(), "secret".to_string());
        let value = serde_json::to_value(&client).unwrap();
        assert_eq!(value["name"], "alice");
        assert!(value.get("tokens").is_none());
        assert!(value.get("session").is_none());
        assert!(value.get("scene").is_none());
    }

    #[test]
    fn base_fields_flatten() {
        let mut client = Client::named("bob");
        client.base.id = 5;
        let value = serde_json::to_value(&client).unwrap();
        assert_eq!(value["id"], 5);
    }

    #[test]
    fn intercepts_client_level_changes() {
        let mut client = Client::new();
        let changes = match json!({"name": "carol", "active": true, "hat": "tall"}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        client.apply_changes(&changes).unwrap();
        assert_eq!(client.name.as_deref(), Some("carol"));
        assert!(client.active);
        assert_eq!(client.base.properties["hat"], "tall");
    }

    #[test]
    fn rejects_private_field_changes() {
        let mut client = Client::new();
        let changes = match json!({"tokens": {"x": "y"}}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        assert!(client.apply_changes(&changes).is_err());
    }
}
