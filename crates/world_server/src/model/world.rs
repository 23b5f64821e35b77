//! # Worlds and Admission
//!
//! A `World` is the container entities live in. Worlds exist in three
//! flavors: the default world (created on first demand, never collected),
//! on-demand worlds (created when a client enters an unknown name, flagged
//! temporary and collected when the last user leaves) and configured worlds
//! (ensured at startup from the worlds config, never temporary).
//!
//! Entry and exit policy is not baked into the world type. A world may carry
//! a `kind` tag that binds it to a [`WorldAdmission`] hook registered with
//! the runtime; untagged worlds admit everyone.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::client::Client;
use crate::error::WorldError;
use crate::types::{Identity, UNASSIGNED_ID};

/// Fields of a world that events may never overwrite.
const PROTECTED_PROPERTIES: &[&str] = &["id", "name", "kind", "default_world", "temporary"];

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct World {
    #[serde(default)]
    pub id: u64,

    /// Unique world name, the key clients enter by.
    pub name: String,

    /// True for the one world clients land in right after login.
    #[serde(default)]
    pub default_world: bool,

    /// Temporary worlds are deleted when their last user exits.
    #[serde(default)]
    pub temporary: bool,

    /// Admission hook tag; `None` means open admission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Extra properties, e.g. copied verbatim from the worlds config.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
}

impl World {
    pub fn new(name: &str) -> Self {
        Self {
            id: UNASSIGNED_ID,
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn identity(&self) -> Identity {
        Identity::world(self.id)
    }

    /// Worlds only accept property-bag changes; structural fields are fixed.
    pub fn apply_changes(&mut self, changes: &Map<String, Value>) -> Result<(), WorldError> {
        for (key, value) in changes {
            if PROTECTED_PROPERTIES.contains(&key.as_str()) {
                return Err(WorldError::InvalidArgument(format!(
                    "Property is read-only: {key}"
                )));
            }
            self.properties.insert(key.clone(), value.clone());
        }
        Ok(())
    }
}

/// Capability hook deciding and observing world entry and exit.
///
/// The default implementation admits everyone and ignores exits, so hooks
/// only implement what they care about.
#[async_trait]
pub trait WorldAdmission: Send + Sync {
    /// Decide whether the client may enter. Runs before any entry state is
    /// touched; returning false rejects the client and leaves it where it was.
    async fn enter(&self, _world: &World, _client: &Client) -> bool {
        true
    }

    /// Observe a client leaving the world.
    async fn exit(&self, _world: &World, _client: &Client) {}
}

/// The open-door admission used for untagged worlds.
#[derive(Debug, Default)]
pub struct OpenAdmission;

#[async_trait]
impl WorldAdmission for OpenAdmission {}

/// Maps world kind tags to their admission hooks.
///
/// Populated explicitly at startup; lookups for unknown tags fall back to
/// open admission.
pub struct AdmissionRegistry {
    hooks: HashMap<String, Arc<dyn WorldAdmission>>,
    fallback: Arc<dyn WorldAdmission>,
}

impl AdmissionRegistry {
    pub fn new() -> Self {
        Self {
            hooks: HashMap::new(),
            fallback: Arc::new(OpenAdmission),
        }
    }

    pub fn register(&mut self, kind: &str, hook: Arc<dyn WorldAdmission>) {
        self.hooks.insert(kind.to_string(), hook);
    }

    /// The hook responsible for the given world.
    pub fn resolve(&self, world: &World) -> Arc<dyn WorldAdmission> {
        world
            .kind
            .as_deref()
            .and_then(|kind| self.hooks.get(kind))
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    /// Registered kind tags.
    pub fn kinds(&self) -> Vec<String> {
        self.hooks.keys().cloned().collect()
    }
}

impl Default for AdmissionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ClosedDoor;

    #[async_trait]
    impl WorldAdmission for ClosedDoor {
        async fn enter(&self, _world: &World, _client: &Client) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn untagged_worlds_admit_everyone() {
        let registry = AdmissionRegistry::new();
        let world = World::new("open");
        let hook = registry.resolve(&world);
        assert!(hook.enter(&world, &Client::new()).await);
    }

    #[tokio::test]
    async fn tagged_worlds_use_their_hook() {
        let mut registry = AdmissionRegistry::new();
        registry.register("locked", Arc::new(ClosedDoor));

        let mut world = World::new("vault");
        world.kind = Some("locked".to_string());
        assert!(!registry.resolve(&world).enter(&world, &Client::new()).await);

        // Unknown tag falls back to open admission.
        world.kind = Some("unheard-of".to_string());
        assert!(registry.resolve(&world).enter(&world, &Client::new()).await);
    }

    #[test]
    fn structural_fields_are_read_only() {
        let mut world = World::new("stable");
        let changes = match serde_json::json!({"name": "renamed"}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        assert!(world.apply_changes(&changes).is_err());
        assert_eq!(world.name, "stable");
    }
}
