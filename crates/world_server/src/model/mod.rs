//! # Entity Model
//!
//! The persisted data model: base objects, clients, worlds and the ownership
//! relation, plus the [`Entity`] tagged union the cache and store traffic in.

pub mod client;
pub mod object;
pub mod ownership;
pub mod world;

pub use client::{Client, ClientKind};
pub use object::{ObjectTemplate, VRObject};
pub use ownership::Ownership;
pub use world::{AdmissionRegistry, OpenAdmission, World, WorldAdmission};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::WorldError;
use crate::events::EventListener;
use crate::types::{EntityKind, Identity, View};

/// Tagged union over every entity kind the runtime manages.
///
/// All code switching on entity kind matches this enum exhaustively; there is
/// no downcasting and no reflection anywhere in the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Entity {
    Object(VRObject),
    Client(Client),
    World(World),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Object(_) => EntityKind::Object,
            Entity::Client(_) => EntityKind::Client,
            Entity::World(_) => EntityKind::World,
        }
    }

    pub fn id(&self) -> u64 {
        match self {
            Entity::Object(o) => o.id,
            Entity::Client(c) => c.base.id,
            Entity::World(w) => w.id,
        }
    }

    pub fn set_id(&mut self, id: u64) {
        match self {
            Entity::Object(o) => o.id = id,
            Entity::Client(c) => c.base.id = id,
            Entity::World(w) => w.id = id,
        }
    }

    pub fn identity(&self) -> Identity {
        Identity::new(self.kind(), self.id())
    }

    /// The base object view, shared by objects and clients. Worlds have none.
    pub fn as_object(&self) -> Option<&VRObject> {
        match self {
            Entity::Object(o) => Some(o),
            Entity::Client(c) => Some(&c.base),
            Entity::World(_) => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut VRObject> {
        match self {
            Entity::Object(o) => Some(o),
            Entity::Client(c) => Some(&mut c.base),
            Entity::World(_) => None,
        }
    }

    pub fn as_client(&self) -> Option<&Client> {
        match self {
            Entity::Client(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_client_mut(&mut self) -> Option<&mut Client> {
        match self {
            Entity::Client(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_world(&self) -> Option<&World> {
        match self {
            Entity::World(w) => Some(w),
            _ => None,
        }
    }

    pub fn as_world_mut(&mut self) -> Option<&mut World> {
        match self {
            Entity::World(w) => Some(w),
            _ => None,
        }
    }

    pub fn into_client(self) -> Option<Client> {
        match self {
            Entity::Client(c) => Some(c),
            _ => None,
        }
    }

    /// Listener handles currently attached to this entity. Worlds carry none.
    pub fn listener_handles(&self) -> Vec<Arc<dyn EventListener>> {
        match self.as_object() {
            Some(obj) => obj.listener_handles(),
            None => Vec::new(),
        }
    }

    /// Apply an event's change set, dispatching to the kind-specific rules.
    pub fn apply_changes(&mut self, changes: &Map<String, Value>) -> Result<(), WorldError> {
        match self {
            Entity::Object(o) => o.apply_changes(changes),
            Entity::Client(c) => c.apply_changes(changes),
            Entity::World(w) => w.apply_changes(changes),
        }
    }

    /// A copy safe to hand to the store: all runtime-only state stripped.
    pub fn detached(&self) -> Entity {
        let mut copy = self.clone();
        match &mut copy {
            Entity::Object(o) => o.clear_listeners(),
            Entity::Client(c) => {
                c.base.clear_listeners();
                c.session = None;
                c.scene = None;
                c.write_back = None;
                c.scene_properties = None;
            }
            Entity::World(_) => {}
        }
        copy
    }

    /// Serialize this entity for delivery to a client.
    pub fn snapshot(&self, view: View) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if view == View::Owner {
            if let Entity::Client(client) = self {
                client.extend_owner_view(&mut value);
            }
        }
        value
    }
}
