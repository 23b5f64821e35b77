//! # Events and Client Messages
//!
//! Wire-facing message shapes and the event delivery contract.
//!
//! A connected client talks to the runtime in exactly two ways, captured by
//! [`RequestPayload`]: it issues a [`Command`](crate::commands::Command)
//! (a named action executed for the issuer alone) or it broadcasts a
//! [`VREvent`] (a change set applied to a shared object and fanned out to
//! everyone watching it). There is no third path.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

use crate::cache::CachedEntity;
use crate::commands::Command;
use crate::model::Ownership;
use crate::types::{current_timestamp, Identity};

/// A broadcast change of one shared object.
///
/// On the wire an event is just `source` + `changes`. The remaining fields
/// are dispatch context the runtime attaches while the event moves through
/// the pipeline: the issuing client, the ownership relation between issuer
/// and source (if any) and the resolved live source instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VREvent {
    pub source: Identity,

    #[serde(default)]
    pub changes: Map<String, Value>,

    #[serde(default = "current_timestamp")]
    pub timestamp: u64,

    #[serde(skip)]
    pub client: Option<Identity>,

    #[serde(skip)]
    pub ownership: Option<Ownership>,

    #[serde(skip)]
    pub resolved: Option<CachedEntity>,
}

impl VREvent {
    pub fn new(source: Identity, changes: Map<String, Value>) -> Self {
        Self {
            source,
            changes,
            timestamp: current_timestamp(),
            client: None,
            ownership: None,
            resolved: None,
        }
    }

    /// The event every listener of a client receives when it goes inactive.
    pub fn deactivation(client: Identity) -> Self {
        let mut changes = Map::new();
        changes.insert("active".to_string(), json!(false));
        Self::new(client, changes)
    }

    pub fn source_is(&self, identity: &Identity) -> bool {
        self.source == *identity
    }

    /// Wire form of this event, as delivered to listeners.
    pub fn payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Receiver of broadcast events, attached to an object's listener set.
#[async_trait]
pub trait EventListener: Send + Sync + fmt::Debug {
    /// Identity the listener acts for, used to key the listener set.
    fn listener_id(&self) -> Identity;

    async fn on_event(&self, event: &VREvent) -> Result<(), String>;
}

/// One inbound message from a client, with the issuing client attached by
/// the transport after parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRequest {
    #[serde(skip)]
    pub client: Option<Identity>,

    #[serde(flatten)]
    pub payload: RequestPayload,
}

impl ClientRequest {
    pub fn command(client: Identity, command: Command) -> Self {
        Self {
            client: Some(client),
            payload: RequestPayload::Command(CommandRequest { command }),
        }
    }

    pub fn event(client: Identity, event: VREvent) -> Self {
        Self {
            client: Some(client),
            payload: RequestPayload::Event(event),
        }
    }
}

/// The two request shapes, told apart by their fields: commands carry a
/// `command` key, events carry a `source` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestPayload {
    Command(CommandRequest),
    Event(VREvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: Command,
}

/// First message a client receives after entering a world: its own state
/// (owner view) plus every permanent object of the world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Welcome {
    pub client: Value,
    pub permanents: Vec<Value>,
}

/// Scene frame announcing objects that became visible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneAdd {
    pub add: Vec<Value>,
}

/// Scene frame announcing objects that dropped out of view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneRemove {
    pub remove: Vec<Identity>,
}
