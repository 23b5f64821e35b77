//! # Commands
//!
//! The closed set of named actions a client can request. Commands execute
//! synchronously against the runtime; a command's result - when it has one -
//! goes back to the issuing client alone and is never broadcast.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::cache::CachedEntity;
use crate::error::WorldError;
use crate::manager::WorldManager;
use crate::model::ObjectTemplate;
use crate::types::Identity;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    /// Enter a world by name, leaving the current one. Returns the welcome
    /// package of the new world.
    Enter { world: String },

    /// Start the session: claim the display name, activate the client and
    /// build its scene.
    Session,

    /// Create objects owned by the issuing client. Returns their identities.
    Add { objects: Vec<ObjectTemplate> },

    /// Remove owned objects.
    Remove { objects: Vec<Identity> },

    /// Round-trip a payload, for connection/debug checks.
    Echo { payload: Value },
}

impl Command {
    pub async fn execute(
        &self,
        manager: &WorldManager,
        client: &CachedEntity,
    ) -> Result<Option<Value>, WorldError> {
        match self {
            Command::Enter { world } => {
                let welcome = manager.enter_by_name(client, world).await?;
                let value = serde_json::to_value(welcome).map_err(|error| {
                    WorldError::Internal(format!("welcome serialization failed: {error}"))
                })?;
                Ok(Some(value))
            }
            Command::Session => {
                manager.start_session(client).await?;
                Ok(None)
            }
            Command::Add { objects } => {
                let created = manager.add_all(client, objects.clone()).await?;
                Ok(Some(json!(created)))
            }
            Command::Remove { objects } => {
                for identity in objects {
                    manager.remove(client, *identity).await?;
                }
                Ok(None)
            }
            Command::Echo { payload } => Ok(Some(payload.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_from_wire_shapes() {
        let enter: Command = serde_json::from_str(r#"{"Enter": {"world": "plaza"}}"#).unwrap();
        assert!(matches!(enter, Command::Enter { world } if world == "plaza"));

        let session: Command = serde_json::from_str(r#""Session""#).unwrap();
        assert!(matches!(session, Command::Session));

        let add: Command = serde_json::from_str(
            r#"{"Add": {"objects": [{"position": {"x": 1.0, "y": 0.0, "z": 0.0}}]}}"#,
        )
        .unwrap();
        assert!(matches!(add, Command::Add { objects } if objects.len() == 1));

        let remove: Command =
            serde_json::from_str(r#"{"Remove": {"objects": [{"kind": "Object", "id": 4}]}}"#)
                .unwrap();
        assert!(matches!(remove, Command::Remove { objects } if objects == vec![Identity::object(4)]));
    }
}
