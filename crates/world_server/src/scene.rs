//! # Scene
//!
//! Each active client owns a `Scene`: the bounded, live view of what it can
//! currently see. A scene is fed by two queries - the permanent objects of
//! the client's world and everything positioned within visibility range -
//! both resolved through the object cache so every member is the canonical
//! live instance.
//!
//! Publishing an object into a scene means two things: the client's delivery
//! listener is attached to the object (so future events about it reach the
//! client) and an `add` frame with the object's snapshot goes out. Dropping
//! out of view reverses both. `update()` runs after every dispatched event
//! but re-queries only when the client moved far enough or the content aged
//! out.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{Duration, Instant};
use tracing::warn;

use crate::cache::CachedEntity;
use crate::config::SceneProperties;
use crate::error::WorldError;
use crate::events::{EventListener, SceneAdd, SceneRemove, VREvent};
use crate::manager::WorldManager;
use crate::session::ClientSession;
use crate::types::{Identity, View};

/// Delivery arm of one client: serializes events and pushes them down the
/// client's session.
#[derive(Debug)]
pub struct ClientListener {
    client: Identity,
    session: Arc<dyn ClientSession>,
}

impl ClientListener {
    pub fn new(client: Identity, session: Arc<dyn ClientSession>) -> Arc<Self> {
        Arc::new(Self { client, session })
    }
}

#[async_trait::async_trait]
impl EventListener for ClientListener {
    fn listener_id(&self) -> Identity {
        self.client
    }

    async fn on_event(&self, event: &VREvent) -> Result<(), String> {
        let payload = event.payload().map_err(|error| error.to_string())?;
        self.session.send_text(payload).await
    }
}

#[derive(Debug)]
struct SceneState {
    last_position: Option<crate::types::Point>,
    last_refresh: Option<Instant>,
}

#[derive(Debug)]
pub struct Scene {
    client: Identity,
    session: Arc<dyn ClientSession>,
    properties: SceneProperties,
    listener: Arc<dyn EventListener>,
    members: RwLock<HashMap<Identity, CachedEntity>>,
    state: Mutex<SceneState>,
}

impl Scene {
    pub fn new(
        client: Identity,
        session: Arc<dyn ClientSession>,
        properties: SceneProperties,
    ) -> Arc<Self> {
        let listener: Arc<dyn EventListener> = ClientListener::new(client, session.clone());
        Arc::new(Self {
            client,
            session,
            properties,
            listener,
            members: RwLock::new(HashMap::new()),
            state: Mutex::new(SceneState {
                last_position: None,
                last_refresh: None,
            }),
        })
    }

    pub fn client(&self) -> Identity {
        self.client
    }

    pub async fn member_count(&self) -> usize {
        self.members.read().await.len()
    }

    pub async fn member_ids(&self) -> Vec<Identity> {
        self.members.read().await.keys().copied().collect()
    }

    /// Look up a visible object. Only consults current membership.
    pub async fn get(&self, identity: &Identity) -> Option<CachedEntity> {
        self.members.read().await.get(identity).cloned()
    }

    /// Refresh membership if the client moved beyond the resolution
    /// threshold or the content aged past the timeout; otherwise a no-op.
    pub async fn update(&self, manager: &WorldManager) -> Result<(), WorldError> {
        let position = match manager.get(&self.client) {
            Some(handle) => handle.read().await.as_object().and_then(|base| base.position),
            None => None,
        };
        {
            let mut state = self.state.lock().await;
            let timed_out = match state.last_refresh {
                None => true,
                Some(at) => at.elapsed() >= Duration::from_millis(self.properties.timeout_ms),
            };
            let moved = match (state.last_position, position) {
                (Some(last), Some(current)) => {
                    last.distance(&current) >= self.properties.resolution
                }
                _ => true,
            };
            if !timed_out && !moved {
                return Ok(());
            }
            state.last_position = position;
            state.last_refresh = Some(Instant::now());
        }
        self.refresh(manager).await
    }

    /// Re-query both feeds and reconcile membership, publishing newcomers
    /// and unpublishing whatever fell out of view.
    pub async fn refresh(&self, manager: &WorldManager) -> Result<(), WorldError> {
        let mut desired: HashMap<Identity, CachedEntity> = HashMap::new();
        for handle in manager.get_permanents(&self.client).await? {
            if desired.len() >= self.properties.size {
                break;
            }
            let identity = handle.read().await.identity();
            if identity != self.client {
                desired.insert(identity, handle);
            }
        }
        for handle in manager.get_range_of(&self.client, self.properties.range).await? {
            if desired.len() >= self.properties.size {
                break;
            }
            let identity = handle.read().await.identity();
            if identity != self.client {
                desired.entry(identity).or_insert(handle);
            }
        }

        let mut added: Vec<(Identity, CachedEntity)> = Vec::new();
        let mut removed: Vec<CachedEntity> = Vec::new();
        {
            let mut members = self.members.write().await;
            for (identity, handle) in &desired {
                if !members.contains_key(identity) {
                    added.push((*identity, handle.clone()));
                }
            }
            members.retain(|identity, handle| {
                let keep = desired.contains_key(identity);
                if !keep {
                    removed.push(handle.clone());
                }
                keep
            });
            for (identity, handle) in &added {
                members.insert(*identity, handle.clone());
            }
        }

        let mut add_frames = Vec::with_capacity(added.len());
        for (_, handle) in &added {
            let mut entity = handle.write().await;
            if let Some(base) = entity.as_object_mut() {
                base.add_listener(self.client, self.listener.clone());
            }
            add_frames.push(entity.snapshot(View::Public));
        }
        let mut remove_frames = Vec::with_capacity(removed.len());
        for handle in &removed {
            let mut entity = handle.write().await;
            if let Some(base) = entity.as_object_mut() {
                base.remove_listener(&self.client);
            }
            remove_frames.push(entity.identity());
        }

        if !add_frames.is_empty() {
            self.push(&SceneAdd { add: add_frames }).await;
        }
        if !remove_frames.is_empty() {
            self.push(&SceneRemove {
                remove: remove_frames,
            })
            .await;
        }
        Ok(())
    }

    /// Silently drop one object from view, detaching the client's listener.
    /// Used during cleanup, so no frame goes out.
    pub async fn unpublish(&self, handle: &CachedEntity) {
        let identity = {
            let mut entity = handle.write().await;
            if let Some(base) = entity.as_object_mut() {
                base.remove_listener(&self.client);
            }
            entity.identity()
        };
        self.members.write().await.remove(&identity);
    }

    /// Detach the client's listener from every member.
    pub async fn unpublish_all(&self) {
        let members: Vec<CachedEntity> = self.members.read().await.values().cloned().collect();
        for handle in members {
            let mut entity = handle.write().await;
            if let Some(base) = entity.as_object_mut() {
                base.remove_listener(&self.client);
            }
        }
    }

    pub async fn remove_all(&self) {
        self.members.write().await.clear();
    }

    async fn push<T: Serialize>(&self, frame: &T) {
        match serde_json::to_string(frame) {
            Ok(text) => {
                if let Err(error) = self.session.send_text(text).await {
                    warn!(client = %self.client, error = %error, "scene push failed");
                }
            }
            Err(error) => {
                warn!(client = %self.client, error = %error, "scene frame serialization failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Entity, VRObject};
    use crate::testing::TestSession;
    use serde_json::json;

    #[tokio::test]
    async fn listener_delivers_event_payload() {
        let session = TestSession::new();
        let listener = ClientListener::new(Identity::client(1), session.clone());

        let mut changes = serde_json::Map::new();
        changes.insert("color".to_string(), json!("green"));
        let event = VREvent::new(Identity::object(4), changes);
        listener.on_event(&event).await.unwrap();

        let frames = session.frames().await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["source"]["id"], 4);
        assert_eq!(frames[0]["changes"]["color"], "green");
    }

    #[tokio::test]
    async fn unpublish_detaches_listener_and_membership() {
        let session = TestSession::new();
        let scene = Scene::new(
            Identity::client(1),
            session.clone(),
            SceneProperties::default(),
        );

        let mut obj = VRObject::new();
        obj.id = 7;
        let handle: CachedEntity = Arc::new(RwLock::new(Entity::Object(obj)));
        {
            let mut entity = handle.write().await;
            let base = entity.as_object_mut().unwrap();
            base.add_listener(Identity::client(1), ClientListener::new(Identity::client(1), session));
        }
        scene
            .members
            .write()
            .await
            .insert(Identity::object(7), handle.clone());

        scene.unpublish(&handle).await;

        assert_eq!(scene.member_count().await, 0);
        assert!(handle.read().await.listener_handles().is_empty());
    }
}
