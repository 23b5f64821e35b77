//! In-memory [`ObjectStore`] backend.
//!
//! Keeps detached entity copies in plain maps behind async locks. Ids are
//! assigned from one monotonic sequence shared by entities and ownerships.
//! Transactions are no-ops. Used by tests and the development binary;
//! nothing survives a restart.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use super::{ObjectStore, StoreError};
use crate::model::{Client, Entity, Ownership, World};
use crate::types::{EntityKind, Identity, Point, UNASSIGNED_ID};

#[derive(Debug, Default)]
pub struct MemoryStore {
    sequence: AtomicU64,
    entities: RwLock<HashMap<Identity, Entity>>,
    ownerships: RwLock<HashMap<u64, Ownership>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Number of stored entities, any kind.
    pub async fn entity_count(&self) -> usize {
        self.entities.read().await.len()
    }

    pub async fn ownership_count(&self) -> usize {
        self.ownerships.read().await.len()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn load(&self, identity: Identity) -> Result<Option<Entity>, StoreError> {
        Ok(self.entities.read().await.get(&identity).cloned())
    }

    async fn save(&self, mut entity: Entity) -> Result<Entity, StoreError> {
        if entity.id() == UNASSIGNED_ID {
            entity.set_id(self.next_id());
        }
        let stored = entity.detached();
        self.entities
            .write()
            .await
            .insert(stored.identity(), stored);
        Ok(entity)
    }

    async fn delete(&self, identity: Identity) -> Result<(), StoreError> {
        self.entities.write().await.remove(&identity);
        Ok(())
    }

    async fn get_world_by_name(&self, name: &str) -> Result<Option<World>, StoreError> {
        let entities = self.entities.read().await;
        Ok(entities.values().find_map(|entity| match entity {
            Entity::World(world) if world.name == name => Some(world.clone()),
            _ => None,
        }))
    }

    async fn get_client_by_name(&self, name: &str) -> Result<Option<Client>, StoreError> {
        let entities = self.entities.read().await;
        Ok(entities.values().find_map(|entity| match entity {
            Entity::Client(client) if client.name.as_deref() == Some(name) => {
                Some(client.clone())
            }
            _ => None,
        }))
    }

    async fn get_range(
        &self,
        world: u64,
        from: Point,
        to: Point,
    ) -> Result<Vec<Entity>, StoreError> {
        let entities = self.entities.read().await;
        let mut found = Vec::new();
        for entity in entities.values() {
            // Disconnected clients linger in the store but are not visible.
            if let Entity::Client(client) = entity {
                if !client.active {
                    continue;
                }
            }
            let Some(base) = entity.as_object() else {
                continue;
            };
            if base.world_id != Some(world) {
                continue;
            }
            if let Some(position) = &base.position {
                if position.within(&from, &to) {
                    found.push(entity.clone());
                }
            }
        }
        Ok(found)
    }

    async fn get_permanents(&self, world: u64) -> Result<Vec<Entity>, StoreError> {
        let entities = self.entities.read().await;
        Ok(entities
            .values()
            .filter(|entity| {
                entity
                    .as_object()
                    .map(|base| base.permanent && base.world_id == Some(world))
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn get_ownership(
        &self,
        owner: Identity,
        owned: Identity,
    ) -> Result<Option<Ownership>, StoreError> {
        let ownerships = self.ownerships.read().await;
        Ok(ownerships
            .values()
            .find(|o| o.owner == owner && o.owned == owned)
            .cloned())
    }

    async fn get_owned(&self, owner: Identity) -> Result<Vec<Ownership>, StoreError> {
        let ownerships = self.ownerships.read().await;
        Ok(ownerships
            .values()
            .filter(|o| o.owner == owner)
            .cloned()
            .collect())
    }

    async fn save_ownership(&self, mut ownership: Ownership) -> Result<Ownership, StoreError> {
        if ownership.id == UNASSIGNED_ID {
            ownership.id = self.next_id();
        }
        self.ownerships
            .write()
            .await
            .insert(ownership.id, ownership.clone());
        Ok(ownership)
    }

    async fn delete_ownership(&self, id: u64) -> Result<(), StoreError> {
        self.ownerships.write().await.remove(&id);
        Ok(())
    }

    async fn count_users(&self, world: u64) -> Result<usize, StoreError> {
        let entities = self.entities.read().await;
        Ok(entities
            .values()
            .filter(|entity| {
                matches!(entity, Entity::Client(client) if client.base.world_id == Some(world))
            })
            .count())
    }

    async fn delete_world(&self, world: u64) -> Result<(), StoreError> {
        self.entities
            .write()
            .await
            .remove(&Identity::new(EntityKind::World, world));
        Ok(())
    }
}
