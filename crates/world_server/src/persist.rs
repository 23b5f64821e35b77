//! # Persistence Adaptors
//!
//! One adaptor per entity kind decides how that kind crosses the store
//! boundary: how it loads, how it saves, what happens right after a load and
//! how a dispatched event's effect is persisted. The registry mapping kinds
//! to adaptors is filled explicitly at startup - unknown kinds fall back to
//! the default adaptor, and nothing is discovered by scanning.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::CachedEntity;
use crate::events::VREvent;
use crate::model::Entity;
use crate::store::{ObjectStore, StoreError};
use crate::types::EntityKind;
use crate::writeback::WriteBack;

/// Per-kind persistence strategy.
///
/// Every method has a default that talks straight to the store, so an
/// adaptor only overrides the steps it specializes. `persist` routes an
/// event's effect through the issuing client's write-back when one is
/// active, bounding store write load for high-frequency changes.
#[async_trait]
pub trait PersistenceAdaptor: Send + Sync {
    async fn load(
        &self,
        store: &dyn ObjectStore,
        identity: crate::types::Identity,
    ) -> Result<Option<Entity>, StoreError> {
        store.load(identity).await
    }

    async fn save(&self, store: &dyn ObjectStore, entity: Entity) -> Result<Entity, StoreError> {
        store.save(entity).await
    }

    async fn delete(
        &self,
        store: &dyn ObjectStore,
        identity: crate::types::Identity,
    ) -> Result<(), StoreError> {
        store.delete(identity).await
    }

    /// Hook run on every entity freshly loaded from the store, before it
    /// becomes visible in the cache.
    async fn post_load(&self, _entity: &mut Entity) {}

    /// Persist the effect of a dispatched event. The source has already been
    /// mutated; this writes its current state.
    async fn persist(
        &self,
        store: &dyn ObjectStore,
        write_back: Option<&WriteBack>,
        _event: &VREvent,
        source: &CachedEntity,
    ) -> Result<(), StoreError> {
        let snapshot = source.read().await.detached();
        match write_back {
            Some(write_back) => write_back.write(snapshot).await,
            None => store.save(snapshot).await.map(|_| ()),
        }
    }
}

/// Plain store pass-through, used for every kind without a specialization.
#[derive(Debug, Default)]
pub struct DefaultPersistence;

#[async_trait]
impl PersistenceAdaptor for DefaultPersistence {}

/// Client specialization: a freshly loaded client is never connected, so all
/// runtime handles are cleared and it starts out inactive.
#[derive(Debug, Default)]
pub struct ClientPersistence;

#[async_trait]
impl PersistenceAdaptor for ClientPersistence {
    async fn post_load(&self, entity: &mut Entity) {
        if let Some(client) = entity.as_client_mut() {
            client.session = None;
            client.scene = None;
            client.write_back = None;
            client.scene_properties = None;
            client.active = false;
            client.base.clear_listeners();
        }
    }
}

/// Explicit entity-kind to adaptor mapping.
pub struct PersistorRegistry {
    adaptors: HashMap<EntityKind, Arc<dyn PersistenceAdaptor>>,
    fallback: Arc<dyn PersistenceAdaptor>,
}

impl PersistorRegistry {
    /// Empty registry; everything resolves to the default adaptor.
    pub fn new() -> Self {
        Self {
            adaptors: HashMap::new(),
            fallback: Arc::new(DefaultPersistence),
        }
    }

    /// The stock setup: clients get their specialization, everything else
    /// the default.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(EntityKind::Client, Arc::new(ClientPersistence));
        registry
    }

    pub fn register(&mut self, kind: EntityKind, adaptor: Arc<dyn PersistenceAdaptor>) {
        self.adaptors.insert(kind, adaptor);
    }

    pub fn adaptor(&self, kind: EntityKind) -> Arc<dyn PersistenceAdaptor> {
        self.adaptors
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    /// Kinds with a registered specialization.
    pub fn kinds(&self) -> Vec<EntityKind> {
        self.adaptors.keys().copied().collect()
    }
}

impl Default for PersistorRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
