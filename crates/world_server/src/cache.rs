//! # Object Cache
//!
//! The single source of truth for live entities. Every entity the runtime
//! works with lives here exactly once; everything else - scenes, events,
//! ownership cleanup - holds clones of the same `Arc`, so a change made
//! through one handle is immediately visible through all others.
//!
//! Lookups are pure in-memory operations. Loading from the store on a miss is
//! the manager's job, not the cache's.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::model::Entity;
use crate::types::Identity;

/// A live entity shared between every part of the runtime that sees it.
pub type CachedEntity = Arc<RwLock<Entity>>;

#[derive(Debug, Default)]
pub struct ObjectCache {
    entries: DashMap<Identity, CachedEntity>,
}

impl ObjectCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Look up a live entity. Never touches the store.
    pub fn get(&self, identity: &Identity) -> Option<CachedEntity> {
        self.entries.get(identity).map(|entry| entry.value().clone())
    }

    /// Insert an entity, keeping any instance already cached under the same
    /// identity. Returns the canonical handle either way, so concurrent
    /// inserts of the same identity converge on one instance.
    pub fn put(&self, entity: Entity) -> CachedEntity {
        let identity = entity.identity();
        debug_assert!(identity.is_assigned(), "caching unassigned entity");
        self.entries
            .entry(identity)
            .or_insert_with(|| Arc::new(RwLock::new(entity)))
            .clone()
    }

    /// Drop an entity from the cache. Existing handles stay usable but the
    /// instance is no longer canonical.
    pub fn evict(&self, identity: &Identity) -> Option<CachedEntity> {
        self.entries.remove(identity).map(|(_, handle)| handle)
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.entries.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of all live handles.
    pub fn handles(&self) -> Vec<CachedEntity> {
        self.entries.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Filter live entities by predicate.
    pub async fn find<F>(&self, filter: F) -> Vec<CachedEntity>
    where
        F: Fn(&Entity) -> bool,
    {
        let mut found = Vec::new();
        for handle in self.handles() {
            if filter(&*handle.read().await) {
                found.push(handle.clone());
            }
        }
        found
    }
}
