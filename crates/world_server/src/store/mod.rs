//! # Object Store
//!
//! The persistence boundary of the runtime. Everything durable goes through
//! [`ObjectStore`]; the runtime never assumes anything about what is behind
//! it beyond this contract. A bundled in-memory backend ([`MemoryStore`])
//! serves development and tests.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use std::fmt;

use crate::model::{Client, Entity, Ownership, World};
use crate::types::{Identity, Point};

/// Failures at the persistence boundary.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("entity not found: {0}")]
    NotFound(Identity),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Contract every persistence backend fulfills.
///
/// Entities cross this boundary as detached values - the store never sees a
/// live cached instance. `save` assigns an id on first persist and returns
/// the entity with its id set.
///
/// The transaction hooks delimit the runtime's transactional operations
/// (login, server login, logout, dispatch); backends without transaction
/// support keep the default no-ops.
#[async_trait]
pub trait ObjectStore: Send + Sync + fmt::Debug {
    async fn load(&self, identity: Identity) -> Result<Option<Entity>, StoreError>;

    async fn save(&self, entity: Entity) -> Result<Entity, StoreError>;

    async fn delete(&self, identity: Identity) -> Result<(), StoreError>;

    async fn get_world_by_name(&self, name: &str) -> Result<Option<World>, StoreError>;

    async fn get_client_by_name(&self, name: &str) -> Result<Option<Client>, StoreError>;

    /// Objects and active clients of a world positioned inside the box.
    async fn get_range(
        &self,
        world: u64,
        from: Point,
        to: Point,
    ) -> Result<Vec<Entity>, StoreError>;

    /// Permanent members of a world, visible regardless of range.
    async fn get_permanents(&self, world: u64) -> Result<Vec<Entity>, StoreError>;

    async fn get_ownership(
        &self,
        owner: Identity,
        owned: Identity,
    ) -> Result<Option<Ownership>, StoreError>;

    /// All ownership relations held by one owner.
    async fn get_owned(&self, owner: Identity) -> Result<Vec<Ownership>, StoreError>;

    async fn save_ownership(&self, ownership: Ownership) -> Result<Ownership, StoreError>;

    async fn delete_ownership(&self, id: u64) -> Result<(), StoreError>;

    /// Number of clients currently bound to a world.
    async fn count_users(&self, world: u64) -> Result<usize, StoreError>;

    async fn delete_world(&self, world: u64) -> Result<(), StoreError>;

    async fn begin(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn commit(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn rollback(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
