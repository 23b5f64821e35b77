//! # World Server - Multi-User World Runtime
//!
//! The runtime core of a multi-user virtual world server: shared-state
//! management, client lifecycle, and synchronous event distribution. This
//! crate contains **no transport** - it exposes a session trait the network
//! layer implements and drives, and everything else happens in here.
//!
//! ## Design Philosophy
//!
//! One instance per object, one pipeline per change:
//!
//! * **Object cache** - every entity the runtime touches lives in the cache
//!   as exactly one shared instance; the store only ever sees detached copies
//! * **Worlds** - containers clients enter and exit, created on demand,
//!   collected when temporary and empty
//! * **Scenes** - each active client gets a bounded, range-limited view of
//!   its world, kept fresh as it moves
//! * **Events** - a change to a shared object is applied to the live
//!   instance, fanned out synchronously to everyone watching, then persisted
//! * **Commands** - named actions a client invokes; results go back to the
//!   issuer alone
//!
//! ## Architecture Overview
//!
//! ### Core Components
//!
//! * **[`WorldManager`]** - the orchestrator; owns the cache and registries
//!   and drives the client lifecycle
//! * **[`ObjectCache`]** - identity-keyed map of live entity instances
//! * **[`Scene`]** - per-client visibility window with add/remove deltas
//! * **[`Dispatcher`]** - applies events and fans them out to listener sets
//! * **[`WriteBack`]** - per-client buffer absorbing high-frequency saves
//! * **[`PersistorRegistry`]** / **[`AdmissionRegistry`]** - explicit hook
//!   points for per-kind persistence and per-world entry policy
//!
//! ### Message Flow
//!
//! 1. The transport parses an inbound frame into a [`ClientRequest`]
//! 2. [`WorldManager::dispatch`] runs it inside a transaction boundary
//! 3. Commands execute against the runtime; the result is sent to the issuer
//! 4. Events resolve their source through the issuer's scene, mutate the
//!    live instance and reach every attached listener before the call returns
//! 5. The changed state is persisted through the source kind's adaptor and
//!    the issuer's scene refreshes if it moved far enough
//!
//! ## Thread Safety
//!
//! All components are designed for safe concurrent access:
//!
//! * The cache is a lock-free map of `Arc<RwLock<Entity>>` handles
//! * Entity locks are held only for short, non-overlapping critical sections
//! * Session tracking and name claims use atomic map entries
//!
//! ## Error Handling
//!
//! Fallible operations return [`WorldError`]. Persistence failures during
//! event dispatch are deliberately logged rather than propagated - delivered
//! state must not be rolled back by a store hiccup. Listener delivery
//! failures never sever delivery to the remaining listeners.

// Re-export core types for easy access
pub use cache::{CachedEntity, ObjectCache};
pub use commands::Command;
pub use config::{
    CleanupPolicy, DispatchPolicy, SceneProperties, ServerConfig, WorldTemplate, WorldsConfig,
};
pub use dispatcher::Dispatcher;
pub use error::WorldError;
pub use events::{
    ClientRequest, CommandRequest, EventListener, RequestPayload, SceneAdd, SceneRemove, VREvent,
    Welcome,
};
pub use factory::{ClientFactory, DefaultClientFactory, CLIENT_ID_ATTRIBUTE};
pub use manager::{WorldManager, DEFAULT_WORLD_NAME};
pub use model::{
    AdmissionRegistry, Client, ClientKind, Entity, ObjectTemplate, OpenAdmission, Ownership,
    VRObject, World, WorldAdmission,
};
pub use persist::{ClientPersistence, DefaultPersistence, PersistenceAdaptor, PersistorRegistry};
pub use scene::{ClientListener, Scene};
pub use session::{ClientSession, SessionTracker, TrackedSession};
pub use store::{MemoryStore, ObjectStore, StoreError};
pub use streaming::{NoStreaming, StreamManager};
pub use types::{
    current_timestamp, EntityKind, Identity, Point, SessionId, View, UNASSIGNED_ID,
};
pub use writeback::{WriteBack, WriteBackStats};

// Public module declarations
pub mod cache;
pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod factory;
pub mod manager;
pub mod model;
pub mod persist;
pub mod scene;
pub mod session;
pub mod store;
pub mod streaming;
pub mod types;
pub mod writeback;

// Test support (fixtures shared by unit and lifecycle tests)
#[cfg(test)]
pub(crate) mod testing;

mod tests;
