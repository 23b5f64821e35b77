//! # World Manager
//!
//! The orchestrator of the whole runtime. One `WorldManager` owns the object
//! cache, the persistor and admission registries, the session tracker and
//! the dispatcher, and drives every client through its lifecycle:
//!
//! ```text
//! login -> enter world -> start session -> events/commands -> exit -> logout
//! ```
//!
//! ## Lifecycle
//!
//! - **Login** maps the connection to a client (authenticated principal,
//!   guest, or factory fallback), attaches the runtime handles (session,
//!   write-back, scene parameters), records the client id on the session and
//!   drops the client into the default world.
//! - **Enter** switches worlds: admission is asked first, then the current
//!   world is exited, streaming joined, the binding persisted and the welcome
//!   package returned. A session must be (re)started after every entry.
//! - **Start session** claims the display name, activates the client and
//!   builds its scene.
//! - **Exit** unwinds in the opposite order: deactivate and notify, clean up
//!   owned temporaries, tear down the scene, leave streaming, unbind, run the
//!   world's exit hook and collect the world itself if it was temporary and
//!   is now empty.
//! - **Logout** untracks the session, exits, deletes guests entirely and
//!   flushes the write-back buffer.
//!
//! ## Dispatch
//!
//! Inbound requests are either commands (executed for the issuer, result
//! returned to the issuer alone) or broadcast events (source resolved
//! through the issuer's scene, mutated live, fanned out synchronously,
//! persisted through the source kind's adaptor, scene refreshed).
//! Persistence failures during dispatch are logged and swallowed - state
//! was already delivered, and dropping it over a store hiccup would desync
//! every viewer.
//!
//! Login, server login, logout and dispatch run inside store transaction
//! boundaries.

use serde_json::json;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use crate::cache::{CachedEntity, ObjectCache};
use crate::config::{ServerConfig, WorldsConfig};
use crate::dispatcher::Dispatcher;
use crate::error::WorldError;
use crate::events::{ClientRequest, CommandRequest, RequestPayload, VREvent, Welcome};
use crate::factory::ClientFactory;
use crate::model::{
    AdmissionRegistry, Client, ClientKind, Entity, ObjectTemplate, Ownership, VRObject, World,
    WorldAdmission,
};
use crate::persist::{PersistenceAdaptor, PersistorRegistry};
use crate::scene::Scene;
use crate::session::{ClientSession, SessionTracker};
use crate::store::ObjectStore;
use crate::streaming::StreamManager;
use crate::types::{EntityKind, Identity, Point, View};
use crate::writeback::{WriteBack, WriteBackStats};

/// Name of the world clients land in right after login.
pub const DEFAULT_WORLD_NAME: &str = "default";

pub struct WorldManager {
    config: ServerConfig,
    store: Arc<dyn ObjectStore>,
    cache: ObjectCache,
    persistors: PersistorRegistry,
    admissions: AdmissionRegistry,
    dispatcher: Dispatcher,
    tracker: SessionTracker,
    streams: Arc<dyn StreamManager>,
    factory: Arc<dyn ClientFactory>,
    default_world: OnceCell<Identity>,
}

impl WorldManager {
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn ObjectStore>,
        factory: Arc<dyn ClientFactory>,
        streams: Arc<dyn StreamManager>,
    ) -> Self {
        let tracker = SessionTracker::new(&config);
        Self {
            config,
            store,
            cache: ObjectCache::new(),
            persistors: PersistorRegistry::standard(),
            admissions: AdmissionRegistry::new(),
            dispatcher: Dispatcher::new(),
            tracker,
            streams,
            factory,
            default_world: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Override the persistence adaptor of one entity kind. Call before the
    /// manager is shared.
    pub fn register_persistor(&mut self, kind: EntityKind, adaptor: Arc<dyn PersistenceAdaptor>) {
        self.persistors.register(kind, adaptor);
    }

    /// Bind an admission hook to a world kind tag. Call before the manager
    /// is shared.
    pub fn register_admission(&mut self, kind: &str, hook: Arc<dyn WorldAdmission>) {
        self.admissions.register(kind, hook);
    }

    pub fn session_count(&self) -> usize {
        self.tracker.count()
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    // ========================================================================
    // Cache access
    // ========================================================================

    /// Live entity lookup; never touches the store.
    pub fn get(&self, identity: &Identity) -> Option<CachedEntity> {
        self.cache.get(identity)
    }

    /// Filter live entities by predicate.
    pub async fn find<F>(&self, filter: F) -> Vec<CachedEntity>
    where
        F: Fn(&Entity) -> bool,
    {
        self.cache.find(filter).await
    }

    /// Turn a detached store copy into the canonical live instance.
    ///
    /// If the identity is already cached the cached instance wins and the
    /// copy is discarded. Otherwise a fresh copy is loaded through the
    /// kind's adaptor (falling back to the given one), post-load runs, and
    /// the result becomes canonical.
    pub async fn resolve(&self, detached: Entity) -> Result<CachedEntity, WorldError> {
        let identity = detached.identity();
        if let Some(cached) = self.cache.get(&identity) {
            return Ok(cached);
        }
        let adaptor = self.persistors.adaptor(identity.kind);
        let mut fresh = match adaptor.load(self.store.as_ref(), identity).await? {
            Some(entity) => entity,
            None => detached,
        };
        adaptor.post_load(&mut fresh).await;
        Ok(self.cache.put(fresh))
    }

    /// Cache-or-store lookup by identity.
    pub async fn lookup(&self, identity: Identity) -> Result<Option<CachedEntity>, WorldError> {
        if let Some(cached) = self.cache.get(&identity) {
            return Ok(Some(cached));
        }
        let adaptor = self.persistors.adaptor(identity.kind);
        match adaptor.load(self.store.as_ref(), identity).await? {
            Some(mut entity) => {
                adaptor.post_load(&mut entity).await;
                Ok(Some(self.cache.put(entity)))
            }
            None => Ok(None),
        }
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Persist the current state of a live entity through its adaptor.
    /// The cached instance stays canonical; only a detached snapshot
    /// crosses the store boundary.
    pub async fn save(&self, handle: &CachedEntity) -> Result<(), WorldError> {
        let snapshot = handle.read().await.detached();
        let kind = snapshot.kind();
        self.persistors
            .adaptor(kind)
            .save(self.store.as_ref(), snapshot)
            .await?;
        Ok(())
    }

    /// Persist a brand-new entity, then make it live.
    async fn save_new(&self, mut entity: Entity) -> Result<CachedEntity, WorldError> {
        let kind = entity.kind();
        let saved = self
            .persistors
            .adaptor(kind)
            .save(self.store.as_ref(), entity.detached())
            .await?;
        entity.set_id(saved.id());
        Ok(self.cache.put(entity))
    }

    async fn delete_entity(
        &self,
        write_back: &Option<Arc<WriteBack>>,
        identity: Identity,
    ) -> Result<(), WorldError> {
        match write_back {
            Some(write_back) => write_back.delete(identity).await?,
            None => {
                self.persistors
                    .adaptor(identity.kind)
                    .delete(self.store.as_ref(), identity)
                    .await?;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Worlds
    // ========================================================================

    /// Find a world by name. Absence is a plain `None`, not an error.
    pub async fn get_world(&self, name: &str) -> Result<Option<CachedEntity>, WorldError> {
        match self.store.get_world_by_name(name).await? {
            Some(world) => Ok(Some(self.resolve(Entity::World(world)).await?)),
            None => Ok(None),
        }
    }

    /// Find a world, creating it on demand when configuration allows.
    /// On-demand worlds are temporary: they disappear with their last user.
    pub async fn get_or_create_world(&self, name: &str) -> Result<CachedEntity, WorldError> {
        if let Some(found) = self.get_world(name).await? {
            return Ok(found);
        }
        if !self.config.create_worlds {
            return Err(WorldError::InvalidArgument(format!("Unknown world: {name}")));
        }
        let mut world = World::new(name);
        world.temporary = true;
        let handle = self.save_new(Entity::World(world)).await?;
        info!(world = %name, "🌍 Created world on demand");
        Ok(handle)
    }

    /// The world clients land in after login. Created on first demand,
    /// exactly once, and never collected.
    pub async fn default_world(&self) -> Result<CachedEntity, WorldError> {
        let identity = self
            .default_world
            .get_or_try_init(|| async {
                if let Some(found) = self.get_world(DEFAULT_WORLD_NAME).await? {
                    let identity = found.read().await.identity();
                    return Ok::<Identity, WorldError>(identity);
                }
                let mut world = World::new(DEFAULT_WORLD_NAME);
                world.default_world = true;
                let handle = self.save_new(Entity::World(world)).await?;
                let identity = handle.read().await.identity();
                info!(world = DEFAULT_WORLD_NAME, "🌍 Created default world");
                Ok(identity)
            })
            .await?;
        match self.cache.get(identity) {
            Some(handle) => Ok(handle),
            None => self
                .get_world(DEFAULT_WORLD_NAME)
                .await?
                .ok_or_else(|| WorldError::Internal("default world disappeared".to_string())),
        }
    }

    /// Ensure the default world plus every configured world exists, copying
    /// configured properties onto them verbatim. Configured worlds are never
    /// temporary.
    pub async fn create_worlds(&self, worlds: &WorldsConfig) -> Result<(), WorldError> {
        self.default_world().await?;
        for (name, template) in worlds {
            let handle = match self.get_world(name).await? {
                Some(handle) => handle,
                None => self.save_new(Entity::World(World::new(name))).await?,
            };
            {
                let mut entity = handle.write().await;
                if let Some(world) = entity.as_world_mut() {
                    world.kind = template.kind.clone();
                    world.temporary = false;
                    for (key, value) in &template.properties {
                        world.properties.insert(key.clone(), value.clone());
                    }
                }
            }
            self.save(&handle).await?;
            info!(world = %name, "🌍 Configured world ready");
        }
        Ok(())
    }

    async fn delete_world(&self, identity: Identity, name: &str) -> Result<(), WorldError> {
        self.cache.evict(&identity);
        self.store.delete_world(identity.id).await?;
        info!(world = %name, "🗑️ Deleted temporary world");
        Ok(())
    }

    // ========================================================================
    // Client lookups
    // ========================================================================

    pub async fn get_client(&self, id: u64) -> Result<Option<CachedEntity>, WorldError> {
        self.lookup(Identity::client(id)).await
    }

    pub async fn get_client_by_name(
        &self,
        name: &str,
    ) -> Result<Option<CachedEntity>, WorldError> {
        match self.store.get_client_by_name(name).await? {
            Some(client) => Ok(Some(self.resolve(Entity::Client(client)).await?)),
            None => Ok(None),
        }
    }

    // ========================================================================
    // Scene feeds
    // ========================================================================

    /// Permanent members of the client's world, resolved to live instances.
    pub async fn get_permanents(&self, client: &Identity) -> Result<Vec<CachedEntity>, WorldError> {
        let Some(world) = self.client_world(client).await else {
            return Ok(Vec::new());
        };
        let detached = self.store.get_permanents(world).await?;
        self.resolve_all(detached).await
    }

    /// Everything positioned inside the box in the client's world, resolved
    /// to live instances.
    pub async fn get_range(
        &self,
        client: &Identity,
        from: Point,
        to: Point,
    ) -> Result<Vec<CachedEntity>, WorldError> {
        let Some(world) = self.client_world(client).await else {
            return Ok(Vec::new());
        };
        let detached = self.store.get_range(world, from, to).await?;
        self.resolve_all(detached).await
    }

    /// Range query centered on the client's current position.
    pub(crate) async fn get_range_of(
        &self,
        client: &Identity,
        range: f64,
    ) -> Result<Vec<CachedEntity>, WorldError> {
        let position = match self.get(client) {
            Some(handle) => handle
                .read()
                .await
                .as_object()
                .and_then(|base| base.position)
                .unwrap_or_default(),
            None => Point::default(),
        };
        self.get_range(client, position.offset(-range), position.offset(range))
            .await
    }

    async fn client_world(&self, client: &Identity) -> Option<u64> {
        match self.get(client) {
            Some(handle) => handle.read().await.as_object().and_then(|base| base.world_id),
            None => None,
        }
    }

    async fn resolve_all(&self, entities: Vec<Entity>) -> Result<Vec<CachedEntity>, WorldError> {
        let mut resolved = Vec::with_capacity(entities.len());
        for entity in entities {
            resolved.push(self.resolve(entity).await?);
        }
        Ok(resolved)
    }

    // ========================================================================
    // Object creation and removal
    // ========================================================================

    /// Create one object owned by the client.
    ///
    /// Position defaults to the owner's, the object is bound to the owner's
    /// world, and guest-created objects default to temporary unless the
    /// template decided explicitly.
    pub async fn add(
        &self,
        client: &CachedEntity,
        template: ObjectTemplate,
    ) -> Result<Identity, WorldError> {
        let (owner, owner_position, owner_world, guest) = {
            let entity = client.read().await;
            let c = entity
                .as_client()
                .ok_or_else(|| WorldError::InvalidArgument("Not a client handle".to_string()))?;
            (c.identity(), c.base.position, c.base.world_id, c.guest)
        };

        let mut object = VRObject::from_template(template);
        if object.position.is_none() {
            object.position = owner_position;
        }
        object.world_id = owner_world;
        if object.temporary.is_none() && guest {
            object.temporary = Some(true);
        }

        let handle = self.save_new(Entity::Object(object)).await?;
        let owned = handle.read().await.identity();
        self.store
            .save_ownership(Ownership::new(owner, owned))
            .await?;
        debug!(owner = %owner, object = %owned, "Added object");
        Ok(owned)
    }

    /// Batch create; persists the owning client afterwards.
    pub async fn add_all(
        &self,
        client: &CachedEntity,
        templates: Vec<ObjectTemplate>,
    ) -> Result<Vec<Identity>, WorldError> {
        let mut created = Vec::with_capacity(templates.len());
        for template in templates {
            created.push(self.add(client, template).await?);
        }
        self.save(client).await?;
        Ok(created)
    }

    /// Remove an owned object. Refused unless the client owns it.
    pub async fn remove(&self, client: &CachedEntity, object: Identity) -> Result<(), WorldError> {
        let (owner, write_back) = {
            let entity = client.read().await;
            let c = entity
                .as_client()
                .ok_or_else(|| WorldError::InvalidArgument("Not a client handle".to_string()))?;
            (c.identity(), c.write_back.clone())
        };
        let ownership = self
            .store
            .get_ownership(owner, object)
            .await?
            .ok_or_else(|| {
                WorldError::PermissionDenied(format!("{owner} does not own {object}"))
            })?;

        self.store.delete_ownership(ownership.id).await?;
        self.save(client).await?;
        self.cache.evict(&object);
        self.delete_entity(&write_back, object).await?;
        debug!(owner = %owner, object = %object, "Removed object");
        Ok(())
    }

    // ========================================================================
    // Login
    // ========================================================================

    /// Log a user connection in: map it to a client, attach the runtime and
    /// enter the default world. Transactional.
    pub async fn login(&self, session: Arc<dyn ClientSession>) -> Result<Welcome, WorldError> {
        self.store.begin().await?;
        match self.login_with_kind(session, ClientKind::User).await {
            Ok(welcome) => {
                self.store.commit().await?;
                Ok(welcome)
            }
            Err(error) => {
                self.rollback().await;
                Err(error)
            }
        }
    }

    /// Like [`login`](Self::login), for a federating remote server.
    pub async fn server_login(
        &self,
        session: Arc<dyn ClientSession>,
    ) -> Result<Welcome, WorldError> {
        self.store.begin().await?;
        match self
            .login_with_kind(session, ClientKind::RemoteServer)
            .await
        {
            Ok(welcome) => {
                self.store.commit().await?;
                Ok(welcome)
            }
            Err(error) => {
                self.rollback().await;
                Err(error)
            }
        }
    }

    async fn login_with_kind(
        &self,
        session: Arc<dyn ClientSession>,
        kind: ClientKind,
    ) -> Result<Welcome, WorldError> {
        let principal = session.principal_name();
        info!(
            session = %session.session_id(),
            kind = ?kind,
            principal = ?principal,
            "🔗 Client connecting"
        );

        let client = match principal {
            Some(principal) => self
                .factory
                .find_client(kind, &principal, self.store.as_ref(), session.as_ref())
                .await?
                .ok_or_else(|| {
                    WorldError::Unauthorized(format!("Unknown client: {principal}"))
                })?,
            None if self.config.guest_allowed => {
                let mut guest = self
                    .factory
                    .create_guest_client(kind, session.as_ref())
                    .await?
                    .ok_or_else(|| {
                        WorldError::Unauthorized("Guest access rejected".to_string())
                    })?;
                guest.guest = true;
                guest.base.position = Some(Point::default());
                let saved = self
                    .persistors
                    .adaptor(EntityKind::Client)
                    .save(self.store.as_ref(), Entity::Client(guest))
                    .await?;
                saved.into_client().ok_or_else(|| {
                    WorldError::Internal("store returned a non-client".to_string())
                })?
            }
            None => self
                .factory
                .handle_unknown_client(kind, session.as_ref())
                .await?
                .ok_or_else(|| WorldError::Unauthorized("Unauthorized client".to_string()))?,
        };

        let handle = self.login_client(client, session.clone()).await?;
        let id = handle.read().await.id();
        session.set_attribute(self.factory.client_id_attribute(), json!(id));

        let default_world = self.default_world().await?;
        self.enter(&handle, &default_world).await
    }

    /// Second login stage: make an identified client live and attach its
    /// runtime handles. Idempotent for an already-live client - the cached
    /// instance stays canonical and only the handles are refreshed.
    pub async fn login_client(
        &self,
        client: Client,
        session: Arc<dyn ClientSession>,
    ) -> Result<CachedEntity, WorldError> {
        let identity = client.identity();
        if !identity.is_assigned() {
            return Err(WorldError::InvalidArgument(
                "Client has not been persisted".to_string(),
            ));
        }
        let handle = self.cache.put(Entity::Client(client));
        {
            let mut entity = handle.write().await;
            let c = entity
                .as_client_mut()
                .ok_or_else(|| WorldError::Internal(format!("{identity} is not a client")))?;
            c.session = Some(session);
            c.write_back = Some(Arc::new(WriteBack::new(
                self.store.clone(),
                self.config.write_back_active,
                Duration::from_millis(self.config.write_back_delay_ms),
            )));
            c.scene_properties = Some(self.config.scene);
        }
        debug!(client = %identity, "Client logged in");
        Ok(handle)
    }

    // ========================================================================
    // World entry and sessions
    // ========================================================================

    pub async fn enter_by_name(
        &self,
        client: &CachedEntity,
        name: &str,
    ) -> Result<Welcome, WorldError> {
        let world = self.get_or_create_world(name).await?;
        self.enter(client, &world).await
    }

    /// Move the client into a world.
    ///
    /// Re-entering the current world is rejected. Admission is asked before
    /// anything mutates, so a refusal leaves the client exactly where it
    /// was - including still inside its old world.
    pub async fn enter(
        &self,
        client: &CachedEntity,
        world: &CachedEntity,
    ) -> Result<Welcome, WorldError> {
        let world_snapshot = world
            .read()
            .await
            .as_world()
            .cloned()
            .ok_or_else(|| WorldError::InvalidArgument("Not a world handle".to_string()))?;
        let (identity, current_world, client_snapshot) = {
            let entity = client.read().await;
            let c = entity
                .as_client()
                .ok_or_else(|| WorldError::InvalidArgument("Not a client handle".to_string()))?;
            (c.identity(), c.base.world_id, c.clone())
        };

        if current_world == Some(world_snapshot.id) {
            return Err(WorldError::InvalidArgument(format!(
                "Already in world {}",
                world_snapshot.name
            )));
        }
        if !self
            .admissions
            .resolve(&world_snapshot)
            .enter(&world_snapshot, &client_snapshot)
            .await
        {
            return Err(WorldError::Forbidden(format!(
                "Not allowed to enter {}",
                world_snapshot.name
            )));
        }

        if current_world.is_some() {
            self.exit(client).await?;
        }
        self.streams.join(&client_snapshot, &world_snapshot).await?;
        {
            let mut entity = client.write().await;
            if let Some(c) = entity.as_client_mut() {
                c.base.world_id = Some(world_snapshot.id);
            }
        }
        self.save(client).await?;
        info!(client = %identity, world = %world_snapshot.name, "🌍 Client entered world");

        let permanents = self.get_permanents(&identity).await?;
        let mut snapshots = Vec::with_capacity(permanents.len());
        for handle in &permanents {
            snapshots.push(handle.read().await.snapshot(View::Public));
        }
        let client_view = client.read().await.snapshot(View::Owner);
        Ok(Welcome {
            client: client_view,
            permanents: snapshots,
        })
    }

    /// Start the client's session: claim its display name among live
    /// sessions, give it a position if it has none, activate it and build
    /// its scene.
    pub async fn start_session(&self, client: &CachedEntity) -> Result<(), WorldError> {
        let snapshot = {
            client
                .read()
                .await
                .as_client()
                .cloned()
                .ok_or_else(|| WorldError::InvalidArgument("Not a client handle".to_string()))?
        };
        let session = snapshot.session.clone().ok_or_else(|| {
            WorldError::InvalidOperation("Client has no session".to_string())
        })?;

        self.tracker.add_session(&snapshot).await?;
        {
            let mut entity = client.write().await;
            if let Some(c) = entity.as_client_mut() {
                if c.base.position.is_none() {
                    c.base.position = Some(Point::default());
                }
                c.active = true;
            }
        }
        self.save(client).await?;

        let properties = snapshot.scene_properties.unwrap_or(self.config.scene);
        let scene = Scene::new(snapshot.identity(), session, properties);
        {
            let mut entity = client.write().await;
            if let Some(c) = entity.as_client_mut() {
                c.scene = Some(scene.clone());
            }
        }
        scene.update(self).await?;
        info!(client = %snapshot.identity(), "✅ Session started");
        Ok(())
    }

    // ========================================================================
    // Logout and exit
    // ========================================================================

    /// End the client's connection: untrack, exit, delete guests and flush
    /// deferred writes. Transactional.
    pub async fn logout(&self, client: &CachedEntity) -> Result<(), WorldError> {
        self.store.begin().await?;
        match self.logout_inner(client).await {
            Ok(()) => {
                self.store.commit().await?;
                Ok(())
            }
            Err(error) => {
                self.rollback().await;
                Err(error)
            }
        }
    }

    async fn logout_inner(&self, client: &CachedEntity) -> Result<(), WorldError> {
        let (identity, guest, write_back) = {
            let entity = client.read().await;
            let c = entity
                .as_client()
                .ok_or_else(|| WorldError::InvalidArgument("Not a client handle".to_string()))?;
            (c.identity(), c.guest, c.write_back.clone())
        };

        self.tracker.remove(&identity);
        // Flush buffered writes before the exit saves run, so the exit's
        // final state is not overwritten by an older buffered snapshot.
        if let Some(write_back) = &write_back {
            write_back.flush().await?;
        }
        self.exit(client).await?;
        if guest {
            self.cache.evict(&identity);
            self.delete_entity(&write_back, identity).await?;
            debug!(client = %identity, "Deleted guest client");
        }
        info!(client = %identity, "🔌 Client logged out");
        Ok(())
    }

    /// Unwind the client's presence in its current world.
    async fn exit(&self, client: &CachedEntity) -> Result<(), WorldError> {
        let (identity, world_id, scene, guest, write_back, client_snapshot) = {
            let entity = client.read().await;
            let c = entity
                .as_client()
                .ok_or_else(|| WorldError::InvalidArgument("Not a client handle".to_string()))?;
            (
                c.identity(),
                c.base.world_id,
                c.scene.clone(),
                c.guest,
                c.write_back.clone(),
                c.clone(),
            )
        };

        // Deactivate first and tell everyone still watching. The event both
        // flips the live instance inactive and fans that out.
        let mut deactivation = VREvent::deactivation(identity);
        deactivation.client = Some(identity);
        deactivation.resolved = Some(client.clone());
        self.dispatcher.dispatch(&deactivation).await?;

        // Owned temporaries (and everything a guest owns) go away with the
        // owner.
        for ownership in self.store.get_owned(identity).await? {
            let owned = ownership.owned;
            if guest || self.owned_is_temporary(owned).await? {
                if let Some(handle) = self.cache.get(&owned) {
                    if let Some(scene) = &scene {
                        scene.unpublish(&handle).await;
                    }
                }
                self.cache.evict(&owned);
                self.delete_entity(&write_back, owned).await?;
                self.store.delete_ownership(ownership.id).await?;
                debug!(client = %identity, object = %owned, "Cleaned up owned object");
            }
        }

        // Scene teardown: detach from everything seen, then forget it all.
        if let Some(scene) = &scene {
            scene.unpublish_all().await;
            scene.remove_all().await;
        }
        {
            let mut entity = client.write().await;
            if let Some(c) = entity.as_client_mut() {
                c.scene = None;
                c.base.clear_listeners();
            }
        }

        if let Some(world_id) = world_id {
            let world_identity = Identity::world(world_id);
            let world_snapshot = match self.lookup(world_identity).await? {
                Some(handle) => handle.read().await.as_world().cloned(),
                None => None,
            };
            let world_name = world_snapshot
                .as_ref()
                .map(|world| world.name.clone())
                .unwrap_or_default();

            // A broken streaming integration must not block the exit.
            if let Err(error) = self
                .streams
                .disconnect(&client_snapshot, &world_name)
                .await
            {
                warn!(client = %identity, error = %error, "Streaming disconnect failed");
            }

            {
                let mut entity = client.write().await;
                if let Some(c) = entity.as_client_mut() {
                    c.base.world_id = None;
                }
            }
            self.save(client).await?;

            if let Some(world) = &world_snapshot {
                self.admissions
                    .resolve(world)
                    .exit(world, &client_snapshot)
                    .await;
                if world.temporary {
                    let remaining = self.store.count_users(world_id).await?;
                    if remaining == 0 {
                        self.delete_world(world_identity, &world.name).await?;
                    }
                }
            }
            info!(client = %identity, world = %world_name, "Client exited world");
        } else {
            self.save(client).await?;
        }
        Ok(())
    }

    async fn owned_is_temporary(&self, owned: Identity) -> Result<bool, WorldError> {
        if self.config.cleanup.live_owned {
            if let Some(handle) = self.cache.get(&owned) {
                return Ok(handle
                    .read()
                    .await
                    .as_object()
                    .map(|base| base.is_temporary())
                    .unwrap_or(false));
            }
        }
        match self.store.load(owned).await? {
            Some(entity) => Ok(entity
                .as_object()
                .map(|base| base.is_temporary())
                .unwrap_or(false)),
            None => Ok(false),
        }
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Handle one inbound client request - a command or a broadcast event.
    /// Transactional.
    pub async fn dispatch(&self, request: ClientRequest) -> Result<(), WorldError> {
        self.store.begin().await?;
        match self.dispatch_inner(request).await {
            Ok(()) => {
                self.store.commit().await?;
                Ok(())
            }
            Err(error) => {
                self.rollback().await;
                Err(error)
            }
        }
    }

    async fn dispatch_inner(&self, request: ClientRequest) -> Result<(), WorldError> {
        let client_identity = request.client.ok_or_else(|| {
            WorldError::InvalidArgument("Request carries no client".to_string())
        })?;
        let client = self.get(&client_identity).ok_or_else(|| {
            WorldError::InvalidArgument(format!("Unknown client: {client_identity}"))
        })?;
        if client.read().await.as_client().is_none() {
            return Err(WorldError::InvalidArgument(format!(
                "Not a client: {client_identity}"
            )));
        }

        match request.payload {
            RequestPayload::Command(CommandRequest { command }) => {
                debug!(client = %client_identity, command = ?command, "⚡ Executing command");
                if let Some(result) = command.execute(self, &client).await? {
                    let session = client
                        .read()
                        .await
                        .as_client()
                        .and_then(|c| c.session.clone());
                    if let Some(session) = session {
                        match serde_json::to_string(&result) {
                            Ok(text) => {
                                if let Err(error) = session.send_text(text).await {
                                    warn!(
                                        client = %client_identity,
                                        error = %error,
                                        "Command result delivery failed"
                                    );
                                }
                            }
                            Err(error) => warn!(
                                client = %client_identity,
                                error = %error,
                                "Command result serialization failed"
                            ),
                        }
                    }
                }
                Ok(())
            }
            RequestPayload::Event(mut event) => {
                event.client = Some(client_identity);

                let source = if event.source_is(&client_identity) {
                    client.clone()
                } else {
                    let scene = client
                        .read()
                        .await
                        .as_client()
                        .and_then(|c| c.scene.clone())
                        .ok_or_else(|| {
                            WorldError::InvalidOperation("Client has no scene".to_string())
                        })?;
                    match scene.get(&event.source).await {
                        Some(found) => found,
                        None => {
                            let found = self.get(&event.source).ok_or_else(|| {
                                WorldError::InvalidOperation(format!(
                                    "Unknown event source: {}",
                                    event.source
                                ))
                            })?;
                            if self.config.dispatch.permanents_only {
                                let permanent = found
                                    .read()
                                    .await
                                    .as_object()
                                    .map(|base| base.permanent)
                                    .unwrap_or(false);
                                if !permanent {
                                    return Err(WorldError::InvalidOperation(format!(
                                        "Source not in scene: {}",
                                        event.source
                                    )));
                                }
                            }
                            found
                        }
                    }
                };

                event.ownership = self
                    .store
                    .get_ownership(client_identity, event.source)
                    .await?;
                event.resolved = Some(source.clone());
                self.dispatcher.dispatch(&event).await?;

                // Persistence failures must not undo a delivered event;
                // they are logged and the dispatch stands.
                let write_back = client
                    .read()
                    .await
                    .as_client()
                    .and_then(|c| c.write_back.clone());
                let adaptor = self.persistors.adaptor(event.source.kind);
                if let Err(error) = adaptor
                    .persist(self.store.as_ref(), write_back.as_deref(), &event, &source)
                    .await
                {
                    error!(source = %event.source, error = %error, "❌ Failed to persist event");
                }

                let scene = client
                    .read()
                    .await
                    .as_client()
                    .and_then(|c| c.scene.clone());
                if let Some(scene) = scene {
                    scene.update(self).await?;
                }
                Ok(())
            }
        }
    }

    async fn rollback(&self) {
        if let Err(error) = self.store.rollback().await {
            warn!(error = %error, "Transaction rollback failed");
        }
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Combined write-back counters of every live client.
    pub async fn write_back_stats(&self) -> WriteBackStats {
        let mut total = WriteBackStats::default();
        for handle in self.cache.handles() {
            let entity = handle.read().await;
            if let Some(client) = entity.as_client() {
                if let Some(write_back) = &client.write_back {
                    total.merge(&write_back.stats());
                }
            }
        }
        total
    }

    /// Log out every tracked session; called once at server shutdown.
    pub async fn shutdown(&self) {
        info!(sessions = self.session_count(), "Shutting down world runtime");
        for identity in self.tracker.tracked() {
            if let Some(handle) = self.cache.get(&identity) {
                if let Err(error) = self.logout(&handle).await {
                    warn!(client = %identity, error = %error, "Logout during shutdown failed");
                }
            }
        }
    }
}
