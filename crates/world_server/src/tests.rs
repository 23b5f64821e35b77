// Lifecycle tests driving the manager the way a transport would:
// login, world entry, sessions, events, commands, logout.
#[cfg(test)]
mod tests {
    use crate::testing::{test_manager, test_manager_with, TestSession};
    use crate::*;
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};
    use std::sync::Arc;

    fn changes(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn move_event(source: Identity, x: f64) -> VREvent {
        VREvent::new(
            source,
            changes(json!({"position": {"x": x, "y": 0.0, "z": 0.0}})),
        )
    }

    async fn connect_guest(manager: &WorldManager) -> (Arc<TestSession>, CachedEntity) {
        let session = TestSession::new();
        let welcome = manager.login(session.clone()).await.unwrap();
        let id = welcome.client["id"].as_u64().unwrap();
        let client = manager.get(&Identity::client(id)).unwrap();
        (session, client)
    }

    async fn identity_of(client: &CachedEntity) -> Identity {
        client.read().await.identity()
    }

    // ------------------------------------------------------------------
    // Login
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn guest_login_lands_in_default_world() {
        let (manager, _store) = test_manager();
        let (session, client) = connect_guest(&manager).await;

        let default = manager.get_world(DEFAULT_WORLD_NAME).await.unwrap().unwrap();
        let default_id = default.read().await.id();

        let entity = client.read().await;
        let c = entity.as_client().unwrap();
        assert!(c.guest);
        assert!(c.base.position.is_some());
        assert!(c.session.is_some());
        assert!(c.write_back.is_some());
        assert_eq!(c.base.world_id, Some(default_id));
        assert_eq!(
            session.attribute(CLIENT_ID_ATTRIBUTE),
            Some(json!(c.base.id))
        );
    }

    #[tokio::test]
    async fn guests_rejected_when_disabled() {
        let mut config = ServerConfig::default();
        config.guest_allowed = false;
        let (manager, _store) = test_manager_with(config);

        let err = manager.login(TestSession::new()).await.unwrap_err();
        assert!(matches!(err, WorldError::Unauthorized(_)));
        assert_eq!(manager.cache_size(), 0);
    }

    #[tokio::test]
    async fn unknown_principal_rejected() {
        let (manager, _store) = test_manager();
        let err = manager
            .login(TestSession::with_principal("ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorldError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn principal_login_finds_stored_client() {
        let (manager, store) = test_manager();
        store
            .save(Entity::Client(Client::named("hana")))
            .await
            .unwrap();

        let welcome = manager
            .login(TestSession::with_principal("hana"))
            .await
            .unwrap();
        assert_eq!(welcome.client["name"], "hana");
        assert_eq!(welcome.client["guest"], false);
    }

    #[tokio::test]
    async fn server_login_is_kind_checked() {
        let (manager, store) = test_manager();
        let mut hub = Client::named("hub");
        hub.client_kind = ClientKind::RemoteServer;
        store.save(Entity::Client(hub)).await.unwrap();

        // A user login cannot claim a remote server principal.
        let err = manager
            .login(TestSession::with_principal("hub"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorldError::Unauthorized(_)));

        let welcome = manager
            .server_login(TestSession::with_principal("hub"))
            .await
            .unwrap();
        assert_eq!(welcome.client["client_kind"], "RemoteServer");
    }

    #[tokio::test]
    async fn welcome_lists_permanent_objects() {
        let (manager, store) = test_manager();
        let default = manager.default_world().await.unwrap();
        let world_id = default.read().await.id();

        let mut landmark = VRObject::new();
        landmark.world_id = Some(world_id);
        landmark.permanent = true;
        landmark.position = Some(Point::new(5.0, 0.0, 0.0));
        store.save(Entity::Object(landmark)).await.unwrap();

        let welcome = manager.login(TestSession::new()).await.unwrap();
        assert_eq!(welcome.permanents.len(), 1);
        assert_eq!(welcome.permanents[0]["kind"], "Object");
        assert_eq!(welcome.permanents[0]["permanent"], true);
    }

    // ------------------------------------------------------------------
    // Object cache
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn cache_keeps_one_instance_per_identity() {
        let (manager, store) = test_manager();
        store
            .save(Entity::Client(Client::named("ann")))
            .await
            .unwrap();

        let first = manager.get_client_by_name("ann").await.unwrap().unwrap();
        let second = manager.get_client_by_name("ann").await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        // Logging the same client in converges on the cached instance.
        let welcome = manager
            .login(TestSession::with_principal("ann"))
            .await
            .unwrap();
        let id = welcome.client["id"].as_u64().unwrap();
        let live = manager.get(&Identity::client(id)).unwrap();
        assert!(Arc::ptr_eq(&first, &live));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_lookups_create_one_default_world() {
        let (manager, store) = test_manager();
        let manager = Arc::new(manager);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                manager.default_world().await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.entity_count().await, 1);
        assert!(manager
            .get_world(DEFAULT_WORLD_NAME)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn find_filters_live_entities() {
        let (manager, _store) = test_manager();
        let (_session, _client) = connect_guest(&manager).await;

        let clients = manager
            .find(|entity| matches!(entity, Entity::Client(_)))
            .await;
        assert_eq!(clients.len(), 1);
        let worlds = manager
            .find(|entity| matches!(entity, Entity::World(_)))
            .await;
        assert_eq!(worlds.len(), 1);
    }

    // ------------------------------------------------------------------
    // Worlds
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn unknown_world_created_on_demand_as_temporary() {
        let (manager, _store) = test_manager();
        let (_session, client) = connect_guest(&manager).await;

        manager.enter_by_name(&client, "arena").await.unwrap();

        let arena = manager.get_world("arena").await.unwrap().unwrap();
        assert!(arena.read().await.as_world().unwrap().temporary);
        assert_eq!(
            client.read().await.as_object().unwrap().world_id,
            Some(arena.read().await.id())
        );
    }

    #[tokio::test]
    async fn unknown_world_rejected_when_creation_disabled() {
        let mut config = ServerConfig::default();
        config.create_worlds = false;
        let (manager, _store) = test_manager_with(config);
        let (_session, client) = connect_guest(&manager).await;
        let before = client.read().await.as_object().unwrap().world_id;

        let err = manager
            .enter_by_name(&client, "nowhere")
            .await
            .unwrap_err();
        assert!(matches!(err, WorldError::InvalidArgument(_)));
        // Nothing moved.
        assert_eq!(client.read().await.as_object().unwrap().world_id, before);
        assert!(manager.get_world("nowhere").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reentering_current_world_rejected() {
        let (manager, _store) = test_manager();
        let (_session, client) = connect_guest(&manager).await;
        let default = manager.default_world().await.unwrap();

        let err = manager.enter(&client, &default).await.unwrap_err();
        assert!(matches!(err, WorldError::InvalidArgument(_)));
    }

    struct Bouncer;

    #[async_trait]
    impl WorldAdmission for Bouncer {
        async fn enter(&self, _world: &World, _client: &Client) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn refused_admission_leaves_client_where_it_was() {
        let store = Arc::new(MemoryStore::new());
        let mut manager = WorldManager::new(
            ServerConfig::default(),
            store.clone(),
            Arc::new(DefaultClientFactory),
            Arc::new(NoStreaming),
        );
        manager.register_admission("locked", Arc::new(Bouncer));

        let mut vault = World::new("vault");
        vault.kind = Some("locked".to_string());
        store.save(Entity::World(vault)).await.unwrap();

        let (_session, client) = connect_guest(&manager).await;
        let home = client.read().await.as_object().unwrap().world_id;

        let err = manager.enter_by_name(&client, "vault").await.unwrap_err();
        assert!(matches!(err, WorldError::Forbidden(_)));
        assert_eq!(client.read().await.as_object().unwrap().world_id, home);
    }

    #[tokio::test]
    async fn temporary_world_collected_with_last_user() {
        let (manager, store) = test_manager();
        let (_sa, first) = connect_guest(&manager).await;
        let (_sb, second) = connect_guest(&manager).await;

        manager.enter_by_name(&first, "pocket").await.unwrap();
        manager.enter_by_name(&second, "pocket").await.unwrap();
        let pocket = manager.get_world("pocket").await.unwrap().unwrap();
        let pocket_id = pocket.read().await.identity();

        manager.logout(&first).await.unwrap();
        assert!(manager.get_world("pocket").await.unwrap().is_some());

        manager.logout(&second).await.unwrap();
        assert!(manager.get_world("pocket").await.unwrap().is_none());
        assert!(store.load(pocket_id).await.unwrap().is_none());
        // The default world is never collected.
        assert!(manager
            .get_world(DEFAULT_WORLD_NAME)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn configured_worlds_ensured_at_startup() {
        let (manager, _store) = test_manager();
        let mut worlds = WorldsConfig::new();
        let template: WorldTemplate =
            serde_json::from_value(json!({"kind": "lobby", "motd": "welcome"})).unwrap();
        worlds.insert("plaza".to_string(), template);

        manager.create_worlds(&worlds).await.unwrap();

        let plaza = manager.get_world("plaza").await.unwrap().unwrap();
        let entity = plaza.read().await;
        let world = entity.as_world().unwrap();
        assert!(!world.temporary);
        assert_eq!(world.kind.as_deref(), Some("lobby"));
        assert_eq!(world.properties["motd"], "welcome");
        drop(entity);

        assert!(manager
            .get_world(DEFAULT_WORLD_NAME)
            .await
            .unwrap()
            .is_some());
    }

    // ------------------------------------------------------------------
    // Sessions and scenes
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn session_start_activates_and_builds_scene() {
        let (manager, store) = test_manager();
        let default = manager.default_world().await.unwrap();
        let world_id = default.read().await.id();
        let mut landmark = VRObject::new();
        landmark.world_id = Some(world_id);
        landmark.permanent = true;
        store.save(Entity::Object(landmark)).await.unwrap();

        let (session, client) = connect_guest(&manager).await;
        manager.start_session(&client).await.unwrap();

        {
            let entity = client.read().await;
            let c = entity.as_client().unwrap();
            assert!(c.active);
            assert!(c.scene.is_some());
        }
        assert_eq!(manager.session_count(), 1);

        // Initial scene content arrived as an add frame.
        let frames = session.frames().await;
        assert!(frames.iter().any(|frame| frame.get("add").is_some()));
    }

    #[tokio::test]
    async fn duplicate_display_names_conflict_until_logout() {
        let (manager, store) = test_manager();
        store
            .save(Entity::Client(Client::named("kim")))
            .await
            .unwrap();

        let welcome = manager
            .login(TestSession::with_principal("kim"))
            .await
            .unwrap();
        let first = manager
            .get(&Identity::client(welcome.client["id"].as_u64().unwrap()))
            .unwrap();
        manager.start_session(&first).await.unwrap();

        // A second stored client with the same display name, e.g. imported.
        let twin = store
            .save(Entity::Client(Client::named("kim")))
            .await
            .unwrap()
            .into_client()
            .unwrap();
        let twin = manager
            .login_client(twin, TestSession::new())
            .await
            .unwrap();
        let err = manager.start_session(&twin).await.unwrap_err();
        assert!(matches!(err, WorldError::SessionConflict(_)));

        // The name frees up with the first session.
        manager.logout(&first).await.unwrap();
        manager.start_session(&twin).await.unwrap();
        assert_eq!(manager.session_count(), 1);
    }

    #[tokio::test]
    async fn scene_publishes_and_fans_out_between_clients() {
        let (manager, _store) = test_manager();
        let (watcher_session, watcher) = connect_guest(&manager).await;
        let (_mover_session, mover) = connect_guest(&manager).await;
        manager.start_session(&watcher).await.unwrap();
        manager.start_session(&mover).await.unwrap();
        let watcher_id = identity_of(&watcher).await;
        let mover_id = identity_of(&mover).await;

        // The watcher moves far enough to refresh its scene; the mover is
        // active by now and gets published.
        manager
            .dispatch(ClientRequest::event(watcher_id, move_event(watcher_id, 20.0)))
            .await
            .unwrap();
        let frames = watcher_session.frames().await;
        assert!(frames.iter().any(|frame| {
            frame
                .get("add")
                .and_then(Value::as_array)
                .map(|added| added.iter().any(|o| o["id"] == mover_id.id))
                .unwrap_or(false)
        }));

        // The mover's change now reaches the watcher synchronously.
        watcher_session.clear().await;
        manager
            .dispatch(ClientRequest::event(mover_id, move_event(mover_id, 30.0)))
            .await
            .unwrap();
        let frames = watcher_session.frames().await;
        assert!(frames.iter().any(|frame| {
            frame["source"]["id"] == mover_id.id
                && frame["changes"]["position"]["x"] == 30.0
        }));
    }

    #[tokio::test]
    async fn logout_notifies_watchers_of_deactivation() {
        let (manager, _store) = test_manager();
        let (watcher_session, watcher) = connect_guest(&manager).await;
        let (_mover_session, mover) = connect_guest(&manager).await;
        manager.start_session(&watcher).await.unwrap();
        manager.start_session(&mover).await.unwrap();
        let watcher_id = identity_of(&watcher).await;
        let mover_id = identity_of(&mover).await;

        manager
            .dispatch(ClientRequest::event(watcher_id, move_event(watcher_id, 20.0)))
            .await
            .unwrap();
        watcher_session.clear().await;

        manager.logout(&mover).await.unwrap();

        let frames = watcher_session.frames().await;
        assert!(frames.iter().any(|frame| {
            frame["source"]["id"] == mover_id.id && frame["changes"]["active"] == false
        }));
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn request_without_client_rejected() {
        let (manager, _store) = test_manager();
        let mut request = ClientRequest::command(Identity::client(1), Command::Session);
        request.client = None;

        let err = manager.dispatch(request).await.unwrap_err();
        assert!(matches!(err, WorldError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn self_events_apply_without_a_scene() {
        let (manager, _store) = test_manager();
        let (_session, client) = connect_guest(&manager).await;
        let identity = identity_of(&client).await;

        manager
            .dispatch(ClientRequest::event(identity, move_event(identity, 3.0)))
            .await
            .unwrap();
        assert_eq!(
            client.read().await.as_object().unwrap().position,
            Some(Point::new(3.0, 0.0, 0.0))
        );
    }

    #[tokio::test]
    async fn foreign_sources_need_a_scene() {
        let (manager, store) = test_manager();
        let (_session, client) = connect_guest(&manager).await;
        let identity = identity_of(&client).await;
        let target = store
            .save(Entity::Object(VRObject::new()))
            .await
            .unwrap()
            .identity();

        // No session started, so there is no scene to resolve through.
        let err = manager
            .dispatch(ClientRequest::event(
                identity,
                VREvent::new(target, Map::new()),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, WorldError::InvalidOperation(_)));

        // With a scene, a source nobody has seen is still unknown.
        manager.start_session(&client).await.unwrap();
        let err = manager
            .dispatch(ClientRequest::event(
                identity,
                VREvent::new(Identity::object(9999), Map::new()),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, WorldError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn command_results_reach_only_the_issuer() {
        let (manager, _store) = test_manager();
        let (session, client) = connect_guest(&manager).await;
        let identity = identity_of(&client).await;

        manager
            .dispatch(ClientRequest::command(
                identity,
                Command::Echo {
                    payload: json!({"ping": 1}),
                },
            ))
            .await
            .unwrap();

        let frames = session.frames().await;
        assert!(frames.iter().any(|frame| frame["ping"] == 1));
    }

    #[derive(Debug, Default)]
    struct FlakyPersistence;

    #[async_trait]
    impl PersistenceAdaptor for FlakyPersistence {
        async fn persist(
            &self,
            _store: &dyn ObjectStore,
            _write_back: Option<&WriteBack>,
            _event: &VREvent,
            _source: &CachedEntity,
        ) -> Result<(), StoreError> {
            Err(StoreError::Backend("disk on fire".to_string()))
        }
    }

    #[tokio::test]
    async fn persist_failure_does_not_undo_delivery() {
        let store = Arc::new(MemoryStore::new());
        let mut manager = WorldManager::new(
            ServerConfig::default(),
            store.clone(),
            Arc::new(DefaultClientFactory),
            Arc::new(NoStreaming),
        );
        manager.register_persistor(EntityKind::Object, Arc::new(FlakyPersistence));

        let (_session, client) = connect_guest(&manager).await;
        let identity = identity_of(&client).await;
        let created = manager
            .add(
                &client,
                ObjectTemplate {
                    temporary: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        manager.start_session(&client).await.unwrap();

        let event = VREvent::new(created, changes(json!({"color": "red"})));
        manager
            .dispatch(ClientRequest::event(identity, event))
            .await
            .unwrap();

        // The live instance changed even though persistence failed.
        let live = manager.get(&created).unwrap();
        assert_eq!(
            live.read().await.as_object().unwrap().properties["color"],
            "red"
        );
        let stored = store.load(created).await.unwrap().unwrap();
        assert!(stored.as_object().unwrap().properties.get("color").is_none());
    }

    // ------------------------------------------------------------------
    // Ownership
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn objects_inherit_owner_position_and_world() {
        let (manager, _store) = test_manager();
        let (_session, client) = connect_guest(&manager).await;
        let (owner_position, owner_world) = {
            let entity = client.read().await;
            let base = entity.as_object().unwrap();
            (base.position, base.world_id)
        };

        let created = manager
            .add(&client, ObjectTemplate::default())
            .await
            .unwrap();
        let handle = manager.get(&created).unwrap();
        let entity = handle.read().await;
        let base = entity.as_object().unwrap();
        assert_eq!(base.position, owner_position);
        assert_eq!(base.world_id, owner_world);
        // Guest-created objects default to temporary.
        assert!(base.is_temporary());
    }

    #[tokio::test]
    async fn removal_requires_ownership() {
        let (manager, store) = test_manager();
        let (_sa, alice) = connect_guest(&manager).await;
        let (_sb, bob) = connect_guest(&manager).await;

        let created = manager
            .add(
                &alice,
                ObjectTemplate {
                    temporary: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let err = manager.remove(&bob, created).await.unwrap_err();
        assert!(matches!(err, WorldError::PermissionDenied(_)));
        assert!(manager.get(&created).is_some());
        assert!(store.load(created).await.unwrap().is_some());

        manager.remove(&alice, created).await.unwrap();
        assert!(manager.get(&created).is_none());
        assert!(store.load(created).await.unwrap().is_none());
        assert_eq!(store.ownership_count().await, 0);
    }

    #[tokio::test]
    async fn guest_cleanup_sweeps_everything_owned() {
        let (manager, store) = test_manager();
        let (_session, guest) = connect_guest(&manager).await;
        let identity = identity_of(&guest).await;
        manager.start_session(&guest).await.unwrap();

        let created = manager
            .add(&guest, ObjectTemplate::default())
            .await
            .unwrap();

        manager.logout(&guest).await.unwrap();

        assert!(manager.get(&created).is_none());
        assert!(store.load(created).await.unwrap().is_none());
        assert!(store.load(identity).await.unwrap().is_none());
        assert_eq!(store.ownership_count().await, 0);
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn named_clients_keep_persistent_objects() {
        let (manager, store) = test_manager();
        store
            .save(Entity::Client(Client::named("dana")))
            .await
            .unwrap();
        let welcome = manager
            .login(TestSession::with_principal("dana"))
            .await
            .unwrap();
        let identity = Identity::client(welcome.client["id"].as_u64().unwrap());
        let client = manager.get(&identity).unwrap();

        let kept = manager
            .add(&client, ObjectTemplate::default())
            .await
            .unwrap();
        let dropped = manager
            .add(
                &client,
                ObjectTemplate {
                    temporary: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        manager.logout(&client).await.unwrap();

        assert!(store.load(kept).await.unwrap().is_some());
        assert!(store.load(dropped).await.unwrap().is_none());
        assert!(store.load(identity).await.unwrap().is_some());
        assert_eq!(store.ownership_count().await, 1);
    }

    // ------------------------------------------------------------------
    // Write-back
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn event_writes_buffer_until_logout() {
        let mut config = ServerConfig::default();
        config.write_back_delay_ms = 60_000;
        let (manager, store) = test_manager_with(config);
        store
            .save(Entity::Client(Client::named("pat")))
            .await
            .unwrap();
        let welcome = manager
            .login(TestSession::with_principal("pat"))
            .await
            .unwrap();
        let identity = Identity::client(welcome.client["id"].as_u64().unwrap());
        let client = manager.get(&identity).unwrap();

        for x in 1..=5 {
            manager
                .dispatch(ClientRequest::event(identity, move_event(identity, x as f64)))
                .await
                .unwrap();
        }

        // Live state is current, the stored copy still predates the burst.
        assert_eq!(
            client.read().await.as_object().unwrap().position,
            Some(Point::new(5.0, 0.0, 0.0))
        );
        let stored = store.load(identity).await.unwrap().unwrap();
        assert_ne!(
            stored.as_object().unwrap().position.map(|p| p.x),
            Some(5.0)
        );

        manager.logout(&client).await.unwrap();
        let stored = store.load(identity).await.unwrap().unwrap();
        assert_eq!(
            stored.as_object().unwrap().position.map(|p| p.x),
            Some(5.0)
        );

        let stats = manager.write_back_stats().await;
        assert_eq!(stats.queued, 5);
        assert_eq!(stats.merged, 4);
        assert_eq!(stats.written, 1);
        assert_eq!(stats.flushes, 1);
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn shutdown_logs_out_everyone() {
        let (manager, store) = test_manager();
        let (_session, guest) = connect_guest(&manager).await;
        let identity = identity_of(&guest).await;
        manager.start_session(&guest).await.unwrap();

        manager.shutdown().await;

        assert_eq!(manager.session_count(), 0);
        assert!(store.load(identity).await.unwrap().is_none());
    }
}
