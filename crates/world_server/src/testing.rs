//! Shared test fixtures: a recording session mock and manager builders.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;

use crate::config::ServerConfig;
use crate::factory::DefaultClientFactory;
use crate::manager::WorldManager;
use crate::session::ClientSession;
use crate::store::memory::MemoryStore;
use crate::streaming::NoStreaming;
use crate::types::SessionId;

/// A [`ClientSession`] that records every frame pushed to it.
#[derive(Debug)]
pub struct TestSession {
    id: SessionId,
    principal: Option<String>,
    attributes: StdMutex<HashMap<String, Value>>,
    sent: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl TestSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: SessionId::new(),
            principal: None,
            attributes: StdMutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        })
    }

    pub fn with_principal(name: &str) -> Arc<Self> {
        Arc::new(Self {
            id: SessionId::new(),
            principal: Some(name.to_string()),
            attributes: StdMutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        })
    }

    /// Make every subsequent send fail, like a closed socket.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Everything sent so far, parsed as JSON.
    pub async fn frames(&self) -> Vec<Value> {
        self.sent
            .lock()
            .await
            .iter()
            .filter_map(|text| serde_json::from_str(text).ok())
            .collect()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }

    pub async fn clear(&self) {
        self.sent.lock().await.clear();
    }
}

#[async_trait::async_trait]
impl ClientSession for TestSession {
    fn session_id(&self) -> SessionId {
        self.id
    }

    fn principal_name(&self) -> Option<String> {
        self.principal.clone()
    }

    fn header(&self, _name: &str) -> Option<String> {
        None
    }

    fn attribute(&self, name: &str) -> Option<Value> {
        self.attributes
            .lock()
            .ok()
            .and_then(|attributes| attributes.get(name).cloned())
    }

    fn set_attribute(&self, name: &str, value: Value) {
        if let Ok(mut attributes) = self.attributes.lock() {
            attributes.insert(name.to_string(), value);
        }
    }

    async fn send_text(&self, payload: String) -> Result<(), String> {
        if self.failing.load(Ordering::SeqCst) {
            return Err("session closed".to_string());
        }
        self.sent.lock().await.push(payload);
        Ok(())
    }
}

/// A manager over a fresh in-memory store, plus the store itself for
/// assertions against persisted state.
pub fn test_manager() -> (WorldManager, Arc<MemoryStore>) {
    test_manager_with(ServerConfig::default())
}

pub fn test_manager_with(config: ServerConfig) -> (WorldManager, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let manager = WorldManager::new(
        config,
        store.clone(),
        Arc::new(DefaultClientFactory),
        Arc::new(NoStreaming),
    );
    (manager, store)
}
