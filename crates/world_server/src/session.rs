//! # Sessions
//!
//! The transport-facing session abstraction and the tracker of live
//! sessions.
//!
//! [`ClientSession`] is implemented by whatever carries the connection (a
//! websocket decorator in production, a recording mock in tests). The
//! runtime only ever needs to identify the peer, read and write session
//! attributes, and push text frames.
//!
//! [`SessionTracker`] is the authority on who is currently connected: it
//! enforces display-name uniqueness among live sessions and the optional
//! session capacity limit. Uniqueness is deliberately scoped to tracked
//! sessions - the moment a client disconnects its name is free again.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{timeout, Duration};

use crate::config::ServerConfig;
use crate::error::WorldError;
use crate::model::Client;
use crate::types::{current_timestamp, Identity, SessionId};

/// Transport handle of one connected client.
#[async_trait]
pub trait ClientSession: Send + Sync + fmt::Debug {
    /// Stable id of this connection.
    fn session_id(&self) -> SessionId;

    /// Name of the authenticated principal, if the connection is
    /// authenticated.
    fn principal_name(&self) -> Option<String>;

    /// A connection header, e.g. the remote address or user agent.
    fn header(&self, name: &str) -> Option<String>;

    fn attribute(&self, name: &str) -> Option<Value>;

    fn set_attribute(&self, name: &str, value: Value);

    /// Push one text frame to the client.
    async fn send_text(&self, payload: String) -> Result<(), String>;
}

#[derive(Debug)]
pub struct TrackedSession {
    pub session_id: SessionId,
    pub name: Option<String>,
    pub started: u64,
    // Held for the lifetime of the session; dropping it frees capacity.
    _permit: Option<OwnedSemaphorePermit>,
}

/// Registry of live sessions.
#[derive(Debug)]
pub struct SessionTracker {
    sessions: DashMap<Identity, TrackedSession>,
    names: DashMap<String, Identity>,
    capacity: Option<Arc<Semaphore>>,
    start_timeout: Duration,
}

impl SessionTracker {
    pub fn new(config: &ServerConfig) -> Self {
        let capacity = if config.max_sessions > 0 {
            Some(Arc::new(Semaphore::new(config.max_sessions)))
        } else {
            None
        };
        Self {
            sessions: DashMap::new(),
            names: DashMap::new(),
            capacity,
            start_timeout: Duration::from_secs(config.session_start_timeout_secs),
        }
    }

    /// Track a starting session.
    ///
    /// Fails with a session conflict when the client's display name is
    /// already in use by another live session, or when no session capacity
    /// frees up within the start timeout.
    pub async fn add_session(&self, client: &Client) -> Result<(), WorldError> {
        let identity = client.identity();
        let name = client.name.clone().filter(|name| !name.is_empty());

        if let Some(name) = &name {
            match self.names.entry(name.clone()) {
                Entry::Occupied(entry) => {
                    if *entry.get() != identity {
                        return Err(WorldError::SessionConflict(format!(
                            "Client named {name} already connected"
                        )));
                    }
                }
                Entry::Vacant(entry) => {
                    entry.insert(identity);
                }
            }
        }

        let permit = match &self.capacity {
            Some(semaphore) => {
                match timeout(self.start_timeout, semaphore.clone().acquire_owned()).await {
                    Ok(Ok(permit)) => Some(permit),
                    _ => {
                        self.release_name(&name, &identity);
                        return Err(WorldError::SessionConflict(
                            "No session capacity available".to_string(),
                        ));
                    }
                }
            }
            None => None,
        };

        let session_id = client
            .session
            .as_ref()
            .map(|session| session.session_id())
            .unwrap_or_default();
        let previous = self.sessions.insert(
            identity,
            TrackedSession {
                session_id,
                name: name.clone(),
                started: current_timestamp(),
                _permit: permit,
            },
        );
        // A re-started session may have changed its name; drop the old claim.
        if let Some(previous) = previous {
            if previous.name != name {
                self.release_name(&previous.name, &identity);
            }
        }
        Ok(())
    }

    /// Stop tracking a session, freeing its name and capacity slot.
    pub fn remove(&self, identity: &Identity) -> bool {
        match self.sessions.remove(identity) {
            Some((_, tracked)) => {
                self.release_name(&tracked.name, identity);
                true
            }
            None => false,
        }
    }

    fn release_name(&self, name: &Option<String>, identity: &Identity) {
        if let Some(name) = name {
            self.names.remove_if(name, |_, claimed| claimed == identity);
        }
    }

    pub fn is_tracked(&self, identity: &Identity) -> bool {
        self.sessions.contains_key(identity)
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Identities of all currently tracked sessions.
    pub fn tracked(&self) -> Vec<Identity> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }
}
