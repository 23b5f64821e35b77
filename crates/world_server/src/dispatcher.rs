//! # Event Dispatcher
//!
//! Applies a broadcast event to its resolved source and fans it out to the
//! source's listener set. Fan-out is in-process and synchronous: the call
//! returns only after every listener has been driven to completion, in no
//! particular order. One listener failing (a dead session, typically) never
//! severs delivery to the rest.

use futures::future::join_all;
use tracing::{debug, warn};

use crate::error::WorldError;
use crate::events::VREvent;

#[derive(Debug, Default)]
pub struct Dispatcher;

impl Dispatcher {
    pub fn new() -> Self {
        Self
    }

    pub async fn dispatch(&self, event: &VREvent) -> Result<(), WorldError> {
        let source = event.resolved.as_ref().ok_or_else(|| {
            WorldError::InvalidOperation("Event source not resolved".to_string())
        })?;

        // Mutate the live instance first so every observer - listeners now,
        // scene queries later - sees the same state.
        {
            let mut entity = source.write().await;
            entity.apply_changes(&event.changes)?;
        }

        let listeners = source.read().await.listener_handles();
        if listeners.is_empty() {
            return Ok(());
        }
        debug!(source = %event.source, listeners = listeners.len(), "dispatching event");

        let results = join_all(listeners.iter().map(|listener| listener.on_event(event))).await;
        for (listener, result) in listeners.iter().zip(results) {
            if let Err(error) = result {
                warn!(
                    listener = %listener.listener_id(),
                    error = %error,
                    "event delivery failed"
                );
            }
        }
        Ok(())
    }
}
