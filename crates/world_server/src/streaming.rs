//! Audio/video streaming integration points.
//!
//! The runtime only coordinates membership: clients join a streaming session
//! per world on entry and leave it on exit. What a "session" is belongs to
//! the integration behind the trait.

use async_trait::async_trait;
use tracing::trace;

use crate::error::WorldError;
use crate::model::{Client, World};

#[async_trait]
pub trait StreamManager: Send + Sync {
    /// Join the client to the world's streaming session. A failure here
    /// aborts world entry.
    async fn join(&self, client: &Client, world: &World) -> Result<(), WorldError>;

    /// Remove the client from the named world's streaming session. Failures
    /// are logged by the caller, never surfaced - a broken streaming
    /// integration must not block an exit.
    async fn disconnect(&self, client: &Client, world_name: &str) -> Result<(), WorldError>;
}

/// Streaming disabled; every operation succeeds without doing anything.
#[derive(Debug, Default)]
pub struct NoStreaming;

#[async_trait]
impl StreamManager for NoStreaming {
    async fn join(&self, client: &Client, world: &World) -> Result<(), WorldError> {
        trace!(client = %client.identity(), world = %world.name, "streaming disabled, join skipped");
        Ok(())
    }

    async fn disconnect(&self, client: &Client, world_name: &str) -> Result<(), WorldError> {
        trace!(client = %client.identity(), world = %world_name, "streaming disabled, disconnect skipped");
        Ok(())
    }
}
