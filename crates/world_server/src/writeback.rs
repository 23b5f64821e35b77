//! # Write-Back Buffer
//!
//! Per-client buffer that bounds store write load for high-frequency
//! mutations (movement above all). Writes of the same entity merge
//! last-write-wins in a pending map; the map drains to the store when the
//! configured delay has passed since the previous flush, and unconditionally
//! at logout. An inactive buffer degrades to synchronous write-through.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use crate::model::Entity;
use crate::store::{ObjectStore, StoreError};
use crate::types::Identity;

#[derive(Debug)]
struct Pending {
    entries: HashMap<Identity, Entity>,
    last_flush: Instant,
}

#[derive(Debug)]
pub struct WriteBack {
    store: Arc<dyn ObjectStore>,
    active: bool,
    delay: Duration,
    pending: Mutex<Pending>,
    queued: AtomicU64,
    merged: AtomicU64,
    flushes: AtomicU64,
    written: AtomicU64,
}

impl WriteBack {
    pub fn new(store: Arc<dyn ObjectStore>, active: bool, delay: Duration) -> Self {
        Self {
            store,
            active,
            delay,
            pending: Mutex::new(Pending {
                entries: HashMap::new(),
                last_flush: Instant::now(),
            }),
            queued: AtomicU64::new(0),
            merged: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            written: AtomicU64::new(0),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Queue an entity snapshot for persistence, or write it through
    /// immediately when the buffer is inactive. Flushes opportunistically
    /// when the delay since the last flush has elapsed.
    pub async fn write(&self, entity: Entity) -> Result<(), StoreError> {
        if !self.active {
            self.store.save(entity).await?;
            self.written.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let due = {
            let mut pending = self.pending.lock().await;
            if pending.entries.insert(entity.identity(), entity).is_some() {
                self.merged.fetch_add(1, Ordering::Relaxed);
            }
            self.queued.fetch_add(1, Ordering::Relaxed);
            pending.last_flush.elapsed() >= self.delay
        };
        if due {
            self.flush().await?;
        }
        Ok(())
    }

    /// Drain everything pending to the store. On a store failure the
    /// unsaved entries are re-queued (without clobbering anything newer)
    /// and the error propagates.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let drained: Vec<Entity> = {
            let mut pending = self.pending.lock().await;
            pending.last_flush = Instant::now();
            if pending.entries.is_empty() {
                return Ok(());
            }
            pending.entries.drain().map(|(_, entity)| entity).collect()
        };

        let mut remaining = drained.into_iter();
        while let Some(entity) = remaining.next() {
            if let Err(error) = self.store.save(entity.clone()).await {
                let mut pending = self.pending.lock().await;
                pending.entries.entry(entity.identity()).or_insert(entity);
                for rest in remaining {
                    pending.entries.entry(rest.identity()).or_insert(rest);
                }
                return Err(error);
            }
            self.written.fetch_add(1, Ordering::Relaxed);
        }
        self.flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Delete an entity: discards any pending write and removes it from the
    /// store.
    pub async fn delete(&self, identity: Identity) -> Result<(), StoreError> {
        if self.active {
            self.pending.lock().await.entries.remove(&identity);
        }
        self.store.delete(identity).await
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.entries.len()
    }

    pub fn stats(&self) -> WriteBackStats {
        WriteBackStats {
            queued: self.queued.load(Ordering::Relaxed),
            merged: self.merged.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
        }
    }
}

/// Write-back counters, reported at shutdown.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct WriteBackStats {
    pub queued: u64,
    pub merged: u64,
    pub flushes: u64,
    pub written: u64,
}

impl WriteBackStats {
    pub fn merge(&mut self, other: &WriteBackStats) {
        self.queued += other.queued;
        self.merged += other.merged;
        self.flushes += other.flushes;
        self.written += other.written;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VRObject;
    use crate::store::MemoryStore;

    fn object_with_id(id: u64, hp: u64) -> Entity {
        let mut obj = VRObject::new();
        obj.id = id;
        obj.properties.insert("hp".to_string(), hp.into());
        Entity::Object(obj)
    }

    #[tokio::test]
    async fn inactive_buffer_writes_through() {
        let store = Arc::new(MemoryStore::new());
        let write_back = WriteBack::new(store.clone(), false, Duration::from_secs(60));

        write_back.write(object_with_id(1, 10)).await.unwrap();
        let loaded = store.load(Identity::object(1)).await.unwrap().unwrap();
        assert_eq!(loaded.as_object().unwrap().properties["hp"], 10);
        assert_eq!(write_back.stats().written, 1);
    }

    #[tokio::test]
    async fn active_buffer_defers_and_merges() {
        let store = Arc::new(MemoryStore::new());
        let write_back = WriteBack::new(store.clone(), true, Duration::from_secs(3600));

        write_back.write(object_with_id(1, 10)).await.unwrap();
        write_back.write(object_with_id(1, 20)).await.unwrap();
        assert!(store.load(Identity::object(1)).await.unwrap().is_none());
        assert_eq!(write_back.pending_count().await, 1);

        write_back.flush().await.unwrap();
        let loaded = store.load(Identity::object(1)).await.unwrap().unwrap();
        assert_eq!(loaded.as_object().unwrap().properties["hp"], 20);

        let stats = write_back.stats();
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.merged, 1);
        assert_eq!(stats.written, 1);
    }

    #[tokio::test]
    async fn zero_delay_flushes_every_write() {
        let store = Arc::new(MemoryStore::new());
        let write_back = WriteBack::new(store.clone(), true, Duration::from_millis(0));

        write_back.write(object_with_id(1, 10)).await.unwrap();
        assert!(store.load(Identity::object(1)).await.unwrap().is_some());
        assert_eq!(write_back.pending_count().await, 0);
    }

    #[tokio::test]
    async fn delete_discards_pending_write() {
        let store = Arc::new(MemoryStore::new());
        store.save(object_with_id(1, 10)).await.unwrap();
        let write_back = WriteBack::new(store.clone(), true, Duration::from_secs(3600));

        write_back.write(object_with_id(1, 99)).await.unwrap();
        write_back.delete(Identity::object(1)).await.unwrap();

        assert!(store.load(Identity::object(1)).await.unwrap().is_none());
        // Nothing left to resurrect the deleted object.
        write_back.flush().await.unwrap();
        assert!(store.load(Identity::object(1)).await.unwrap().is_none());
    }
}
