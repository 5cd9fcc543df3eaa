/// In-process record store with a capacity bound and per-entry TTL

use super::RecordStore;
use crate::core::Record;
use crate::error::StorageResult;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

struct CacheEntry {
    record: Record,
    inserted_at: Instant,
}

/// Memory backend.
///
/// Eviction is by insertion time, not access time: reading an entry does
/// not extend its life or protect it from capacity eviction.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
    cache_size: usize,
    ttl: Duration,
}

impl MemoryStore {
    /// A `cache_size` of 0 is raised to 1 entry
    pub fn new(cache_size: usize, ttl: Duration) -> Self {
        if cache_size == 0 {
            warn!("Memory store capacity of 0 raised to 1");
        }

        Self {
            entries: Mutex::new(HashMap::new()),
            cache_size: cache_size.max(1),
            ttl,
        }
    }

    /// Number of entries currently held, expired or not
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    fn is_expired(&self, entry: &CacheEntry, now: Instant) -> bool {
        now.duration_since(entry.inserted_at) > self.ttl
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn store(&self, key: &str, record: &Record) -> StorageResult<()> {
        let mut entries = self.entries.lock().await;

        // Overwrites never evict; only a new key can push the map over capacity
        if !entries.contains_key(key) && entries.len() >= self.cache_size {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
                debug!("Evicted oldest memory entry {}", oldest);
            }
        }

        entries.insert(
            key.to_string(),
            CacheEntry {
                record: record.clone(),
                inserted_at: Instant::now(),
            },
        );
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> StorageResult<Option<Record>> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        let expired = match entries.get(key) {
            Some(entry) => self.is_expired(entry, now),
            None => return Ok(None),
        };

        if expired {
            entries.remove(key);
            debug!("Memory entry {} expired", key);
            return Ok(None);
        }

        Ok(entries.get(key).map(|entry| entry.record.clone()))
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        Ok(self.entries.lock().await.remove(key).is_some())
    }

    async fn list_keys(&self) -> StorageResult<HashSet<String>> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        entries.retain(|_, entry| !self.is_expired(entry, now));
        Ok(entries.keys().cloned().collect())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.retrieve(key).await?.is_some())
    }

    fn backend_name(&self) -> &'static str {
        "MemoryStore"
    }
}
