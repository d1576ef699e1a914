use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::store::{CacheStore, StoreStats};

/// In-process store backed by a locked map of key -> (bytes, deadline).
///
/// Default backend for tests and single-node local runs. Expired entries
/// are dropped lazily on read rather than by a sweeper.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

struct MemoryEntry {
    value: Vec<u8>,
    deadline: Instant,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if entry.deadline > Instant::now() => {
                    return Ok(Some(entry.value.clone()));
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // Entry exists but has expired: drop it under the write lock.
        self.entries.write().remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let entry = MemoryEntry {
            value: value.to_vec(),
            deadline: Instant::now() + ttl,
        };
        self.entries.write().insert(key.to_string(), entry);
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let now = Instant::now();
        let entries = self.entries.read();
        let total = entries.len() as u64;
        let live = entries.values().filter(|e| e.deadline > now).count() as u64;
        Ok(StoreStats {
            total_entries: total,
            live_entries: live,
            expired_entries: total - live,
        })
    }
}
