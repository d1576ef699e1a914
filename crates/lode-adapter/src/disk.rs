use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::store::{CacheStore, StoreStats};

// redb table: key = store key, value = 8-byte BE expiry (unix millis) + payload
const ENTRIES: TableDefinition<'_, &str, &[u8]> = TableDefinition::new("entries");

const EXPIRY_PREFIX_LEN: usize = 8;

/// On-disk store backed by a memory-mapped redb database.
///
/// Expiry is an absolute UTC millisecond timestamp prefixed to each value;
/// entries past their deadline read as absent. `purge_expired` reclaims
/// their space.
#[derive(Clone)]
pub struct DiskStore {
    db: Arc<RwLock<Database>>,
}

impl DiskStore {
    /// Open or create the store database
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)
            .with_context(|| format!("opening cache store at {}", path.display()))?;

        // Initialize table
        let write_txn = db.begin_write()?;
        {
            let _table = write_txn.open_table(ENTRIES)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
        })
    }

    /// Remove entries whose deadline has passed, returning how many were dropped.
    pub fn purge_expired(&self) -> Result<u64> {
        let now = Utc::now().timestamp_millis();
        let db = self.db.write();
        let write_txn = db.begin_write()?;
        let mut purged = 0;
        {
            let mut table = write_txn.open_table(ENTRIES)?;
            let expired: Vec<String> = table
                .iter()?
                .filter_map(|r| r.ok())
                .filter(|(_, v)| decode_deadline(v.value()).is_some_and(|d| d <= now))
                .map(|(k, _)| k.value().to_string())
                .collect();

            for key in expired {
                table.remove(key.as_str())?;
                purged += 1;
            }
        }
        write_txn.commit()?;
        Ok(purged)
    }
}

#[async_trait]
impl CacheStore for DiskStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Utc::now().timestamp_millis();
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(ENTRIES)?;

        let Some(raw) = table.get(key)? else {
            return Ok(None);
        };
        let raw = raw.value();
        match decode_deadline(raw) {
            Some(deadline) if deadline > now => Ok(Some(raw[EXPIRY_PREFIX_LEN..].to_vec())),
            Some(_) => Ok(None),
            None => {
                tracing::warn!(key, "dropping undecodable store entry");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let ttl_ms: i64 = ttl
            .as_millis()
            .try_into()
            .context("ttl out of range for store entry")?;
        let deadline = Utc::now()
            .timestamp_millis()
            .checked_add(ttl_ms)
            .context("store entry deadline overflow")?;

        let mut raw = Vec::with_capacity(EXPIRY_PREFIX_LEN + value.len());
        raw.extend_from_slice(&deadline.to_be_bytes());
        raw.extend_from_slice(value);

        let db = self.db.write();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(ENTRIES)?;
            table.insert(key, raw.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let now = Utc::now().timestamp_millis();
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(ENTRIES)?;

        let mut stats = StoreStats::default();
        for (_, value) in (table.iter()?).flatten() {
            stats.total_entries += 1;
            match decode_deadline(value.value()) {
                Some(deadline) if deadline > now => stats.live_entries += 1,
                _ => stats.expired_entries += 1,
            }
        }
        Ok(stats)
    }
}

fn decode_deadline(raw: &[u8]) -> Option<i64> {
    let prefix: [u8; EXPIRY_PREFIX_LEN] = raw.get(..EXPIRY_PREFIX_LEN)?.try_into().ok()?;
    Some(i64::from_be_bytes(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, DiskStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(&dir.path().join("store.redb")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn round_trips_values() {
        let (_dir, store) = open_temp();
        store
            .set("k", b"payload", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            store.get("k").await.unwrap().as_deref(),
            Some(&b"payload"[..])
        );
    }

    #[tokio::test]
    async fn absent_key_reads_as_none() {
        let (_dir, store) = open_temp();
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_entry_reads_as_none() {
        let (_dir, store) = open_temp();
        store
            .set("k", b"payload", Duration::from_millis(5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn purge_drops_only_expired_entries() {
        let (_dir, store) = open_temp();
        store.set("live", b"a", Duration::from_secs(60)).await.unwrap();
        store.set("dead", b"b", Duration::from_millis(5)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;

        assert_eq!(store.purge_expired().unwrap(), 1);
        assert!(store.get("live").await.unwrap().is_some());

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.live_entries, 1);
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.redb");
        {
            let store = DiskStore::open(&path).unwrap();
            store
                .set("k", b"payload", Duration::from_secs(60))
                .await
                .unwrap();
        }
        let store = DiskStore::open(&path).unwrap();
        assert_eq!(
            store.get("k").await.unwrap().as_deref(),
            Some(&b"payload"[..])
        );
    }
}
