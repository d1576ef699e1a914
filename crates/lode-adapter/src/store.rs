use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

/// Key/value store with per-entry TTL semantics.
///
/// Values are opaque bytes. An entry whose TTL has elapsed is logically
/// absent: `get` returns `None` for it. There is no explicit delete path;
/// entries only leave the store by expiring.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Look up a live entry. Expired entries read as absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Insert or overwrite an entry with a bounded lifetime.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Counts over the current contents, for diagnostics.
    async fn stats(&self) -> Result<StoreStats>;
}

/// Read-through convenience: return the live entry for `key`, or compute
/// one, store it under `ttl`, and return it.
pub async fn get_or_set<F, Fut>(
    store: &dyn CacheStore,
    key: &str,
    ttl: Duration,
    compute: F,
) -> Result<Vec<u8>>
where
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = Result<Vec<u8>>> + Send,
{
    if let Some(existing) = store.get(key).await? {
        return Ok(existing);
    }
    let value = compute().await?;
    store.set(key, &value, ttl).await?;
    Ok(value)
}

/// Store contents summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub total_entries: u64,
    pub live_entries: u64,
    pub expired_entries: u64,
}
