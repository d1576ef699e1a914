use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    /// In-process map; contents die with the process
    Memory,
    /// redb database at `path`
    #[default]
    Disk,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackendKind,
    #[serde(default = "default_path")]
    pub path: PathBuf,
    /// Lifetime of a cached response, in seconds
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::default(),
            path: default_path(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

fn default_path() -> PathBuf {
    PathBuf::from("lode-cache.redb")
}

fn default_ttl_secs() -> u64 {
    600
}
