use std::{fs, path::PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

// Re-export all submodules
pub mod cache;
pub mod edge;
pub mod logging;
pub mod origin;
pub mod server;


// Re-export types from submodules for convenience
pub use cache::{CacheBackendKind, CacheConfig};
pub use edge::EdgeConfig;
pub use logging::LoggingConfig;
pub use origin::{BackoffStrategy, OriginConfig, ReliabilityConfig, RetryConfig};
pub use server::ServerConfig;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub origin: OriginConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub edge: EdgeConfig,
}

impl Config {
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let candidate = path.unwrap_or_else(|| PathBuf::from("lode.toml"));
        let mut config = if candidate.exists() {
            let raw = fs::read_to_string(&candidate)
                .with_context(|| format!("failed to read config {}", candidate.display()))?;
            toml::from_str::<Config>(&raw)
                .with_context(|| format!("invalid config {}", candidate.display()))?
        } else {
            if let Some(path) = candidate.to_str() {
                tracing::warn!("configuration file {path} not found, using defaults");
            } else {
                tracing::warn!("configuration file not found, using defaults");
            }
            Config::default()
        };
        config.edge.apply_env_overrides();
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let scheme = self.origin.url.scheme_str();
        if scheme != Some("https") && scheme != Some("http") {
            bail!("unsupported origin scheme {}", self.origin.url);
        }
        if self.cache.ttl_secs == 0 {
            bail!("cache.ttl_secs must be positive");
        }
        Ok(())
    }
}
