use rama::http::Uri;
use serde::Deserialize;

/// Where content is actually produced. The gateway forwards every
/// validated, cache-missing request here.
#[derive(Debug, Clone, Deserialize)]
pub struct OriginConfig {
    #[serde(default = "default_origin_url", with = "serde_url")]
    pub url: Uri,
    #[serde(default, with = "serde_url_vec")]
    pub fallback_urls: Vec<Uri>,
    #[serde(default)]
    pub reliability: ReliabilityConfig,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            url: default_origin_url(),
            fallback_urls: Vec::new(),
            reliability: ReliabilityConfig::default(),
        }
    }
}

fn default_origin_url() -> Uri {
    Uri::from_static("http://127.0.0.1:9080/")
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReliabilityConfig {
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    #[default]
    Exponential,
    Fibonacci,
    Constant,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per origin
    #[serde(default = "RetryConfig::default_max_attempts")]
    pub max_attempts: u32,
    /// Initial backoff duration (milliseconds)
    #[serde(default = "RetryConfig::default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Maximum backoff duration (seconds)
    #[serde(default = "RetryConfig::default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    #[serde(default)]
    pub backoff_strategy: BackoffStrategy,
    /// Jitter factor (0.0 = no jitter, 1.0 = full jitter)
    #[serde(default = "RetryConfig::default_jitter_factor")]
    pub jitter_factor: f64,
}

impl RetryConfig {
    fn default_max_attempts() -> u32 {
        3
    }

    fn default_initial_backoff_ms() -> u64 {
        100
    }

    fn default_max_backoff_secs() -> u64 {
        2
    }

    fn default_jitter_factor() -> f64 {
        1.0 // full jitter, spreads out retry bursts
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: Self::default_max_attempts(),
            initial_backoff_ms: Self::default_initial_backoff_ms(),
            max_backoff_secs: Self::default_max_backoff_secs(),
            backoff_strategy: BackoffStrategy::default(),
            jitter_factor: Self::default_jitter_factor(),
        }
    }
}

mod serde_url {
    use rama::http::Uri;
    use serde::{Deserialize, Deserializer};
    use std::str::FromStr;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Uri, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Uri::from_str(&s).map_err(serde::de::Error::custom)
    }
}

mod serde_url_vec {
    use rama::http::Uri;
    use serde::{Deserialize, Deserializer};
    use std::str::FromStr;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Uri>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let list = Vec::<String>::deserialize(deserializer)?;
        list.into_iter()
            .map(|s| Uri::from_str(&s).map_err(serde::de::Error::custom))
            .collect()
    }
}
