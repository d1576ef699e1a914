use serde::Deserialize;

/// Deployment-identity signals.
///
/// `service_version` doubles as the local/dev detector: when it is missing
/// or empty, this process is not a deployed edge node and response caching
/// is disabled. `pop` names the point of presence surfaced in diagnostic
/// headers. Both can come from config or from the environment, with the
/// environment winning.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EdgeConfig {
    #[serde(default)]
    pub service_version: Option<String>,
    #[serde(default)]
    pub pop: Option<String>,
}

impl EdgeConfig {
    pub fn apply_env_overrides(&mut self) {
        if let Ok(version) = std::env::var("LODE_SERVICE_VERSION") {
            self.service_version = Some(version);
        }
        if let Ok(pop) = std::env::var("LODE_POP") {
            self.pop = Some(pop);
        }
    }

    pub fn is_deployed(&self) -> bool {
        self.service_version.as_deref().is_some_and(|v| !v.is_empty())
    }
}
