use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Orchestrator id recorded in workload identities when containers are
/// managed directly through the Docker runtime.
pub const DOCKER_ORCHESTRATOR_ID: &str = "docker";

#[derive(Debug, Error)]
#[error("failed to load configuration: {0}")]
pub struct ConfigError(#[from] figment::Error);

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Name this host registers endpoints under.
    pub hostname: String,
    /// Orchestrator component of workload identities.
    pub orchestrator_id: String,
    /// Path alias used to reach another namespace's `/proc`. Overridden
    /// when the manager itself runs containerised with the host's /proc
    /// mounted elsewhere.
    pub proc_root: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hostname: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".into()),
            orchestrator_id: DOCKER_ORCHESTRATOR_ID.into(),
            proc_root: "/proc".into(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("tether.toml"))
            .merge(Json::file("tether.json"))
            .merge(Env::prefixed("TETHER_"))
            .extract()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.orchestrator_id, DOCKER_ORCHESTRATOR_ID);
        assert_eq!(cfg.proc_root, "/proc");
        assert!(!cfg.hostname.is_empty());
    }
}
