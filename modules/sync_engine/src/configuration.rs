use std::time::Duration;

use anyhow::Result;
use config::Config;

#[derive(Clone, Debug, serde::Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct SyncConfig {
    pub max_rollback_attempts: u32,
    pub batch_size: u64,
    pub max_parallel: usize,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub min_connected_peers: usize,
    pub rollback_quorum_ratio: f64,
    pub session_timeout_secs: u64,
}

impl SyncConfig {
    pub fn try_load(config: &Config) -> Result<Self> {
        let full_config = kestrel_common::configuration::with_defaults(
            include_str!("../config.default.toml"),
            config,
        )?;
        Ok(full_config.try_deserialize()?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_rollback_attempts: 20,
            batch_size: 100,
            max_parallel: 4,
            request_timeout_secs: 10,
            max_retries: 3,
            min_connected_peers: 4,
            rollback_quorum_ratio: 0.5,
            session_timeout_secs: 600,
        }
    }
}
