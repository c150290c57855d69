use std::time::Duration;

use anyhow::Result;
use config::Config;

#[derive(Clone, Debug, serde::Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct RelayConfig {
    pub report_interval_secs: u64,
}

impl RelayConfig {
    pub fn try_load(config: &Config) -> Result<Self> {
        let full_config = kestrel_common::configuration::with_defaults(
            include_str!("../config.default.toml"),
            config,
        )?;
        Ok(full_config.try_deserialize()?)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            report_interval_secs: 5,
        }
    }
}
