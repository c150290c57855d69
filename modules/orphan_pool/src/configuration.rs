use anyhow::Result;
use config::Config;

#[derive(Clone, Debug, serde::Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct OrphanPoolConfig {
    pub capacity: usize,
    pub max_age_secs: u64,
}

impl OrphanPoolConfig {
    pub fn try_load(config: &Config) -> Result<Self> {
        let full_config = kestrel_common::configuration::with_defaults(
            include_str!("../config.default.toml"),
            config,
        )?;
        Ok(full_config.try_deserialize()?)
    }

    pub fn max_age_millis(&self) -> u64 {
        self.max_age_secs.saturating_mul(1000)
    }
}

impl Default for OrphanPoolConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            max_age_secs: 600,
        }
    }
}
