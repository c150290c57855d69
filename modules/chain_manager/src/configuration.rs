use anyhow::Result;
use config::Config;

#[derive(Clone, Debug, serde::Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ChainManagerConfig {
    pub master_window: usize,
}

impl ChainManagerConfig {
    pub fn try_load(config: &Config) -> Result<Self> {
        let full_config = kestrel_common::configuration::with_defaults(
            include_str!("../config.default.toml"),
            config,
        )?;
        Ok(full_config.try_deserialize()?)
    }
}

impl Default for ChainManagerConfig {
    fn default() -> Self {
        Self {
            master_window: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_from_embedded_toml() {
        let config = ChainManagerConfig::try_load(&Config::default()).unwrap();
        assert_eq!(config, ChainManagerConfig::default());
    }
}
