use anyhow::Result;
use config::Config;

#[derive(Clone, Debug, serde::Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct AcceptorConfig {
    pub future_tolerance_ms: u64,
    pub max_block_gas: u64,
    pub signature_threads: usize,
    pub red_punish_lock_ms: u64,
    pub punishment_cache_size: usize,
    pub bifurcation_window: u64,
}

impl AcceptorConfig {
    pub fn try_load(config: &Config) -> Result<Self> {
        let full_config = kestrel_common::configuration::with_defaults(
            include_str!("../config.default.toml"),
            config,
        )?;
        Ok(full_config.try_deserialize()?)
    }

    /// Threads for the signature pool, resolving 0 to the machine's parallelism
    pub fn signature_thread_count(&self) -> usize {
        if self.signature_threads > 0 {
            return self.signature_threads;
        }
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
    }
}

impl Default for AcceptorConfig {
    fn default() -> Self {
        Self {
            future_tolerance_ms: 30_000,
            max_block_gas: 20_000_000,
            signature_threads: 0,
            red_punish_lock_ms: 259_200_000,
            punishment_cache_size: 1024,
            bifurcation_window: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_from_embedded_toml() {
        let config = AcceptorConfig::try_load(&Config::default()).unwrap();
        assert_eq!(config, AcceptorConfig::default());
        assert!(config.signature_thread_count() >= 1);
    }
}
