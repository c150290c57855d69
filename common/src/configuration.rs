use anyhow::Result;
use config::Config;

pub const CONFIG_SECTION_ACCEPTOR: &str = "acceptor";
pub const CONFIG_SECTION_CHAIN_MANAGER: &str = "chain-manager";
pub const CONFIG_SECTION_ORPHAN_POOL: &str = "orphan-pool";
pub const CONFIG_SECTION_SYNC: &str = "sync";
pub const CONFIG_SECTION_RELAY: &str = "relay";

/// Extract one section of a process-wide config as a config of its own,
/// ready to be layered over a module's defaults. A missing section yields
/// an empty config.
pub fn section(config: &Config, name: &str) -> Result<Config> {
    let mut builder = Config::builder();
    if let Ok(table) = config.get_table(name) {
        for (key, value) in table {
            builder = builder.set_override(key, value)?;
        }
    }
    Ok(builder.build()?)
}

/// Layer `config` over the embedded `defaults` TOML
pub fn with_defaults(defaults: &str, config: &Config) -> Result<Config> {
    Ok(Config::builder()
        .add_source(config::File::from_str(defaults, config::FileFormat::Toml))
        .add_source(config.clone())
        .build()?)
}
