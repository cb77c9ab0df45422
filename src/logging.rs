use crate::config::Config;

/// Initialize the global logger at the level configured in `[log]`.
pub fn init(config: &Config) -> anyhow::Result<()> {
    simple_logger::init_with_level(config.log.level.as_level())?;
    Ok(())
}
