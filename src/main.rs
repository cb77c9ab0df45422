#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::sync::Arc;

use gnss_aggregator::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(Config::load()?);
    gnss_aggregator::logging::init(&config)?;

    if config.server.receivers.is_empty() {
        log::warn!("no receivers configured, starting with an empty receiver set");
    }

    gnss_aggregator::startup(config).await
}
