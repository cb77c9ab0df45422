pub mod aggregator;
pub mod api;
pub mod config;
pub mod logging;
pub mod statistics;
pub mod subscriber;

use std::{sync::Arc, time::Duration};

use codec::FixRecord;
use serde_json::json;

use self::{aggregator::Aggregator, config::Config, statistics::Statistics, subscriber::FixSubscriber};

#[rustfmt::skip]
static SOFTWARE: &str = concat!(
    "gnss-aggregator.",
    env!("CARGO_PKG_VERSION")
);

const NTRIP_EVENT_INTERVAL: Duration = Duration::from_secs(5);

/// Wires the aggregator, auto-registers the receivers and mounts named in
/// config, and starts the control/publish HTTP surface.
///
/// Exposed separately from `main` so integration tests can start the whole
/// process in-place, mirroring the root crate's own `startup()` convention.
pub async fn startup(config: Arc<Config>) -> anyhow::Result<()> {
    log::info!("starting {SOFTWARE}");

    let statistics = Statistics::default();
    let ntrip_config = ntrip::ManagerConfig::from(&config.ntrip);
    let aggregator = Aggregator::new(ntrip_config, statistics.clone());

    let position_sink: Arc<dyn FixSubscriber> = Arc::new(|receiver_id: &str, fix: &FixRecord| {
        api::events::send_with_stream("position_update", || {
            json!({
                "receiver_id": receiver_id,
                "state": fix,
                "timestamp": chrono::Utc::now(),
            })
        });
    });
    aggregator.subscribe(position_sink);

    for entry in &config.server.receivers {
        if aggregator.add_receiver(entry.id.clone(), entry.variant, entry.path.clone(), entry.baud)
            && aggregator.connect_receiver(&entry.id).await
        {
            log::info!("auto-connected receiver '{}'", entry.id);
        }
    }
    aggregator.start_all_streams();

    for mount in &config.server.mounts {
        aggregator.add_mount(mount.clone().into());
    }
    if !config.server.mounts.is_empty() && !aggregator.start_ntrip().await {
        log::warn!("no configured ntrip mount connected at startup, will keep retrying");
    }

    spawn_ntrip_event_broadcaster(aggregator.clone());

    api::start_server(config, aggregator, statistics).await?;

    Ok(())
}

/// Periodically publishes `ntrip_status`/`ntrip_statistics` SSE events,
/// since the mount manager itself has no per-transition event hook.
fn spawn_ntrip_event_broadcaster(aggregator: Arc<Aggregator>) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(NTRIP_EVENT_INTERVAL);
        loop {
            tick.tick().await;
            let status = aggregator.status();

            api::events::send_with_stream("ntrip_status", || {
                json!({
                    "enabled": status.ntrip.enabled,
                    "mounts": status.ntrip.mounts,
                    "timestamp": chrono::Utc::now(),
                })
            });

            api::events::send_with_stream("ntrip_statistics", || {
                json!({
                    "total_frames": status.statistics.total_frames,
                    "total_bytes": status.statistics.total_bytes,
                    "last_frame": status.statistics.last_frame,
                    "timestamp": chrono::Utc::now(),
                })
            });
        }
    });
}
