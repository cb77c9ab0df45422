use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use codec::FixRecord;
use ntrip::{ManagerConfig, MountDescriptor, MountManager};
use parking_lot::{Mutex as SyncMutex, RwLock};
use receiver::{Lifecycle, ReceiverConfig, ReceiverDriver, ReceiverVariant, SharedDriver};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::statistics::{Statistics, StatisticsSnapshot};
use crate::subscriber::FixSubscriber;

/// Enforced by `add_receiver`: at most two concurrent serial links.
const MAX_RECEIVERS: usize = 2;
const MONITOR_INTERVAL: Duration = Duration::from_millis(100);

struct Registration {
    config: ReceiverConfig,
    driver: SharedDriver,
    lifecycle: RwLock<Lifecycle>,
    last_fix: RwLock<Option<FixRecord>>,
    monitor: SyncMutex<Option<JoinHandle<()>>>,
}

/// Snapshot of one receiver's registration, returned by `status()`.
#[derive(Debug, Clone, Serialize)]
pub struct ReceiverStatus {
    pub id: String,
    pub variant: ReceiverVariant,
    pub path: String,
    pub baud: u32,
    pub lifecycle: Lifecycle,
    pub fix: Option<FixRecord>,
}

/// Snapshot of NTRIP state, returned by `status()`.
#[derive(Debug, Clone, Serialize)]
pub struct NtripStatus {
    pub enabled: bool,
    pub mounts: Vec<(MountDescriptor, ntrip::MountRuntimeState)>,
}

/// A full point-in-time read of the aggregator, served by `GET /status`.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatorStatus {
    pub receivers: Vec<ReceiverStatus>,
    pub ntrip: NtripStatus,
    pub statistics: StatisticsSnapshot,
}

/// Owns the receiver set and the NTRIP mount manager, fans corrections out
/// to every live receiver, and dispatches fix updates to subscribers.
///
/// Mirrors the root crate's single shared-state singleton: constructed once
/// in `startup()`, held as `Arc<Aggregator>` by the API router state and by
/// every task it spawns.
pub struct Aggregator {
    receivers: RwLock<Vec<Arc<Registration>>>,
    mount_manager: RwLock<Option<Arc<MountManager>>>,
    ntrip_config: ManagerConfig,
    ntrip_started: SyncMutex<bool>,
    subscribers: RwLock<Vec<Arc<dyn FixSubscriber>>>,
    statistics: Statistics,
}

impl Aggregator {
    pub fn new(ntrip_config: ManagerConfig, statistics: Statistics) -> Arc<Self> {
        Arc::new(Self {
            receivers: RwLock::new(Vec::with_capacity(MAX_RECEIVERS)),
            mount_manager: RwLock::new(None),
            ntrip_config,
            ntrip_started: SyncMutex::new(false),
            subscribers: RwLock::new(Vec::new()),
            statistics,
        })
    }

    /// Registers a new receiver if capacity allows and `id` is unique.
    /// Lifecycle starts at `DISCONNECTED`.
    pub fn add_receiver(&self, id: impl Into<String>, variant: ReceiverVariant, path: impl Into<String>, baud: u32) -> bool {
        let id = id.into();
        let mut receivers = self.receivers.write();

        if receivers.len() >= MAX_RECEIVERS || receivers.iter().any(|r| r.config.id == id) {
            return false;
        }

        let config = ReceiverConfig {
            id: id.clone(),
            variant,
            path: path.into(),
            baud,
        };

        receivers.push(Arc::new(Registration {
            config,
            driver: Arc::new(ReceiverDriver::new(variant)),
            lifecycle: RwLock::new(Lifecycle::Disconnected),
            last_fix: RwLock::new(None),
            monitor: SyncMutex::new(None),
        }));

        log::info!("registered receiver '{id}'");
        true
    }

    /// Disconnects the receiver (if connected) and drops its registration.
    pub async fn remove_receiver(&self, id: &str) {
        let registration = {
            let mut receivers = self.receivers.write();
            let index = receivers.iter().position(|r| r.config.id == id);
            index.map(|i| receivers.remove(i))
        };

        if let Some(registration) = registration {
            Self::disconnect_registration(&registration).await;
            log::info!("removed receiver '{id}'");
        }
    }

    fn find(&self, id: &str) -> Option<Arc<Registration>> {
        self.receivers.read().iter().find(|r| r.config.id == id).cloned()
    }

    /// `DISCONNECTED` → `CONNECTING` → `CONNECTED` or `ERROR`.
    pub async fn connect_receiver(&self, id: &str) -> bool {
        let Some(registration) = self.find(id) else {
            return false;
        };

        *registration.lifecycle.write() = Lifecycle::Connecting;

        match registration.driver.connect(&registration.config.path, registration.config.baud).await {
            Ok(()) => {
                *registration.lifecycle.write() = Lifecycle::Connected;
                log::info!("receiver '{id}' connected");
                true
            }
            Err(err) => {
                *registration.lifecycle.write() = Lifecycle::Error;
                log::warn!("receiver '{id}' failed to connect: {err}");
                false
            }
        }
    }

    /// For every `CONNECTED` receiver, starts its reader and spawns a
    /// per-receiver monitor task polling `current_fix()` at ~10 Hz.
    pub fn start_all_streams(self: &Arc<Self>) {
        let candidates: Vec<_> = self
            .receivers
            .read()
            .iter()
            .filter(|r| *r.lifecycle.read() == Lifecycle::Connected)
            .cloned()
            .collect();

        for registration in candidates {
            if let Err(err) = registration.driver.start_stream() {
                *registration.lifecycle.write() = Lifecycle::Error;
                log::warn!("receiver '{}' failed to start streaming: {err}", registration.config.id);
                continue;
            }

            *registration.lifecycle.write() = Lifecycle::Streaming;

            let this = self.clone();
            let monitored = registration.clone();
            let handle = tokio::spawn(async move { this.monitor_receiver(monitored).await });
            *registration.monitor.lock() = Some(handle);
        }
    }

    /// Stops NTRIP first, then disconnects every receiver.
    pub async fn stop_all_streams(&self) {
        self.stop_ntrip().await;

        let registrations = self.receivers.read().clone();
        for registration in registrations {
            Self::disconnect_registration(&registration).await;
        }
    }

    async fn disconnect_registration(registration: &Arc<Registration>) {
        if let Some(handle) = registration.monitor.lock().take() {
            handle.abort();
            let _ = handle.await;
        }

        registration.driver.disconnect().await;
        *registration.lifecycle.write() = Lifecycle::Disconnected;
        *registration.last_fix.write() = None;
    }

    async fn monitor_receiver(self: Arc<Self>, registration: Arc<Registration>) {
        let mut tick = tokio::time::interval(MONITOR_INTERVAL);

        loop {
            tick.tick().await;

            if registration.driver.has_errored() {
                *registration.lifecycle.write() = Lifecycle::Error;
                log::warn!("receiver '{}' errored, stopping monitor", registration.config.id);
                return;
            }

            let Some(fix) = registration.driver.current_fix() else {
                continue;
            };

            let changed = {
                let mut last = registration.last_fix.write();
                let changed = last.as_ref() != Some(&fix);
                if changed {
                    *last = Some(fix.clone());
                }
                changed
            };

            if changed {
                self.dispatch_fix(&registration.config.id, &fix);
            }
        }
    }

    fn dispatch_fix(&self, receiver_id: &str, fix: &FixRecord) {
        for subscriber in self.subscribers.read().iter() {
            subscriber.on_fix(receiver_id, fix);
        }
    }

    /// Forwards opaque bytes to the named receiver's driver. `false` if the
    /// receiver is unknown or the write fails.
    pub fn inject_to(&self, id: &str, bytes: Bytes) -> bool {
        match self.find(id) {
            Some(registration) => registration.driver.inject(bytes),
            None => false,
        }
    }

    /// Delegates to the mount manager, lazily constructing it on first call.
    pub fn add_mount(self: &Arc<Self>, descriptor: MountDescriptor) {
        let manager = self.mount_manager_or_init();
        manager.add_mount(descriptor);
    }

    fn mount_manager_or_init(self: &Arc<Self>) -> Arc<MountManager> {
        if let Some(manager) = self.mount_manager.read().as_ref() {
            return manager.clone();
        }

        let mut guard = self.mount_manager.write();
        if let Some(manager) = guard.as_ref() {
            return manager.clone();
        }

        let this = self.clone();
        let manager = Arc::new(MountManager::new(Vec::new(), self.ntrip_config.clone(), move |frame| {
            this.on_correction_frame(frame);
        }));
        *guard = Some(manager.clone());
        manager
    }

    fn on_correction_frame(&self, frame: Bytes) {
        self.statistics.record_frame(frame.len());

        let accepted = self
            .receivers
            .read()
            .iter()
            .filter(|r| matches!(*r.lifecycle.read(), Lifecycle::Connected | Lifecycle::Streaming))
            .filter(|r| r.driver.inject(frame.clone()))
            .count();

        if accepted == 0 {
            log::warn!("correction frame of {} bytes accepted by zero receivers", frame.len());
        } else {
            log::debug!("correction frame of {} bytes forwarded to {accepted} receiver(s)", frame.len());
        }
    }

    /// Starts the mount manager (constructing it first if `add_mount` was
    /// never called) and its background health monitor. Returns true iff a
    /// mount connected during this call.
    pub async fn start_ntrip(self: &Arc<Self>) -> bool {
        let manager = self.mount_manager_or_init();
        let connected = manager.start().await;
        *self.ntrip_started.lock() = true;
        connected
    }

    pub async fn stop_ntrip(&self) {
        if let Some(manager) = self.mount_manager.read().as_ref().cloned() {
            manager.stop().await;
        }
        *self.ntrip_started.lock() = false;
    }

    pub fn subscribe(&self, sink: Arc<dyn FixSubscriber>) {
        self.subscribers.write().push(sink);
    }

    pub fn unsubscribe(&self, sink: &Arc<dyn FixSubscriber>) {
        self.subscribers.write().retain(|existing| !Arc::ptr_eq(existing, sink));
    }

    pub fn status(&self) -> AggregatorStatus {
        let receivers = self
            .receivers
            .read()
            .iter()
            .map(|r| ReceiverStatus {
                id: r.config.id.clone(),
                variant: r.config.variant,
                path: r.config.path.clone(),
                baud: r.config.baud,
                lifecycle: *r.lifecycle.read(),
                fix: r.last_fix.read().clone(),
            })
            .collect();

        let ntrip = NtripStatus {
            enabled: *self.ntrip_started.lock(),
            mounts: self
                .mount_manager
                .read()
                .as_ref()
                .map(|manager| manager.statuses())
                .unwrap_or_default(),
        };

        AggregatorStatus {
            receivers,
            ntrip,
            statistics: self.statistics.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator() -> Arc<Aggregator> {
        Aggregator::new(ManagerConfig::default(), Statistics::default())
    }

    #[test]
    fn add_receiver_enforces_capacity_and_uniqueness() {
        let aggregator = aggregator();

        assert!(aggregator.add_receiver("a", ReceiverVariant::Ubx, "/dev/ttyACM0", 115200));
        assert!(aggregator.add_receiver("b", ReceiverVariant::Unicore, "/dev/ttyACM1", 115200));
        assert!(!aggregator.add_receiver("c", ReceiverVariant::Ubx, "/dev/ttyACM2", 115200));
        assert!(!aggregator.add_receiver("a", ReceiverVariant::Ubx, "/dev/ttyACM3", 115200));

        assert_eq!(aggregator.receivers.read().len(), 2);
    }

    #[tokio::test]
    async fn remove_receiver_restores_prior_registration_count() {
        let aggregator = aggregator();
        aggregator.add_receiver("a", ReceiverVariant::Ubx, "/dev/ttyACM0", 115200);

        let before = aggregator.receivers.read().len();
        aggregator.remove_receiver("a").await;

        assert_eq!(aggregator.receivers.read().len(), before - 1);
    }

    #[test]
    fn inject_to_unknown_receiver_returns_false() {
        let aggregator = aggregator();
        assert!(!aggregator.inject_to("missing", Bytes::from_static(b"\xd3\x00\x00")));
    }
}
