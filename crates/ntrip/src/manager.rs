//! Mount selection, health monitoring, and failover.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::Utc;
use parking_lot::{Mutex as SyncMutex, RwLock};
use tokio::{sync::Notify, task::JoinHandle};

use crate::{connection::MountConnection, MountDescriptor, MountRuntimeState};

/// Tunables for mount selection, failover, and health polling.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// A mount is skipped by selection once it reaches this many
    /// consecutive failed attempts, until its cooldown elapses.
    pub max_consecutive_failures: u32,
    /// How long a failed mount sits out before `retry_failed_mounts` resets
    /// its failure count and makes it eligible for selection again.
    pub retry_delay: Duration,
    /// Interval of the background health/retry loop.
    pub health_check_interval: Duration,
    /// If the active mount produces no frames for this long, fail over.
    pub data_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            retry_delay: Duration::from_secs(30),
            health_check_interval: Duration::from_secs(60),
            data_timeout: Duration::from_secs(120),
        }
    }
}

struct Slot {
    descriptor: MountDescriptor,
    state: RwLock<MountRuntimeState>,
}

fn mount_key(descriptor: &MountDescriptor) -> String {
    format!("{}:{}/{}", descriptor.host, descriptor.port, descriptor.mount)
}

/// Owns an ordered pool of mountpoint descriptors, maintains exactly one
/// active streaming connection, and fails over to the next best candidate
/// on disconnect, data staleness, or outright connect failure.
///
/// Mounts are addressed by a `host:port/mount` key rather than vector
/// position, since [`MountManager::add_mount`] can grow the pool after
/// construction (and after the active mount has already been selected).
pub struct MountManager {
    slots: RwLock<Vec<Slot>>,
    config: ManagerConfig,
    active: SyncMutex<Option<String>>,
    stream_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    monitor_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    cancel_stream: Arc<Notify>,
    cancel_monitor: Arc<Notify>,
    on_frame: Arc<dyn Fn(Bytes) + Send + Sync>,
}

impl MountManager {
    /// `descriptors` need not be pre-sorted; selection always honors
    /// priority. `on_frame` is invoked with every CRC-valid RTCM3 frame
    /// (header, payload, and trailing CRC included) from the active mount.
    pub fn new(
        descriptors: Vec<MountDescriptor>,
        config: ManagerConfig,
        on_frame: impl Fn(Bytes) + Send + Sync + 'static,
    ) -> Self {
        let slots = descriptors
            .into_iter()
            .map(|descriptor| Slot {
                descriptor,
                state: RwLock::new(MountRuntimeState::default()),
            })
            .collect();

        Self {
            slots: RwLock::new(slots),
            config,
            active: SyncMutex::new(None),
            stream_task: tokio::sync::Mutex::new(None),
            monitor_task: tokio::sync::Mutex::new(None),
            cancel_stream: Arc::new(Notify::new()),
            cancel_monitor: Arc::new(Notify::new()),
            on_frame: Arc::new(on_frame),
        }
    }

    /// Append a new mountpoint to the pool. Eligible for selection on the
    /// next health-monitor tick or the next explicit (re)connect.
    pub fn add_mount(&self, descriptor: MountDescriptor) {
        self.slots.write().push(Slot {
            descriptor,
            state: RwLock::new(MountRuntimeState::default()),
        });
    }

    /// Snapshot of every mount's runtime state, in pool order.
    pub fn statuses(&self) -> Vec<(MountDescriptor, MountRuntimeState)> {
        self.slots
            .read()
            .iter()
            .map(|slot| (slot.descriptor.clone(), slot.state.read().clone()))
            .collect()
    }

    /// Connect to the best eligible mount and start the background health
    /// monitor. Idempotent: calling twice on an already-started manager is a
    /// no-op for the monitor, though it will still attempt a connection if
    /// none is active.
    ///
    /// Fails immediately if the pool holds no descriptors. Otherwise returns
    /// true iff some descriptor connected during this call.
    pub async fn start(self: &Arc<Self>) -> bool {
        if self.slots.read().is_empty() {
            log::error!("no ntrip mounts configured");
            return false;
        }

        let connected = self.connect_best().await;

        let mut guard = self.monitor_task.lock().await;
        if guard.is_none() {
            let this = self.clone();
            let cancel = self.cancel_monitor.clone();
            *guard = Some(tokio::spawn(async move {
                this.monitor_loop(cancel).await;
            }));
        }

        connected
    }

    /// Stop the monitor loop and disconnect the active mount.
    pub async fn stop(&self) {
        self.cancel_monitor.notify_waiters();
        if let Some(handle) = self.monitor_task.lock().await.take() {
            let _ = handle.await;
        }
        self.disconnect_active().await;
    }

    async fn monitor_loop(self: Arc<Self>, cancel: Arc<Notify>) {
        let mut tick = tokio::time::interval(self.config.health_check_interval);

        loop {
            tokio::select! {
                _ = cancel.notified() => break,
                _ = tick.tick() => {}
            }

            self.retry_failed_mounts();
            self.check_active_health().await;
        }
    }

    /// Reconnect if nothing is active, or fail over if the active mount has
    /// gone quiet for longer than `data_timeout`.
    async fn check_active_health(self: &Arc<Self>) {
        let active = self.active.lock().clone();

        let Some(key) = active else {
            self.connect_best().await;
            return;
        };

        let stale = {
            let slots = self.slots.read();
            match slots.iter().find(|s| mount_key(&s.descriptor) == key) {
                None => true,
                Some(slot) => {
                    let state = slot.state.read();
                    if !state.connected {
                        true
                    } else {
                        match state.last_data {
                            Some(last) => {
                                Utc::now().signed_duration_since(last).to_std().unwrap_or_default()
                                    > self.config.data_timeout
                            }
                            None => {
                                Utc::now()
                                    .signed_duration_since(state.last_attempt.unwrap_or_else(Utc::now))
                                    .to_std()
                                    .unwrap_or_default()
                                    > self.config.data_timeout
                            }
                        }
                    }
                }
            }
        };

        if stale {
            log::warn!("mount '{key}' stale or disconnected, failing over");
            self.disconnect_active().await;
            self.connect_best().await;
        }
    }

    /// Drop consecutive-failure counts for mounts that have cooled down
    /// since their last attempt, making them eligible for selection again.
    fn retry_failed_mounts(&self) {
        let now = Utc::now();
        for slot in self.slots.read().iter() {
            let mut state = slot.state.write();
            if state.consecutive_failures == 0 {
                continue;
            }
            if let Some(last_attempt) = state.last_attempt {
                let elapsed = now.signed_duration_since(last_attempt).to_std().unwrap_or_default();
                if elapsed > self.config.retry_delay {
                    state.consecutive_failures = 0;
                }
            }
        }
    }

    /// Selection rule: among enabled mounts under the failure threshold,
    /// prefer the lowest `(consecutive_failures, priority)` tuple, breaking
    /// remaining ties by pool order.
    fn best_candidate(&self) -> Option<String> {
        self.candidates().into_iter().next()
    }

    /// Every eligible mount, ordered by the same `(consecutive_failures,
    /// priority, pool order)` tuple used by `best_candidate`.
    fn candidates(&self) -> Vec<String> {
        let mut ranked: Vec<_> = self
            .slots
            .read()
            .iter()
            .enumerate()
            .filter(|(_, slot)| {
                let state = slot.state.read();
                slot.descriptor.enabled && state.consecutive_failures < self.config.max_consecutive_failures
            })
            .map(|(order, slot)| {
                let state = slot.state.read();
                ((state.consecutive_failures, slot.descriptor.priority, order), mount_key(&slot.descriptor))
            })
            .collect();

        ranked.sort_by_key(|(rank, _)| *rank);
        ranked.into_iter().map(|(_, key)| key).collect()
    }

    /// Try every eligible mount in selection order until one connects.
    /// Returns true iff a connection was established.
    async fn connect_best(self: &Arc<Self>) -> bool {
        let candidates = self.candidates();
        if candidates.is_empty() {
            log::error!("no eligible ntrip mount available");
            return false;
        }

        for key in candidates {
            if self.attempt_connection(key).await {
                return true;
            }
        }

        false
    }

    async fn attempt_connection(self: &Arc<Self>, key: String) -> bool {
        self.disconnect_active().await;

        let descriptor = {
            let slots = self.slots.read();
            match slots.iter().find(|s| mount_key(&s.descriptor) == key) {
                Some(slot) => slot.descriptor.clone(),
                None => return false,
            }
        };

        self.set_state(&key, |state| state.last_attempt = Some(Utc::now()));

        match MountConnection::open(&descriptor).await {
            Ok(connection) => {
                self.set_state(&key, |state| {
                    state.connected = true;
                    state.consecutive_failures = 0;
                });
                *self.active.lock() = Some(key.clone());
                log::info!("connected to ntrip mount '{}'", descriptor.mount);

                let this = self.clone();
                let cancel = self.cancel_stream.clone();
                let stream_key = key.clone();
                let handle = tokio::spawn(async move {
                    this.stream_loop(stream_key, connection, cancel).await;
                });
                *self.stream_task.lock().await = Some(handle);
                true
            }
            Err(err) => {
                self.set_state(&key, |state| {
                    state.connected = false;
                    state.consecutive_failures += 1;
                });
                log::warn!("failed to connect to ntrip mount '{}': {err}", descriptor.mount);
                false
            }
        }
    }

    async fn stream_loop(self: Arc<Self>, key: String, mut connection: MountConnection, cancel: Arc<Notify>) {
        loop {
            let poll = tokio::select! {
                _ = cancel.notified() => break,
                result = connection.poll() => result,
            };

            match poll {
                Ok(outcome) if outcome.bytes_read == 0 => {
                    log::warn!("ntrip mount '{key}' closed the stream");
                    self.set_state(&key, |state| state.connected = false);
                    break;
                }
                Ok(outcome) => {
                    let frame_count = outcome.outcome.frames.len() as u64;
                    let byte_count = outcome.bytes_read as u64;
                    let had_frames = frame_count > 0;

                    self.set_state(&key, |state| {
                        state.total_bytes += byte_count;
                        state.total_frames += frame_count;
                        if had_frames {
                            state.last_data = Some(Utc::now());
                        }
                    });

                    for frame in outcome.outcome.frames {
                        (self.on_frame)(frame.bytes);
                    }
                }
                Err(err) => {
                    log::warn!("ntrip mount '{key}' read error: {err}");
                    self.set_state(&key, |state| {
                        state.connected = false;
                        state.consecutive_failures += 1;
                    });
                    break;
                }
            }
        }
    }

    fn set_state(&self, key: &str, mutate: impl FnOnce(&mut MountRuntimeState)) {
        if let Some(slot) = self.slots.read().iter().find(|s| mount_key(&s.descriptor) == key) {
            mutate(&mut slot.state.write());
        }
    }

    async fn disconnect_active(&self) {
        self.cancel_stream.notify_waiters();

        if let Some(handle) = self.stream_task.lock().await.take() {
            let _ = handle.await;
        }

        if let Some(key) = self.active.lock().take() {
            self.set_state(&key, |state| state.connected = false);
        }
    }
}

#[allow(dead_code)]
fn _assert_send_sync() {
    fn check<T: Send + Sync>() {}
    check::<MountManager>();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(mount: &str, priority: i64) -> MountDescriptor {
        MountDescriptor {
            host: "localhost".to_string(),
            port: 2101,
            mount: mount.to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
            priority,
            description: String::new(),
            enabled: true,
        }
    }

    fn set_failures(manager: &MountManager, mount: &str, failures: u32) {
        let slots = manager.slots.read();
        let slot = slots.iter().find(|s| s.descriptor.mount == mount).unwrap();
        slot.state.write().consecutive_failures = failures;
    }

    #[test]
    fn best_candidate_prefers_lower_failures_then_priority() {
        let manager = MountManager::new(
            vec![descriptor("A", 1), descriptor("B", 0)],
            ManagerConfig::default(),
            |_| {},
        );

        assert_eq!(manager.best_candidate(), Some("localhost:2101/B".to_string()));

        set_failures(&manager, "B", 1);
        assert_eq!(manager.best_candidate(), Some("localhost:2101/A".to_string()));
    }

    #[test]
    fn disabled_mount_is_never_selected() {
        let mut b = descriptor("B", 0);
        b.enabled = false;
        let manager = MountManager::new(vec![descriptor("A", 1), b], ManagerConfig::default(), |_| {});

        assert_eq!(manager.best_candidate(), Some("localhost:2101/A".to_string()));
    }

    #[test]
    fn mount_past_failure_threshold_is_skipped() {
        let manager = MountManager::new(
            vec![descriptor("A", 1), descriptor("B", 0)],
            ManagerConfig {
                max_consecutive_failures: 2,
                ..ManagerConfig::default()
            },
            |_| {},
        );

        set_failures(&manager, "B", 2);
        assert_eq!(manager.best_candidate(), Some("localhost:2101/A".to_string()));
    }

    #[test]
    fn retry_failed_mounts_resets_after_cooldown() {
        let manager = MountManager::new(
            vec![descriptor("A", 0)],
            ManagerConfig {
                retry_delay: Duration::from_secs(0),
                ..ManagerConfig::default()
            },
            |_| {},
        );

        set_failures(&manager, "A", 3);
        manager.slots.read()[0].state.write().last_attempt = Some(Utc::now() - chrono::Duration::seconds(1));

        manager.retry_failed_mounts();
        assert_eq!(manager.slots.read()[0].state.read().consecutive_failures, 0);
    }

    #[test]
    fn add_mount_makes_a_new_descriptor_eligible_for_selection() {
        let manager = MountManager::new(vec![descriptor("A", 5)], ManagerConfig::default(), |_| {});
        assert_eq!(manager.best_candidate(), Some("localhost:2101/A".to_string()));

        manager.add_mount(descriptor("B", 0));
        assert_eq!(manager.best_candidate(), Some("localhost:2101/B".to_string()));
    }
}
