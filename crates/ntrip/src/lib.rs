//! NTRIP v2 mountpoint connection and failover manager.
//!
//! [`MountConnection`] owns a single streaming endpoint: the HTTP handshake,
//! RTCM3 frame extraction from the body, and connection-owned backoff.
//! [`MountManager`] holds an ordered pool of descriptors, runs the selection
//! rule and health monitor, and forwards validated frames to a caller
//! callback.

mod connection;
mod manager;

pub use connection::{ConnectError, MountConnection};
pub use manager::{ManagerConfig, MountManager};

use serde::{Deserialize, Serialize};

/// Immutable configuration for one NTRIP mountpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountDescriptor {
    pub host: String,
    pub port: u16,
    pub mount: String,
    pub username: String,
    pub password: String,
    /// Smaller is preferred.
    pub priority: i64,
    #[serde(default)]
    pub description: String,
    #[serde(default = "MountDescriptor::default_enabled")]
    pub enabled: bool,
}

impl MountDescriptor {
    fn default_enabled() -> bool {
        true
    }
}

/// Mutable runtime state tracked alongside a descriptor.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MountRuntimeState {
    pub connected: bool,
    pub last_attempt: Option<chrono::DateTime<chrono::Utc>>,
    pub consecutive_failures: u32,
    pub total_bytes: u64,
    pub total_frames: u64,
    pub last_data: Option<chrono::DateTime<chrono::Utc>>,
}
