use std::{fs::read_to_string, net::SocketAddr, str::FromStr, time::Duration};

use anyhow::Result;
use clap::Parser;
use receiver::ReceiverVariant;
use serde::{Deserialize, Serialize};

/// A receiver to auto-register and connect at startup.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct ReceiverEntry {
    pub id: String,
    ///
    /// which wire protocol the receiver speaks
    ///
    pub variant: ReceiverVariant,
    ///
    /// serial device path, e.g. /dev/ttyACM0
    ///
    pub path: String,
    #[serde(default = "ReceiverEntry::baud")]
    pub baud: u32,
}

impl ReceiverEntry {
    fn baud() -> u32 {
        115200
    }
}

/// An NTRIP mountpoint to auto-register at startup.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct MountEntry {
    pub host: String,
    pub port: u16,
    pub mount: String,
    pub username: String,
    pub password: String,
    ///
    /// lower priority values are preferred by the selection rule
    ///
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub description: String,
    #[serde(default = "MountEntry::enabled")]
    pub enabled: bool,
}

impl MountEntry {
    fn enabled() -> bool {
        true
    }
}

impl From<MountEntry> for ntrip::MountDescriptor {
    fn from(entry: MountEntry) -> Self {
        Self {
            host: entry.host,
            port: entry.port,
            mount: entry.mount,
            username: entry.username,
            password: entry.password,
            priority: entry.priority,
            description: entry.description,
            enabled: entry.enabled,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Server {
    ///
    /// address the control/status HTTP API listens on
    ///
    #[serde(default = "Server::api_listen")]
    pub api_listen: SocketAddr,
    ///
    /// identifies this aggregator instance in logs and status output
    ///
    #[serde(default = "Server::realm")]
    pub realm: String,
    ///
    /// receivers brought up automatically on startup
    ///
    #[serde(default)]
    pub receivers: Vec<ReceiverEntry>,
    ///
    /// ntrip mountpoints registered automatically on startup
    ///
    #[serde(default)]
    pub mounts: Vec<MountEntry>,
}

impl Server {
    fn api_listen() -> SocketAddr {
        "0.0.0.0:8080".parse().unwrap()
    }

    fn realm() -> String {
        "gnss-aggregator".to_string()
    }
}

impl Default for Server {
    fn default() -> Self {
        Self {
            api_listen: Self::api_listen(),
            realm: Self::realm(),
            receivers: Default::default(),
            mounts: Default::default(),
        }
    }
}

/// Failover and health-check tuning shared by every mountpoint in the pool.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Ntrip {
    ///
    /// a mount is skipped by selection once it reaches this many
    /// consecutive failed attempts, until its cooldown elapses
    ///
    #[serde(default = "Ntrip::max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    ///
    /// how long a failed mount sits out before it is eligible again
    ///
    #[serde(default = "Ntrip::retry_delay_secs")]
    pub retry_delay_secs: u64,
    ///
    /// interval of the background health/retry loop
    ///
    #[serde(default = "Ntrip::health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    ///
    /// fail over if the active mount produces no frames for this long
    ///
    #[serde(default = "Ntrip::data_timeout_secs")]
    pub data_timeout_secs: u64,
}

impl Ntrip {
    fn max_consecutive_failures() -> u32 {
        3
    }

    fn retry_delay_secs() -> u64 {
        30
    }

    fn health_check_interval_secs() -> u64 {
        60
    }

    fn data_timeout_secs() -> u64 {
        120
    }
}

impl Default for Ntrip {
    fn default() -> Self {
        Self {
            max_consecutive_failures: Self::max_consecutive_failures(),
            retry_delay_secs: Self::retry_delay_secs(),
            health_check_interval_secs: Self::health_check_interval_secs(),
            data_timeout_secs: Self::data_timeout_secs(),
        }
    }
}

impl From<&Ntrip> for ntrip::ManagerConfig {
    fn from(config: &Ntrip) -> Self {
        Self {
            max_consecutive_failures: config.max_consecutive_failures,
            retry_delay: Duration::from_secs(config.retry_delay_secs),
            health_check_interval: Duration::from_secs(config.health_check_interval_secs),
            data_timeout: Duration::from_secs(config.data_timeout_secs),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => return Err(format!("unknown log level: {value}")),
        })
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Log {
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub ntrip: Ntrip,
    #[serde(default)]
    pub log: Log,
}

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
)]
struct Cli {
    ///
    /// Specify the configuration file path
    ///
    /// Example: gnss-aggregator --config /etc/gnss-aggregator/config.toml
    ///
    #[arg(long, short)]
    config: String,
}

impl Config {
    ///
    /// Load configure from config file and command line parameters.
    ///
    pub fn load() -> Result<Self> {
        Ok(toml::from_str::<Self>(&read_to_string(
            &Cli::parse().config,
        )?)?)
    }
}
