//! Receiver drivers: one instance owns one serial link, runs the matching
//! frame extractor, and exposes a last-write-wins cached [`FixRecord`].
//!
//! The two wire variants are modeled as a closed tagged enum rather than a
//! trait object, since the variant set is fixed and known up front.

mod engine;

use std::sync::Arc;

use bytes::Bytes;
use codec::FixRecord;
use engine::{Engine, Variant};
use serde::{Deserialize, Serialize};

#[derive(Debug)]
pub enum Error {
    Connection(String),
    Protocol(String),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connection(msg) => write!(f, "connection error: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
        }
    }
}

/// Which wire protocol a receiver speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiverVariant {
    Ubx,
    Unicore,
}

/// Lifecycle of a single receiver registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Lifecycle {
    Disconnected,
    Connecting,
    Connected,
    Streaming,
    Error,
}

/// One receiver's driver, tagged by [`ReceiverVariant`].
pub enum ReceiverDriver {
    Ubx(Engine),
    Unicore(Engine),
}

impl ReceiverDriver {
    pub fn new(variant: ReceiverVariant) -> Self {
        match variant {
            ReceiverVariant::Ubx => Self::Ubx(Engine::new(Variant::Ubx)),
            ReceiverVariant::Unicore => Self::Unicore(Engine::new(Variant::Unicore)),
        }
    }

    pub fn variant(&self) -> ReceiverVariant {
        match self {
            Self::Ubx(_) => ReceiverVariant::Ubx,
            Self::Unicore(_) => ReceiverVariant::Unicore,
        }
    }

    fn engine(&self) -> &Engine {
        match self {
            Self::Ubx(e) | Self::Unicore(e) => e,
        }
    }

    /// Open the serial link. Does not start reading yet.
    pub async fn connect(&self, path: &str, baud: u32) -> Result<(), Error> {
        self.engine().connect(path, baud).await
    }

    /// Launch the background reader task. Fails with [`Error::Protocol`] if
    /// not connected.
    pub fn start_stream(&self) -> Result<(), Error> {
        self.engine().start_stream()
    }

    /// Most recently decoded fix, if any (last-write-wins, no queue).
    pub fn current_fix(&self) -> Option<FixRecord> {
        self.engine().current_fix()
    }

    /// Write opaque correction bytes to the serial output side. Never
    /// blocks the reader task. Returns `false` if not connected or the
    /// write fails.
    pub fn inject(&self, bytes: Bytes) -> bool {
        self.engine().inject(bytes)
    }

    /// Stop the reader, close the link, clear the cached fix. Idempotent.
    pub async fn disconnect(&self) {
        self.engine().disconnect().await
    }

    /// `true` once the reader task has given up after repeated read
    /// failures; the owning registration should transition to ERROR.
    pub fn has_errored(&self) -> bool {
        self.engine().has_errored()
    }
}

/// Registration metadata the aggregator keeps alongside a live driver.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub id: String,
    pub variant: ReceiverVariant,
    pub path: String,
    pub baud: u32,
}

pub type SharedDriver = Arc<ReceiverDriver>;
