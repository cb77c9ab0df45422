use std::sync::{
    Arc,
    atomic::{AtomicI64, AtomicU64, Ordering},
};

use chrono::{DateTime, Utc};
use serde::Serialize;

pub trait Number {
    fn add(&self, value: u64);
    fn get(&self) -> u64;
}

#[derive(Default)]
pub struct Count(AtomicU64);

impl Number for Count {
    fn add(&self, value: u64) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A point-in-time read of the global correction counters.
#[derive(Debug, Clone, Serialize)]
pub struct StatisticsSnapshot {
    pub total_frames: u64,
    pub total_bytes: u64,
    pub last_frame: Option<DateTime<Utc>>,
}

/// Global counters for the RTCM3 correction stream fanned out to receivers.
///
/// Unlike a per-session statistics table, there is exactly one correction
/// stream in this aggregator, so counters live directly on the shared
/// instance rather than behind a keyed map.
#[derive(Clone, Default)]
pub struct Statistics(Arc<Inner>);

#[derive(Default)]
struct Inner {
    frames: Count,
    bytes: Count,
    last_frame_millis: AtomicI64,
}

impl Statistics {
    /// # Example
    ///
    /// ```
    /// use gnss_aggregator::statistics::Statistics;
    ///
    /// let statistics = Statistics::default();
    /// statistics.record_frame(22);
    /// statistics.record_frame(30);
    ///
    /// let snapshot = statistics.snapshot();
    /// assert_eq!(snapshot.total_frames, 2);
    /// assert_eq!(snapshot.total_bytes, 52);
    /// assert!(snapshot.last_frame.is_some());
    /// ```
    pub fn record_frame(&self, bytes: usize) {
        self.0.frames.add(1);
        self.0.bytes.add(bytes as u64);
        self.0
            .last_frame_millis
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        let millis = self.0.last_frame_millis.load(Ordering::Relaxed);
        StatisticsSnapshot {
            total_frames: self.0.frames.get(),
            total_bytes: self.0.bytes.get(),
            last_frame: (millis != 0).then(|| DateTime::from_timestamp_millis(millis).unwrap_or_default()),
        }
    }
}
