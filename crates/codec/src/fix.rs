//! The normalized fix record both receiver variants decode into.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discrete trust label for a position solution.
///
/// Ordered `NONE < DIFFERENTIAL < RTK_FLOAT < RTK_FIXED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FixQuality {
    None,
    Differential,
    RtkFloat,
    RtkFixed,
}

impl std::fmt::Display for FixQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "NONE",
            Self::Differential => "DIFFERENTIAL",
            Self::RtkFloat => "RTK-FLOAT",
            Self::RtkFixed => "RTK-FIXED",
        };

        write!(f, "{s}")
    }
}

/// A normalized position/fix observation, produced by a receiver driver.
///
/// # Test
///
/// ```
/// use gnss_codec::{FixQuality, FixRecord};
///
/// let fix = FixRecord::empty();
/// assert_eq!(fix.quality, FixQuality::None);
/// assert_eq!(fix.satellites.get("GPS").copied().unwrap_or(0), 0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixRecord {
    pub timestamp: DateTime<Utc>,
    pub quality: FixQuality,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: f64,
    pub accuracy_m: f64,
    pub satellites: HashMap<String, u32>,
    pub pdop: f64,
    pub baseline_m: f64,
    pub correction_source: String,
    pub receiver_meta: HashMap<String, String>,
}

impl FixRecord {
    /// A placeholder record for a receiver that has not produced a fix yet.
    pub fn empty() -> Self {
        Self {
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            quality: FixQuality::None,
            latitude: 0.0,
            longitude: 0.0,
            altitude_m: 0.0,
            accuracy_m: 0.0,
            satellites: HashMap::new(),
            pdop: 0.0,
            baseline_m: 0.0,
            correction_source: "None".to_string(),
            receiver_meta: HashMap::new(),
        }
    }

    /// `latitude ∈ [-90, 90]`, `longitude ∈ [-180, 180]`, `accuracy_m ≥ 0`.
    pub fn is_well_formed(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
            && self.accuracy_m >= 0.0
    }
}
