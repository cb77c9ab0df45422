//! ## GNSS wire codec
//!
//! Frame extractors for the two receiver protocol variants and for RTCM3,
//! plus the normalized [`FixRecord`] both receiver drivers decode into.
//!
//! The two receiver-facing frame formats documented here are length-prefixed
//! binary protocols validated by a trailing checksum; corrections riding on
//! the NTRIP side use the RTCM3 framing validated by CRC-24Q. All three
//! extractors share the same contract: given an append-only buffer, emit
//! zero or more complete validated frames and leave any unconsumed tail in
//! place for the next call.

pub mod fix;
pub mod rtcm;
pub mod ubx;
pub mod unicore;

pub use fix::{FixQuality, FixRecord};

use std::array::TryFromSliceError;

#[derive(Debug)]
pub enum Error {
    /// Frame header declared a length the buffer did not have room for (yet).
    Incomplete,
    /// Payload too short to contain the required message fields.
    InvalidInput,
    /// Checksum or CRC mismatch on an otherwise well-framed message.
    IntegrityFailed,
    TryFromSliceError(TryFromSliceError),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<TryFromSliceError> for Error {
    fn from(value: TryFromSliceError) -> Self {
        Self::TryFromSliceError(value)
    }
}
