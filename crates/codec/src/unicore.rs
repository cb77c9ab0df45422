//! Frame extractor for the fixed-header receiver protocol (variant B), plus
//! decoding of its "best position" message (id 42) into a [`FixRecord`].
//!
//! Frame layout: `[0xAA 0x44 0x12 0x1C][24-byte header tail][payload][4-byte trailer]`.
//! The header's payload-length field sits at byte offset 8; the trailing
//! 4-byte CRC is read but, per the documented deviation from the source,
//! not validated on the core path.

use bytes::{Buf, Bytes, BytesMut};
use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::{Error, FixQuality, FixRecord};

pub const SYNC: [u8; 4] = [0xAA, 0x44, 0x12, 0x1C];

/// Message id of the best-position record this driver requires.
pub const MSG_BESTPOS: u16 = 42;

const HEADER_LEN: usize = 28;
const TRAILER_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnicoreFrame {
    pub message_id: u16,
    pub payload: Bytes,
}

/// Drain every complete frame currently buffered (length-consistent only;
/// the trailing CRC is not validated per the spec's documented deviation).
///
/// # Test
///
/// ```
/// use bytes::BytesMut;
/// use gnss_codec::unicore::extract;
///
/// let payload = [0xAAu8, 0xBB, 0xCC];
/// let mut buf = BytesMut::new();
/// buf.extend_from_slice(&[0xAA, 0x44, 0x12, 0x1C]);
/// buf.extend_from_slice(&[0u8; 20]); // header tail up to the length field
/// buf[8..10].copy_from_slice(&(payload.len() as u16).to_le_bytes());
/// buf.extend_from_slice(&payload);
/// buf.extend_from_slice(&[0u8; 4]); // trailer, unchecked
///
/// let frames = extract(&mut buf);
/// assert_eq!(frames.len(), 1);
/// assert_eq!(frames[0].payload.as_ref(), &payload);
/// assert!(buf.is_empty());
/// ```
pub fn extract(buf: &mut BytesMut) -> Vec<UnicoreFrame> {
    let mut frames = Vec::new();

    loop {
        if !resync(buf) {
            break;
        }

        if buf.len() < HEADER_LEN {
            break;
        }

        let length = u16::from_le_bytes([buf[8], buf[9]]) as usize;
        let total = HEADER_LEN + length + TRAILER_LEN;

        if buf.len() < total {
            break;
        }

        let message_id = u16::from_le_bytes([buf[4], buf[5]]);
        let payload = Bytes::copy_from_slice(&buf[HEADER_LEN..HEADER_LEN + length]);
        frames.push(UnicoreFrame { message_id, payload });

        buf.advance(total);
    }

    frames
}

fn resync(buf: &mut BytesMut) -> bool {
    loop {
        if buf.len() >= SYNC.len() && buf[..SYNC.len()] == SYNC {
            return true;
        }

        let is_partial_prefix = !buf.is_empty() && buf.len() < SYNC.len() && buf[..] == SYNC[..buf.len()];

        if is_partial_prefix {
            return false;
        }

        if buf.is_empty() {
            return false;
        }

        buf.advance(1);
    }
}

/// ASCII solution-status string → fix quality, per the authoritative table.
pub fn quality_from_status(status: &str) -> FixQuality {
    match status {
        "SOL_COMPUTED" => FixQuality::RtkFixed,
        "COV_TRACE" | "TEST_DIST" | "V_H_LIMIT" | "VARIANCE" | "RESIDUALS" | "DELTA_POS"
        | "NEGATIVE_VAR" | "INS_INACTIVE" | "INS_ALIGNING" | "INS_BAD" | "IMU_UNPLUGGED" => {
            FixQuality::Differential
        }
        "INTEGRITY_WARNING" => FixQuality::RtkFloat,
        _ => FixQuality::None,
    }
}

fn gps_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1980, 1, 6, 0, 0, 0).unwrap()
}

/// Decode a best-position (id 42) payload into a normalized [`FixRecord`].
pub fn decode_bestpos(payload: &[u8]) -> Result<FixRecord, Error> {
    if payload.len() < 65 {
        return Err(Error::InvalidInput);
    }

    let status_raw = &payload[4..20];
    let nul = status_raw.iter().position(|&b| b == 0).unwrap_or(status_raw.len());
    let status = std::str::from_utf8(&status_raw[..nul]).map_err(|_| Error::InvalidInput)?;

    let week = u16::from_le_bytes(payload[14..16].try_into()?);
    let seconds_of_week_ms = u32::from_le_bytes(payload[16..20].try_into()?);

    let lat_raw = i64::from_le_bytes(payload[20..28].try_into()?);
    let lon_raw = i64::from_le_bytes(payload[28..36].try_into()?);
    let height_raw = i64::from_le_bytes(payload[36..44].try_into()?);
    let lat_stdev_mm = u32::from_le_bytes(payload[44..48].try_into()?);
    let lon_stdev_mm = u32::from_le_bytes(payload[48..52].try_into()?);
    let num_sv = payload[64];

    let timestamp = gps_epoch()
        + Duration::days(week as i64 * 7)
        + Duration::milliseconds(seconds_of_week_ms as i64);

    let mut satellites = std::collections::HashMap::new();
    satellites.insert("GPS".to_string(), num_sv as u32);

    Ok(FixRecord {
        timestamp,
        quality: quality_from_status(status),
        latitude: lat_raw as f64 * 1e-7,
        longitude: lon_raw as f64 * 1e-7,
        altitude_m: height_raw as f64 * 1e-3,
        accuracy_m: (lat_stdev_mm.max(lon_stdev_mm) as f64) * 1e-3,
        satellites,
        pdop: 0.0,
        baseline_m: 0.0,
        correction_source: "None".to_string(),
        receiver_meta: std::collections::HashMap::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(message_id: u16, payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&SYNC);
        buf.extend_from_slice(&[0u8; HEADER_LEN - 4]);
        buf[4..6].copy_from_slice(&message_id.to_le_bytes());
        buf[8..10].copy_from_slice(&(payload.len() as u16).to_le_bytes());
        buf.extend_from_slice(payload);
        buf.extend_from_slice(&[0u8; TRAILER_LEN]);
        buf
    }

    #[test]
    fn incremental_feed_matches_single_chunk() {
        let source = framed(MSG_BESTPOS, &[1, 2, 3, 4]);

        let mut whole = source.clone();
        let whole_frames = extract(&mut whole);

        let mut incremental = BytesMut::new();
        let mut collected = Vec::new();
        for byte in source.iter() {
            incremental.extend_from_slice(&[*byte]);
            collected.extend(extract(&mut incremental));
        }

        assert_eq!(whole_frames, collected);
    }

    #[test]
    fn exact_boundary_consumes_whole_buffer() {
        let mut buf = framed(MSG_BESTPOS, &[9, 9]);
        let frames = extract(&mut buf);
        assert_eq!(frames.len(), 1);
        assert!(buf.is_empty());
    }

    #[test]
    fn one_byte_short_emits_nothing() {
        let mut buf = framed(MSG_BESTPOS, &[9, 9]);
        buf.truncate(buf.len() - 1);
        let frames = extract(&mut buf);
        assert!(frames.is_empty());
    }

    #[test]
    fn quality_table_matches_glossary() {
        assert_eq!(quality_from_status("SOL_COMPUTED"), FixQuality::RtkFixed);
        assert_eq!(quality_from_status("VARIANCE"), FixQuality::Differential);
        assert_eq!(quality_from_status("INTEGRITY_WARNING"), FixQuality::RtkFloat);
        assert_eq!(quality_from_status("COLD_START"), FixQuality::None);
        assert_eq!(quality_from_status("UNKNOWN_ANYTHING"), FixQuality::None);
    }

    #[test]
    fn timestamp_derives_from_gps_epoch() {
        let mut payload = vec![0u8; 65];
        payload[4..16].copy_from_slice(b"SOL_COMPUTED");
        payload[14..16].copy_from_slice(&0u16.to_le_bytes());
        payload[16..20].copy_from_slice(&0u32.to_le_bytes());
        let fix = decode_bestpos(&payload).unwrap();
        assert_eq!(fix.timestamp, gps_epoch());
    }
}
