//! Frame extractor for the TLV-framed, Fletcher-checksummed receiver
//! protocol (variant A), plus decoding of its position-velocity-time
//! message into a [`FixRecord`].
//!
//! Frame layout: `[0xB5 0x62][class][id][length:u16 LE][payload][ck_a][ck_b]`.
//! The checksum accumulates over `[class..end-of-payload]`.

use bytes::{Buf, Bytes, BytesMut};
use chrono::{TimeZone, Utc};

use crate::{Error, FixQuality, FixRecord};

pub const SYNC: [u8; 2] = [0xB5, 0x62];

/// Message id of the position-velocity-time record this driver requires.
pub const MSG_NAV_PVT: (u8, u8) = (0x01, 0x07);

const HEADER_LEN: usize = 6;
const CHECKSUM_LEN: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UbxFrame {
    pub class: u8,
    pub id: u8,
    pub payload: Bytes,
}

/// Two 8-bit rolling accumulators, one byte at a time.
///
/// # Test
///
/// ```
/// use gnss_codec::ubx::fletcher_checksum;
///
/// let (a, b) = fletcher_checksum(&[0x01, 0x07, 0x00, 0x00]);
/// assert_eq!((a, b), (0x08, 0x19));
/// ```
pub fn fletcher_checksum(bytes: &[u8]) -> (u8, u8) {
    let mut ck_a: u8 = 0;
    let mut ck_b: u8 = 0;

    for &b in bytes {
        ck_a = ck_a.wrapping_add(b);
        ck_b = ck_b.wrapping_add(ck_a);
    }

    (ck_a, ck_b)
}

/// Drain every complete, checksum-valid frame currently buffered.
///
/// Desynchronized bytes ahead of the next sync pattern are discarded;
/// frames that fail their checksum are consumed and dropped rather than
/// rescanned into, bounding worst-case resync cost at the price of losing
/// one frame on genuine corruption.
///
/// # Test
///
/// ```
/// use bytes::BytesMut;
/// use gnss_codec::ubx::{extract, fletcher_checksum};
///
/// let payload = [0xAAu8, 0xBB];
/// let mut body = vec![0x01, 0x07, 0x02, 0x00];
/// body.extend_from_slice(&payload);
/// let (a, b) = fletcher_checksum(&body);
///
/// let mut buf = BytesMut::new();
/// buf.extend_from_slice(&[0xB5, 0x62]);
/// buf.extend_from_slice(&body);
/// buf.extend_from_slice(&[a, b]);
///
/// let frames = extract(&mut buf);
/// assert_eq!(frames.len(), 1);
/// assert_eq!(frames[0].payload.as_ref(), &payload);
/// assert!(buf.is_empty());
/// ```
pub fn extract(buf: &mut BytesMut) -> Vec<UbxFrame> {
    let mut frames = Vec::new();

    loop {
        if !resync(buf) {
            break;
        }

        if buf.len() < HEADER_LEN {
            break;
        }

        let length = u16::from_le_bytes([buf[4], buf[5]]) as usize;
        let total = HEADER_LEN + length + CHECKSUM_LEN;

        if buf.len() < total {
            break;
        }

        let (ck_a, ck_b) = fletcher_checksum(&buf[2..HEADER_LEN + length]);
        let valid = ck_a == buf[total - 2] && ck_b == buf[total - 1];

        if valid {
            let class = buf[2];
            let id = buf[3];
            let payload = Bytes::copy_from_slice(&buf[HEADER_LEN..HEADER_LEN + length]);
            frames.push(UbxFrame { class, id, payload });
        }

        buf.advance(total);
    }

    frames
}

/// Discard bytes until `buf` starts with the sync pattern (or is drained to
/// at most one trailing byte that could still be the start of one).
/// Returns `false` when the caller should stop and wait for more input.
fn resync(buf: &mut BytesMut) -> bool {
    loop {
        if buf.len() >= 2 && buf[0] == SYNC[0] && buf[1] == SYNC[1] {
            return true;
        }

        if buf.len() == 1 && buf[0] == SYNC[0] {
            return false;
        }

        if buf.is_empty() {
            return false;
        }

        buf.advance(1);
    }
}

/// Decode a NAV-PVT payload into a normalized [`FixRecord`].
///
/// # Test
///
/// ```
/// use gnss_codec::ubx::decode_nav_pvt;
///
/// let mut payload = vec![0u8; 100];
/// payload[4..6].copy_from_slice(&2025u16.to_le_bytes());
/// payload[6] = 8;
/// payload[7] = 25;
/// payload[8] = 14;
/// payload[9] = 30;
/// payload[10] = 15;
/// payload[12..16].copy_from_slice(&123_000_000i32.to_le_bytes());
/// payload[26] = 0x03;
/// payload[27] = 0x02;
/// payload[29] = 12;
/// let lat = (37.7749_f64 * 1e7).round() as i32;
/// payload[32..36].copy_from_slice(&lat.to_le_bytes());
/// let lon = (-122.4194_f64 * 1e7).round() as i32;
/// payload[36..40].copy_from_slice(&lon.to_le_bytes());
/// payload[40..44].copy_from_slice(&10500i32.to_le_bytes());
/// payload[48..52].copy_from_slice(&500u32.to_le_bytes());
/// payload[82..84].copy_from_slice(&120u16.to_le_bytes());
///
/// let fix = decode_nav_pvt(&payload).unwrap();
/// assert_eq!(fix.quality, gnss_codec::FixQuality::RtkFixed);
/// assert!((fix.latitude - 37.7749).abs() < 1e-6);
/// assert!((fix.longitude - (-122.4194)).abs() < 1e-6);
/// assert!((fix.altitude_m - 10.5).abs() < 1e-6);
/// assert!((fix.accuracy_m - 0.5).abs() < 1e-6);
/// assert!((fix.pdop - 1.20).abs() < 1e-6);
/// assert_eq!(fix.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, true), "2025-08-25T14:30:15.123Z");
/// ```
pub fn decode_nav_pvt(payload: &[u8]) -> Result<FixRecord, Error> {
    if payload.len() < 92 {
        return Err(Error::InvalidInput);
    }

    let year = u16::from_le_bytes(payload[4..6].try_into()?);
    let month = payload[6];
    let day = payload[7];
    let hour = payload[8];
    let min = payload[9];
    let sec = payload[10];
    let nanos = i32::from_le_bytes(payload[12..16].try_into()?);

    let fix_type = payload[26];
    let carrier_solution = payload[27];
    let num_sv = payload[29];

    let lat_raw = i32::from_le_bytes(payload[32..36].try_into()?);
    let lon_raw = i32::from_le_bytes(payload[36..40].try_into()?);
    let height_raw = i32::from_le_bytes(payload[40..44].try_into()?);
    let accuracy_raw = u32::from_le_bytes(payload[48..52].try_into()?);
    let pdop_raw = u16::from_le_bytes(payload[82..84].try_into()?);

    let quality = if carrier_solution == 2 {
        FixQuality::RtkFixed
    } else if carrier_solution == 1 {
        FixQuality::RtkFloat
    } else if matches!(fix_type, 2 | 3 | 4) {
        FixQuality::Differential
    } else {
        FixQuality::None
    };

    let naive = chrono::NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
        .and_then(|d| d.and_hms_nano_opt(hour as u32, min as u32, sec as u32, nanos.max(0) as u32))
        .ok_or(Error::InvalidInput)?;

    let timestamp = Utc.from_utc_datetime(&naive);

    let mut satellites = std::collections::HashMap::new();
    satellites.insert("GPS".to_string(), num_sv as u32);

    Ok(FixRecord {
        timestamp,
        quality,
        latitude: lat_raw as f64 * 1e-7,
        longitude: lon_raw as f64 * 1e-7,
        altitude_m: height_raw as f64 * 1e-3,
        accuracy_m: accuracy_raw as f64 * 1e-3,
        satellites,
        pdop: pdop_raw as f64 * 1e-2,
        baseline_m: 0.0,
        correction_source: "None".to_string(),
        receiver_meta: std::collections::HashMap::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(class: u8, id: u8, payload: &[u8]) -> BytesMut {
        let mut body = vec![class, id];
        body.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        body.extend_from_slice(payload);
        let (a, b) = fletcher_checksum(&body);

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&SYNC);
        buf.extend_from_slice(&body);
        buf.extend_from_slice(&[a, b]);
        buf
    }

    #[test]
    fn incremental_feed_matches_single_chunk() {
        let mut whole = framed(0x01, 0x07, &[1, 2, 3, 4, 5]);
        let whole_frames = extract(&mut whole);

        let mut incremental = BytesMut::new();
        let mut collected = Vec::new();
        let source = framed(0x01, 0x07, &[1, 2, 3, 4, 5]);

        for byte in source.iter() {
            incremental.extend_from_slice(&[*byte]);
            collected.extend(extract(&mut incremental));
        }

        assert_eq!(whole_frames, collected);
    }

    #[test]
    fn exact_boundary_consumes_whole_buffer() {
        let mut buf = framed(0x01, 0x07, &[9, 9]);
        let frames = extract(&mut buf);
        assert_eq!(frames.len(), 1);
        assert!(buf.is_empty());
    }

    #[test]
    fn one_byte_short_emits_nothing_and_keeps_start() {
        let mut buf = framed(0x01, 0x07, &[9, 9]);
        buf.truncate(buf.len() - 1);
        let before = buf.len();
        let frames = extract(&mut buf);
        assert!(frames.is_empty());
        assert_eq!(buf.len(), before);
    }

    #[test]
    fn checksum_mismatch_drops_frame() {
        let mut buf = framed(0x01, 0x07, &[1, 2, 3]);
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;
        let frames = extract(&mut buf);
        assert!(frames.is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn carrier_solution_downgrades() {
        let mut payload = vec![0u8; 92];
        payload[26] = 0x03;
        payload[27] = 0x01;
        payload[4..6].copy_from_slice(&2025u16.to_le_bytes());
        payload[6] = 1;
        payload[7] = 1;
        let fix = decode_nav_pvt(&payload).unwrap();
        assert_eq!(fix.quality, FixQuality::RtkFloat);

        payload[27] = 0x00;
        let fix = decode_nav_pvt(&payload).unwrap();
        assert_eq!(fix.quality, FixQuality::Differential);

        payload[26] = 0x00;
        let fix = decode_nav_pvt(&payload).unwrap();
        assert_eq!(fix.quality, FixQuality::None);
    }
}
