//! RTCM3 frame extraction and CRC-24Q validation, used on the NTRIP
//! correction-stream side.
//!
//! Frame layout: `0xD3 | reserved:6,length:10 (big-endian across bytes 1-2) |
//! payload[length] | CRC-24Q(header+payload)`.

use bytes::{Buf, Bytes, BytesMut};

pub const PREAMBLE: u8 = 0xD3;
const HEADER_LEN: usize = 3;
const CRC_LEN: usize = 3;

const CRC24Q_POLY: u32 = 0x1864CFB;

/// CRC-24Q over `data`, MSB-first, initial value 0.
///
/// # Test
///
/// ```
/// use gnss_codec::rtcm::crc24q;
///
/// assert_eq!(crc24q(&[]), 0);
/// ```
pub fn crc24q(data: &[u8]) -> u32 {
    let mut crc: u32 = 0;

    for &byte in data {
        crc ^= (byte as u32) << 16;

        for _ in 0..8 {
            crc <<= 1;

            if crc & 0x0100_0000 != 0 {
                crc ^= CRC24Q_POLY;
            }
        }

        crc &= 0x00FF_FFFF;
    }

    crc
}

/// A CRC-valid RTCM3 frame, complete with header and trailing CRC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcmFrame {
    pub bytes: Bytes,
}

/// Outcome of one extraction pass: the frames found, and how many were
/// dropped for failing CRC validation.
#[derive(Debug, Default)]
pub struct ExtractOutcome {
    pub frames: Vec<RtcmFrame>,
    pub dropped: usize,
}

/// Drain every complete frame currently buffered. Bytes preceding the next
/// `0xD3` preamble are discarded one at a time; a length-complete frame that
/// fails CRC-24Q is dropped (counted in [`ExtractOutcome::dropped`]) without
/// rescanning into it.
///
/// # Test
///
/// ```
/// use bytes::BytesMut;
/// use gnss_codec::rtcm::{crc24q, extract};
///
/// let payload = [0u8; 16];
/// let header = vec![0xD3u8, 0x00, payload.len() as u8];
/// let mut signed = header.clone();
/// signed.extend_from_slice(&payload);
/// let crc = crc24q(&signed);
///
/// let mut buf = BytesMut::new();
/// buf.extend_from_slice(&header);
/// buf.extend_from_slice(&payload);
/// buf.extend_from_slice(&[(crc >> 16) as u8, (crc >> 8) as u8, crc as u8]);
///
/// let outcome = extract(&mut buf);
/// assert_eq!(outcome.frames.len(), 1);
/// assert_eq!(outcome.dropped, 0);
/// assert!(buf.is_empty());
/// ```
pub fn extract(buf: &mut BytesMut) -> ExtractOutcome {
    let mut outcome = ExtractOutcome::default();

    loop {
        while !buf.is_empty() && buf[0] != PREAMBLE {
            buf.advance(1);
        }

        if buf.len() < HEADER_LEN {
            break;
        }

        let length = (((buf[1] & 0x03) as usize) << 8) | buf[2] as usize;
        let total = HEADER_LEN + length + CRC_LEN;

        if buf.len() < total {
            break;
        }

        let expected = crc24q(&buf[..HEADER_LEN + length]);
        let received = ((buf[total - 3] as u32) << 16)
            | ((buf[total - 2] as u32) << 8)
            | buf[total - 1] as u32;

        if expected == received {
            outcome.frames.push(RtcmFrame {
                bytes: Bytes::copy_from_slice(&buf[..total]),
            });
        } else {
            outcome.dropped += 1;
        }

        buf.advance(total);
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(payload: &[u8]) -> BytesMut {
        let mut header = vec![PREAMBLE, ((payload.len() >> 8) & 0x03) as u8, (payload.len() & 0xFF) as u8];
        let mut body = header.clone();
        body.extend_from_slice(payload);
        let crc = crc24q(&body);

        header.extend_from_slice(payload);
        header.extend_from_slice(&[(crc >> 16) as u8, (crc >> 8) as u8, crc as u8]);

        BytesMut::from(&header[..])
    }

    #[test]
    fn incremental_feed_matches_single_chunk() {
        let source = framed(&[1, 2, 3, 4, 5, 6, 7, 8]);

        let mut whole = source.clone();
        let whole_outcome = extract(&mut whole);

        let mut incremental = BytesMut::new();
        let mut collected = Vec::new();
        for byte in source.iter() {
            incremental.extend_from_slice(&[*byte]);
            collected.extend(extract(&mut incremental).frames);
        }

        assert_eq!(whole_outcome.frames, collected);
    }

    #[test]
    fn twenty_two_byte_frame_roundtrips_byte_at_a_time() {
        let source = framed(&[0u8; 16]);
        assert_eq!(source.len(), 22);

        let mut incremental = BytesMut::new();
        let mut frames = Vec::new();
        for byte in source.iter() {
            incremental.extend_from_slice(&[*byte]);
            frames.extend(extract(&mut incremental).frames);
        }

        assert_eq!(frames.len(), 1);
        assert!(incremental.is_empty());
    }

    #[test]
    fn corrupted_payload_drops_and_resyncs() {
        let mut source = framed(&[0u8; 16]);
        let mid = HEADER_LEN + 4;
        source[mid] ^= 0xFF;

        let outcome = extract(&mut source);
        assert!(outcome.frames.is_empty());
        assert_eq!(outcome.dropped, 1);
    }

    #[test]
    fn bad_frame_is_dropped_and_scanning_resumes_on_the_next_one() {
        let mut bogus = framed(&[0u8; 4]);
        let bad = bogus.len() - 1;
        bogus[bad] ^= 0xFF;

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&bogus);
        buf.extend_from_slice(&framed(&[1, 2, 3]));

        let outcome = extract(&mut buf);
        assert_eq!(outcome.dropped, 1);
        assert_eq!(outcome.frames.len(), 1);
        assert!(buf.is_empty());
    }

    #[test]
    fn one_byte_short_waits() {
        let mut source = framed(&[0u8; 8]);
        source.truncate(source.len() - 1);
        let before = source.len();
        let outcome = extract(&mut source);
        assert!(outcome.frames.is_empty());
        assert_eq!(source.len(), before);
    }
}
