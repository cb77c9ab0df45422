use bytes::BytesMut;
use criterion::{Criterion, criterion_group, criterion_main};
use gnss_codec::{rtcm, ubx};

fn ubx_frame(payload: &[u8]) -> BytesMut {
    let mut body = vec![0x01, 0x07];
    body.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    body.extend_from_slice(payload);
    let (a, b) = ubx::fletcher_checksum(&body);

    let mut buf = BytesMut::new();
    buf.extend_from_slice(&ubx::SYNC);
    buf.extend_from_slice(&body);
    buf.extend_from_slice(&[a, b]);
    buf
}

fn rtcm_frame(payload: &[u8]) -> BytesMut {
    let mut header = vec![rtcm::PREAMBLE, ((payload.len() >> 8) & 0x03) as u8, (payload.len() & 0xFF) as u8];
    let mut signed = header.clone();
    signed.extend_from_slice(payload);
    let crc = rtcm::crc24q(&signed);

    header.extend_from_slice(payload);
    header.extend_from_slice(&[(crc >> 16) as u8, (crc >> 8) as u8, crc as u8]);
    BytesMut::from(&header[..])
}

fn bench_ubx_extract(c: &mut Criterion) {
    let source = ubx_frame(&[0u8; 92]);

    c.bench_function("ubx_extract_92b_payload", |b| {
        b.iter(|| {
            let mut buf = source.clone();
            ubx::extract(&mut buf)
        })
    });
}

fn bench_rtcm_extract(c: &mut Criterion) {
    let source = rtcm_frame(&[0u8; 200]);

    c.bench_function("rtcm_extract_200b_payload", |b| {
        b.iter(|| {
            let mut buf = source.clone();
            rtcm::extract(&mut buf)
        })
    });
}

criterion_group!(benches, bench_ubx_extract, bench_rtcm_extract);
criterion_main!(benches);
