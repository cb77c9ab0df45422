//! A single NTRIP v2 mountpoint connection: HTTP handshake, RTCM3 body
//! streaming, and connection-owned exponential backoff.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::BytesMut;
use codec::rtcm;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};

use crate::MountDescriptor;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const READ_CHUNK: usize = 2048;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub enum ConnectError {
    Io(std::io::Error),
    Timeout,
    Rejected(String),
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io error: {err}"),
            Self::Timeout => write!(f, "connect timed out"),
            Self::Rejected(line) => write!(f, "caster rejected request: {line}"),
        }
    }
}

impl std::error::Error for ConnectError {}

impl From<std::io::Error> for ConnectError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

/// One NTRIP mountpoint link. Created fresh on every connection attempt;
/// the connection's own backoff delay is carried across attempts by the
/// owner ([`crate::MountManager`]) rather than reset per-instance.
pub struct MountConnection {
    stream: TcpStream,
    scratch: BytesMut,
}

impl MountConnection {
    /// Perform the NTRIP v2 GET handshake and return a connection ready to
    /// stream RTCM3 frames. Fails if the TCP connect exceeds 30 seconds or
    /// the caster does not answer with `200 OK`.
    pub async fn open(descriptor: &MountDescriptor) -> Result<Self, ConnectError> {
        let addr = format!("{}:{}", descriptor.host, descriptor.port);
        let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| ConnectError::Timeout)??;

        let credentials = STANDARD.encode(format!("{}:{}", descriptor.username, descriptor.password));
        let request = format!(
            "GET /{mount} HTTP/1.1\r\n\
             Host: {host}\r\n\
             Ntrip-Version: Ntrip/2.0\r\n\
             User-Agent: NTRIP gnss-aggregator/0.1\r\n\
             Authorization: Basic {credentials}\r\n\
             Connection: close\r\n\
             \r\n",
            mount = descriptor.mount,
            host = descriptor.host,
        );

        stream.write_all(request.as_bytes()).await?;

        let status_line = read_status_line(&mut stream).await?;
        if !(status_line.contains("200 OK") || status_line.starts_with("ICY 200")) {
            return Err(ConnectError::Rejected(status_line));
        }

        Ok(Self {
            stream,
            scratch: BytesMut::new(),
        })
    }

    /// Read one chunk from the body and extract every complete RTCM3 frame
    /// it completes. Returns `Ok(0)` frames (with `bytes_read == 0`) on a
    /// clean EOF, signalling the caller should reconnect.
    pub async fn poll(&mut self) -> Result<PollOutcome, std::io::Error> {
        let mut buf = [0u8; READ_CHUNK];
        let n = self.stream.read(&mut buf).await?;

        if n == 0 {
            return Ok(PollOutcome {
                bytes_read: 0,
                outcome: rtcm::ExtractOutcome::default(),
            });
        }

        self.scratch.extend_from_slice(&buf[..n]);
        let outcome = rtcm::extract(&mut self.scratch);

        Ok(PollOutcome {
            bytes_read: n,
            outcome,
        })
    }

    /// Next backoff delay after a failed attempt, doubling from `previous`
    /// up to a 60 second ceiling.
    pub fn next_backoff(previous: Duration) -> Duration {
        std::cmp::min(previous.saturating_mul(2), MAX_BACKOFF)
    }

    /// The starting backoff delay for a mountpoint with no prior failures.
    pub fn initial_backoff() -> Duration {
        INITIAL_BACKOFF
    }
}

pub struct PollOutcome {
    pub bytes_read: usize,
    pub outcome: rtcm::ExtractOutcome,
}

async fn read_status_line(stream: &mut TcpStream) -> Result<String, ConnectError> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];

    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            break;
        }
        if byte[0] == b'\n' {
            break;
        }
        if byte[0] != b'\r' {
            line.push(byte[0]);
        }
    }

    Ok(String::from_utf8_lossy(&line).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps_at_sixty_seconds() {
        let mut delay = MountConnection::initial_backoff();
        assert_eq!(delay, Duration::from_secs(1));

        for _ in 0..10 {
            delay = MountConnection::next_backoff(delay);
        }

        assert_eq!(delay, Duration::from_secs(60));
    }
}
