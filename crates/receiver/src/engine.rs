use std::{
    sync::atomic::{AtomicBool, Ordering},
    sync::Arc,
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use codec::{ubx, unicore, FixRecord};
use parking_lot::Mutex as SyncMutex;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf},
    sync::{Mutex as AsyncMutex, Notify},
    task::JoinHandle,
};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::Error;

const READ_CHUNK: usize = 1024;
const MAX_CONSECUTIVE_READ_ERRORS: u32 = 5;
const READ_RETRY_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Variant {
    Ubx,
    Unicore,
}

/// Shared engine behind both concrete driver variants: owns the serial
/// link, the scratch buffer, and the last-write-wins cached fix.
pub struct Engine {
    variant: Variant,
    read_half: SyncMutex<Option<ReadHalf<SerialStream>>>,
    write_half: Arc<AsyncMutex<Option<WriteHalf<SerialStream>>>>,
    fix: Arc<SyncMutex<Option<FixRecord>>>,
    reader_handle: SyncMutex<Option<JoinHandle<()>>>,
    cancel: Arc<Notify>,
    connected: AtomicBool,
    errored: Arc<AtomicBool>,
}

impl Engine {
    pub(crate) fn new(variant: Variant) -> Self {
        Self {
            variant,
            read_half: SyncMutex::new(None),
            write_half: Arc::new(AsyncMutex::new(None)),
            fix: Arc::new(SyncMutex::new(None)),
            reader_handle: SyncMutex::new(None),
            cancel: Arc::new(Notify::new()),
            connected: AtomicBool::new(false),
            errored: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) async fn connect(&self, path: &str, baud: u32) -> Result<(), Error> {
        let port = tokio_serial::new(path, baud)
            .open_native_async()
            .map_err(|e| Error::Connection(e.to_string()))?;

        let (read_half, write_half) = tokio::io::split(port);

        *self.read_half.lock() = Some(read_half);
        *self.write_half.lock().await = Some(write_half);
        self.errored.store(false, Ordering::Relaxed);
        self.connected.store(true, Ordering::Relaxed);

        Ok(())
    }

    pub(crate) fn start_stream(&self) -> Result<(), Error> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(Error::Protocol("start_stream before connect".to_string()));
        }

        let read_half = self
            .read_half
            .lock()
            .take()
            .ok_or_else(|| Error::Protocol("start_stream before connect".to_string()))?;

        let fix = self.fix.clone();
        let cancel = self.cancel.clone();
        let errored = self.errored.clone();
        let variant = self.variant;

        let handle = tokio::spawn(reader_loop(variant, read_half, fix, cancel, errored));
        *self.reader_handle.lock() = Some(handle);

        Ok(())
    }

    pub(crate) fn current_fix(&self) -> Option<FixRecord> {
        self.fix.lock().clone()
    }

    pub(crate) fn has_errored(&self) -> bool {
        self.errored.load(Ordering::Relaxed)
    }

    /// Fire-and-forget: schedules the write and returns immediately so the
    /// caller (and the reader task) is never blocked on serial I/O.
    pub(crate) fn inject(&self, bytes: Bytes) -> bool {
        if !self.connected.load(Ordering::Relaxed) {
            return false;
        }

        let write_half = self.write_half.clone();

        tokio::spawn(async move {
            let mut guard = write_half.lock().await;
            if let Some(w) = guard.as_mut() {
                if let Err(err) = w.write_all(&bytes).await {
                    log::debug!("receiver injection write failed: {err}");
                }
            }
        });

        true
    }

    pub(crate) async fn disconnect(&self) {
        self.cancel.notify_waiters();

        let handle = self.reader_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        *self.write_half.lock().await = None;
        *self.read_half.lock() = None;
        *self.fix.lock() = None;
        self.connected.store(false, Ordering::Relaxed);
    }
}

async fn reader_loop(
    variant: Variant,
    mut read_half: ReadHalf<SerialStream>,
    fix: Arc<SyncMutex<Option<FixRecord>>>,
    cancel: Arc<Notify>,
    errored: Arc<AtomicBool>,
) {
    let mut scratch = BytesMut::new();
    let mut buf = [0u8; READ_CHUNK];
    let mut consecutive_errors = 0u32;

    loop {
        let read_result = tokio::select! {
            _ = cancel.notified() => break,
            result = read_half.read(&mut buf) => result,
        };

        match read_result {
            Ok(0) | Err(_) => {
                consecutive_errors += 1;

                if consecutive_errors >= MAX_CONSECUTIVE_READ_ERRORS {
                    log::warn!("receiver reader exiting after repeated read failures");
                    errored.store(true, Ordering::Relaxed);
                    break;
                }

                tokio::time::sleep(READ_RETRY_DELAY).await;
            }
            Ok(n) => {
                consecutive_errors = 0;
                scratch.extend_from_slice(&buf[..n]);
                decode_into(variant, &mut scratch, &fix);
            }
        }
    }
}

fn decode_into(variant: Variant, scratch: &mut BytesMut, fix: &SyncMutex<Option<FixRecord>>) {
    match variant {
        Variant::Ubx => {
            for frame in ubx::extract(scratch) {
                if (frame.class, frame.id) == ubx::MSG_NAV_PVT {
                    if let Ok(decoded) = ubx::decode_nav_pvt(&frame.payload) {
                        *fix.lock() = Some(decoded);
                    }
                }
            }
        }
        Variant::Unicore => {
            for frame in unicore::extract(scratch) {
                if frame.message_id == unicore::MSG_BESTPOS {
                    if let Ok(decoded) = unicore::decode_bestpos(&frame.payload) {
                        *fix.lock() = Some(decoded);
                    }
                }
            }
        }
    }
}
