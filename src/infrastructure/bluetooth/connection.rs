//! Console connection endpoints
//!
//! The platform Bluetooth stack owns L2CAP setup. Whatever bridges it
//! connects to two local stream sockets here: the HID control channel
//! (PSM 17) and the HID interrupt channel (PSM 19). Only the interrupt
//! channel carries reports.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace};

use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::protocol::{OUTPUT_REPORT_HEADER, OUTPUT_REPORT_LENGTH};

/// Frame-oriented access to the interrupt channel
pub trait ReportTransport: Send + Sync {
    /// Read one frame without blocking. Returns `ErrorKind::WouldBlock`
    /// when nothing is pending and `Ok(0)` once the console hung up.
    fn try_recv(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write one frame
    fn send(&self, frame: &[u8]) -> io::Result<usize>;
}

/// Transport over any stream whose shared reference can read and write
///
/// The stream carries no message boundaries, so inbound bytes are
/// buffered until a whole output report (50 bytes, leading 0xA2) is
/// available. Writes hold the stream exclusively until the whole frame
/// is out, so frames from two writers never interleave.
pub struct StreamTransport<S> {
    stream: RwLock<S>,
    pending: Mutex<Vec<u8>>,
}

impl<S> StreamTransport<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: RwLock::new(stream),
            pending: Mutex::new(Vec::with_capacity(2 * OUTPUT_REPORT_LENGTH)),
        }
    }

    pub fn into_inner(self) -> S {
        self.stream.into_inner()
    }
}

/// Drop bytes ahead of the next frame header
fn resync(pending: &mut Vec<u8>) {
    let start = pending
        .iter()
        .position(|&b| b == OUTPUT_REPORT_HEADER)
        .unwrap_or(pending.len());
    if start > 0 {
        trace!("Dropping {} bytes ahead of frame header", start);
        pending.drain(..start);
    }
}

impl<S> ReportTransport for StreamTransport<S>
where
    S: Send + Sync,
    for<'a> &'a S: Read + Write,
{
    fn try_recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut pending = self.pending.lock();
        let mut chunk = [0u8; 2 * OUTPUT_REPORT_LENGTH];
        resync(&mut pending);
        while pending.len() < OUTPUT_REPORT_LENGTH {
            let stream = self.stream.read();
            match (&*stream).read(&mut chunk) {
                Ok(0) => return Ok(0),
                Ok(n) => {
                    pending.extend_from_slice(&chunk[..n]);
                    resync(&mut pending);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }

        let len = OUTPUT_REPORT_LENGTH.min(buf.len());
        buf[..len].copy_from_slice(&pending[..len]);
        pending.drain(..OUTPUT_REPORT_LENGTH);
        Ok(len)
    }

    fn send(&self, frame: &[u8]) -> io::Result<usize> {
        let stream = self.stream.write();
        let mut written = 0;
        while written < frame.len() {
            match (&*stream).write(&frame[written..]) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => written += n,
                // Nothing sent yet: the caller may drop this frame
                Err(e) if e.kind() == io::ErrorKind::WouldBlock && written == 0 => return Err(e),
                // Mid-frame: finish it or the stream loses framing
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) =>
                {
                    std::thread::yield_now()
                }
                Err(e) => return Err(e),
            }
        }
        Ok(written)
    }
}

/// Socket paths the Bluetooth bridge connects to
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub interrupt_path: PathBuf,
    pub control_path: PathBuf,
}

impl ConnectionConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            interrupt_path: settings.interrupt_socket.clone(),
            control_path: settings.control_socket.clone(),
        }
    }
}

#[cfg(unix)]
pub use self::unix::Endpoints;

#[cfg(unix)]
mod unix {
    use super::*;
    use std::os::unix::net::{UnixListener, UnixStream};

    /// The accepted control and interrupt channels
    pub struct Endpoints {
        pub interrupt: StreamTransport<UnixStream>,
        /// Held open for the lifetime of the session; nothing is exchanged on it
        pub control: UnixStream,
    }

    impl Endpoints {
        /// Wait for the bridge to connect both channels (interrupt first)
        pub fn accept(config: &ConnectionConfig) -> Result<Self> {
            let interrupt_listener = bind(&config.interrupt_path)?;
            let control_listener = bind(&config.control_path)?;
            info!(
                "Waiting for console on {} / {}",
                config.interrupt_path.display(),
                config.control_path.display()
            );

            let (interrupt, addr) = interrupt_listener
                .accept()
                .context("Failed to accept interrupt channel")?;
            debug!("Accepted interrupt channel from {:?}", addr);
            let (control, addr) = control_listener
                .accept()
                .context("Failed to accept control channel")?;
            debug!("Accepted control channel from {:?}", addr);

            interrupt
                .set_nonblocking(true)
                .context("Failed to make interrupt channel non-blocking")?;

            Ok(Self {
                interrupt: StreamTransport::new(interrupt),
                control,
            })
        }
    }

    fn bind(path: &Path) -> Result<UnixListener> {
        // A stale socket file from a previous run blocks bind
        if path.exists() {
            std::fs::remove_file(path)
                .with_context(|| format!("Failed to remove stale socket {}", path.display()))?;
        }
        UnixListener::bind(path).with_context(|| format!("Failed to bind {}", path.display()))
    }
}
