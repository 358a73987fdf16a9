use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{IoMode, Transport, TransportConfig};

/// A connected byte-stream endpoint.
///
/// On the target this wraps an IPC mailbox character device such as
/// `/dev/axon_ipc_cm1`. A Unix domain socket variant carries the same byte
/// stream for simulators and tests.
pub struct Endpoint {
    inner: EndpointInner,
    config: TransportConfig,
    closed: AtomicBool,
}

enum EndpointInner {
    Device { file: File, path: PathBuf },
    Unix(UnixStream),
}

impl Endpoint {
    /// Open an IPC character device for reading and writing.
    pub fn open_device(path: impl AsRef<Path>, config: TransportConfig) -> Result<Self> {
        let path = path.as_ref();
        let mut options = OpenOptions::new();
        options.read(true).write(true);
        if config.mode == IoMode::NonBlocking {
            options.custom_flags(libc::O_NONBLOCK);
        }

        let file = options.open(path).map_err(|source| TransportError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(?path, mode = ?config.mode, "opened ipc device");

        Ok(Self {
            inner: EndpointInner::Device {
                file,
                path: path.to_path_buf(),
            },
            config,
            closed: AtomicBool::new(false),
        })
    }

    /// Wrap a connected Unix stream, applying the configured mode and timeouts.
    pub fn from_unix(stream: UnixStream, config: TransportConfig) -> Result<Self> {
        match config.mode {
            IoMode::NonBlocking => stream.set_nonblocking(true)?,
            IoMode::Blocking => {
                stream.set_nonblocking(false)?;
                stream.set_read_timeout(config.read_timeout.filter(|t| !t.is_zero()))?;
                stream.set_write_timeout(config.write_timeout.filter(|t| !t.is_zero()))?;
            }
        }

        Ok(Self {
            inner: EndpointInner::Unix(stream),
            config,
            closed: AtomicBool::new(false),
        })
    }

    /// Connect to a listening Unix domain socket.
    pub fn connect_unix(path: impl AsRef<Path>, config: TransportConfig) -> Result<Self> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|source| TransportError::Connect {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(?path, "connected to unix domain socket");
        Self::from_unix(stream, config)
    }

    /// Configuration this endpoint was opened with.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Transport name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match &self.inner {
            EndpointInner::Device { .. } => "ipc-device",
            EndpointInner::Unix(_) => "unix-stream",
        }
    }

    fn raw_fd(&self) -> RawFd {
        match &self.inner {
            EndpointInner::Device { file, .. } => file.as_raw_fd(),
            EndpointInner::Unix(stream) => stream.as_raw_fd(),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

impl Transport for Endpoint {
    fn write(&self, buf: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        let written = match &self.inner {
            EndpointInner::Device { file, .. } => {
                let mut writer: &File = file;
                writer.write(buf)
            }
            EndpointInner::Unix(stream) => {
                let mut writer: &UnixStream = stream;
                writer.write(buf)
            }
        };

        match written {
            Ok(n) => Ok(n),
            Err(err) if err.kind() == ErrorKind::BrokenPipe => Err(TransportError::Closed),
            Err(err) => Err(TransportError::Io(err)),
        }
    }

    fn try_write(&self, buf: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        match &self.inner {
            EndpointInner::Device { .. } if self.config.mode == IoMode::Blocking => {
                if !poll_fd(self.raw_fd(), libc::POLLOUT, Some(Duration::ZERO))? {
                    return Err(TransportError::Io(ErrorKind::WouldBlock.into()));
                }
                self.write(buf)
            }
            EndpointInner::Device { .. } => self.write(buf),
            EndpointInner::Unix(stream) => {
                // SAFETY: `buf` is valid for `buf.len()` bytes for the duration
                // of the call and the descriptor is owned by `stream`.
                let rc = unsafe {
                    libc::send(
                        stream.as_raw_fd(),
                        buf.as_ptr().cast::<libc::c_void>(),
                        buf.len(),
                        SEND_FLAGS,
                    )
                };
                if rc >= 0 {
                    return Ok(rc as usize);
                }
                let err = std::io::Error::last_os_error();
                match err.kind() {
                    ErrorKind::BrokenPipe => Err(TransportError::Closed),
                    _ => Err(TransportError::Io(err)),
                }
            }
        }
    }

    /// Read once. A blocking device read waits for data; callers that must
    /// honour `read_timeout` wait with [`wait_readable`](Transport::wait_readable)
    /// first, as [`SharedTransport`](crate::SharedTransport) does.
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_open()?;
        match &self.inner {
            EndpointInner::Device { file, .. } => {
                let mut reader: &File = file;
                loop {
                    match reader.read(buf) {
                        Ok(n) => return Ok(n),
                        Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                        Err(err) if is_no_data(&err) => return Ok(0),
                        Err(err) => return Err(TransportError::Io(err)),
                    }
                }
            }
            EndpointInner::Unix(stream) => {
                let mut reader: &UnixStream = stream;
                loop {
                    match reader.read(buf) {
                        Ok(0) if !buf.is_empty() => return Err(TransportError::Closed),
                        Ok(n) => return Ok(n),
                        Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                        Err(err) if is_no_data(&err) => return Ok(0),
                        Err(err) => return Err(TransportError::Io(err)),
                    }
                }
            }
        }
    }

    fn wait_readable(&self, timeout: Option<Duration>) -> Result<bool> {
        self.ensure_open()?;
        poll_fd(self.raw_fd(), libc::POLLIN, timeout)
    }

    fn wait_writable(&self, timeout: Option<Duration>) -> Result<bool> {
        self.ensure_open()?;
        poll_fd(self.raw_fd(), libc::POLLOUT, timeout)
    }

    fn mode(&self) -> IoMode {
        self.config.mode
    }

    fn read_timeout(&self) -> Option<Duration> {
        self.config.read_timeout
    }

    fn write_timeout(&self) -> Option<Duration> {
        self.config.write_timeout
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match &self.inner {
            EndpointInner::Device { path, .. } => {
                debug!(?path, "closing ipc device");
                Ok(())
            }
            EndpointInner::Unix(stream) => match stream.shutdown(std::net::Shutdown::Both) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == ErrorKind::NotConnected => Ok(()),
                Err(err) => Err(TransportError::Io(err)),
            },
        }
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            EndpointInner::Device { path, .. } => f
                .debug_struct("Endpoint")
                .field("type", &"ipc-device")
                .field("path", path)
                .field("mode", &self.config.mode)
                .finish(),
            EndpointInner::Unix(_) => f
                .debug_struct("Endpoint")
                .field("type", &"unix")
                .field("mode", &self.config.mode)
                .finish(),
        }
    }
}

fn is_no_data(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_DONTWAIT | libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = libc::MSG_DONTWAIT;

/// Wait until `fd` reports one of `events`, or an error or hangup.
pub(crate) fn poll_fd(fd: RawFd, events: libc::c_short, timeout: Option<Duration>) -> Result<bool> {
    let timeout_ms: libc::c_int = match timeout {
        None => -1,
        Some(t) => {
            // Round sub-millisecond waits up so they still yield.
            let ms = t.as_millis().max(u128::from(!t.is_zero()));
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    };

    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };

    // SAFETY: `pfd` is a valid, writable pollfd for the duration of the call
    // and `fd` is an open descriptor owned by this endpoint.
    let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    if rc < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(TransportError::Io(err));
    }

    Ok(rc > 0 && pfd.revents & (events | libc::POLLHUP | libc::POLLERR) != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn pair(config: TransportConfig) -> (Endpoint, Endpoint) {
        let (left, right) = UnixStream::pair().unwrap();
        (
            Endpoint::from_unix(left, config.clone()).unwrap(),
            Endpoint::from_unix(right, config).unwrap(),
        )
    }

    #[test]
    fn unix_pair_roundtrip() {
        let (left, right) = pair(TransportConfig::default());
        assert_eq!(left.write(b"\xFF\x55\xAA").unwrap(), 3);

        let mut buf = [0u8; 8];
        let n = right.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"\xFF\x55\xAA");
        assert_eq!(left.kind(), "unix-stream");
    }

    #[test]
    fn non_blocking_read_without_data_returns_zero() {
        let (_left, right) = pair(TransportConfig::non_blocking());
        let mut buf = [0u8; 8];
        assert_eq!(right.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn blocking_read_timeout_returns_zero() {
        let (_left, right) = pair(TransportConfig::blocking_with_timeout(
            Duration::from_millis(20),
        ));
        let start = Instant::now();
        let mut buf = [0u8; 8];
        assert_eq!(right.read(&mut buf).unwrap(), 0);
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn wait_readable_times_out_then_sees_data() {
        let (left, right) = pair(TransportConfig::default());
        assert!(!right.wait_readable(Some(Duration::from_millis(5))).unwrap());

        left.write(b"x").unwrap();
        assert!(right.wait_readable(Some(Duration::from_millis(500))).unwrap());
    }

    #[test]
    fn try_write_on_full_socket_would_block() {
        let (left, _right) = pair(TransportConfig::default());
        let chunk = vec![0u8; 64 * 1024];
        let err = loop {
            if let Err(err) = left.try_write(&chunk) {
                break err;
            }
        };
        assert!(err.is_retryable());
        assert!(!left.wait_writable(Some(Duration::from_millis(5))).unwrap());
    }

    #[test]
    fn wait_writable_sees_free_space() {
        let (left, _right) = pair(TransportConfig::non_blocking());
        assert!(left.wait_writable(Some(Duration::ZERO)).unwrap());
        assert_eq!(left.mode(), IoMode::NonBlocking);
        assert_eq!(left.read_timeout(), None);
    }

    #[test]
    fn remote_close_reports_closed() {
        let (left, right) = pair(TransportConfig::default());
        drop(left);
        let mut buf = [0u8; 8];
        assert!(matches!(right.read(&mut buf), Err(TransportError::Closed)));
    }

    #[test]
    fn local_close_rejects_further_io() {
        let (left, _right) = pair(TransportConfig::default());
        left.close().unwrap();
        left.close().unwrap();
        assert!(matches!(left.write(b"x"), Err(TransportError::Closed)));
        assert!(matches!(
            left.wait_readable(Some(Duration::ZERO)),
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn open_missing_device_fails_with_path() {
        let path = std::env::temp_dir().join(format!(
            "lpalink-missing-device-{}",
            std::process::id()
        ));
        let err = Endpoint::open_device(&path, TransportConfig::default()).unwrap_err();
        assert!(matches!(err, TransportError::Open { path: p, .. } if p == path));
    }

    #[test]
    fn open_regular_file_as_device() {
        let dir = std::env::temp_dir().join(format!("lpalink-device-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("fake_ipc");
        std::fs::write(&path, b"").unwrap();

        let endpoint = Endpoint::open_device(&path, TransportConfig::non_blocking()).unwrap();
        assert_eq!(endpoint.kind(), "ipc-device");
        assert_eq!(endpoint.write(b"abc").unwrap(), 3);
        assert!(format!("{endpoint:?}").contains("ipc-device"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
