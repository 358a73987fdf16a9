use std::time::Duration;

use crate::error::Result;

/// Pause between write attempts on a transport that cannot report buffer space.
pub const WRITE_BACKOFF: Duration = Duration::from_millis(1);

/// How an endpoint behaves when no data is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoMode {
    /// Reads wait for data (bounded by `read_timeout` when set).
    #[default]
    Blocking,
    /// Reads return immediately with zero bytes when nothing is ready.
    NonBlocking,
}

/// Configuration applied when an endpoint is opened.
#[derive(Debug, Clone, Default)]
pub struct TransportConfig {
    /// Blocking or non-blocking reads and writes.
    pub mode: IoMode,
    /// Upper bound for one blocking read. `None` blocks indefinitely.
    pub read_timeout: Option<Duration>,
    /// Upper bound for one blocking write. `None` blocks indefinitely.
    pub write_timeout: Option<Duration>,
}

impl TransportConfig {
    /// Non-blocking configuration.
    pub fn non_blocking() -> Self {
        Self {
            mode: IoMode::NonBlocking,
            ..Self::default()
        }
    }

    /// Blocking configuration with a read timeout.
    pub fn blocking_with_timeout(read_timeout: Duration) -> Self {
        Self {
            mode: IoMode::Blocking,
            read_timeout: Some(read_timeout),
            write_timeout: None,
        }
    }
}

/// A bidirectional byte-stream endpoint.
///
/// All methods take `&self` so one endpoint can be shared between a sending
/// and a receiving thread. Callers that need reads and writes serialized wrap
/// the endpoint in a [`SharedTransport`](crate::SharedTransport).
pub trait Transport: Send + Sync {
    /// Write some bytes, returning how many were accepted.
    fn write(&self, buf: &[u8]) -> Result<usize>;

    /// Read up to `buf.len()` bytes.
    ///
    /// `Ok(0)` means no data was available (non-blocking mode, or the read
    /// timeout elapsed). A stream closed by the remote end is reported as
    /// [`TransportError::Closed`](crate::TransportError::Closed).
    fn read(&self, buf: &mut [u8]) -> Result<usize>;

    /// Wait until a read would not block. `None` waits indefinitely.
    ///
    /// Returns `Ok(false)` when the timeout elapsed first.
    fn wait_readable(&self, timeout: Option<Duration>) -> Result<bool>;

    /// Write some bytes without waiting for buffer space.
    ///
    /// A full buffer is a retryable `WouldBlock` error. Defaults to
    /// [`write`](Self::write).
    fn try_write(&self, buf: &[u8]) -> Result<usize> {
        self.write(buf)
    }

    /// Wait until a write would not block. `None` waits indefinitely.
    ///
    /// The default cannot observe buffer space; it pauses for at most
    /// [`WRITE_BACKOFF`] and reports ready.
    fn wait_writable(&self, timeout: Option<Duration>) -> Result<bool> {
        std::thread::sleep(timeout.map_or(WRITE_BACKOFF, |t| t.min(WRITE_BACKOFF)));
        Ok(true)
    }

    /// Whether reads wait for data. Blocking transports are read only after
    /// [`wait_readable`](Self::wait_readable) reports data.
    fn mode(&self) -> IoMode {
        IoMode::NonBlocking
    }

    /// Upper bound for waiting on one blocking read. `None` waits indefinitely.
    fn read_timeout(&self) -> Option<Duration> {
        None
    }

    /// Upper bound for completing one buffered write. `None` waits indefinitely.
    fn write_timeout(&self) -> Option<Duration> {
        None
    }

    /// Close the endpoint. Later reads and writes fail with `Closed`.
    fn close(&self) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn write(&self, buf: &[u8]) -> Result<usize> {
        (**self).write(buf)
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn wait_readable(&self, timeout: Option<Duration>) -> Result<bool> {
        (**self).wait_readable(timeout)
    }

    fn try_write(&self, buf: &[u8]) -> Result<usize> {
        (**self).try_write(buf)
    }

    fn wait_writable(&self, timeout: Option<Duration>) -> Result<bool> {
        (**self).wait_writable(timeout)
    }

    fn mode(&self) -> IoMode {
        (**self).mode()
    }

    fn read_timeout(&self) -> Option<Duration> {
        (**self).read_timeout()
    }

    fn write_timeout(&self) -> Option<Duration> {
        (**self).write_timeout()
    }

    fn close(&self) -> Result<()> {
        (**self).close()
    }
}
