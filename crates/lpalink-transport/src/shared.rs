use std::io::ErrorKind;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::error::{Result, TransportError};
use crate::traits::{IoMode, Transport};

/// Longest single wait for buffer space before a write is retried.
const WRITE_WAIT: Duration = Duration::from_millis(10);

/// A transport shared between a sending and a receiving task.
///
/// Every read and write call goes through one I/O lock, held for that call
/// only. Waiting for data or for buffer space happens outside of it, so a
/// sender stalled on a full buffer never keeps the receiver from draining
/// the other direction. A second lock, taken only by writers, keeps each
/// `write_all` buffer contiguous on the wire.
#[derive(Debug)]
pub struct SharedTransport<T> {
    inner: T,
    io_lock: Mutex<()>,
    write_lock: Mutex<()>,
}

impl<T: Transport> SharedTransport<T> {
    /// Wrap a transport.
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            io_lock: Mutex::new(()),
            write_lock: Mutex::new(()),
        }
    }

    /// Write the whole buffer.
    ///
    /// Each attempt holds the I/O lock for one non-waiting write. A full
    /// buffer releases it and waits for space, bounded by the transport's
    /// write timeout. A write that accepts zero bytes means the peer is gone.
    pub fn write_all(&self, buf: &[u8]) -> Result<()> {
        let _writer = lock(&self.write_lock);
        let deadline = self.inner.write_timeout().map(|timeout| Instant::now() + timeout);
        let mut offset = 0usize;
        while offset < buf.len() {
            let written = {
                let _io = lock(&self.io_lock);
                self.inner.try_write(&buf[offset..])
            };
            match written {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => offset += n,
                Err(err) if err.is_retryable() => {
                    if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                        return Err(TransportError::Io(std::io::Error::new(
                            ErrorKind::TimedOut,
                            "write timed out",
                        )));
                    }
                    self.inner.wait_writable(Some(WRITE_WAIT))?;
                }
                Err(err) => return Err(err),
            }
        }
        trace!(len = buf.len(), "wrote buffer");
        Ok(())
    }

    /// Perform one read while holding the I/O lock.
    ///
    /// A blocking transport first waits for data outside the lock, up to its
    /// read timeout, and returns `Ok(0)` when none arrived.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if self.inner.mode() == IoMode::Blocking
            && !self.inner.wait_readable(self.inner.read_timeout())?
        {
            return Ok(0);
        }
        let _io = lock(&self.io_lock);
        self.inner.read(buf)
    }

    /// Wait for readability without taking the I/O lock.
    pub fn wait_readable(&self, timeout: Option<Duration>) -> Result<bool> {
        self.inner.wait_readable(timeout)
    }

    /// Close the underlying transport.
    pub fn close(&self) -> Result<()> {
        let _io = lock(&self.io_lock);
        self.inner.close()
    }

    /// Borrow the underlying transport.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the wrapper and return the inner transport.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

fn lock(mutex: &Mutex<()>) -> MutexGuard<'_, ()> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
