use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use lpalink_transport::{SharedTransport, Transport};
use tracing::{debug, trace};

use crate::envelope::{scan_with_limit, Envelope, FrameConfig};
use crate::error::{transport_to_frame_error, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Reassembles envelopes from a byte-stream transport.
///
/// Every read is appended to an internal buffer which is then scanned.
/// Complete envelopes are returned and the incomplete tail is kept, so frames
/// split across reads come out whole.
pub struct EnvelopeReader<T> {
    transport: Arc<SharedTransport<T>>,
    buf: BytesMut,
    chunk: Vec<u8>,
    pending: VecDeque<Envelope>,
    config: FrameConfig,
    oversized: u64,
}

impl<T: Transport> EnvelopeReader<T> {
    /// Create a reader with default configuration.
    pub fn new(transport: Arc<SharedTransport<T>>) -> Self {
        Self::with_config(transport, FrameConfig::default())
    }

    /// Create a reader with explicit configuration.
    pub fn with_config(transport: Arc<SharedTransport<T>>, config: FrameConfig) -> Self {
        Self {
            transport,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            chunk: vec![0u8; config.read_chunk_size.max(1)],
            pending: VecDeque::new(),
            config,
            oversized: 0,
        }
    }

    /// Perform one transport read and return every envelope it completed.
    ///
    /// An empty vector means no complete frame is available yet (no data,
    /// read timeout, or a partial frame). A closed stream is
    /// `ConnectionClosed`.
    pub fn poll_frames(&mut self) -> Result<Vec<Envelope>> {
        let mut frames: Vec<Envelope> = self.pending.drain(..).collect();
        let read = self
            .transport
            .read(&mut self.chunk)
            .map_err(transport_to_frame_error)?;
        if read > 0 {
            trace!(read, buffered = self.buf.len(), "transport read");
            self.buf.extend_from_slice(&self.chunk[..read]);
            frames.extend(self.extract());
        }
        Ok(frames)
    }

    /// Feed bytes obtained elsewhere and return the envelopes they completed.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<Envelope> {
        self.buf.extend_from_slice(bytes);
        self.extract()
    }

    fn extract(&mut self) -> Vec<Envelope> {
        let (frames, consumed, oversized) = {
            let mut scan = scan_with_limit(&self.buf, self.config.max_payload_size);
            let frames: Vec<Envelope> = scan.by_ref().collect();
            (frames, scan.pending_offset(), scan.oversized())
        };
        self.buf.advance(consumed);
        self.oversized += oversized as u64;

        if !frames.is_empty() {
            debug!(count = frames.len(), kept = self.buf.len(), "envelopes extracted");
        }
        frames
    }

    /// Block until one envelope is available.
    pub fn read_envelope(&mut self) -> Result<Envelope> {
        loop {
            if let Some(envelope) = self.pending.pop_front() {
                return Ok(envelope);
            }

            let frames = self.poll_frames()?;
            if frames.is_empty() {
                self.wait_readable(None)?;
            }
            self.pending.extend(frames);
        }
    }

    /// Wait for readability without holding the transport's I/O lock.
    pub fn wait_readable(&self, timeout: Option<Duration>) -> Result<bool> {
        self.transport
            .wait_readable(timeout)
            .map_err(transport_to_frame_error)
    }

    /// Bytes held back as an incomplete frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Candidates dropped for an oversized declared length so far.
    pub fn oversized(&self) -> u64 {
        self.oversized
    }

    /// Borrow the shared transport.
    pub fn transport(&self) -> &Arc<SharedTransport<T>> {
        &self.transport
    }

    /// Current reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream;

    use bytes::BufMut;
    use lpalink_transport::{Endpoint, TransportConfig};

    use super::*;
    use crate::envelope::{build, encode_envelope};
    use crate::error::FrameError;

    fn shared(stream: UnixStream, config: TransportConfig) -> Arc<SharedTransport<Endpoint>> {
        Arc::new(SharedTransport::new(Endpoint::from_unix(stream, config).unwrap()))
    }

    #[test]
    fn push_bytes_reassembles_split_frames() {
        let (left, _right) = UnixStream::pair().unwrap();
        let mut reader = EnvelopeReader::new(shared(left, TransportConfig::non_blocking()));

        let frame = build(1, 6, b"split-me").unwrap();
        let (head, tail) = frame.split_at(5);
        assert!(reader.push_bytes(head).is_empty());
        assert_eq!(reader.buffered(), 5);

        let frames = reader.push_bytes(tail);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload.as_ref(), b"split-me");
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn push_bytes_byte_by_byte() {
        let (left, _right) = UnixStream::pair().unwrap();
        let mut reader = EnvelopeReader::new(shared(left, TransportConfig::non_blocking()));

        let mut wire = BytesMut::new();
        encode_envelope(1, 1, b"one", &mut wire).unwrap();
        encode_envelope(2, 2, b"two", &mut wire).unwrap();

        let mut frames = Vec::new();
        for byte in wire.iter() {
            frames.extend(reader.push_bytes(&[*byte]));
        }
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].field1, 1);
        assert_eq!(frames[1].field1, 2);
    }

    #[test]
    fn garbage_before_frame_is_discarded() {
        let (left, _right) = UnixStream::pair().unwrap();
        let mut reader = EnvelopeReader::new(shared(left, TransportConfig::non_blocking()));

        let mut wire = BytesMut::from(&b"noise"[..]);
        encode_envelope(3, 3, b"x", &mut wire).unwrap();
        let frames = reader.push_bytes(&wire);
        assert_eq!(frames.len(), 1);
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn poll_frames_over_socket_pair() {
        let (left, right) = UnixStream::pair().unwrap();
        let writer = shared(left, TransportConfig::default());
        let mut reader = EnvelopeReader::new(shared(right, TransportConfig::non_blocking()));

        assert!(reader.poll_frames().unwrap().is_empty());

        writer.write_all(&build(1, 2, b"ping").unwrap()).unwrap();
        assert!(reader.wait_readable(Some(Duration::from_secs(1))).unwrap());
        let frames = reader.poll_frames().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload.as_ref(), b"ping");
    }

    #[test]
    fn read_envelope_blocks_until_complete() {
        let (left, right) = UnixStream::pair().unwrap();
        let writer = shared(left, TransportConfig::default());
        let mut reader = EnvelopeReader::new(shared(right, TransportConfig::default()));

        let frame = build(7, 8, b"slow frame").unwrap();
        let handle = std::thread::spawn(move || {
            for chunk in frame.chunks(3) {
                writer.write_all(chunk).unwrap();
                std::thread::sleep(Duration::from_millis(2));
            }
            writer
        });

        let envelope = reader.read_envelope().unwrap();
        assert_eq!(envelope.field1, 7);
        assert_eq!(envelope.payload.as_ref(), b"slow frame");
        assert!(envelope.crc_valid);
        drop(handle.join().unwrap());
    }

    #[test]
    fn closed_peer_reports_connection_closed() {
        let (left, right) = UnixStream::pair().unwrap();
        let mut reader = EnvelopeReader::new(shared(right, TransportConfig::default()));
        drop(left);

        let err = reader.poll_frames().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn oversized_candidates_are_counted() {
        let (left, _right) = UnixStream::pair().unwrap();
        let config = FrameConfig {
            max_payload_size: 4,
            ..FrameConfig::default()
        };
        let mut reader =
            EnvelopeReader::with_config(shared(left, TransportConfig::non_blocking()), config);

        let mut wire = BytesMut::new();
        encode_envelope(1, 1, b"too large", &mut wire).unwrap();
        wire.put_slice(&build(2, 2, b"ok").unwrap());
        let frames = reader.push_bytes(&wire);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].field1, 2);
        assert_eq!(reader.oversized(), 1);
    }
}
