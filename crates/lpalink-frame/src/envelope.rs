use bytes::{BufMut, Bytes, BytesMut};
use tracing::{trace, warn};

use crate::crc::crc16;
use crate::error::{FrameError, Result};

/// Envelope magic: `FF 55 AA`.
pub const MAGIC: [u8; 3] = [0xFF, 0x55, 0xAA];

/// Magic (3) + field1 (2) + field2 (2) + length (2) = 9 bytes.
pub const HEADER_SIZE: usize = 9;

/// Header plus the 2-byte CRC trailer.
pub const OVERHEAD: usize = HEADER_SIZE + 2;

/// Largest payload the 16-bit length field can describe.
pub const MAX_PAYLOAD: usize = 0xFFFF;

/// One CRC-protected envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Command, or first context field.
    pub field1: u16,
    /// Sub-command or port, depending on `field1`.
    pub field2: u16,
    pub payload: Bytes,
    /// CRC trailer as received.
    pub crc: u16,
    /// Whether `crc` matches the frame contents.
    pub crc_valid: bool,
    /// The complete wire bytes, magic through CRC.
    pub raw: Bytes,
}

impl Envelope {
    /// Parse a single envelope starting at `buf[0]`.
    ///
    /// Bytes after the declared frame are ignored. A bad CRC is reported
    /// through `crc_valid`, never as an error.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < OVERHEAD {
            return Err(FrameError::TooShort {
                len: buf.len(),
                min: OVERHEAD,
            });
        }
        if buf[..3] != MAGIC {
            return Err(FrameError::BadMagic);
        }

        let declared = declared_length(buf);
        if buf.len() < declared + OVERHEAD {
            return Err(FrameError::Truncated {
                declared,
                available: buf.len() - OVERHEAD,
            });
        }

        Ok(Self::from_complete(&buf[..declared + OVERHEAD]))
    }

    /// Check the CRC trailer, reporting a mismatch as `CrcMismatch`.
    pub fn verify_crc(&self) -> Result<()> {
        if self.crc_valid {
            return Ok(());
        }
        let body = &self.raw[..self.raw.len().saturating_sub(2)];
        Err(FrameError::CrcMismatch {
            expected: self.crc,
            actual: crc16(body, 0),
        })
    }

    /// Wire size of this envelope.
    pub fn wire_size(&self) -> usize {
        self.payload.len() + OVERHEAD
    }

    // `frame` is exactly one envelope whose magic and length were checked.
    fn from_complete(frame: &[u8]) -> Self {
        let total = frame.len();
        let crc = u16::from_be_bytes([frame[total - 2], frame[total - 1]]);
        let computed = crc16(&frame[..total - 2], 0);
        Self {
            field1: u16::from_be_bytes([frame[3], frame[4]]),
            field2: u16::from_be_bytes([frame[5], frame[6]]),
            payload: Bytes::copy_from_slice(&frame[HEADER_SIZE..total - 2]),
            crc,
            crc_valid: crc == computed,
            raw: Bytes::copy_from_slice(frame),
        }
    }
}

/// Encode an envelope into the wire format.
///
/// Wire format (all fields big-endian):
/// ```text
/// ┌────────────┬────────┬────────┬────────┬──────────────┬──────────┐
/// │ FF 55 AA   │ field1 │ field2 │ length │ payload      │ CRC16    │
/// │ (3B)       │ (2B)   │ (2B)   │ (2B)   │ (length B)   │ (2B)     │
/// └────────────┴────────┴────────┴────────┴──────────────┴──────────┘
/// ```
/// The CRC covers every byte before it, seed 0.
pub fn encode_envelope(field1: u16, field2: u16, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::InvalidLength {
            len: payload.len(),
            max: MAX_PAYLOAD,
        });
    }

    let start = dst.len();
    dst.reserve(payload.len() + OVERHEAD);
    dst.put_slice(&MAGIC);
    dst.put_u16(field1);
    dst.put_u16(field2);
    dst.put_u16(payload.len() as u16);
    dst.put_slice(payload);
    let crc = crc16(&dst[start..], 0);
    dst.put_u16(crc);
    Ok(())
}

/// Build a standalone envelope.
pub fn build(field1: u16, field2: u16, payload: &[u8]) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(payload.len() + OVERHEAD);
    encode_envelope(field1, field2, payload, &mut buf)?;
    Ok(buf.freeze())
}

/// Scan `buf` for complete envelopes.
pub fn scan(buf: &[u8]) -> Scan<'_> {
    scan_with_limit(buf, MAX_PAYLOAD)
}

/// Scan `buf`, skipping candidates whose declared length exceeds `max_payload`.
pub fn scan_with_limit(buf: &[u8], max_payload: usize) -> Scan<'_> {
    Scan {
        buf,
        cursor: 0,
        pending: None,
        max_payload,
        oversized: 0,
    }
}

/// Lazy sequence of the envelopes embedded in a byte buffer.
///
/// The cursor advances past each emitted frame, so magic bytes inside a
/// payload are never re-matched. The sequence ends at the first incomplete
/// candidate; [`Scan::pending_offset`] then tells a streaming caller which
/// tail to keep for the next read.
#[derive(Debug)]
pub struct Scan<'a> {
    buf: &'a [u8],
    cursor: usize,
    pending: Option<usize>,
    max_payload: usize,
    oversized: usize,
}

impl Scan<'_> {
    /// Offset of the first byte that has not been consumed.
    ///
    /// Once the scan is exhausted this is the start of the incomplete
    /// trailing candidate (including a partial magic), or the buffer length
    /// when nothing is worth keeping.
    pub fn pending_offset(&self) -> usize {
        self.pending.unwrap_or(self.cursor)
    }

    /// Candidates skipped because their declared length was over the limit.
    pub fn oversized(&self) -> usize {
        self.oversized
    }

    fn finish(&mut self, offset: usize) -> Option<Envelope> {
        self.pending = Some(offset);
        self.cursor = self.buf.len();
        None
    }
}

impl Iterator for Scan<'_> {
    type Item = Envelope;

    fn next(&mut self) -> Option<Envelope> {
        loop {
            if self.pending.is_some() {
                return None;
            }

            let rest = &self.buf[self.cursor..];
            let Some(found) = rest.windows(MAGIC.len()).position(|w| w == MAGIC) else {
                let keep = partial_magic_len(rest);
                return self.finish(self.buf.len() - keep);
            };

            let pos = self.cursor + found;
            let candidate = &self.buf[pos..];
            if candidate.len() < OVERHEAD {
                return self.finish(pos);
            }

            let declared = declared_length(candidate);
            if declared > self.max_payload {
                warn!(
                    offset = pos,
                    declared,
                    max = self.max_payload,
                    "skipping envelope with oversized length"
                );
                self.oversized += 1;
                self.cursor = pos + MAGIC.len();
                continue;
            }

            let total = declared + OVERHEAD;
            if candidate.len() < total {
                trace!(offset = pos, declared, available = candidate.len(), "incomplete envelope");
                return self.finish(pos);
            }

            self.cursor = pos + total;
            return Some(Envelope::from_complete(&candidate[..total]));
        }
    }
}

/// Configuration for envelope scanning and streaming reads.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Largest declared payload accepted. Default: 0xFFFF.
    pub max_payload_size: usize,
    /// Bytes requested from the transport per read. Default: 4 KiB.
    pub read_chunk_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: MAX_PAYLOAD,
            read_chunk_size: 4 * 1024,
        }
    }
}

fn declared_length(frame: &[u8]) -> usize {
    usize::from(u16::from_be_bytes([frame[7], frame[8]]))
}

// Length of a magic prefix (`FF` or `FF 55`) at the very end of `rest`.
fn partial_magic_len(rest: &[u8]) -> usize {
    if rest.ends_with(&MAGIC[..2]) {
        2
    } else if rest.ends_with(&MAGIC[..1]) {
        1
    } else {
        0
    }
}
