//! LPA frames: an envelope whose payload is a CAN descriptor followed by the
//! bus payload.

use bytes::{BufMut, Bytes, BytesMut};

use crate::can_header::{
    parse_rx_header, CanHeaderRx, CanHeaderTx, RX_HEADER_SIZE, TX_HEADER_SIZE,
};
use crate::crc::crc16;
use crate::envelope::{build, HEADER_SIZE, MAGIC, OVERHEAD};
use crate::error::{FrameError, Result};

/// Smallest buffer `disassemble` accepts.
pub const MIN_FRAME_SIZE: usize = 16;

/// Offset of the bus payload in an RX frame.
pub const RX_PAYLOAD_OFFSET: usize = HEADER_SIZE + RX_HEADER_SIZE;

/// Offset of the bus payload in a TX frame.
pub const TX_PAYLOAD_OFFSET: usize = HEADER_SIZE + TX_HEADER_SIZE;

/// TX descriptor flags other than the identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxOptions {
    pub timestamp_enable: bool,
    pub fd: bool,
    pub brs: bool,
}

/// A decomposed LPA frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LpaFrame {
    pub cmd: u16,
    pub port: u16,
    /// Raw descriptor bytes (15 on receive, 5 on transmit).
    pub can_header: Bytes,
    pub payload: Bytes,
    pub crc: u16,
    pub crc_valid: bool,
}

impl LpaFrame {
    /// Parse `can_header` as an RX descriptor.
    pub fn rx_header(&self) -> Result<CanHeaderRx> {
        parse_rx_header(&self.can_header)
    }

    /// Parse `can_header` as a TX descriptor.
    pub fn tx_header(&self) -> Result<CanHeaderTx> {
        CanHeaderTx::from_slice(&self.can_header)
    }
}

/// Assemble a TX frame with default descriptor flags.
///
/// No CAN payload limit is applied here; only the envelope's 16-bit length
/// bounds it.
pub fn assemble(payload: &[u8], can_id: u32, is_extended: bool, cmd: u16, port: u16) -> Result<Bytes> {
    assemble_with(payload, can_id, is_extended, cmd, port, TxOptions::default())
}

/// Assemble a TX frame: 5-byte descriptor, payload, envelope.
pub fn assemble_with(
    payload: &[u8],
    can_id: u32,
    is_extended: bool,
    cmd: u16,
    port: u16,
    options: TxOptions,
) -> Result<Bytes> {
    let header = CanHeaderTx::new(
        options.timestamp_enable,
        can_id,
        options.fd,
        is_extended,
        options.brs,
    );
    let mut body = BytesMut::with_capacity(TX_HEADER_SIZE + payload.len());
    body.put_slice(&header.encode());
    body.put_slice(payload);
    build(cmd, port, &body)
}

/// Assemble an RX frame as a gateway reports it: 15-byte descriptor, payload.
pub fn assemble_rx(header: &CanHeaderRx, payload: &[u8], cmd: u16, port: u16) -> Result<Bytes> {
    let mut body = BytesMut::with_capacity(RX_HEADER_SIZE + payload.len());
    body.put_slice(&header.encode());
    body.put_slice(payload);
    build(cmd, port, &body)
}

/// Decompose a received frame (15-byte RX descriptor).
///
/// Checks run in order: size (`TooShort`), magic (`BadMagic`), declared
/// length against the buffer (`Truncated`). A declared length shorter than
/// the descriptor yields a short `can_header` and an empty payload; the
/// descriptor parse reports it later.
pub fn disassemble(frame: &[u8]) -> Result<LpaFrame> {
    split(frame, RX_HEADER_SIZE)
}

/// Decompose a transmitted frame (5-byte TX descriptor).
pub fn disassemble_tx(frame: &[u8]) -> Result<LpaFrame> {
    split(frame, TX_HEADER_SIZE)
}

fn split(frame: &[u8], header_size: usize) -> Result<LpaFrame> {
    if frame.len() < MIN_FRAME_SIZE {
        return Err(FrameError::TooShort {
            len: frame.len(),
            min: MIN_FRAME_SIZE,
        });
    }
    if frame[..MAGIC.len()] != MAGIC {
        return Err(FrameError::BadMagic);
    }

    let declared = usize::from(u16::from_be_bytes([frame[7], frame[8]]));
    let total = declared + OVERHEAD;
    if total > frame.len() {
        return Err(FrameError::Truncated {
            declared,
            available: frame.len() - OVERHEAD,
        });
    }

    let body = &frame[HEADER_SIZE..HEADER_SIZE + declared];
    let (can_header, payload) = body.split_at(header_size.min(declared));
    let crc = u16::from_be_bytes([frame[total - 2], frame[total - 1]]);

    Ok(LpaFrame {
        cmd: u16::from_be_bytes([frame[3], frame[4]]),
        port: u16::from_be_bytes([frame[5], frame[6]]),
        can_header: Bytes::copy_from_slice(can_header),
        payload: Bytes::copy_from_slice(payload),
        crc,
        crc_valid: crc16(&frame[..total - 2], 0) == crc,
    })
}
