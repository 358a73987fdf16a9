//! Envelope framing and CAN descriptors for the LPA link.
//!
//! Every frame on the link is an envelope:
//! - 3-byte magic `FF 55 AA` for stream synchronization
//! - two big-endian 16-bit context fields (command, port)
//! - a big-endian 16-bit payload length
//! - a big-endian CRC-16 trailer over everything before it
//!
//! CAN-carrying frames start their payload with a bit-packed descriptor:
//! 5 bytes when transmitting, 15 bytes (with timestamps) when receiving.

pub mod bits;
pub mod can_header;
pub mod command;
pub mod crc;
pub mod envelope;
pub mod error;
pub mod lpa;
pub mod reader;
pub mod writer;

pub use can_header::{
    build_tx_header, parse_rx_header, CanHeaderRx, CanHeaderTx, Protocol, RX_HEADER_SIZE,
    TX_HEADER_SIZE,
};
pub use command::{command_name, parse_channel, port_name, CANFD_PORT_BASE, CMD_AP_SEND, CMD_AP_TEST};
pub use crc::crc16;
pub use envelope::{
    build, encode_envelope, scan, scan_with_limit, Envelope, FrameConfig, Scan, HEADER_SIZE,
    MAGIC, MAX_PAYLOAD, OVERHEAD,
};
pub use error::{FrameError, Result};
pub use lpa::{
    assemble, assemble_rx, assemble_with, disassemble, disassemble_tx, LpaFrame, TxOptions,
    MIN_FRAME_SIZE, RX_PAYLOAD_OFFSET, TX_PAYLOAD_OFFSET,
};
pub use reader::EnvelopeReader;
pub use writer::LpaWriter;
