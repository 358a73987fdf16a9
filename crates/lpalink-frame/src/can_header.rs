//! Bit-packed CAN descriptors carried at the front of an LPA payload.
//!
//! Both descriptors are little-endian bit fields (see [`crate::bits`]).
//!
//! TX descriptor, 5 bytes:
//! ```text
//! bit 0      timestamp enable
//! bit 6      protocol (0 = CAN, 1 = LIN)
//! bits 7..   CAN ID (11-bit standard or 29-bit extended)
//! bit 36     FDF
//! bit 37     RTR
//! bit 38     IDE
//! bit 39     BRS (only with FDF)
//! ```
//!
//! RX descriptor, 15 bytes:
//! ```text
//! bit 0        frame type
//! bits 1..=8   source port
//! bits 9..=16  nanosecond part, in units of 10 ns
//! bits 17..=48 timestamp, microseconds, low word
//! bits 49..=80 timestamp, microseconds, high word
//! bit 87       protocol
//! bits 88..    CAN ID: 11-bit standard, 6-bit LIN and 29-bit extended views
//! bit 117      FDF
//! bit 118      RTR
//! bit 119      IDE
//! ```

use tracing::trace;

use crate::bits::{read_bits, read_flag, write_bits, write_flag};
use crate::error::{FrameError, Result};

/// Size of the TX descriptor.
pub const TX_HEADER_SIZE: usize = 5;

/// Size of the RX descriptor.
pub const RX_HEADER_SIZE: usize = 15;

/// Largest 11-bit standard identifier.
pub const MAX_STANDARD_ID: u32 = 0x7FF;

/// Largest 29-bit extended identifier.
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;

const TX_TIMESTAMP: usize = 0;
const TX_PROTOCOL: usize = 6;
const TX_ID: usize = 7;
const TX_FDF: usize = 36;
const TX_RTR: usize = 37;
const TX_IDE: usize = 38;
const TX_BRS: usize = 39;

const RX_FRAME_TYPE: usize = 0;
const RX_SOURCE_PORT: usize = 1;
const RX_NS: usize = 9;
const RX_US_LOW: usize = 17;
const RX_US_HIGH: usize = 49;
const RX_PROTOCOL: usize = 87;
const RX_ID: usize = 88;
const RX_FDF: usize = 117;
const RX_RTR: usize = 118;
const RX_IDE: usize = 119;

const STANDARD_ID_BITS: usize = 11;
const LIN_ID_BITS: usize = 6;
const EXTENDED_ID_BITS: usize = 29;

/// Bus protocol carried by a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    #[default]
    Can,
    Lin,
}

impl Protocol {
    fn from_bit(bit: bool) -> Self {
        if bit {
            Protocol::Lin
        } else {
            Protocol::Can
        }
    }

    fn bit(self) -> bool {
        self == Protocol::Lin
    }
}

/// Transmit-side CAN descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CanHeaderTx {
    pub timestamp_enable: bool,
    pub protocol: Protocol,
    pub can_id: u32,
    pub fdf: bool,
    pub rtr: bool,
    pub ide: bool,
    pub brs: bool,
}

impl CanHeaderTx {
    /// Describe a CAN frame.
    ///
    /// Extended addressing is derived from the identifier alone: anything
    /// above 0x7FF is extended and `is_extended_hint` is not consulted.
    /// BRS is dropped unless the frame is FD.
    pub fn new(
        timestamp_enable: bool,
        can_id: u32,
        is_fd: bool,
        is_extended_hint: bool,
        brs: bool,
    ) -> Self {
        let ide = can_id > MAX_STANDARD_ID;
        if ide != is_extended_hint {
            trace!(can_id, is_extended_hint, ide, "extended flag derived from identifier");
        }
        Self {
            timestamp_enable,
            protocol: Protocol::Can,
            can_id: can_id & if ide { MAX_EXTENDED_ID } else { MAX_STANDARD_ID },
            fdf: is_fd,
            rtr: false,
            ide,
            brs: is_fd && brs,
        }
    }

    /// Pack into the 5-byte wire form.
    pub fn encode(&self) -> [u8; TX_HEADER_SIZE] {
        let mut buf = [0u8; TX_HEADER_SIZE];
        write_flag(&mut buf, TX_TIMESTAMP, self.timestamp_enable);
        write_flag(&mut buf, TX_PROTOCOL, self.protocol.bit());
        let width = if self.ide {
            EXTENDED_ID_BITS
        } else {
            STANDARD_ID_BITS
        };
        write_bits(&mut buf, TX_ID, width, u64::from(self.can_id));
        write_flag(&mut buf, TX_FDF, self.fdf);
        write_flag(&mut buf, TX_RTR, self.rtr);
        write_flag(&mut buf, TX_IDE, self.ide);
        write_flag(&mut buf, TX_BRS, self.fdf && self.brs);
        buf
    }

    /// Unpack a 5-byte TX descriptor.
    pub fn decode(buf: &[u8; TX_HEADER_SIZE]) -> Self {
        let ide = read_flag(buf, TX_IDE);
        let width = if ide {
            EXTENDED_ID_BITS
        } else {
            STANDARD_ID_BITS
        };
        Self {
            timestamp_enable: read_flag(buf, TX_TIMESTAMP),
            protocol: Protocol::from_bit(read_flag(buf, TX_PROTOCOL)),
            can_id: read_bits(buf, TX_ID, width) as u32,
            fdf: read_flag(buf, TX_FDF),
            rtr: read_flag(buf, TX_RTR),
            ide,
            brs: read_flag(buf, TX_BRS),
        }
    }

    /// Unpack from a slice, which must hold at least 5 bytes.
    pub fn from_slice(buf: &[u8]) -> Result<Self> {
        let bytes: &[u8; TX_HEADER_SIZE] = buf
            .get(..TX_HEADER_SIZE)
            .and_then(|head| head.try_into().ok())
            .ok_or(FrameError::TooShort {
                len: buf.len(),
                min: TX_HEADER_SIZE,
            })?;
        Ok(Self::decode(bytes))
    }
}

/// Build the 5-byte TX descriptor for a CAN frame.
pub fn build_tx_header(
    timestamp_enable: bool,
    can_id: u32,
    is_fd: bool,
    is_extended_hint: bool,
    brs: bool,
) -> [u8; TX_HEADER_SIZE] {
    CanHeaderTx::new(timestamp_enable, can_id, is_fd, is_extended_hint, brs).encode()
}

/// Receive-side descriptor with timing metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CanHeaderRx {
    pub frame_type: u8,
    pub source_port: u8,
    /// Sub-microsecond part in nanoseconds (wire value × 10).
    pub ns_component: u16,
    pub timestamp_us_low: u32,
    pub timestamp_us_high: u32,
    pub protocol: Protocol,
    /// 11-bit view of the identifier bits.
    pub can_id: u16,
    /// 6-bit view of the identifier bits.
    pub lin_id: u8,
    /// 29-bit view of the identifier bits.
    pub ext_can_id: u32,
    pub fdf: bool,
    pub rtr: bool,
    pub ide: bool,
}

impl CanHeaderRx {
    /// Describe a received CAN frame.
    pub fn can(source_port: u8, can_id: u32, timestamp_ns: u64) -> Self {
        let ide = can_id > MAX_STANDARD_ID;
        let ext_can_id = can_id & MAX_EXTENDED_ID;
        let mut header = Self {
            source_port,
            protocol: Protocol::Can,
            can_id: (ext_can_id & MAX_STANDARD_ID) as u16,
            lin_id: (ext_can_id & 0x3F) as u8,
            ext_can_id,
            ide,
            ..Self::default()
        };
        header.set_timestamp_ns(timestamp_ns);
        header
    }

    /// Mirror a TX descriptor as the frame would be reported on reception.
    pub fn from_tx(tx: &CanHeaderTx, source_port: u8, timestamp_ns: u64) -> Self {
        let mut header = Self::can(source_port, tx.can_id, timestamp_ns);
        header.protocol = tx.protocol;
        header.fdf = tx.fdf;
        header.rtr = tx.rtr;
        header.ide = tx.ide;
        header
    }

    /// The CAN identifier, resolved by the IDE flag.
    pub fn resolved_can_id(&self) -> u32 {
        if self.ide {
            self.ext_can_id
        } else {
            u32::from(self.can_id)
        }
    }

    /// Microsecond timestamp from the high and low words.
    pub fn timestamp_us(&self) -> u64 {
        (u64::from(self.timestamp_us_high) << 32) | u64::from(self.timestamp_us_low)
    }

    /// Full timestamp in nanoseconds.
    pub fn timestamp_ns(&self) -> u64 {
        self.timestamp_us()
            .wrapping_mul(1_000)
            .wrapping_add(u64::from(self.ns_component))
    }

    /// Set the timestamp words and nanosecond part from a nanosecond count.
    ///
    /// The nanosecond part has 10 ns resolution.
    pub fn set_timestamp_ns(&mut self, timestamp_ns: u64) {
        let us = timestamp_ns / 1_000;
        self.timestamp_us_low = us as u32;
        self.timestamp_us_high = (us >> 32) as u32;
        self.ns_component = ((timestamp_ns % 1_000) / 10 * 10) as u16;
    }

    /// Pack into the 15-byte wire form, at the bit positions
    /// [`parse_rx_header`] reads.
    pub fn encode(&self) -> [u8; RX_HEADER_SIZE] {
        let mut buf = [0u8; RX_HEADER_SIZE];
        write_bits(&mut buf, RX_FRAME_TYPE, 1, u64::from(self.frame_type));
        write_bits(&mut buf, RX_SOURCE_PORT, 8, u64::from(self.source_port));
        write_bits(&mut buf, RX_NS, 8, u64::from(self.ns_component / 10));
        write_bits(&mut buf, RX_US_LOW, 32, u64::from(self.timestamp_us_low));
        write_bits(&mut buf, RX_US_HIGH, 32, u64::from(self.timestamp_us_high));
        write_flag(&mut buf, RX_PROTOCOL, self.protocol.bit());
        match (self.protocol, self.ide) {
            (Protocol::Lin, _) => write_bits(&mut buf, RX_ID, LIN_ID_BITS, u64::from(self.lin_id)),
            (Protocol::Can, true) => {
                write_bits(&mut buf, RX_ID, EXTENDED_ID_BITS, u64::from(self.ext_can_id))
            }
            (Protocol::Can, false) => {
                write_bits(&mut buf, RX_ID, STANDARD_ID_BITS, u64::from(self.can_id))
            }
        }
        write_flag(&mut buf, RX_FDF, self.fdf);
        write_flag(&mut buf, RX_RTR, self.rtr);
        write_flag(&mut buf, RX_IDE, self.ide);
        buf
    }
}

/// Parse a 15-byte RX descriptor.
///
/// Extra bytes past the descriptor are ignored; fewer than 15 is `TooShort`.
pub fn parse_rx_header(buf: &[u8]) -> Result<CanHeaderRx> {
    if buf.len() < RX_HEADER_SIZE {
        return Err(FrameError::TooShort {
            len: buf.len(),
            min: RX_HEADER_SIZE,
        });
    }
    let buf = &buf[..RX_HEADER_SIZE];

    Ok(CanHeaderRx {
        frame_type: read_bits(buf, RX_FRAME_TYPE, 1) as u8,
        source_port: read_bits(buf, RX_SOURCE_PORT, 8) as u8,
        ns_component: read_bits(buf, RX_NS, 8) as u16 * 10,
        timestamp_us_low: read_bits(buf, RX_US_LOW, 32) as u32,
        timestamp_us_high: read_bits(buf, RX_US_HIGH, 32) as u32,
        protocol: Protocol::from_bit(read_flag(buf, RX_PROTOCOL)),
        can_id: read_bits(buf, RX_ID, STANDARD_ID_BITS) as u16,
        lin_id: read_bits(buf, RX_ID, LIN_ID_BITS) as u8,
        ext_can_id: read_bits(buf, RX_ID, EXTENDED_ID_BITS) as u32,
        fdf: read_flag(buf, RX_FDF),
        rtr: read_flag(buf, RX_RTR),
        ide: read_flag(buf, RX_IDE),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn test_tx_standard_id() {
        let header = build_tx_header(false, 0x137, false, false, false);
        assert_eq!(header, [0x80, 0x9B, 0x00, 0x00, 0x00]);

        let decoded = CanHeaderTx::decode(&header);
        assert_eq!(decoded.can_id, 0x137);
        assert!(!decoded.ide);
        assert!(!decoded.fdf);
        assert!(!decoded.timestamp_enable);
    }

    #[test]
    fn test_tx_standard_id_seen_through_rx_bits() {
        let tx = CanHeaderTx::decode(&build_tx_header(false, 0x137, false, false, false));
        let rx = parse_rx_header(&CanHeaderRx::from_tx(&tx, 1, 0).encode()).unwrap();
        assert_eq!(rx.resolved_can_id(), 0x137);
        assert_eq!(rx.can_id, 0x137);
        assert!(!rx.ide);
    }

    #[test]
    fn test_tx_extended_override() {
        let header = build_tx_header(false, 0x1FFF_FFFF, false, false, false);
        assert_eq!(header, [0x80, 0xFF, 0xFF, 0xFF, 0x4F]);

        let decoded = CanHeaderTx::decode(&header);
        assert!(decoded.ide);
        assert_eq!(decoded.can_id, 0x1FFF_FFFF);
    }

    #[test]
    fn test_tx_hint_ignored_for_small_ids() {
        assert_eq!(
            build_tx_header(false, 0x137, false, true, false),
            build_tx_header(false, 0x137, false, false, false)
        );
    }

    #[test]
    fn test_tx_fd_brs_flags() {
        assert_eq!(
            build_tx_header(true, 0x18DA_F110, true, true, true),
            [0x01, 0x88, 0x78, 0x6D, 0xDC]
        );
        assert_eq!(
            build_tx_header(true, 0x7FF, true, false, true),
            [0x81, 0xFF, 0x03, 0x00, 0x90]
        );
    }

    #[test]
    fn test_tx_brs_requires_fd() {
        let header = build_tx_header(false, 0x100, false, false, true);
        assert_eq!(header[4] & 0x80, 0);
        assert!(!CanHeaderTx::decode(&header).brs);
    }

    #[test]
    fn test_tx_from_slice_too_short() {
        assert!(matches!(
            CanHeaderTx::from_slice(&[0x80, 0x9B]),
            Err(FrameError::TooShort { len: 2, min: 5 })
        ));
        let tx = CanHeaderTx::from_slice(&[0x80, 0x9B, 0, 0, 0, 0xAA]).unwrap();
        assert_eq!(tx.can_id, 0x137);
    }

    #[test]
    fn test_rx_golden_standard() {
        let rx = parse_rx_header(&hex("174af0ac6824e0bd793501a0010000")).unwrap();
        assert_eq!(rx.frame_type, 1);
        assert_eq!(rx.source_port, 11);
        assert_eq!(rx.ns_component, 370);
        assert_eq!(rx.timestamp_us_low, 0x1234_5678);
        assert_eq!(rx.timestamp_us_high, 0x9ABC_DEF0);
        assert_eq!(rx.protocol, Protocol::Can);
        assert_eq!(rx.can_id, 0x1A0);
        assert_eq!(rx.lin_id, 32);
        assert_eq!(rx.ext_can_id, 0x1A0);
        assert!(!rx.fdf && !rx.rtr && !rx.ide);
        assert_eq!(rx.resolved_can_id(), 0x1A0);
        assert_eq!(rx.timestamp_us(), 0x9ABC_DEF0_1234_5678);
    }

    #[test]
    fn test_rx_golden_extended() {
        let rx = parse_rx_header(&hex("90ffffffffff030000008010f1daf8")).unwrap();
        assert_eq!(rx.frame_type, 0);
        assert_eq!(rx.source_port, 200);
        assert_eq!(rx.ns_component, 2550);
        assert_eq!(rx.timestamp_us_low, 0xFFFF_FFFF);
        assert_eq!(rx.timestamp_us_high, 1);
        assert_eq!(rx.protocol, Protocol::Lin);
        assert_eq!(rx.can_id, 272);
        assert_eq!(rx.lin_id, 16);
        assert_eq!(rx.ext_can_id, 0x18DA_F110);
        assert!(rx.fdf && rx.rtr && rx.ide);
        assert_eq!(rx.resolved_can_id(), 0x18DA_F110);
    }

    #[test]
    fn test_rx_encode_matches_golden() {
        let bytes = hex("174af0ac6824e0bd793501a0010000");
        let rx = parse_rx_header(&bytes).unwrap();
        assert_eq!(rx.encode().as_slice(), bytes.as_slice());
    }

    #[test]
    fn test_rx_too_short() {
        assert!(matches!(
            parse_rx_header(&[0u8; 14]),
            Err(FrameError::TooShort { len: 14, min: 15 })
        ));
        assert!(parse_rx_header(&[]).is_err());
    }

    #[test]
    fn test_rx_timestamp_ns() {
        let rx = CanHeaderRx::can(3, 0x321, 5_000_123_456_789);
        assert_eq!(rx.timestamp_us(), 5_000_123_456);
        assert_eq!(rx.ns_component, 780);
        assert_eq!(rx.timestamp_ns(), 5_000_123_456_780);

        let parsed = parse_rx_header(&rx.encode()).unwrap();
        assert_eq!(parsed.timestamp_ns(), rx.timestamp_ns());
        assert_eq!(parsed.source_port, 3);
        assert_eq!(parsed.resolved_can_id(), 0x321);
    }

    #[test]
    fn test_rx_from_extended_tx() {
        let tx = CanHeaderTx::new(true, 0x18DA_F110, true, true, true);
        let rx = parse_rx_header(&CanHeaderRx::from_tx(&tx, 9, 42_000).encode()).unwrap();
        assert!(rx.ide);
        assert!(rx.fdf);
        assert_eq!(rx.resolved_can_id(), 0x18DA_F110);
        assert_eq!(rx.source_port, 9);
        assert_eq!(rx.timestamp_ns(), 42_000);
    }
}
