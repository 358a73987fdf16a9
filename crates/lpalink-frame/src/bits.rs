//! Bit-field accessors over little-endian byte arrays.
//!
//! Bit `n` lives in byte `n / 8` at position `n % 8`. Both CAN descriptors
//! are defined in this numbering, independent of the big-endian envelope
//! fields around them. Bits past the end of the buffer read as zero and are
//! dropped on write.

/// Read `width` bits (at most 64) starting at bit `offset`.
pub fn read_bits(buf: &[u8], offset: usize, width: usize) -> u64 {
    debug_assert!(width <= 64);
    (0..width).fold(0u64, |value, i| {
        let bit = offset + i;
        let set = buf
            .get(bit / 8)
            .is_some_and(|byte| (byte >> (bit % 8)) & 1 == 1);
        value | (u64::from(set) << i)
    })
}

/// Write the low `width` bits of `value` starting at bit `offset`.
pub fn write_bits(buf: &mut [u8], offset: usize, width: usize, value: u64) {
    debug_assert!(width <= 64);
    for i in 0..width {
        let bit = offset + i;
        if let Some(byte) = buf.get_mut(bit / 8) {
            let mask = 1u8 << (bit % 8);
            if (value >> i) & 1 == 1 {
                *byte |= mask;
            } else {
                *byte &= !mask;
            }
        }
    }
}

/// Read a single bit as a flag.
pub fn read_flag(buf: &[u8], offset: usize) -> bool {
    read_bits(buf, offset, 1) == 1
}

/// Write a single flag bit.
pub fn write_flag(buf: &mut [u8], offset: usize, flag: bool) {
    write_bits(buf, offset, 1, u64::from(flag));
}
