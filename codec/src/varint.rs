//! LEB128 encoding of `u32` length prefixes.

use crate::Error;
use bytes::{Buf, BufMut};

/// Maximum number of bytes a `u32` occupies once encoded.
const MAX_BYTES: usize = 5;

/// Writes `value` to `buf`.
pub fn write(mut value: u32, buf: &mut impl BufMut) {
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Returns the number of bytes [write] produces for `value`.
pub fn size(value: u32) -> usize {
    let bits = 32 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// Reads a canonically encoded value from `buf`.
pub fn read(buf: &mut impl Buf) -> Result<u32, Error> {
    let mut result: u64 = 0;
    for i in 0..MAX_BYTES {
        if !buf.has_remaining() {
            return Err(Error::EndOfBuffer);
        }
        let byte = buf.get_u8();

        // Reject non-canonical trailing zero groups
        if i > 0 && byte == 0 {
            return Err(Error::InvalidVarint);
        }
        result |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return u32::try_from(result).map_err(|_| Error::InvalidVarint);
        }
    }
    Err(Error::InvalidVarint)
}
