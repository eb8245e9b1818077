//! Variable-length integer encoding and decoding
//!
//! Protocol Buffers style: every byte carries 7 bits of the value, and the
//! high bit says whether another byte follows. Used for the content length of
//! log records and for the redelivery counters.

use bytes::{Buf, BufMut};

const DATA_BITS_PER_BYTE: u32 = 7;
const DATA_BITS_MASK: u8 = 0x7F;
const CONTINUATION_BIT_MASK: u8 = 0x80;

/// Longest encoding of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarintError {
    /// The buffer ended before the last byte.
    EndOfBuffer,
    /// More bits than fit in a `u64`.
    Overflow,
}

/// Encodes `value` as a varint.
pub fn write(value: u64, buf: &mut impl BufMut) {
    if value < u64::from(CONTINUATION_BIT_MASK) {
        buf.put_u8(value as u8);
        return;
    }

    let mut val = value;
    while val >= u64::from(CONTINUATION_BIT_MASK) {
        buf.put_u8((val as u8 & DATA_BITS_MASK) | CONTINUATION_BIT_MASK);
        val >>= DATA_BITS_PER_BYTE;
    }
    buf.put_u8(val as u8);
}

/// Decodes a varint, consuming exactly the bytes it occupies.
pub fn read(buf: &mut impl Buf) -> Result<u64, VarintError> {
    let mut result: u64 = 0;
    let mut shift: u32 = 0;

    loop {
        if !buf.has_remaining() {
            return Err(VarintError::EndOfBuffer);
        }
        let byte = buf.get_u8();

        // the tenth byte may only carry the single remaining bit
        if shift == 63 && byte > 1 {
            return Err(VarintError::Overflow);
        }

        result |= u64::from(byte & DATA_BITS_MASK) << shift;
        if byte & CONTINUATION_BIT_MASK == 0 {
            return Ok(result);
        }

        shift += DATA_BITS_PER_BYTE;
        if shift > 63 {
            return Err(VarintError::Overflow);
        }
    }
}

/// Number of bytes `value` occupies once encoded.
pub fn size(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.max(1).div_ceil(DATA_BITS_PER_BYTE as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn small_values_take_one_byte() {
        let mut buf = BytesMut::new();
        write(0, &mut buf);
        write(127, &mut buf);
        assert_eq!(&buf[..], &[0x00, 0x7F]);
        assert_eq!(size(0), 1);
        assert_eq!(size(127), 1);
    }

    #[test]
    fn known_encodings() {
        let mut buf = BytesMut::new();
        write(300, &mut buf);
        assert_eq!(&buf[..], &[0xAC, 0x02]);
        assert_eq!(size(300), 2);

        let mut slice = &buf[..];
        assert_eq!(read(&mut slice), Ok(300));
        assert!(slice.is_empty());
    }

    #[test]
    fn max_value_uses_ten_bytes() {
        let mut buf = BytesMut::new();
        write(u64::MAX, &mut buf);
        assert_eq!(buf.len(), MAX_VARINT_LEN);
        assert_eq!(size(u64::MAX), MAX_VARINT_LEN);
        assert_eq!(read(&mut &buf[..]), Ok(u64::MAX));
    }

    #[test]
    fn truncated_input_is_reported() {
        let mut slice: &[u8] = &[0x80, 0x80];
        assert_eq!(read(&mut slice), Err(VarintError::EndOfBuffer));
    }

    #[test]
    fn overflow_is_rejected() {
        let bytes = [0xFFu8, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x02];
        assert_eq!(read(&mut &bytes[..]), Err(VarintError::Overflow));
    }
}
