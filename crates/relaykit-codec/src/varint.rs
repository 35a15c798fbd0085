//! Variable-length integers.
//!
//! Every byte carries a continuation flag in its high bit (set on all bytes
//! but the last) and seven payload bits, least significant group first.
//! Encodings are capped at [`MAX_LEN`] bytes, which bounds the domains:
//!
//! ```text
//! unsigned: [C|d d d d d d d] [C|d d d d d d d] ...        56 payload bits
//! signed:   [C|S|d d d d d d] [C|d d d d d d d] ...        55 payload bits
//! ```
//!
//! The signed form folds the sign into the first byte instead of spending a
//! whole byte on it. Negative values store `!v` (that is `-v - 1`), so the
//! signed domain is the full two's-complement range of 56 bits.

use crate::CodecError;

/// Maximum number of bytes a varint may occupy.
pub const MAX_LEN: usize = 8;

/// Largest value [`encode_unsigned`] accepts: 2^56 - 1.
pub const MAX_UNSIGNED: u64 = (1 << 56) - 1;

/// Largest value [`encode_signed`] accepts: 2^55 - 1.
pub const MAX_SIGNED: i64 = (1 << 55) - 1;

/// Smallest value [`encode_signed`] accepts: -2^55.
pub const MIN_SIGNED: i64 = -(1 << 55);

const CONTINUE: u8 = 0x80;
const SIGN: u8 = 0x40;

/// Appends the unsigned varint for `value` to `out`, returning its length.
pub fn encode_unsigned(value: u64, out: &mut Vec<u8>) -> Result<usize, CodecError> {
    if value > MAX_UNSIGNED {
        return Err(CodecError::ValueOutOfRange(value.into()));
    }
    let mut rest = value;
    let mut written = 0;
    loop {
        let group = (rest & 0x7f) as u8;
        rest >>= 7;
        written += 1;
        if rest == 0 {
            out.push(group);
            return Ok(written);
        }
        out.push(group | CONTINUE);
    }
}

/// Decodes an unsigned varint from the front of `input`.
///
/// Returns the value and the number of bytes consumed.
pub fn decode_unsigned(input: &[u8]) -> Result<(u64, usize), CodecError> {
    let mut value = 0u64;
    for i in 0..MAX_LEN {
        let byte = *input
            .get(i)
            .ok_or(CodecError::UnexpectedEof { needed: 1 })?;
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & CONTINUE == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(CodecError::MalformedVarInt(MAX_LEN))
}

/// Appends the signed varint for `value` to `out`, returning its length.
pub fn encode_signed(value: i64, out: &mut Vec<u8>) -> Result<usize, CodecError> {
    if !(MIN_SIGNED..=MAX_SIGNED).contains(&value) {
        return Err(CodecError::ValueOutOfRange(value.into()));
    }
    let negative = value < 0;
    let mut magnitude = (if negative { !value } else { value }) as u64;

    let mut first = (magnitude & 0x3f) as u8;
    if negative {
        first |= SIGN;
    }
    magnitude >>= 6;
    if magnitude == 0 {
        out.push(first);
        return Ok(1);
    }
    out.push(first | CONTINUE);

    let mut written = 1;
    while magnitude != 0 {
        let mut group = (magnitude & 0x7f) as u8;
        magnitude >>= 7;
        if magnitude != 0 {
            group |= CONTINUE;
        }
        out.push(group);
        written += 1;
    }
    Ok(written)
}

/// Decodes a signed varint from the front of `input`.
///
/// Returns the value and the number of bytes consumed.
pub fn decode_signed(input: &[u8]) -> Result<(i64, usize), CodecError> {
    let first = *input
        .first()
        .ok_or(CodecError::UnexpectedEof { needed: 1 })?;
    let negative = first & SIGN != 0;
    let mut magnitude = u64::from(first & 0x3f);
    let mut consumed = 1;

    if first & CONTINUE != 0 {
        let mut shift = 6;
        loop {
            if consumed == MAX_LEN {
                return Err(CodecError::MalformedVarInt(MAX_LEN));
            }
            let byte = *input
                .get(consumed)
                .ok_or(CodecError::UnexpectedEof { needed: 1 })?;
            magnitude |= u64::from(byte & 0x7f) << shift;
            shift += 7;
            consumed += 1;
            if byte & CONTINUE == 0 {
                break;
            }
        }
    }

    let magnitude = magnitude as i64;
    let value = if negative { !magnitude } else { magnitude };
    Ok((value, consumed))
}

/// Number of bytes [`encode_unsigned`] would write for `value`.
pub fn unsigned_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// Number of bytes [`encode_signed`] would write for `value`.
pub fn signed_len(value: i64) -> usize {
    let magnitude = (if value < 0 { !value } else { value }) as u64;
    let bits = 64 - magnitude.leading_zeros() as usize;
    if bits <= 6 {
        1
    } else {
        1 + (bits - 6).div_ceil(7)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn roundtrip_unsigned(value: u64) {
        let mut buf = Vec::new();
        let written = encode_unsigned(value, &mut buf).unwrap();
        assert_eq!(written, buf.len());
        assert_eq!(written, unsigned_len(value), "length of {value}");
        assert_eq!(decode_unsigned(&buf).unwrap(), (value, written));
    }

    fn roundtrip_signed(value: i64) {
        let mut buf = Vec::new();
        let written = encode_signed(value, &mut buf).unwrap();
        assert_eq!(written, buf.len());
        assert_eq!(written, signed_len(value), "length of {value}");
        assert_eq!(decode_signed(&buf).unwrap(), (value, written));
    }

    #[test]
    fn test_unsigned_boundaries_roundtrip() {
        for shift in 0..56 {
            let p = 1u64 << shift;
            roundtrip_unsigned(p - 1);
            roundtrip_unsigned(p);
            roundtrip_unsigned(p + 1);
        }
        roundtrip_unsigned(0);
        roundtrip_unsigned(MAX_UNSIGNED);
    }

    #[test]
    fn test_signed_boundaries_roundtrip() {
        for shift in 0..55 {
            let p = 1i64 << shift;
            for v in [p - 1, p, p + 1, -p - 1, -p, -p + 1] {
                roundtrip_signed(v);
            }
        }
        roundtrip_signed(0);
        roundtrip_signed(-1);
        roundtrip_signed(MAX_SIGNED);
        roundtrip_signed(MIN_SIGNED);
    }

    #[test]
    fn test_random_values_roundtrip() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..20_000 {
            roundtrip_unsigned(rng.random_range(0..=MAX_UNSIGNED));
            roundtrip_signed(rng.random_range(MIN_SIGNED..=MAX_SIGNED));
        }
    }

    #[test]
    fn test_small_values_are_one_byte() {
        assert_eq!(unsigned_len(127), 1);
        assert_eq!(unsigned_len(128), 2);
        assert_eq!(signed_len(63), 1);
        assert_eq!(signed_len(-64), 1);
        assert_eq!(signed_len(64), 2);
        assert_eq!(signed_len(-65), 2);
    }

    #[test]
    fn test_max_values_use_max_len() {
        assert_eq!(unsigned_len(MAX_UNSIGNED), MAX_LEN);
        assert_eq!(signed_len(MAX_SIGNED), MAX_LEN);
        assert_eq!(signed_len(MIN_SIGNED), MAX_LEN);
    }

    #[test]
    fn test_out_of_range_is_rejected() {
        let mut buf = Vec::new();
        assert!(matches!(
            encode_unsigned(MAX_UNSIGNED + 1, &mut buf),
            Err(CodecError::ValueOutOfRange(_))
        ));
        assert!(matches!(
            encode_signed(MAX_SIGNED + 1, &mut buf),
            Err(CodecError::ValueOutOfRange(_))
        ));
        assert!(matches!(
            encode_signed(MIN_SIGNED - 1, &mut buf),
            Err(CodecError::ValueOutOfRange(_))
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_truncated_input_is_eof() {
        assert!(matches!(
            decode_unsigned(&[0x80, 0x80]),
            Err(CodecError::UnexpectedEof { .. })
        ));
        assert!(matches!(
            decode_signed(&[]),
            Err(CodecError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_overlong_input_is_malformed() {
        let overlong = [0xff; 9];
        assert_eq!(
            decode_unsigned(&overlong),
            Err(CodecError::MalformedVarInt(MAX_LEN))
        );
        assert_eq!(
            decode_signed(&overlong),
            Err(CodecError::MalformedVarInt(MAX_LEN))
        );
    }

    #[test]
    fn test_decoding_stops_at_last_byte() {
        let mut buf = Vec::new();
        encode_unsigned(300, &mut buf).unwrap();
        buf.extend_from_slice(&[0xAA, 0xBB]);
        assert_eq!(decode_unsigned(&buf).unwrap(), (300, 2));
    }
}
