//! Varint and key-prefix primitives
//!
//! The varint is the "offset" flavour: every continuation byte subtracts one
//! before shifting, which removes redundant encodings (`0x80 0x00` is not a
//! second spelling of zero).
//!
//! ```text
//! value        bytes
//! 0            00
//! 127          7f
//! 128          80 00
//! 16511        ff 7f
//! 16512        80 80 00
//! ```

use crate::error::{ReftableError, Result};

/// Longest encoding of a u64
pub const MAX_VARINT_LEN: usize = 10;

/// Append `value` to `buf`, returning the number of bytes written
pub fn put_varint(buf: &mut Vec<u8>, mut value: u64) -> usize {
    let mut tmp = [0u8; MAX_VARINT_LEN];
    let mut i = MAX_VARINT_LEN - 1;
    tmp[i] = (value & 0x7f) as u8;
    loop {
        value >>= 7;
        if value == 0 {
            break;
        }
        value -= 1;
        i -= 1;
        tmp[i] = 0x80 | (value & 0x7f) as u8;
    }
    buf.extend_from_slice(&tmp[i..]);
    MAX_VARINT_LEN - i
}

/// Decode a varint from the front of `buf`, returning `(value, consumed)`
pub fn get_varint(buf: &[u8]) -> Result<(u64, usize)> {
    let mut byte = *buf
        .first()
        .ok_or_else(|| ReftableError::Format("varint: empty buffer".to_string()))?;
    let mut value = (byte & 0x7f) as u64;
    let mut pos = 0;

    while byte & 0x80 != 0 {
        pos += 1;
        byte = *buf
            .get(pos)
            .ok_or_else(|| ReftableError::Format("varint: truncated".to_string()))?;
        let next = value
            .checked_add(1)
            .filter(|v| *v < (1u64 << 57))
            .ok_or_else(|| ReftableError::Format("varint: overflows u64".to_string()))?;
        value = (next << 7) | (byte & 0x7f) as u64;
    }

    Ok((value, pos + 1))
}

/// Length of the common prefix of two keys
pub fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Append a length-prefixed byte string
pub fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    put_varint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Decode a length-prefixed byte string, returning `(bytes, consumed)`
pub fn get_bytes(buf: &[u8]) -> Result<(&[u8], usize)> {
    let (len, n) = get_varint(buf)?;
    let len = usize::try_from(len)
        .map_err(|_| ReftableError::Format("string length overflows usize".to_string()))?;
    let end = n
        .checked_add(len)
        .filter(|end| *end <= buf.len())
        .ok_or_else(|| ReftableError::Format("string: truncated".to_string()))?;
    Ok((&buf[n..end], end))
}

/// Decode a length-prefixed UTF-8 string, returning `(string, consumed)`
pub fn get_string(buf: &[u8]) -> Result<(String, usize)> {
    let (bytes, n) = get_bytes(buf)?;
    let s = String::from_utf8(bytes.to_vec())
        .map_err(|_| ReftableError::Format("string is not valid UTF-8".to_string()))?;
    Ok((s, n))
}
