//! Length-prefixed strings: `[len (varint)][utf-8 bytes]`

use super::varint::{get_varint, put_varint, varint_len};

/// Number of bytes `encode_string` writes for `val`
pub fn encoded_string_len(val: &str) -> usize {
    varint_len(val.len() as u64) + val.len()
}

/// Encode `val`, or `None` (nothing written) if `buf` is too small
pub fn encode_string(buf: &mut [u8], val: &str) -> Option<usize> {
    let total = encoded_string_len(val);
    if buf.len() < total {
        return None;
    }
    let n = put_varint(buf, val.len() as u64)?;
    buf[n..total].copy_from_slice(val.as_bytes());
    Some(total)
}

/// Decode a string, returning it with the number of bytes consumed
pub fn decode_string(buf: &[u8]) -> Option<(String, usize)> {
    let (len, n) = get_varint(buf)?;
    let len = usize::try_from(len).ok()?;
    let bytes = buf.get(n..n.checked_add(len)?)?;
    let val = String::from_utf8(bytes.to_vec()).ok()?;
    Some((val, n + len))
}
