//! Prefix-compressed keys
//!
//! ## Layout
//! ```text
//! ┌──────────────────┬───────────────────────────────┬──────────────┐
//! │ prefix_len (var) │ (suffix_len << 3) | extra (var)│ suffix bytes │
//! └──────────────────┴───────────────────────────────┴──────────────┘
//! ```
//!
//! `prefix_len` bytes are shared with the previous key in the block. A key
//! with `prefix_len == 0` is a restart: it can be decoded without knowing
//! any earlier key. `extra` carries the record value type.

use crate::error::{ReftableError, Result};

use super::varint::{get_varint, put_varint, varint_len};

/// Length of the longest common prefix of `a` and `b`
pub fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Number of bytes `encode_key` writes for `key` after `prev_key`
pub fn encoded_key_len(prev_key: &[u8], key: &[u8]) -> usize {
    let prefix_len = common_prefix_len(prev_key, key);
    let suffix_len = key.len() - prefix_len;
    varint_len(prefix_len as u64) + varint_len((suffix_len as u64) << 3) + suffix_len
}

/// Encode `key` relative to `prev_key`, packing `extra` into the low 3 bits
/// of the suffix length.
///
/// Returns `(bytes_written, is_restart)`, or `None` if `extra` needs more
/// than 3 bits or `buf` is too small. Nothing is written on failure.
pub fn encode_key(buf: &mut [u8], prev_key: &[u8], key: &[u8], extra: u8) -> Option<(usize, bool)> {
    if extra > 7 || buf.len() < encoded_key_len(prev_key, key) {
        return None;
    }

    let prefix_len = common_prefix_len(prev_key, key);
    let suffix = &key[prefix_len..];

    let mut n = put_varint(buf, prefix_len as u64)?;
    n += put_varint(&mut buf[n..], ((suffix.len() as u64) << 3) | u64::from(extra))?;
    buf[n..n + suffix.len()].copy_from_slice(suffix);

    Some((n + suffix.len(), prefix_len == 0))
}

/// Decode a key that follows `prev_key`.
///
/// Returns `(bytes_consumed, key, extra)`, or `None` if the shared prefix
/// is longer than `prev_key` or the suffix runs past the buffer.
pub fn decode_key(buf: &[u8], prev_key: &[u8]) -> Option<(usize, Vec<u8>, u8)> {
    let (prefix_len, mut n) = get_varint(buf)?;
    let (packed, s) = get_varint(&buf[n..])?;
    n += s;

    let extra = (packed & 0x7) as u8;
    let suffix_len = usize::try_from(packed >> 3).ok()?;
    let prefix_len = usize::try_from(prefix_len).ok()?;

    if prefix_len > prev_key.len() {
        return None;
    }
    let suffix = buf.get(n..n.checked_add(suffix_len)?)?;

    let mut key = Vec::with_capacity(prefix_len + suffix_len);
    key.extend_from_slice(&prev_key[..prefix_len]);
    key.extend_from_slice(suffix);

    Some((n + suffix_len, key, extra))
}

/// Read the literal key stored at a restart point.
///
/// The byte at `offset` must encode `prefix_len == 0`; the suffix then is
/// the whole key.
pub fn decode_restart_key(buf: &[u8], offset: usize) -> Result<Vec<u8>> {
    let malformed = || ReftableError::format(format!("no restart key at offset {}", offset));

    let rest = buf.get(offset..).filter(|r| !r.is_empty()).ok_or_else(malformed)?;
    if rest[0] != 0 {
        return Err(malformed());
    }

    let (packed, s) = get_varint(&rest[1..]).ok_or_else(malformed)?;
    let len = usize::try_from(packed >> 3).map_err(|_| malformed())?;
    let start = 1 + s;
    let end = start.checked_add(len).ok_or_else(malformed)?;

    rest.get(start..end).map(<[u8]>::to_vec).ok_or_else(malformed)
}
