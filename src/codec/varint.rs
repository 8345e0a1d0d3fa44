//! Variable-length integers
//!
//! Big-endian base-128 groups with a continuation bit. Unlike LEB128, every
//! continuation byte adds one before shifting, so each encoded length covers
//! a disjoint range of values and no value has two encodings:
//!
//! ```text
//! decode: value = ((value + 1) << 7) | (next & 0x7f)
//! encode: continuation byte = 0x80 | ((value - 1) & 0x7f)
//! ```

/// Longest encoding of a u64
pub const MAX_VARINT_LEN: usize = 10;

/// Decode a varint from the front of `buf`.
///
/// Returns the value and the number of bytes consumed, or `None` if the
/// buffer is empty, ends inside the varint, or encodes a value past u64.
pub fn get_varint(buf: &[u8]) -> Option<(u64, usize)> {
    let first = *buf.first()?;
    let mut val = u64::from(first & 0x7f);
    let mut ptr = 0;
    while buf[ptr] & 0x80 != 0 {
        ptr += 1;
        let byte = *buf.get(ptr)?;
        val = val.checked_add(1)?.checked_mul(128)? | u64::from(byte & 0x7f);
    }
    Some((val, ptr + 1))
}

/// Encode `val` into the front of `buf`.
///
/// Returns the number of bytes written, or `None` (with `buf` untouched)
/// when `buf` is too small.
pub fn put_varint(buf: &mut [u8], mut val: u64) -> Option<usize> {
    let mut scratch = [0u8; MAX_VARINT_LEN];
    let mut i = MAX_VARINT_LEN - 1;
    scratch[i] = (val & 0x7f) as u8;
    loop {
        val >>= 7;
        if val == 0 {
            break;
        }
        val -= 1;
        i -= 1;
        scratch[i] = 0x80 | (val & 0x7f) as u8;
    }

    let encoded = &scratch[i..];
    let dest = buf.get_mut(..encoded.len())?;
    dest.copy_from_slice(encoded);
    Some(encoded.len())
}

/// Number of bytes `put_varint` needs for `val`
pub fn varint_len(mut val: u64) -> usize {
    let mut n = 1;
    while val >> 7 != 0 {
        val = (val >> 7) - 1;
        n += 1;
    }
    n
}
