//! Tests for the byte codecs
//!
//! These tests verify:
//! - Varint round trips at every encoded-length boundary
//! - Varint rejection of empty, truncated and overflowing input
//! - Prefix-compressed key encoding and restart detection
//! - Restart key lookup
//! - Length-prefixed strings

use reftable::codec::{
    decode_key, decode_restart_key, decode_string, encode_key, encode_string, encoded_key_len, get_varint,
    put_varint, varint_len, MAX_VARINT_LEN,
};
use reftable::ReftableError;

// =============================================================================
// Helper Functions
// =============================================================================

fn varint_bytes(val: u64) -> Vec<u8> {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let n = put_varint(&mut buf, val).unwrap();
    buf[..n].to_vec()
}

/// Smallest value needing `n` bytes
fn first_of_len(n: usize) -> u64 {
    (1..n).fold(0u64, |acc, _| (acc + 1) << 7)
}

// =============================================================================
// Varint Tests
// =============================================================================

#[test]
fn test_varint_small_values_single_byte() {
    assert_eq!(varint_bytes(0), vec![0x00]);
    assert_eq!(varint_bytes(1), vec![0x01]);
    assert_eq!(varint_bytes(127), vec![0x7f]);
}

#[test]
fn test_varint_continuation_adds_one() {
    // 128 = ((0 + 1) << 7) | 0
    assert_eq!(varint_bytes(128), vec![0x80, 0x00]);
    // 16511 is the last two-byte value
    assert_eq!(varint_bytes(16511), vec![0xff, 0x7f]);
    assert_eq!(varint_bytes(16512), vec![0x80, 0x80, 0x00]);
}

#[test]
fn test_varint_round_trip_at_length_boundaries() {
    for n in 1..=MAX_VARINT_LEN {
        let lo = first_of_len(n);
        for val in [lo, lo.saturating_sub(1), lo + 1] {
            let bytes = varint_bytes(val);
            assert_eq!(bytes.len(), varint_len(val));
            assert_eq!(get_varint(&bytes), Some((val, bytes.len())), "value {}", val);
        }
    }
    assert_eq!(varint_len(first_of_len(MAX_VARINT_LEN)), MAX_VARINT_LEN);
}

#[test]
fn test_varint_round_trip_extremes() {
    for val in [0, 1, u64::MAX / 2, u64::MAX - 1, u64::MAX] {
        let bytes = varint_bytes(val);
        assert!(bytes.len() <= MAX_VARINT_LEN);
        assert_eq!(get_varint(&bytes), Some((val, bytes.len())));
    }
}

#[test]
fn test_varint_decode_ignores_trailing_bytes() {
    let mut bytes = varint_bytes(300);
    bytes.extend_from_slice(&[0xaa, 0xbb]);
    assert_eq!(get_varint(&bytes), Some((300, 2)));
}

#[test]
fn test_varint_empty_buffer() {
    assert_eq!(get_varint(&[]), None);
}

#[test]
fn test_varint_truncated() {
    let bytes = varint_bytes(1 << 40);
    assert!(bytes.len() > 1);
    assert_eq!(get_varint(&bytes[..bytes.len() - 1]), None);
}

#[test]
fn test_varint_overflow_rejected() {
    let bytes = [0xff; MAX_VARINT_LEN + 1];
    let mut bytes = bytes.to_vec();
    bytes.push(0x7f);
    assert_eq!(get_varint(&bytes), None);
}

#[test]
fn test_put_varint_small_buffer_writes_nothing() {
    let mut buf = [0xeeu8; 1];
    assert_eq!(put_varint(&mut buf, 1000), None);
    assert_eq!(buf, [0xee]);

    let mut empty: [u8; 0] = [];
    assert_eq!(put_varint(&mut empty, 0), None);
}

// =============================================================================
// Key Tests
// =============================================================================

#[test]
fn test_key_round_trip_with_prefix() {
    let prev = b"refs/heads/main";
    let key = b"refs/heads/master";
    let mut buf = [0u8; 64];

    let (n, restart) = encode_key(&mut buf, prev, key, 3).unwrap();
    assert!(!restart);
    assert_eq!(n, encoded_key_len(prev, key));

    let (m, decoded, extra) = decode_key(&buf[..n], prev).unwrap();
    assert_eq!(m, n);
    assert_eq!(decoded, key);
    assert_eq!(extra, 3);
}

#[test]
fn test_key_restart_iff_no_shared_prefix() {
    let mut buf = [0u8; 64];

    let (_, restart) = encode_key(&mut buf, b"", b"refs/tags/v1", 0).unwrap();
    assert!(restart, "empty previous key is always a restart");

    let (_, restart) = encode_key(&mut buf, b"HEAD", b"refs/tags/v1", 0).unwrap();
    assert!(restart);

    let (_, restart) = encode_key(&mut buf, b"refs/tags/v0", b"refs/tags/v1", 0).unwrap();
    assert!(!restart);
}

#[test]
fn test_key_extra_must_fit_three_bits() {
    let mut buf = [0u8; 64];
    assert!(encode_key(&mut buf, b"", b"a", 7).is_some());
    assert!(encode_key(&mut buf, b"", b"a", 8).is_none());
}

#[test]
fn test_key_small_buffer_fails() {
    let key = b"refs/heads/feature";
    let mut buf = vec![0u8; encoded_key_len(b"", key) - 1];
    assert!(encode_key(&mut buf, b"", key, 1).is_none());
}

#[test]
fn test_decode_key_prefix_longer_than_prev() {
    let mut buf = [0u8; 64];
    let (n, _) = encode_key(&mut buf, b"abcdef", b"abcdxy", 0).unwrap();
    assert!(decode_key(&buf[..n], b"ab").is_none());
}

#[test]
fn test_decode_key_suffix_overrun() {
    let mut buf = [0u8; 64];
    let (n, _) = encode_key(&mut buf, b"", b"refs/heads/main", 0).unwrap();
    assert!(decode_key(&buf[..n - 1], b"").is_none());
}

#[test]
fn test_decode_restart_key() {
    let mut buf = vec![0xffu8; 3];
    let mut encoded = [0u8; 64];
    let (n, _) = encode_key(&mut encoded, b"", b"refs/heads/main", 1).unwrap();
    buf.extend_from_slice(&encoded[..n]);

    assert_eq!(decode_restart_key(&buf, 3).unwrap(), b"refs/heads/main");
}

#[test]
fn test_decode_restart_key_rejects_prefixed_key() {
    let mut buf = [0u8; 64];
    let (n, _) = encode_key(&mut buf, b"refs/a", b"refs/b", 0).unwrap();

    let err = decode_restart_key(&buf[..n], 0).unwrap_err();
    assert!(matches!(err, ReftableError::Format(_)));
    assert!(decode_restart_key(&buf[..n], 100).is_err());
}

// =============================================================================
// String Tests
// =============================================================================

#[test]
fn test_string_round_trip() {
    let mut buf = [0u8; 64];
    let n = encode_string(&mut buf, "Jane Doe <jane@example.com>").unwrap();
    assert_eq!(decode_string(&buf[..n]), Some(("Jane Doe <jane@example.com>".to_string(), n)));

    let n = encode_string(&mut buf, "").unwrap();
    assert_eq!(n, 1);
    assert_eq!(decode_string(&buf[..n]), Some((String::new(), 1)));
}

#[test]
fn test_string_errors() {
    let mut small = [0u8; 3];
    assert_eq!(encode_string(&mut small, "hello"), None);

    // Length says 5, only 2 bytes follow
    assert_eq!(decode_string(&[5, b'h', b'i']), None);
    // Invalid UTF-8
    assert_eq!(decode_string(&[2, 0xc3, 0x28]), None);
}
