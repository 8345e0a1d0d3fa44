//! Reflog records
//!
//! ## Key
//! ```text
//! ┌──────────┬──────┬─────────────────────────────┐
//! │ ref_name │ 0x00 │ !update_index (u64, BE)     │
//! └──────────┴──────┴─────────────────────────────┘
//! ```
//! Complementing the update index makes newer entries of the same ref
//! sort first.
//!
//! ## Payload (val_type 1)
//! ```text
//! [old id][new id][name][email][message][time (varint)][tz_offset (i16, BE)]
//! ```
//! val_type 0 is a tombstone with an empty payload.

use std::fmt;

use crate::codec::{decode_string, encode_string, encoded_string_len, get_varint, put_varint, varint_len};

use super::HASH_SIZE;

/// Length of the separator plus complemented update index
pub const LOG_KEY_SUFFIX_LEN: usize = 9;

/// Build the sort key of the log entry for `ref_name` at `update_index`
pub fn log_key(ref_name: &str, update_index: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(ref_name.len() + LOG_KEY_SUFFIX_LEN);
    key.extend_from_slice(ref_name.as_bytes());
    key.push(0);
    key.extend_from_slice(&(!update_index).to_be_bytes());
    key
}

/// Split a log key into ref name and update index
pub fn parse_log_key(key: &[u8]) -> Option<(String, u64)> {
    if key.len() <= LOG_KEY_SUFFIX_LEN {
        return None;
    }
    let (name, suffix) = key.split_at(key.len() - LOG_KEY_SUFFIX_LEN);
    if suffix[0] != 0 {
        return None;
    }
    let rev = u64::from_be_bytes(suffix[1..].try_into().ok()?);
    let name = String::from_utf8(name.to_vec()).ok()?;
    Some((name, !rev))
}

/// One entry of a ref's history
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogRecord {
    pub ref_name: String,
    /// Logical timestamp ordering entries of one ref; stored in the key
    pub update_index: u64,
    pub old: Option<Vec<u8>>,
    pub new: Option<Vec<u8>>,
    pub name: String,
    pub email: String,
    /// Seconds since the epoch
    pub time: u64,
    /// Timezone offset, e.g. -700 for UTC-07:00
    pub tz_offset: i16,
    pub message: String,
}

impl LogRecord {
    pub fn key(&self) -> Vec<u8> {
        log_key(&self.ref_name, self.update_index)
    }

    /// A log tombstone has neither an old nor a new id
    pub fn is_tombstone(&self) -> bool {
        self.old.is_none() && self.new.is_none()
    }

    pub fn val_type(&self) -> u8 {
        if self.is_tombstone() {
            0
        } else {
            1
        }
    }

    /// Fill an absent `old` or `new` with the all-zero id.
    ///
    /// This changes the record: after encoding, a record that had only one
    /// id set reads back with the other id set to zeros. Tombstones are left
    /// alone so they still encode as tombstones.
    pub fn normalize(&mut self) {
        if self.is_tombstone() {
            return;
        }
        self.old.get_or_insert_with(|| vec![0; HASH_SIZE]);
        self.new.get_or_insert_with(|| vec![0; HASH_SIZE]);
    }

    pub fn encoded_len(&self) -> usize {
        if self.is_tombstone() {
            return 0;
        }
        2 * HASH_SIZE
            + encoded_string_len(&self.name)
            + encoded_string_len(&self.email)
            + encoded_string_len(&self.message)
            + varint_len(self.time)
            + 2
    }

    /// Normalize, then encode the payload.
    ///
    /// # Panics
    ///
    /// Panics if a set `old` or `new` id is not `HASH_SIZE` bytes long.
    pub fn encode(&mut self, buf: &mut [u8]) -> Option<usize> {
        self.normalize();
        let (Some(old), Some(new)) = (&self.old, &self.new) else {
            return Some(0);
        };
        assert!(
            old.len() == HASH_SIZE && new.len() == HASH_SIZE,
            "log {}@{}: object id has wrong length",
            self.ref_name,
            self.update_index
        );
        if buf.len() < self.encoded_len() {
            return None;
        }

        buf[..HASH_SIZE].copy_from_slice(old);
        buf[HASH_SIZE..2 * HASH_SIZE].copy_from_slice(new);
        let mut n = 2 * HASH_SIZE;

        n += encode_string(&mut buf[n..], &self.name)?;
        n += encode_string(&mut buf[n..], &self.email)?;
        n += encode_string(&mut buf[n..], &self.message)?;
        n += put_varint(&mut buf[n..], self.time)?;
        buf[n..n + 2].copy_from_slice(&self.tz_offset.to_be_bytes());
        Some(n + 2)
    }

    pub fn decode(buf: &[u8], key: &[u8], val_type: u8) -> Option<(Self, usize)> {
        let (ref_name, update_index) = parse_log_key(key)?;
        let mut rec = Self {
            ref_name,
            update_index,
            ..Default::default()
        };

        match val_type {
            0 => return Some((rec, 0)),
            1 => {}
            _ => return None,
        }

        rec.old = Some(buf.get(..HASH_SIZE)?.to_vec());
        rec.new = Some(buf.get(HASH_SIZE..2 * HASH_SIZE)?.to_vec());
        let mut n = 2 * HASH_SIZE;

        let (name, s) = decode_string(&buf[n..])?;
        n += s;
        let (email, s) = decode_string(&buf[n..])?;
        n += s;
        let (message, s) = decode_string(&buf[n..])?;
        n += s;
        let (time, s) = get_varint(&buf[n..])?;
        n += s;
        let tz = buf.get(n..n + 2)?;
        n += 2;

        rec.name = name;
        rec.email = email;
        rec.message = message;
        rec.time = time;
        rec.tz_offset = i16::from_be_bytes([tz[0], tz[1]]);
        Some((rec, n))
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "log({}, {})", self.ref_name, self.update_index)
    }
}
