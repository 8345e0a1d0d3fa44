//! Record Module
//!
//! The four record kinds stored in a table, and the closed [`Record`] enum
//! that dispatches on the 1-byte block type.
//!
//! ## Encoding split
//! ```text
//! ┌──────────────────────────────┬──────────────────────────────┐
//! │ key (codec::encode_key)      │ payload (Record::encode)     │
//! │ carries the 3-bit val_type   │ interpretation per val_type  │
//! └──────────────────────────────┴──────────────────────────────┘
//! ```
//!
//! The key and its value type are written by the block layer; records only
//! encode and decode their payload. `encode` returns `None` without writing
//! when the buffer is too small, and `decode` returns `None` on malformed
//! input. Neither has a partially applied outcome.

mod index;
mod obj;
mod reference;
mod reflog;

use std::fmt;

pub use index::IndexRecord;
pub use obj::ObjRecord;
pub use reference::{RefRecord, RefValue};
pub use reflog::{log_key, parse_log_key, LogRecord, LOG_KEY_SUFFIX_LEN};

// =============================================================================
// Shared Constants
// =============================================================================

/// Size of an object id (SHA-1)
pub const HASH_SIZE: usize = 20;

/// Block type of ref records
pub const BLOCK_TYPE_REF: u8 = b'r';

/// Block type of reflog records
pub const BLOCK_TYPE_LOG: u8 = b'g';

/// Block type of object index records
pub const BLOCK_TYPE_OBJ: u8 = b'o';

/// Block type of block index records
pub const BLOCK_TYPE_INDEX: u8 = b'i';

/// Whether `typ` names one of the four record kinds
pub fn is_block_type(typ: u8) -> bool {
    matches!(typ, BLOCK_TYPE_REF | BLOCK_TYPE_LOG | BLOCK_TYPE_OBJ | BLOCK_TYPE_INDEX)
}

// =============================================================================
// Record
// =============================================================================

/// Any record that can live in a table block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Ref(RefRecord),
    Log(LogRecord),
    Obj(ObjRecord),
    Index(IndexRecord),
}

impl Record {
    /// An empty record of the given block type carrying `key`.
    ///
    /// Returns `None` for an unknown block type, or a log key that does not
    /// carry the 9-byte update index suffix.
    pub fn new(block_type: u8, key: &[u8]) -> Option<Record> {
        match block_type {
            BLOCK_TYPE_REF => Some(Record::Ref(RefRecord {
                ref_name: String::from_utf8(key.to_vec()).ok()?,
                ..Default::default()
            })),
            BLOCK_TYPE_LOG => {
                let mut log = LogRecord::default();
                if !key.is_empty() {
                    let (ref_name, update_index) = parse_log_key(key)?;
                    log.ref_name = ref_name;
                    log.update_index = update_index;
                }
                Some(Record::Log(log))
            }
            BLOCK_TYPE_OBJ => Some(Record::Obj(ObjRecord {
                hash_prefix: key.to_vec(),
                offsets: Vec::new(),
            })),
            BLOCK_TYPE_INDEX => Some(Record::Index(IndexRecord {
                last_key: key.to_vec(),
                offset: 0,
            })),
            _ => None,
        }
    }

    /// The block type tag of this record
    pub fn block_type(&self) -> u8 {
        match self {
            Record::Ref(_) => BLOCK_TYPE_REF,
            Record::Log(_) => BLOCK_TYPE_LOG,
            Record::Obj(_) => BLOCK_TYPE_OBJ,
            Record::Index(_) => BLOCK_TYPE_INDEX,
        }
    }

    /// The sort key
    pub fn key(&self) -> Vec<u8> {
        match self {
            Record::Ref(r) => r.key(),
            Record::Log(r) => r.key(),
            Record::Obj(r) => r.key(),
            Record::Index(r) => r.key(),
        }
    }

    /// The 3-bit value type stored alongside the key
    pub fn val_type(&self) -> u8 {
        match self {
            Record::Ref(r) => r.val_type(),
            Record::Log(r) => r.val_type(),
            Record::Obj(r) => r.val_type(),
            Record::Index(r) => r.val_type(),
        }
    }

    /// Exact payload size `encode` will produce
    pub fn encoded_len(&self) -> usize {
        match self {
            Record::Ref(r) => r.encoded_len(),
            Record::Log(r) => r.encoded_len(),
            Record::Obj(r) => r.encoded_len(),
            Record::Index(r) => r.encoded_len(),
        }
    }

    /// Encode the payload into `buf`.
    ///
    /// Takes `&mut self` because log records are normalized first, see
    /// [`LogRecord::normalize`].
    pub fn encode(&mut self, buf: &mut [u8]) -> Option<usize> {
        match self {
            Record::Ref(r) => r.encode(buf),
            Record::Log(r) => r.encode(buf),
            Record::Obj(r) => r.encode(buf),
            Record::Index(r) => r.encode(buf),
        }
    }

    /// Decode a payload of the given block type.
    ///
    /// Returns the record and the number of payload bytes consumed.
    pub fn decode(block_type: u8, buf: &[u8], key: &[u8], val_type: u8) -> Option<(Record, usize)> {
        match block_type {
            BLOCK_TYPE_REF => RefRecord::decode(buf, key, val_type).map(|(r, n)| (Record::Ref(r), n)),
            BLOCK_TYPE_LOG => LogRecord::decode(buf, key, val_type).map(|(r, n)| (Record::Log(r), n)),
            BLOCK_TYPE_OBJ => ObjRecord::decode(buf, key, val_type).map(|(r, n)| (Record::Obj(r), n)),
            BLOCK_TYPE_INDEX => {
                IndexRecord::decode(buf, key, val_type).map(|(r, n)| (Record::Index(r), n))
            }
            _ => None,
        }
    }

    /// Whether this record represents a deletion
    pub fn is_tombstone(&self) -> bool {
        match self {
            Record::Ref(r) => r.is_deletion(),
            Record::Log(r) => r.is_tombstone(),
            Record::Obj(_) | Record::Index(_) => false,
        }
    }

    /// Overwrite this record with a copy of `other`.
    ///
    /// # Panics
    ///
    /// Panics if `other` is a different kind of record.
    pub fn copy_from(&mut self, other: &Record) {
        match (self, other) {
            (Record::Ref(dst), Record::Ref(src)) => dst.clone_from(src),
            (Record::Log(dst), Record::Log(src)) => dst.clone_from(src),
            (Record::Obj(dst), Record::Obj(src)) => dst.clone_from(src),
            (Record::Index(dst), Record::Index(src)) => dst.clone_from(src),
            (dst, src) => panic!(
                "copy_from: record type mismatch ({} <- {})",
                dst.block_type() as char,
                src.block_type() as char
            ),
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Record::Ref(r) => fmt::Display::fmt(r, f),
            Record::Log(r) => fmt::Display::fmt(r, f),
            Record::Obj(r) => fmt::Display::fmt(r, f),
            Record::Index(r) => fmt::Display::fmt(r, f),
        }
    }
}

/// Lowercase hex rendering used by the `Display` impls
pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
