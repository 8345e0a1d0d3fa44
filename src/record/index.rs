//! Block index records: `last_key` of a lower block and that block's offset

use std::fmt;

use crate::codec::{get_varint, put_varint, varint_len};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexRecord {
    /// Largest key stored in the indexed block
    pub last_key: Vec<u8>,
    pub offset: u64,
}

impl IndexRecord {
    pub fn key(&self) -> Vec<u8> {
        self.last_key.clone()
    }

    pub fn val_type(&self) -> u8 {
        0
    }

    pub fn encoded_len(&self) -> usize {
        varint_len(self.offset)
    }

    pub fn encode(&self, buf: &mut [u8]) -> Option<usize> {
        put_varint(buf, self.offset)
    }

    pub fn decode(buf: &[u8], key: &[u8], _val_type: u8) -> Option<(Self, usize)> {
        let (offset, n) = get_varint(buf)?;
        Some((
            Self {
                last_key: key.to_vec(),
                offset,
            },
            n,
        ))
    }
}

impl fmt::Display for IndexRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "idx({}, {})", String::from_utf8_lossy(&self.last_key), self.offset)
    }
}
