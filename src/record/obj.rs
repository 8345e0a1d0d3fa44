//! Object index records
//!
//! Map an object id prefix to the offsets of the ref blocks that mention
//! the object. Small counts ride in the value type:
//!
//! ```text
//! val_type 1..=7  [first offset][delta]...                (count = val_type)
//! val_type 0      [count][first offset][delta]...         (count 0 or >= 8)
//! ```
//! A count of 0 read back from the payload means "no offsets".

use std::fmt;

use crate::codec::{get_varint, put_varint, varint_len};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjRecord {
    pub hash_prefix: Vec<u8>,
    /// Ascending block offsets
    pub offsets: Vec<u64>,
}

impl ObjRecord {
    pub fn key(&self) -> Vec<u8> {
        self.hash_prefix.clone()
    }

    pub fn val_type(&self) -> u8 {
        match self.offsets.len() {
            n @ 1..=7 => n as u8,
            _ => 0,
        }
    }

    fn explicit_count(&self) -> bool {
        self.val_type() == 0
    }

    pub fn encoded_len(&self) -> usize {
        let mut len = 0;
        if self.explicit_count() {
            len += varint_len(self.offsets.len() as u64);
        }
        let mut last = 0;
        for (i, &o) in self.offsets.iter().enumerate() {
            len += varint_len(if i == 0 { o } else { o.wrapping_sub(last) });
            last = o;
        }
        len
    }

    /// Encode the payload.
    ///
    /// # Panics
    ///
    /// Panics if the offsets are not ascending.
    pub fn encode(&self, buf: &mut [u8]) -> Option<usize> {
        assert!(
            self.offsets.windows(2).all(|w| w[0] <= w[1]),
            "obj record offsets must be ascending"
        );
        if buf.len() < self.encoded_len() {
            return None;
        }

        let mut n = 0;
        if self.explicit_count() {
            n += put_varint(buf, self.offsets.len() as u64)?;
        }
        let Some((&first, rest)) = self.offsets.split_first() else {
            return Some(n);
        };
        n += put_varint(&mut buf[n..], first)?;

        let mut last = first;
        for &o in rest {
            n += put_varint(&mut buf[n..], o - last)?;
            last = o;
        }
        Some(n)
    }

    pub fn decode(buf: &[u8], key: &[u8], val_type: u8) -> Option<(Self, usize)> {
        let mut n = 0;
        let count = if val_type == 0 {
            let (count, s) = get_varint(buf)?;
            n += s;
            count
        } else {
            u64::from(val_type)
        };

        let mut rec = Self {
            hash_prefix: key.to_vec(),
            offsets: Vec::new(),
        };
        if count == 0 {
            return Some((rec, n));
        }

        // Each offset takes at least one byte
        rec.offsets.reserve(usize::try_from(count).ok()?.min(buf.len()));
        let mut last = 0u64;
        for i in 0..count {
            let (val, s) = get_varint(&buf[n..])?;
            n += s;
            last = if i == 0 { val } else { last.checked_add(val)? };
            rec.offsets.push(last);
        }
        Some((rec, n))
    }
}

impl fmt::Display for ObjRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj({}, {:?})", super::hex(&self.hash_prefix), self.offsets)
    }
}
