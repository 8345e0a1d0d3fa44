//! Ref records
//!
//! ## Payload by value type
//! ```text
//! 0 deletion   [update_index]
//! 1 value      [update_index][object id]
//! 2 peeled     [update_index][object id][peeled object id]
//! 3 symref     [update_index][target_len][target]
//! ```

use std::fmt;

use crate::codec::{decode_string, encode_string, encoded_string_len, get_varint, put_varint, varint_len};

use super::HASH_SIZE;

/// The value a ref points at
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RefValue {
    /// The ref was deleted
    #[default]
    Deletion,
    /// Direct object id
    Val1(Vec<u8>),
    /// Annotated tag: object id plus the id it peels to
    Val2 { value: Vec<u8>, target_value: Vec<u8> },
    /// Symbolic ref naming another ref
    Symref(String),
}

/// A reference name and the value it held at `update_index`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefRecord {
    pub ref_name: String,
    pub update_index: u64,
    pub value: RefValue,
}

impl RefRecord {
    /// Ref pointing directly at an object
    pub fn val1(ref_name: impl Into<String>, update_index: u64, value: impl Into<Vec<u8>>) -> Self {
        Self {
            ref_name: ref_name.into(),
            update_index,
            value: RefValue::Val1(value.into()),
        }
    }

    /// Ref pointing at a tag object together with its peeled target
    pub fn val2(
        ref_name: impl Into<String>,
        update_index: u64,
        value: impl Into<Vec<u8>>,
        target_value: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            ref_name: ref_name.into(),
            update_index,
            value: RefValue::Val2 {
                value: value.into(),
                target_value: target_value.into(),
            },
        }
    }

    /// Symbolic ref
    pub fn symref(ref_name: impl Into<String>, update_index: u64, target: impl Into<String>) -> Self {
        Self {
            ref_name: ref_name.into(),
            update_index,
            value: RefValue::Symref(target.into()),
        }
    }

    /// Deletion of `ref_name`
    pub fn deletion(ref_name: impl Into<String>, update_index: u64) -> Self {
        Self {
            ref_name: ref_name.into(),
            update_index,
            value: RefValue::Deletion,
        }
    }

    pub fn key(&self) -> Vec<u8> {
        self.ref_name.as_bytes().to_vec()
    }

    pub fn is_deletion(&self) -> bool {
        self.value == RefValue::Deletion
    }

    /// The object id, if any
    pub fn value(&self) -> Option<&[u8]> {
        match &self.value {
            RefValue::Val1(v) | RefValue::Val2 { value: v, .. } => Some(v),
            _ => None,
        }
    }

    /// The peeled object id, if any
    pub fn target_value(&self) -> Option<&[u8]> {
        match &self.value {
            RefValue::Val2 { target_value, .. } => Some(target_value),
            _ => None,
        }
    }

    /// The symbolic target, if any
    pub fn target(&self) -> Option<&str> {
        match &self.value {
            RefValue::Symref(t) => Some(t),
            _ => None,
        }
    }

    /// Whether this ref names `oid` as its value or peeled value
    pub fn points_to(&self, oid: &[u8]) -> bool {
        self.value() == Some(oid) || self.target_value() == Some(oid)
    }

    pub fn val_type(&self) -> u8 {
        match self.value {
            RefValue::Deletion => 0,
            RefValue::Val1(_) => 1,
            RefValue::Val2 { .. } => 2,
            RefValue::Symref(_) => 3,
        }
    }

    pub fn encoded_len(&self) -> usize {
        let value_len = match &self.value {
            RefValue::Deletion => 0,
            RefValue::Val1(_) => HASH_SIZE,
            RefValue::Val2 { .. } => 2 * HASH_SIZE,
            RefValue::Symref(target) => encoded_string_len(target),
        };
        varint_len(self.update_index) + value_len
    }

    /// Encode the payload.
    ///
    /// # Panics
    ///
    /// Panics if an object id is not `HASH_SIZE` bytes long.
    pub fn encode(&self, buf: &mut [u8]) -> Option<usize> {
        for id in [self.value(), self.target_value()].into_iter().flatten() {
            assert_eq!(id.len(), HASH_SIZE, "ref {}: object id has wrong length", self.ref_name);
        }
        if buf.len() < self.encoded_len() {
            return None;
        }

        let mut n = put_varint(buf, self.update_index)?;
        match &self.value {
            RefValue::Deletion => {}
            RefValue::Val1(value) => {
                buf[n..n + HASH_SIZE].copy_from_slice(value);
                n += HASH_SIZE;
            }
            RefValue::Val2 { value, target_value } => {
                buf[n..n + HASH_SIZE].copy_from_slice(value);
                n += HASH_SIZE;
                buf[n..n + HASH_SIZE].copy_from_slice(target_value);
                n += HASH_SIZE;
            }
            RefValue::Symref(target) => {
                n += encode_string(&mut buf[n..], target)?;
            }
        }
        Some(n)
    }

    pub fn decode(buf: &[u8], key: &[u8], val_type: u8) -> Option<(Self, usize)> {
        let ref_name = String::from_utf8(key.to_vec()).ok()?;
        let (update_index, mut n) = get_varint(buf)?;

        let value = match val_type {
            0 => RefValue::Deletion,
            1 => {
                let value = buf.get(n..n + HASH_SIZE)?.to_vec();
                n += HASH_SIZE;
                RefValue::Val1(value)
            }
            2 => {
                let value = buf.get(n..n + HASH_SIZE)?.to_vec();
                n += HASH_SIZE;
                let target_value = buf.get(n..n + HASH_SIZE)?.to_vec();
                n += HASH_SIZE;
                RefValue::Val2 { value, target_value }
            }
            3 => {
                let (target, s) = decode_string(&buf[n..])?;
                n += s;
                RefValue::Symref(target)
            }
            _ => return None,
        };

        Some((
            Self {
                ref_name,
                update_index,
                value,
            },
            n,
        ))
    }
}

impl fmt::Display for RefRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ref({}", self.ref_name)?;
        match &self.value {
            RefValue::Deletion => write!(f, " deleted")?,
            RefValue::Val1(v) => write!(f, " => {}", super::hex(v))?,
            RefValue::Val2 { value, target_value } => {
                write!(f, " => {} ^{}", super::hex(value), super::hex(target_value))?
            }
            RefValue::Symref(t) => write!(f, " -> {}", t)?,
        }
        write!(f, " @{})", self.update_index)
    }
}
