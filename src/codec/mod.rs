//! Codec Module
//!
//! Low-level byte encodings shared by every record type.
//!
//! ## Responsibilities
//! - Variable-length unsigned integers (`varint`)
//! - Prefix-compressed keys with a 3-bit side channel (`key`)
//! - Length-prefixed UTF-8 strings (`string`)
//!
//! All encoders write into a caller-supplied slice and return `None` when
//! the slice is too small. Decoders return `None` on malformed or truncated
//! input. `None` always means "no effect": callers must not look at the
//! destination buffer after a failed encode.

mod key;
mod string;
mod varint;

pub use key::{common_prefix_len, decode_key, decode_restart_key, encode_key, encoded_key_len};
pub use string::{decode_string, encode_string, encoded_string_len};
pub use varint::{get_varint, put_varint, varint_len, MAX_VARINT_LEN};
