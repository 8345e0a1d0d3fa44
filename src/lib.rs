//! # reftable
//!
//! Storage for version-control references and their history:
//! - Prefix-compressed, sorted, immutable tables of refs and reflog entries
//! - An append-only stack of tables that reads as one
//! - Lock files and atomic rename for crash-safe multi-process commits
//! - Size-tiered automatic compaction
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Stack                               │
//! │        (manifest, reload, transactional add, compaction)     │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                     Merged view                              │
//! │              (newest table shadows older)                    │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │   Writer    │          │   Reader    │
//!   │  (blocks)   │          │ (BlockSrc)  │
//!   └──────┬──────┘          └──────┬──────┘
//!          └────────────┬────────────┘
//!                       ▼
//!               ┌───────────────┐
//!               │ Record / Codec│
//!               └───────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use reftable::{read_ref, Config, RefRecord, Stack};
//!
//! # fn main() -> reftable::Result<()> {
//! let mut stack = Stack::open("refs", "refs/tables.list", Config::default())?;
//! let next = stack.next_update_index();
//! stack.add(|w| w.add_ref(&RefRecord::val1("refs/heads/main", next, [1u8; 20])))?;
//!
//! let main = read_ref(stack.merged(), "refs/heads/main")?;
//! assert!(main.is_some());
//! # Ok(())
//! # }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod codec;
pub mod record;
pub mod table;
pub mod stack;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{ReftableError, Result};
pub use config::{Config, LogExpiration};
pub use record::{LogRecord, ObjRecord, IndexRecord, Record, RefRecord, RefValue, HASH_SIZE};
pub use table::{read_log_at, read_ref, Merged, Reader, Table, Writer};
pub use stack::{CompactionStats, Stack};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
