//! Configuration for reftable
//!
//! Centralized configuration with sensible defaults.

use std::time::Duration;

/// Main configuration shared by table writers and the stack
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Table Configuration
    // -------------------------------------------------------------------------
    /// Target size of a block in bytes. A single record larger than this
    /// gets a block of its own.
    pub block_size: u32,

    /// Force a restart (full, uncompressed key) every N records in a block
    pub restart_interval: usize,

    /// Write an object id → ref block index for reverse lookups
    pub index_objects: bool,

    // -------------------------------------------------------------------------
    // Stack Configuration
    // -------------------------------------------------------------------------
    /// How long `reload` keeps retrying when a racing compaction removed
    /// a table named in the manifest
    pub reload_timeout: Duration,

    /// Run the compaction heuristic after every successful add
    pub auto_compact: bool,
}

/// Largest block size the u24 block length field can express
pub const MAX_BLOCK_SIZE: u32 = (1 << 24) - 1;

impl Default for Config {
    fn default() -> Self {
        Self {
            block_size: 4096,
            restart_interval: 16,
            index_objects: true,
            reload_timeout: Duration::from_millis(2500),
            auto_compact: true,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the block size (clamped to the largest encodable block)
    pub fn block_size(mut self, size: u32) -> Self {
        self.config.block_size = size.min(MAX_BLOCK_SIZE);
        self
    }

    /// Set the restart interval (at least 1)
    pub fn restart_interval(mut self, interval: usize) -> Self {
        self.config.restart_interval = interval.max(1);
        self
    }

    /// Enable or disable the object index
    pub fn index_objects(mut self, enabled: bool) -> Self {
        self.config.index_objects = enabled;
        self
    }

    /// Set the reload retry deadline
    pub fn reload_timeout(mut self, timeout: Duration) -> Self {
        self.config.reload_timeout = timeout;
        self
    }

    /// Enable or disable compaction after each add
    pub fn auto_compact(mut self, enabled: bool) -> Self {
        self.config.auto_compact = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

/// Reflog expiry applied while rewriting log records during compaction.
///
/// A zero field disables that particular filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogExpiration {
    /// Drop entries whose `time` is older than this (seconds since epoch)
    pub time: u64,
    /// Drop entries whose update index is below this
    pub min_update_index: u64,
    /// Drop entries whose update index is above this
    pub max_update_index: u64,
}

impl LogExpiration {
    /// Whether a log entry survives this expiration policy
    pub fn keeps(&self, time: u64, update_index: u64) -> bool {
        if self.time > 0 && time < self.time {
            return false;
        }
        if self.max_update_index != 0 && update_index > self.max_update_index {
            return false;
        }
        if self.min_update_index != 0 && update_index < self.min_update_index {
            return false;
        }
        true
    }
}
