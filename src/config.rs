//! Configuration for reftable
//!
//! Centralized configuration with sensible defaults. `WriteOptions` governs
//! the layout of a single table file; `Config` governs a stack directory.

use std::path::PathBuf;

use crate::error::{ReftableError, Result};
use crate::oid::HashId;

/// Largest block size expressible in the 3-byte header field
pub const MAX_BLOCK_SIZE: u32 = (1 << 24) - 1;

/// Smallest block size accepted by the writer
pub const MIN_BLOCK_SIZE: u32 = 256;

// =============================================================================
// Table Write Options
// =============================================================================

/// Options controlling how a table file is laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Upper bound on the size of every block (header and checksum included)
    pub block_size: u32,

    /// A restart point (full key) is stored every `restart_interval` records
    pub restart_interval: usize,

    /// Object id hash function; decides the id width and the header version
    pub hash_id: HashId,

    /// Do not write the object-id reverse index section
    pub skip_index_objects: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            block_size: 4096,
            restart_interval: 16,
            hash_id: HashId::Sha1,
            skip_index_objects: false,
        }
    }
}

impl WriteOptions {
    /// Check that the options describe a writable table
    pub fn validate(&self) -> Result<()> {
        if self.block_size < MIN_BLOCK_SIZE || self.block_size > MAX_BLOCK_SIZE {
            return Err(ReftableError::Config(format!(
                "block_size must be within [{}, {}], got {}",
                MIN_BLOCK_SIZE, MAX_BLOCK_SIZE, self.block_size
            )));
        }
        if self.restart_interval == 0 || self.restart_interval > u16::MAX as usize {
            return Err(ReftableError::Config(format!(
                "restart_interval must be within [1, {}], got {}",
                u16::MAX,
                self.restart_interval
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Stack Configuration
// =============================================================================

/// Main configuration for a reftable stack
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Directory holding the stack
    /// Internal structure:
    ///   {dir}/
    ///     ├── tables.list        (ordered table names, oldest first)
    ///     ├── tables.list.lock   (present only while a commit is in flight)
    ///     ├── compaction.lock    (present only while compacting)
    ///     └── 0x…-0x…-….ref      (immutable tables)
    pub dir: PathBuf,

    /// Layout of newly written tables
    pub write_options: WriteOptions,

    // -------------------------------------------------------------------------
    // Compaction Configuration
    // -------------------------------------------------------------------------
    /// Run the geometric compaction policy after every commit
    pub auto_compact: bool,

    /// Size ratio between adjacent tables that the stack maintains
    pub compaction_factor: u64,

    /// Age after which an abandoned compaction marker is removed by `clean`
    pub lock_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Commit Configuration
    // -------------------------------------------------------------------------
    /// Attempts after the first when the list changed under a commit
    pub commit_retries: usize,

    /// Attempts after the first when a listed table vanished during reload
    pub reload_retries: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./reftable"),
            write_options: WriteOptions::default(),
            auto_compact: true,
            compaction_factor: 2,
            lock_timeout_ms: 60_000,
            commit_retries: 8,
            reload_retries: 8,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check the configuration for values the stack cannot work with
    pub fn validate(&self) -> Result<()> {
        self.write_options.validate()?;
        if self.compaction_factor < 2 {
            return Err(ReftableError::Config(format!(
                "compaction_factor must be at least 2, got {}",
                self.compaction_factor
            )));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the stack directory
    pub fn dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.dir = path.into();
        self
    }

    /// Set the table layout options
    pub fn write_options(mut self, options: WriteOptions) -> Self {
        self.config.write_options = options;
        self
    }

    /// Set the block size of newly written tables
    pub fn block_size(mut self, size: u32) -> Self {
        self.config.write_options.block_size = size;
        self
    }

    /// Set the hash function of newly written tables
    pub fn hash_id(mut self, hash_id: HashId) -> Self {
        self.config.write_options.hash_id = hash_id;
        self
    }

    /// Enable or disable compaction after each commit
    pub fn auto_compact(mut self, enabled: bool) -> Self {
        self.config.auto_compact = enabled;
        self
    }

    /// Set the geometric compaction factor
    pub fn compaction_factor(mut self, factor: u64) -> Self {
        self.config.compaction_factor = factor;
        self
    }

    /// Set the number of commit retries after a lost race
    pub fn commit_retries(mut self, retries: usize) -> Self {
        self.config.commit_retries = retries;
        self
    }

    /// Set the number of reload retries when a table vanished
    pub fn reload_retries(mut self, retries: usize) -> Self {
        self.config.reload_retries = retries;
        self
    }

    /// Set the stale compaction marker timeout (in milliseconds)
    pub fn lock_timeout_ms(mut self, ms: u64) -> Self {
        self.config.lock_timeout_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
