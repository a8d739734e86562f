//! Error types for reftable
//!
//! Provides a unified error type for all operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using ReftableError
pub type Result<T> = std::result::Result<T, ReftableError>;

/// Unified error type for reftable operations
#[derive(Debug, Error)]
pub enum ReftableError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error on {path}: {source}")]
    IoPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // -------------------------------------------------------------------------
    // Format Errors (table is unusable)
    // -------------------------------------------------------------------------
    #[error("Format error: {0}")]
    Format(String),

    #[error("Corrupt table data at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    #[error("Checksum mismatch at offset {offset}: expected {expected:#010x}, got {actual:#010x}")]
    Checksum {
        offset: u64,
        expected: u32,
        actual: u32,
    },

    #[error("Unsupported: {0}")]
    Unsupported(String),

    // -------------------------------------------------------------------------
    // Writer Errors
    // -------------------------------------------------------------------------
    #[error("Out of order key: {key:?} after {previous:?}")]
    OutOfOrder { previous: String, key: String },

    #[error("Update index {update_index} outside writer limits [{min}, {max}]")]
    UpdateIndexOutOfRange { update_index: u64, min: u64, max: u64 },

    #[error("Entry of {size} bytes does not fit a {block_size} byte block")]
    EntryTooLarge { size: usize, block_size: u32 },

    #[error("Invalid writer state: {0}")]
    InvalidState(String),

    // -------------------------------------------------------------------------
    // Stack / Transaction Errors
    // -------------------------------------------------------------------------
    #[error("Concurrent update: {0}")]
    ConcurrentUpdate(String),

    #[error("Reference {name} conflict: {reason}")]
    Conflict { name: String, reason: String },

    #[error("Invalid reference name: {0:?}")]
    InvalidName(String),

    #[error("Reference {0} updated more than once in a transaction")]
    DuplicateName(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ReftableError {
    /// Attach a file path to a bare I/O error
    pub fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ReftableError::IoPath {
            path: path.into(),
            source,
        }
    }

    /// Lift a codec-level `Format` error to a positional `Corrupt` error.
    /// Errors that already carry a position are returned unchanged.
    pub fn at_offset(self, offset: u64) -> Self {
        match self {
            ReftableError::Format(reason) => ReftableError::Corrupt { offset, reason },
            other => other,
        }
    }

    /// Whether retrying the operation against a reloaded stack may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReftableError::ConcurrentUpdate(_))
    }
}
