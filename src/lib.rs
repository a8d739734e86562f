//! # reftable
//!
//! A storage engine for named references (branches, tags, symbolic refs)
//! and their change logs:
//! - Immutable, block-structured table files with prefix-compressed keys
//! - Multi-level indexes and an object-id reverse index
//! - A stack of tables merged into one view, newest table winning
//! - Lock-file based atomic commits safe across processes
//! - Geometric auto-compaction
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Stack                              │
//! │      (tables.list, lock files, transactions, compaction)    │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                     MergedTable                             │
//! │           (heap merge, newest table wins per key)           │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │ TableWriter │          │    Table    │
//!   │  (append)   │          │  (reader)   │
//!   └──────┬──────┘          └──────┬──────┘
//!          │                        │
//!          ▼                        ▼
//!   ┌─────────────────────────────────────┐
//!   │      Blocks (r / g / o / i)         │
//!   │  Records (ref, log, obj, index)     │
//!   └─────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod oid;

pub mod record;
pub mod block;
pub mod table;
pub mod source;
pub mod merged;
pub mod stack;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{Config, WriteOptions};
pub use error::{ReftableError, Result};
pub use merged::MergedTable;
pub use oid::{HashId, ObjectId};
pub use record::{LogEntry, LogRecord, LogValue, RefRecord, RefValue, Signature};
pub use source::{RecordIter, RefSource};
pub use stack::{LogInfo, RefUpdate, Stack, StackStats, Transaction};
pub use table::{Table, TableStats, TableWriter};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of reftable
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
