//! Block Module
//!
//! Size-capped runs of prefix-compressed records with restart points.
//!
//! ## Block Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (4 bytes)                                        │
//! │   Type: u8 ('r','g','o','i') | Length: u24 (whole block) │
//! ├─────────────────────────────────────────────────────────┤
//! │ Records (variable)                                      │
//! │   prefix-compressed entries, strictly increasing keys   │
//! ├─────────────────────────────────────────────────────────┤
//! │ Restart offsets: u24 × N (relative to block start)      │
//! │ Restart count:   u16                                    │
//! ├─────────────────────────────────────────────────────────┤
//! │ CRC32 of all preceding block bytes: u32                 │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Every restart record stores its full key, so a reader can binary-search
//! the restart table and then decode forward from a single restart point.

mod reader;
mod writer;

pub use reader::{BlockIter, BlockReader};
pub use writer::BlockWriter;

// =============================================================================
// Shared Constants (used by writer and reader)
// =============================================================================

/// Type (1) + Length (3)
pub const BLOCK_HEADER_SIZE: usize = 4;

/// Restart count (2) + CRC32 (4)
pub const BLOCK_TRAILER_SIZE: usize = 6;

/// Size of one restart offset entry
pub const RESTART_ENTRY_SIZE: usize = 3;

/// Smallest well-formed block: header, one restart, trailer
pub const MIN_BLOCK_LEN: usize = BLOCK_HEADER_SIZE + RESTART_ENTRY_SIZE + BLOCK_TRAILER_SIZE;

pub(crate) fn put_u24(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_be_bytes()[1..]);
}

pub(crate) fn get_u24(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]])
}
