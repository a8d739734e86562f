//! Table Module
//!
//! Immutable table files: a header, typed blocks grouped in sections, and a
//! footer locating the sections.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (24 bytes v1, 28 bytes v2)                       │
//! │   Magic "REFT" (4) | Version (1) | BlockSize u24 (3)    │
//! │   MinUpdateIndex u64 (8) | MaxUpdateIndex u64 (8)       │
//! │   [v2] HashId (4)                                       │
//! ├─────────────────────────────────────────────────────────┤
//! │ Ref blocks ('r')          │ Ref index blocks ('i')      │
//! │ Obj blocks ('o')          │ Obj index blocks ('i')      │
//! │ Log blocks ('g')          │ Log index blocks ('i')      │
//! ├─────────────────────────────────────────────────────────┤
//! │ Footer (68 bytes v1, 72 bytes v2)                       │
//! │   Header copy                                           │
//! │   RefIndexOffset u64 | ObjOffset << 5 | IdLen u64       │
//! │   ObjIndexOffset u64 | LogOffset u64 | LogIndexOffset   │
//! │   CRC32 of every preceding byte of the file (4)         │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Offset 0 in the footer means the section (or its index) is absent. The
//! ref section, when present, starts right after the header.

mod index;
mod iterator;
mod reader;
mod writer;

pub use index::{IndexBuilder, IndexLayout};
pub use iterator::TableIter;
pub use reader::Table;
pub(crate) use reader::{into_log, into_ref};
pub use writer::{TableWriter, WriterState};

use crate::error::{ReftableError, Result};
use crate::oid::HashId;

// =============================================================================
// Shared Constants (used by writer, reader, iterator)
// =============================================================================

/// Magic bytes identifying a table file
pub const MAGIC: &[u8; 4] = b"REFT";

/// Version written for SHA-1 tables (no hash id in the header)
pub const VERSION_1: u8 = 1;

/// Version written for tables carrying an explicit hash id
pub const VERSION_2: u8 = 2;

/// Footer bytes after the header copy: 5 × u64 + CRC32
pub(crate) const FOOTER_TAIL_SIZE: usize = 5 * 8 + 4;

/// Deepest index tree a reader will follow before declaring the file corrupt
pub(crate) const MAX_INDEX_DEPTH: usize = 32;

pub fn header_size(version: u8) -> usize {
    match version {
        VERSION_1 => 24,
        _ => 28,
    }
}

pub fn footer_size(version: u8) -> usize {
    header_size(version) + FOOTER_TAIL_SIZE
}

// =============================================================================
// Header
// =============================================================================

/// Decoded table header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub block_size: u32,
    pub min_update_index: u64,
    pub max_update_index: u64,
    pub hash_id: HashId,
}

impl Header {
    pub fn new(block_size: u32, min_update_index: u64, max_update_index: u64, hash_id: HashId) -> Self {
        let version = match hash_id {
            HashId::Sha1 => VERSION_1,
            HashId::Sha256 => VERSION_2,
        };
        Self {
            version,
            block_size,
            min_update_index,
            max_update_index,
            hash_id,
        }
    }

    pub fn size(&self) -> usize {
        header_size(self.version)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size());
        buf.extend_from_slice(MAGIC);
        buf.push(self.version);
        buf.extend_from_slice(&self.block_size.to_be_bytes()[1..]);
        buf.extend_from_slice(&self.min_update_index.to_be_bytes());
        buf.extend_from_slice(&self.max_update_index.to_be_bytes());
        if self.version == VERSION_2 {
            buf.extend_from_slice(&self.hash_id.format_id());
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < header_size(VERSION_1) {
            return Err(ReftableError::Format(format!(
                "file of {} bytes is too short for a header",
                bytes.len()
            )));
        }
        if &bytes[0..4] != MAGIC {
            return Err(ReftableError::Format(format!(
                "invalid magic: expected REFT, got {:?}",
                &bytes[0..4]
            )));
        }

        let version = bytes[4];
        if version != VERSION_1 && version != VERSION_2 {
            return Err(ReftableError::Unsupported(format!(
                "table version {}",
                version
            )));
        }
        if bytes.len() < header_size(version) {
            return Err(ReftableError::Format("truncated header".to_string()));
        }

        let block_size = u32::from_be_bytes([0, bytes[5], bytes[6], bytes[7]]);
        let min_update_index = be_u64(&bytes[8..16]);
        let max_update_index = be_u64(&bytes[16..24]);
        let hash_id = if version == VERSION_2 {
            HashId::from_format_id([bytes[24], bytes[25], bytes[26], bytes[27]])?
        } else {
            HashId::Sha1
        };

        if min_update_index > max_update_index {
            return Err(ReftableError::Format(format!(
                "min update index {} above max {}",
                min_update_index, max_update_index
            )));
        }

        Ok(Self {
            version,
            block_size,
            min_update_index,
            max_update_index,
            hash_id,
        })
    }
}

// =============================================================================
// Footer
// =============================================================================

/// Section locations stored in the footer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Footer {
    pub ref_index_offset: u64,
    pub obj_offset: u64,
    /// Length of the object-id prefixes used as obj record keys
    pub object_id_len: u8,
    pub obj_index_offset: u64,
    pub log_offset: u64,
    pub log_index_offset: u64,
}

impl Footer {
    /// Footer bytes without the trailing CRC
    pub fn encode(&self, header: &Header) -> Vec<u8> {
        let mut buf = header.encode();
        buf.extend_from_slice(&self.ref_index_offset.to_be_bytes());
        buf.extend_from_slice(&(self.obj_offset << 5 | self.object_id_len as u64).to_be_bytes());
        buf.extend_from_slice(&self.obj_index_offset.to_be_bytes());
        buf.extend_from_slice(&self.log_offset.to_be_bytes());
        buf.extend_from_slice(&self.log_index_offset.to_be_bytes());
        buf
    }

    /// Parse the footer fields that follow the header copy
    pub fn decode(tail: &[u8]) -> Result<Self> {
        if tail.len() < FOOTER_TAIL_SIZE - 4 {
            return Err(ReftableError::Format("truncated footer".to_string()));
        }
        let obj_field = be_u64(&tail[8..16]);
        Ok(Self {
            ref_index_offset: be_u64(&tail[0..8]),
            obj_offset: obj_field >> 5,
            object_id_len: (obj_field & 0x1f) as u8,
            obj_index_offset: be_u64(&tail[16..24]),
            log_offset: be_u64(&tail[24..32]),
            log_index_offset: be_u64(&tail[32..40]),
        })
    }
}

fn be_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(buf)
}

// =============================================================================
// Table Statistics
// =============================================================================

/// Layout statistics of one section
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectionStats {
    pub records: u64,
    pub blocks: u64,
    /// Offset of the first block (0 when the section is absent)
    pub offset: u64,
    pub index_blocks: u64,
    /// Levels of index blocks above the data blocks (0 = no index)
    pub index_depth: u32,
    pub index_offset: u64,
}

/// What a finished writer produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableStats {
    pub refs: SectionStats,
    pub objs: SectionStats,
    pub logs: SectionStats,
    pub object_id_len: u8,
    pub min_update_index: u64,
    pub max_update_index: u64,
    pub bytes_written: u64,
}
