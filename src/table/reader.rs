//! Table Reader
//!
//! Opens an immutable table file and answers point and range lookups.
//!
//! The whole file is loaded into a shared `Bytes` image on open; blocks and
//! iterators slice into it without copying. Removing the file from disk
//! after opening does not affect an open `Table`.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use bytes::Bytes;
use tracing::trace;

use crate::block::BlockReader;
use crate::error::{ReftableError, Result};
use crate::oid::{HashId, ObjectId};
use crate::record::{log_key, BlockType, LogRecord, Record, RefRecord};
use crate::source::{RecordIter, RefSource};

use super::{footer_size, Footer, Header, TableIter, FOOTER_TAIL_SIZE, MAX_INDEX_DEPTH};

/// First block and root index block of one section
#[derive(Debug, Clone, Copy)]
pub(crate) struct Section {
    pub start: u64,
    pub index_offset: u64,
}

/// An open, validated table file
#[derive(Debug)]
pub struct Table {
    name: String,
    data: Bytes,
    header: Header,
    footer: Footer,
    /// Offset where the footer starts; no block may extend past it
    body_end: u64,
}

impl Table {
    /// Read and validate the table at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let data = fs::read(path).map_err(|e| ReftableError::io_at(path, e))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        trace!(table = %name, bytes = data.len(), "Opening table");
        Self::from_bytes(name, Bytes::from(data))
    }

    /// Validate an in-memory table image
    pub fn from_bytes(name: impl Into<String>, data: Bytes) -> Result<Self> {
        let header = Header::decode(&data)?;
        let header_len = header.size();
        let footer_len = footer_size(header.version);
        if data.len() < header_len + footer_len {
            return Err(ReftableError::Format(format!(
                "file of {} bytes is too short for header and footer",
                data.len()
            )));
        }

        let body_end = data.len() - footer_len;
        let footer_bytes = &data[body_end..];

        // Whole-file checksum
        let crc_pos = data.len() - 4;
        let expected = u32::from_be_bytes([
            data[crc_pos],
            data[crc_pos + 1],
            data[crc_pos + 2],
            data[crc_pos + 3],
        ]);
        let actual = crc32fast::hash(&data[..crc_pos]);
        if expected != actual {
            return Err(ReftableError::Checksum {
                offset: crc_pos as u64,
                expected,
                actual,
            });
        }

        if footer_bytes[..header_len] != data[..header_len] {
            return Err(ReftableError::Format(
                "footer does not repeat the header".to_string(),
            ));
        }
        let footer = Footer::decode(&footer_bytes[header_len..header_len + FOOTER_TAIL_SIZE - 4])?;

        let body_end = body_end as u64;
        for (what, offset) in [
            ("ref index", footer.ref_index_offset),
            ("obj", footer.obj_offset),
            ("obj index", footer.obj_index_offset),
            ("log", footer.log_offset),
            ("log index", footer.log_index_offset),
        ] {
            if offset != 0 && (offset < header_len as u64 || offset >= body_end) {
                return Err(ReftableError::Format(format!(
                    "{} offset {} outside table body",
                    what, offset
                )));
            }
        }
        if footer.obj_offset != 0 && (footer.object_id_len == 0 || footer.object_id_len as usize > header.hash_id.size()) {
            return Err(ReftableError::Format(format!(
                "object id length {} invalid",
                footer.object_id_len
            )));
        }

        Ok(Self {
            name: name.into(),
            data,
            header,
            footer,
            body_end,
        })
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// File name of the table (empty for in-memory images)
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn footer(&self) -> &Footer {
        &self.footer
    }

    /// Size of the file in bytes
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn block_size(&self) -> u32 {
        self.header.block_size
    }

    pub fn hash_size(&self) -> usize {
        self.header.hash_id.size()
    }

    pub(crate) fn body_end(&self) -> u64 {
        self.body_end
    }

    pub fn has_refs(&self) -> bool {
        self.section(BlockType::Ref).is_some()
    }

    pub fn has_logs(&self) -> bool {
        self.footer.log_offset != 0
    }

    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    /// Every ref record (tombstones included) from the first name >= `name`
    pub fn seek_ref(&self, name: &str) -> Result<TableIter<'_>> {
        self.seek_records(BlockType::Ref, name.as_bytes())
    }

    /// Log records starting with the newest entry for `name`
    pub fn seek_log(&self, name: &str) -> Result<TableIter<'_>> {
        self.seek_records(BlockType::Log, &log_key(name, u64::MAX))
    }

    /// Log records starting at `(name, update_index)` or the next older entry
    pub fn seek_log_at(&self, name: &str, update_index: u64) -> Result<TableIter<'_>> {
        self.seek_records(BlockType::Log, &log_key(name, update_index))
    }

    /// Exact lookup; returns tombstones as records
    pub fn read_ref(&self, name: &str) -> Result<Option<RefRecord>> {
        match self.seek_ref(name)?.next() {
            Some(Ok(Record::Ref(record))) if record.name == name => Ok(Some(record)),
            Some(Err(e)) => Err(e),
            _ => Ok(None),
        }
    }

    /// Refs whose value names `oid`, in name order. `oid` may be an
    /// abbreviated id, matching every id it prefixes.
    ///
    /// Uses the obj section when present; otherwise scans the ref section.
    pub fn refs_for_oid(&self, oid: &ObjectId) -> Result<Vec<RefRecord>> {
        let mut found = Vec::new();

        if self.footer.obj_offset == 0 {
            for record in self.seek_ref("")? {
                if let Record::Ref(r) = record? {
                    if r.value.points_at(oid) {
                        found.push(r);
                    }
                }
            }
            return Ok(found);
        }

        // An abbreviated id may span several obj records
        let id_len = self.footer.object_id_len as usize;
        let key = &oid.as_bytes()[..oid.len().min(id_len)];
        let mut offsets = BTreeSet::new();
        for record in self.seek_records(BlockType::Obj, key)? {
            match record? {
                Record::Obj(obj) if obj.prefix.starts_with(key) => offsets.extend(obj.offsets),
                _ => break,
            }
        }

        for offset in offsets {
            let block = self.block_at(offset)?;
            if block.block_type() != BlockType::Ref {
                return Err(ReftableError::Corrupt {
                    offset,
                    reason: "obj record points at a non-ref block".to_string(),
                });
            }
            for record in block.iter() {
                if let Record::Ref(r) = record? {
                    if r.value.points_at(oid) {
                        found.push(r);
                    }
                }
            }
        }
        Ok(found)
    }

    /// Number of index levels above the data blocks of a section
    pub fn index_depth(&self, block_type: BlockType) -> Result<usize> {
        let section = match self.section(block_type) {
            Some(section) if section.index_offset != 0 => section,
            _ => return Ok(0),
        };

        let mut depth = 0;
        let mut offset = section.index_offset;
        loop {
            let block = self.block_at(offset)?;
            if block.block_type() != BlockType::Index {
                return Ok(depth);
            }
            depth += 1;
            if depth > MAX_INDEX_DEPTH {
                return Err(self.index_too_deep(offset));
            }
            offset = match block.iter().next() {
                Some(Ok(Record::Index(index))) => index.offset,
                Some(Err(e)) => return Err(e),
                _ => return Err(self.index_too_deep(offset)),
            };
        }
    }

    pub fn ref_index_depth(&self) -> Result<usize> {
        self.index_depth(BlockType::Ref)
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    pub(crate) fn section(&self, block_type: BlockType) -> Option<Section> {
        match block_type {
            BlockType::Ref => {
                let start = self.header.size() as u64;
                let first = self.data.get(start as usize).copied();
                (start < self.body_end && first == Some(BlockType::Ref.as_u8())).then_some(Section {
                    start,
                    index_offset: self.footer.ref_index_offset,
                })
            }
            BlockType::Obj => (self.footer.obj_offset != 0).then_some(Section {
                start: self.footer.obj_offset,
                index_offset: self.footer.obj_index_offset,
            }),
            BlockType::Log => (self.footer.log_offset != 0).then_some(Section {
                start: self.footer.log_offset,
                index_offset: self.footer.log_index_offset,
            }),
            BlockType::Index => None,
        }
    }

    pub(crate) fn block_at(&self, offset: u64) -> Result<BlockReader> {
        BlockReader::new(&self.data, offset, self.body_end, self.hash_size())
    }

    /// Iterator over `block_type` records positioned at the first key >= `key`
    pub fn seek_records(&self, block_type: BlockType, key: &[u8]) -> Result<TableIter<'_>> {
        let section = match self.section(block_type) {
            Some(section) => section,
            None => return Ok(TableIter::empty(self, block_type)),
        };

        let mut block = if section.index_offset != 0 {
            match self.descend_index(section.index_offset, key)? {
                Some(block) => block,
                None => return Ok(TableIter::empty(self, block_type)),
            }
        } else {
            self.block_at(section.start)?
        };

        // Without an index, walk forward to the first block holding a key >= target
        loop {
            if block.block_type() != block_type {
                if section.index_offset != 0 {
                    return Err(ReftableError::Corrupt {
                        offset: block.offset(),
                        reason: format!("index points at a {:?} block", block.block_type()),
                    });
                }
                return Ok(TableIter::empty(self, block_type));
            }

            let iter = block.seek(key)?;
            let next_offset = block.next_offset();
            if !iter.is_exhausted() {
                return Ok(TableIter::new(self, block_type, iter, next_offset));
            }
            if next_offset >= self.body_end {
                return Ok(TableIter::empty(self, block_type));
            }
            block = self.block_at(next_offset)?;
        }
    }

    /// Follow index blocks from `root` to the data block that may hold `key`
    fn descend_index(&self, root: u64, key: &[u8]) -> Result<Option<BlockReader>> {
        let mut offset = root;
        for _ in 0..=MAX_INDEX_DEPTH {
            let block = self.block_at(offset)?;
            if block.block_type() != BlockType::Index {
                return Ok(Some(block));
            }
            offset = match block.seek(key)?.next() {
                None => return Ok(None),
                Some(Ok(Record::Index(index))) => index.offset,
                Some(Ok(_)) => {
                    return Err(ReftableError::Corrupt {
                        offset,
                        reason: "non-index record in index block".to_string(),
                    })
                }
                Some(Err(e)) => return Err(e),
            };
        }
        Err(self.index_too_deep(root))
    }

    fn index_too_deep(&self, offset: u64) -> ReftableError {
        ReftableError::Corrupt {
            offset,
            reason: format!("index deeper than {} levels", MAX_INDEX_DEPTH),
        }
    }
}

// =============================================================================
// RefSource
// =============================================================================

impl RefSource for Table {
    fn seek_ref(&self, name: &str) -> Result<RecordIter<'_, RefRecord>> {
        let iter = Table::seek_ref(self, name)?;
        Ok(Box::new(iter.map(|r| r.and_then(into_ref))))
    }

    fn seek_log(&self, name: &str) -> Result<RecordIter<'_, LogRecord>> {
        let iter = Table::seek_log(self, name)?;
        Ok(Box::new(iter.map(|r| r.and_then(into_log))))
    }

    fn read_ref(&self, name: &str) -> Result<Option<RefRecord>> {
        Table::read_ref(self, name)
    }

    fn refs_for_oid(&self, oid: &ObjectId) -> Result<Vec<RefRecord>> {
        Table::refs_for_oid(self, oid)
    }

    fn min_update_index(&self) -> u64 {
        self.header.min_update_index
    }

    fn max_update_index(&self) -> u64 {
        self.header.max_update_index
    }

    fn hash_id(&self) -> HashId {
        self.header.hash_id
    }
}

pub(crate) fn into_ref(record: Record) -> Result<RefRecord> {
    match record {
        Record::Ref(r) => Ok(r),
        other => Err(ReftableError::Format(format!(
            "expected a ref record, found {:?}",
            other.block_type()
        ))),
    }
}

pub(crate) fn into_log(record: Record) -> Result<LogRecord> {
    match record {
        Record::Log(l) => Ok(l),
        other => Err(ReftableError::Format(format!(
            "expected a log record, found {:?}",
            other.block_type()
        ))),
    }
}
