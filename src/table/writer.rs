//! Table Writer
//!
//! Streams sorted records into a table file.
//!
//! ## States
//! ```text
//! OpenForRefs ──add_log / finish──► OpenForLogs ──finish──► Closed
//! ```
//! Refs must all be added before the first log. Ending the ref section
//! flushes the last ref block, writes the ref index and the obj section.

use std::collections::BTreeMap;
use std::io::Write;

use tracing::trace;

use crate::block::BlockWriter;
use crate::config::WriteOptions;
use crate::error::{ReftableError, Result};
use crate::record::varint::common_prefix_len;
use crate::record::{BlockType, IndexRecord, LogRecord, ObjRecord, Record, RefRecord, RefValue};

use super::{Footer, Header, IndexBuilder, SectionStats, TableStats};

/// Where the writer is in the section sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    OpenForRefs,
    OpenForLogs,
    Closed,
}

/// Writes one table to any `Write` sink
pub struct TableWriter<W: Write> {
    out: W,
    options: WriteOptions,
    hash_size: usize,
    state: WriterState,

    /// Update index bounds declared by `set_limits`
    limits: Option<(u64, u64)>,
    header_written: bool,
    /// Bytes written so far; the offset of the next block
    written: u64,
    /// Running CRC over the whole file, finalized into the footer
    file_hasher: crc32fast::Hasher,

    /// Block being filled
    block: Option<BlockWriter>,
    /// Key of the last record accepted in the current section
    last_key: Option<Vec<u8>>,
    /// (last key, offset) of every data block of the current section
    section_index: Vec<IndexRecord>,
    /// Object ids referenced from the ref block being filled
    block_oids: Vec<Vec<u8>>,
    /// Object id → offsets of the ref blocks naming it
    obj_map: BTreeMap<Vec<u8>, Vec<u64>>,

    footer: Footer,
    stats: TableStats,
}

impl<W: Write> TableWriter<W> {
    pub fn new(out: W, options: WriteOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            out,
            hash_size: options.hash_id.size(),
            options,
            state: WriterState::OpenForRefs,
            limits: None,
            header_written: false,
            written: 0,
            file_hasher: crc32fast::Hasher::new(),
            block: None,
            last_key: None,
            section_index: Vec::new(),
            block_oids: Vec::new(),
            obj_map: BTreeMap::new(),
            footer: Footer::default(),
            stats: TableStats::default(),
        })
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    /// Declare the update index range of every record that will be added.
    ///
    /// Must be called before the first record.
    pub fn set_limits(&mut self, min: u64, max: u64) -> Result<()> {
        if self.header_written || self.block.is_some() || self.state != WriterState::OpenForRefs {
            return Err(ReftableError::InvalidState(
                "limits must be set before any record is added".to_string(),
            ));
        }
        if min > max {
            return Err(ReftableError::InvalidState(format!(
                "min update index {} above max {}",
                min, max
            )));
        }
        self.limits = Some((min, max));
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Adding records
    // -------------------------------------------------------------------------

    pub fn add_ref(&mut self, record: &RefRecord) -> Result<()> {
        match self.state {
            WriterState::OpenForRefs => {}
            WriterState::OpenForLogs => {
                return Err(ReftableError::InvalidState(
                    "ref added after the log section started".to_string(),
                ))
            }
            WriterState::Closed => return Err(closed()),
        }
        if record.name.is_empty() {
            return Err(ReftableError::InvalidName(record.name.clone()));
        }
        self.check_update_index(record.update_index)?;
        self.check_key_len(record.name.as_bytes())?;
        self.check_order(record.name.as_bytes())?;

        self.add_record(Record::Ref(record.clone()))?;
        self.stats.refs.records += 1;

        if !self.options.skip_index_objects {
            if let Some(id) = record.value.object_id() {
                self.block_oids.push(id.as_bytes().to_vec());
            }
            if let RefValue::Peeled { peeled, .. } = &record.value {
                self.block_oids.push(peeled.as_bytes().to_vec());
            }
        }
        Ok(())
    }

    /// Sort `records` by name and add them
    pub fn add_refs(&mut self, mut records: Vec<RefRecord>) -> Result<()> {
        records.sort_by(|a, b| a.name.cmp(&b.name));
        for record in &records {
            self.add_ref(record)?;
        }
        Ok(())
    }

    pub fn add_log(&mut self, record: &LogRecord) -> Result<()> {
        match self.state {
            WriterState::OpenForRefs => {
                self.finish_ref_section()?;
                self.state = WriterState::OpenForLogs;
            }
            WriterState::OpenForLogs => {}
            WriterState::Closed => return Err(closed()),
        }
        if record.name.is_empty() {
            return Err(ReftableError::InvalidName(record.name.clone()));
        }
        self.check_update_index(record.update_index)?;
        let key = record.key();
        self.check_key_len(&key)?;
        self.check_order(&key)?;

        self.add_record(Record::Log(record.clone()))?;
        self.stats.logs.records += 1;
        Ok(())
    }

    /// Sort `records` by (name, update index descending) and add them
    pub fn add_logs(&mut self, mut records: Vec<LogRecord>) -> Result<()> {
        records.sort_by_key(|a| a.key());
        for record in &records {
            self.add_log(record)?;
        }
        Ok(())
    }

    /// Flush the remaining sections, write the footer and flush the sink
    pub fn finish(&mut self) -> Result<TableStats> {
        match self.state {
            WriterState::OpenForRefs => self.finish_ref_section()?,
            WriterState::OpenForLogs => {
                let (offset, index_offset) = self.finish_section(BlockType::Log)?;
                self.footer.log_offset = offset;
                self.footer.log_index_offset = index_offset;
            }
            WriterState::Closed => return Err(closed()),
        }
        self.state = WriterState::Closed;
        self.ensure_header()?;

        let header = self.header();
        let footer = self.footer.encode(&header);
        self.write_bytes(&footer)?;
        let crc = self.file_hasher.clone().finalize();
        self.write_bytes(&crc.to_be_bytes())?;
        self.out.flush()?;

        let (min, max) = self.limits.unwrap_or((0, 0));
        self.stats.min_update_index = min;
        self.stats.max_update_index = max;
        self.stats.object_id_len = self.footer.object_id_len;
        self.stats.bytes_written = self.written;

        trace!(
            refs = self.stats.refs.records,
            logs = self.stats.logs.records,
            bytes = self.written,
            "Table finished"
        );
        Ok(self.stats)
    }

    /// Give back the sink
    pub fn into_inner(self) -> W {
        self.out
    }

    // -------------------------------------------------------------------------
    // Validation
    // -------------------------------------------------------------------------

    fn check_update_index(&self, update_index: u64) -> Result<()> {
        let (min, max) = self.limits.ok_or_else(|| {
            ReftableError::InvalidState("set_limits must be called before adding records".to_string())
        })?;
        if update_index < min || update_index > max {
            return Err(ReftableError::UpdateIndexOutOfRange {
                update_index,
                min,
                max,
            });
        }
        Ok(())
    }

    /// Keys above a third of a block would leave index blocks holding a
    /// single entry, and the index would never narrow to one root.
    fn check_key_len(&self, key: &[u8]) -> Result<()> {
        let limit = self.options.block_size as usize / 3;
        if key.len() > limit {
            return Err(ReftableError::EntryTooLarge {
                size: key.len(),
                block_size: self.options.block_size,
            });
        }
        Ok(())
    }

    fn check_order(&mut self, key: &[u8]) -> Result<()> {
        if let Some(previous) = &self.last_key {
            if key <= previous.as_slice() {
                return Err(ReftableError::OutOfOrder {
                    previous: String::from_utf8_lossy(previous).into_owned(),
                    key: String::from_utf8_lossy(key).into_owned(),
                });
            }
        }
        self.last_key = Some(key.to_vec());
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Blocks and sections
    // -------------------------------------------------------------------------

    fn add_record(&mut self, record: Record) -> Result<()> {
        if self.try_add(&record)? {
            return Ok(());
        }

        self.flush_block()?;
        if !self.try_add(&record)? {
            return Err(ReftableError::EntryTooLarge {
                size: record.encode(&[], self.hash_size)?.len(),
                block_size: self.options.block_size,
            });
        }
        Ok(())
    }

    fn try_add(&mut self, record: &Record) -> Result<bool> {
        if self.block.is_none() {
            self.block = Some(self.new_block(record.block_type()));
        }
        match self.block.as_mut() {
            Some(block) => block.add(record),
            None => Ok(false),
        }
    }

    fn new_block(&self, block_type: BlockType) -> BlockWriter {
        BlockWriter::new(
            block_type,
            self.options.block_size,
            self.options.restart_interval,
            self.hash_size,
        )
    }

    /// Write the block being filled, if any
    fn flush_block(&mut self) -> Result<()> {
        let block = match self.block.take() {
            Some(block) if !block.is_empty() => block,
            _ => return Ok(()),
        };
        self.ensure_header()?;

        let offset = self.written;
        let block_type = block.block_type();
        let last_key = block.last_key().to_vec();
        let bytes = block.finish();
        self.write_bytes(&bytes)?;
        self.section_index.push(IndexRecord { last_key, offset });

        let stats = self.section_stats(block_type);
        stats.blocks += 1;
        if stats.offset == 0 {
            stats.offset = offset;
        }

        if block_type == BlockType::Ref {
            for oid in self.block_oids.drain(..) {
                let offsets = self.obj_map.entry(oid).or_default();
                if offsets.last() != Some(&offset) {
                    offsets.push(offset);
                }
            }
        }
        Ok(())
    }

    /// Flush the section's last block and write its index when the section
    /// spans more than one block. Returns (first block offset, index offset),
    /// both 0 when absent.
    fn finish_section(&mut self, block_type: BlockType) -> Result<(u64, u64)> {
        self.flush_block()?;
        self.last_key = None;
        let records = std::mem::take(&mut self.section_index);
        let first = match records.first() {
            Some(record) => record.offset,
            None => return Ok((0, 0)),
        };
        if records.len() == 1 {
            return Ok((first, 0));
        }

        let builder = IndexBuilder::new(
            self.options.block_size,
            self.options.restart_interval,
            self.hash_size,
        );
        let layout = builder.build(records, self.written)?;
        for block in &layout.blocks {
            self.write_bytes(block)?;
        }

        let stats = self.section_stats(block_type);
        stats.index_blocks = layout.blocks.len() as u64;
        stats.index_depth = layout.depth;
        stats.index_offset = layout.root_offset;
        Ok((first, layout.root_offset))
    }

    fn finish_ref_section(&mut self) -> Result<()> {
        let (_, ref_index_offset) = self.finish_section(BlockType::Ref)?;
        self.footer.ref_index_offset = ref_index_offset;

        // Tables with a single ref block are scanned directly on oid lookups
        let oids = std::mem::take(&mut self.obj_map);
        if self.stats.refs.blocks <= 1 || oids.is_empty() || self.options.skip_index_objects {
            return Ok(());
        }
        self.write_obj_section(oids)
    }

    /// Write obj records keyed by the shortest prefix that keeps every
    /// object id distinct
    fn write_obj_section(&mut self, oids: BTreeMap<Vec<u8>, Vec<u64>>) -> Result<()> {
        let id_len = unique_prefix_len(oids.keys(), self.hash_size);

        let mut records: Vec<ObjRecord> = Vec::new();
        for (oid, offsets) in oids {
            let prefix = &oid[..id_len.min(oid.len())];
            match records.last_mut() {
                Some(last) if last.prefix == prefix => {
                    last.offsets.extend(offsets);
                    last.offsets.sort_unstable();
                    last.offsets.dedup();
                }
                _ => records.push(ObjRecord {
                    prefix: prefix.to_vec(),
                    offsets,
                }),
            }
        }

        for record in records {
            self.add_record(Record::Obj(record))?;
            self.stats.objs.records += 1;
        }
        let (offset, index_offset) = self.finish_section(BlockType::Obj)?;
        self.footer.obj_offset = offset;
        self.footer.obj_index_offset = index_offset;
        self.footer.object_id_len = id_len as u8;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Output
    // -------------------------------------------------------------------------

    fn header(&self) -> Header {
        let (min, max) = self.limits.unwrap_or((0, 0));
        Header::new(self.options.block_size, min, max, self.options.hash_id)
    }

    fn ensure_header(&mut self) -> Result<()> {
        if self.header_written {
            return Ok(());
        }
        self.header_written = true;
        let header = self.header().encode();
        self.write_bytes(&header)
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.out.write_all(bytes)?;
        self.file_hasher.update(bytes);
        self.written += bytes.len() as u64;
        Ok(())
    }

    fn section_stats(&mut self, block_type: BlockType) -> &mut SectionStats {
        match block_type {
            BlockType::Ref => &mut self.stats.refs,
            BlockType::Obj => &mut self.stats.objs,
            BlockType::Log | BlockType::Index => &mut self.stats.logs,
        }
    }
}

fn closed() -> ReftableError {
    ReftableError::InvalidState("writer already finished".to_string())
}

/// One more than the longest prefix shared by two neighbouring ids, clamped
/// to [2, min(hash_size, 31)]; 31 is the largest length the footer can hold.
fn unique_prefix_len<'a>(sorted: impl Iterator<Item = &'a Vec<u8>>, hash_size: usize) -> usize {
    let mut longest_shared = 0;
    let mut previous: Option<&Vec<u8>> = None;
    for oid in sorted {
        if let Some(prev) = previous {
            let shared = common_prefix_len(prev, oid);
            longest_shared = longest_shared.max(shared);
        }
        previous = Some(oid);
    }
    (longest_shared + 1).clamp(2, hash_size.min(31))
}

