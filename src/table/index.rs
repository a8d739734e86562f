//! Index Builder
//!
//! Lays out index blocks over the data blocks of one section. When the index
//! records do not fit a single block, the index blocks are themselves
//! indexed, level by level, until one root block remains.
//!
//! ```text
//!                 ┌──────────┐
//!   level 2       │   root   │
//!                 └────┬─────┘
//!            ┌─────────┴──────────┐
//!   level 1  │ idx │ idx │ … │ idx │
//!            └──┬──┴──┬──┴───┴──┬──┘
//!   data     │ r │ r │ r │ … │ r │ r │
//! ```

use std::mem;

use crate::block::BlockWriter;
use crate::error::{ReftableError, Result};
use crate::record::{BlockType, IndexRecord, Record};

/// Index blocks ready to be appended to a table
#[derive(Debug, Default)]
pub struct IndexLayout {
    /// Finished blocks in file order (lowest level first)
    pub blocks: Vec<Vec<u8>>,
    pub root_offset: u64,
    pub depth: u32,
}

impl IndexLayout {
    pub fn total_len(&self) -> u64 {
        self.blocks.iter().map(|b| b.len() as u64).sum()
    }
}

/// Builds multi-level index blocks
pub struct IndexBuilder {
    block_size: u32,
    restart_interval: usize,
    hash_size: usize,
}

impl IndexBuilder {
    pub fn new(block_size: u32, restart_interval: usize, hash_size: usize) -> Self {
        Self {
            block_size,
            restart_interval,
            hash_size,
        }
    }

    /// Lay out the index over `records`, with the first index block placed at
    /// `start_offset` in the file.
    pub fn build(&self, mut records: Vec<IndexRecord>, start_offset: u64) -> Result<IndexLayout> {
        if records.is_empty() {
            return Err(ReftableError::InvalidState(
                "index requested for an empty section".to_string(),
            ));
        }

        let mut layout = IndexLayout::default();
        let mut offset = start_offset;

        loop {
            layout.depth += 1;
            let level_len = records.len();
            let widest = records.iter().map(|r| r.last_key.len()).max().unwrap_or(0);
            let mut parents = Vec::new();
            let mut writer = self.new_block();

            for index_record in records {
                let record = Record::Index(index_record);
                if writer.add(&record)? {
                    continue;
                }
                if writer.is_empty() {
                    return Err(self.too_large(&record)?);
                }

                let full = mem::replace(&mut writer, self.new_block());
                offset = Self::emit(full, offset, &mut layout, &mut parents);

                if !writer.add(&record)? {
                    return Err(self.too_large(&record)?);
                }
            }
            offset = Self::emit(writer, offset, &mut layout, &mut parents);

            if parents.len() == 1 {
                layout.root_offset = parents[0].offset;
                return Ok(layout);
            }
            // One entry per block: another level would be just as wide
            if parents.len() >= level_len {
                return Err(ReftableError::EntryTooLarge {
                    size: widest,
                    block_size: self.block_size,
                });
            }
            records = parents;
        }
    }

    fn new_block(&self) -> BlockWriter {
        BlockWriter::new(BlockType::Index, self.block_size, self.restart_interval, self.hash_size)
    }

    /// Finish `writer`, append it to the layout and record its parent entry
    fn emit(writer: BlockWriter, offset: u64, layout: &mut IndexLayout, parents: &mut Vec<IndexRecord>) -> u64 {
        let last_key = writer.last_key().to_vec();
        let bytes = writer.finish();
        let next = offset + bytes.len() as u64;
        parents.push(IndexRecord { last_key, offset });
        layout.blocks.push(bytes);
        next
    }

    fn too_large(&self, record: &Record) -> Result<ReftableError> {
        Ok(ReftableError::EntryTooLarge {
            size: record.encode(&[], self.hash_size)?.len(),
            block_size: self.block_size,
        })
    }
}
