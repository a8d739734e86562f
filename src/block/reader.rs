//! Block Reader
//!
//! Validates a block inside a table image and provides seek/iteration.

use bytes::Bytes;

use crate::error::{ReftableError, Result};
use crate::record::{decode_entry, BlockType, Record};

use super::{get_u24, BLOCK_HEADER_SIZE, BLOCK_TRAILER_SIZE, MIN_BLOCK_LEN, RESTART_ENTRY_SIZE};

/// A validated block. Cloning is cheap (shares the table image).
#[derive(Clone, Debug)]
pub struct BlockReader {
    /// Exactly the bytes of this block
    data: Bytes,
    /// Position of the block in its file
    offset: u64,
    block_type: BlockType,
    /// End of the record stream / start of the restart table
    records_end: usize,
    restart_count: usize,
    hash_size: usize,
}

impl BlockReader {
    /// Parse the block starting at `offset` of `image`, which must end before `limit`
    pub fn new(image: &Bytes, offset: u64, limit: u64, hash_size: usize) -> Result<Self> {
        let corrupt = |reason: String| ReftableError::Corrupt { offset, reason };

        let start = offset as usize;
        if offset + BLOCK_HEADER_SIZE as u64 > limit || limit as usize > image.len() {
            return Err(corrupt("block header past end of section".to_string()));
        }

        let header = &image[start..start + BLOCK_HEADER_SIZE];
        let block_type = BlockType::from_u8(header[0])
            .ok_or_else(|| corrupt(format!("unknown block type {:#04x}", header[0])))?;
        let block_len = get_u24(&header[1..4]) as usize;
        if block_len < MIN_BLOCK_LEN {
            return Err(corrupt(format!("block length {} too small", block_len)));
        }
        if offset + block_len as u64 > limit {
            return Err(corrupt(format!(
                "block length {} runs past offset {}",
                block_len, limit
            )));
        }

        let data = image.slice(start..start + block_len);

        // Checksum covers everything before the trailing CRC
        let crc_pos = block_len - 4;
        let expected = u32::from_be_bytes([
            data[crc_pos],
            data[crc_pos + 1],
            data[crc_pos + 2],
            data[crc_pos + 3],
        ]);
        let actual = crc32fast::hash(&data[..crc_pos]);
        if expected != actual {
            return Err(ReftableError::Checksum {
                offset,
                expected,
                actual,
            });
        }

        let count_pos = block_len - BLOCK_TRAILER_SIZE;
        let restart_count = u16::from_be_bytes([data[count_pos], data[count_pos + 1]]) as usize;
        if restart_count == 0 {
            return Err(corrupt("block has no restart points".to_string()));
        }
        let restart_table = restart_count * RESTART_ENTRY_SIZE;
        if count_pos < BLOCK_HEADER_SIZE + restart_table {
            return Err(corrupt(format!(
                "{} restart points do not fit a {} byte block",
                restart_count, block_len
            )));
        }
        let records_end = count_pos - restart_table;

        let reader = Self {
            data,
            offset,
            block_type,
            records_end,
            restart_count,
            hash_size,
        };

        for i in 0..restart_count {
            let restart = reader.restart_offset(i);
            if restart < BLOCK_HEADER_SIZE || restart >= records_end {
                return Err(corrupt(format!("restart offset {} out of range", restart)));
            }
        }

        Ok(reader)
    }

    pub fn block_type(&self) -> BlockType {
        self.block_type
    }

    /// Position of the block in its file
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Full length of the block, header and checksum included
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records_end == BLOCK_HEADER_SIZE
    }

    pub fn restart_count(&self) -> usize {
        self.restart_count
    }

    /// Offset of the block that follows this one in the file
    pub fn next_offset(&self) -> u64 {
        self.offset + self.data.len() as u64
    }

    /// Full key of the first record
    pub fn first_key(&self) -> Result<Vec<u8>> {
        self.restart_key(0)
    }

    /// Iterate every record from the start of the block
    pub fn iter(&self) -> BlockIter {
        BlockIter {
            block: self.clone(),
            pos: BLOCK_HEADER_SIZE,
            last_key: Vec::new(),
            done: false,
        }
    }

    /// Position an iterator at the first record with key >= `target`.
    ///
    /// Binary-searches the restart points, then decodes forward from the
    /// last restart whose key is <= `target`.
    pub fn seek(&self, target: &[u8]) -> Result<BlockIter> {
        // First restart whose key is strictly greater than target
        let mut lo = 0;
        let mut hi = self.restart_count;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.restart_key(mid)?.as_slice() > target {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }

        let mut pos = if lo == 0 {
            self.restart_offset(0)
        } else {
            self.restart_offset(lo - 1)
        };

        let mut last_key = Vec::new();
        while pos < self.records_end {
            let entry = decode_entry(&self.data[pos..self.records_end], &last_key)
                .map_err(|e| e.at_offset(self.offset + pos as u64))?;
            if entry.key.as_slice() >= target {
                break;
            }
            pos += entry.len;
            last_key = entry.key;
        }

        Ok(BlockIter {
            block: self.clone(),
            pos,
            last_key,
            done: false,
        })
    }

    fn restart_offset(&self, i: usize) -> usize {
        let at = self.records_end + i * RESTART_ENTRY_SIZE;
        get_u24(&self.data[at..at + RESTART_ENTRY_SIZE]) as usize
    }

    fn restart_key(&self, i: usize) -> Result<Vec<u8>> {
        let pos = self.restart_offset(i);
        let entry = decode_entry(&self.data[pos..self.records_end], &[])
            .map_err(|e| e.at_offset(self.offset + pos as u64))?;
        Ok(entry.key)
    }
}

/// Forward iterator over the records of one block
pub struct BlockIter {
    block: BlockReader,
    pos: usize,
    /// Key of the previously decoded record (prefix base)
    last_key: Vec<u8>,
    done: bool,
}

impl BlockIter {
    /// Whether the iterator has reached the end of the block
    pub fn is_exhausted(&self) -> bool {
        self.done || self.pos >= self.block.records_end
    }
}

impl Iterator for BlockIter {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_exhausted() {
            return None;
        }

        let block = &self.block;
        let decoded = Record::decode_from(
            &block.data[self.pos..block.records_end],
            &self.last_key,
            block.block_type,
            block.hash_size,
        );

        match decoded {
            Ok((record, key, len)) => {
                self.pos += len;
                self.last_key = key;
                Some(Ok(record))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e.at_offset(block.offset + self.pos as u64)))
            }
        }
    }
}
