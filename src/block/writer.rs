//! Block Writer
//!
//! Accumulates encoded records until the block would exceed its size cap.

use crate::error::{ReftableError, Result};
use crate::record::{BlockType, Record};

use super::{put_u24, BLOCK_HEADER_SIZE, BLOCK_TRAILER_SIZE, RESTART_ENTRY_SIZE};

/// Builds a single block in memory
pub struct BlockWriter {
    block_type: BlockType,
    /// Cap on the finished block, header and checksum included
    block_size: usize,
    restart_interval: usize,
    hash_size: usize,
    /// Header placeholder followed by the encoded records
    buf: Vec<u8>,
    /// Offsets of restart records, relative to the block start
    restarts: Vec<u32>,
    entries: usize,
    last_key: Vec<u8>,
}

impl BlockWriter {
    pub fn new(block_type: BlockType, block_size: u32, restart_interval: usize, hash_size: usize) -> Self {
        let mut buf = Vec::with_capacity(block_size as usize);
        buf.extend_from_slice(&[0u8; BLOCK_HEADER_SIZE]);
        Self {
            block_type,
            block_size: block_size as usize,
            restart_interval: restart_interval.max(1),
            hash_size,
            buf,
            restarts: Vec::new(),
            entries: 0,
            last_key: Vec::new(),
        }
    }

    /// Append a record.
    ///
    /// Returns `Ok(false)` when the record does not fit; the block is left
    /// unchanged and the caller should finish it and start a new one.
    pub fn add(&mut self, record: &Record) -> Result<bool> {
        if record.block_type() != self.block_type {
            return Err(ReftableError::InvalidState(format!(
                "{:?} record added to {:?} block",
                record.block_type(),
                self.block_type
            )));
        }

        let key = record.key();
        if self.entries > 0 && key.as_slice() <= self.last_key.as_slice() {
            return Err(ReftableError::OutOfOrder {
                previous: String::from_utf8_lossy(&self.last_key).into_owned(),
                key: String::from_utf8_lossy(&key).into_owned(),
            });
        }

        let is_restart = self.entries % self.restart_interval == 0;
        if is_restart && self.restarts.len() >= u16::MAX as usize {
            return Ok(false);
        }

        let prev_key: &[u8] = if is_restart { &[] } else { &self.last_key };
        let encoded = record.encode(prev_key, self.hash_size)?;

        let restart_entries = self.restarts.len() + usize::from(is_restart);
        let projected = self.buf.len()
            + encoded.len()
            + restart_entries * RESTART_ENTRY_SIZE
            + BLOCK_TRAILER_SIZE;
        if projected > self.block_size {
            return Ok(false);
        }

        if is_restart {
            self.restarts.push(self.buf.len() as u32);
        }
        self.buf.extend_from_slice(&encoded);
        self.last_key = key;
        self.entries += 1;
        Ok(true)
    }

    /// Write the restart table, length and checksum; returns the block bytes
    pub fn finish(mut self) -> Vec<u8> {
        for &offset in &self.restarts {
            put_u24(&mut self.buf, offset);
        }
        self.buf
            .extend_from_slice(&(self.restarts.len() as u16).to_be_bytes());

        let total_len = self.buf.len() + 4;
        self.buf[0] = self.block_type.as_u8();
        self.buf[1..4].copy_from_slice(&(total_len as u32).to_be_bytes()[1..]);

        let crc = crc32fast::hash(&self.buf);
        self.buf.extend_from_slice(&crc.to_be_bytes());
        self.buf
    }

    pub fn block_type(&self) -> BlockType {
        self.block_type
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Key of the most recently added record
    pub fn last_key(&self) -> &[u8] {
        &self.last_key
    }

    /// Size the block would have if finished now
    pub fn estimated_len(&self) -> usize {
        self.buf.len() + self.restarts.len() * RESTART_ENTRY_SIZE + BLOCK_TRAILER_SIZE
    }
}
