//! Table Iterator
//!
//! Walks the data blocks of one section in file order. Iteration ends at
//! the first block of a different type (the section's index, the next
//! section) or at the footer.

use crate::block::BlockIter;
use crate::error::Result;
use crate::record::{BlockType, Record};

use super::Table;

/// Forward iterator over the records of one section
pub struct TableIter<'a> {
    table: &'a Table,
    block_type: BlockType,
    current: Option<BlockIter>,
    /// Offset of the block after `current`
    next_offset: u64,
    done: bool,
}

impl<'a> TableIter<'a> {
    pub(crate) fn new(table: &'a Table, block_type: BlockType, current: BlockIter, next_offset: u64) -> Self {
        Self {
            table,
            block_type,
            current: Some(current),
            next_offset,
            done: false,
        }
    }

    pub(crate) fn empty(table: &'a Table, block_type: BlockType) -> Self {
        Self {
            table,
            block_type,
            current: None,
            next_offset: 0,
            done: true,
        }
    }

    pub fn block_type(&self) -> BlockType {
        self.block_type
    }
}

impl<'a> Iterator for TableIter<'a> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }

            if let Some(iter) = self.current.as_mut() {
                match iter.next() {
                    Some(Ok(record)) => return Some(Ok(record)),
                    Some(Err(e)) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                    None => self.current = None,
                }
            }

            if self.next_offset >= self.table.body_end() {
                self.done = true;
                return None;
            }

            match self.table.block_at(self.next_offset) {
                Ok(block) if block.block_type() == self.block_type => {
                    self.next_offset = block.next_offset();
                    self.current = Some(block.iter());
                }
                Ok(_) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
