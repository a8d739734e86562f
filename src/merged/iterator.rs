//! Merged Iterator
//!
//! K-way merge over per-table iterators using a binary heap.
//!
//! Sources are numbered newest first. For equal keys the record with the
//! larger update index (then the newer source) wins; every other holder of
//! that key is advanced past it, so each key is yielded once.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::Result;
use crate::record::Record;
use crate::table::TableIter;

struct HeapEntry<'a> {
    key: Vec<u8>,
    update_index: u64,
    /// 0 = newest table
    source: usize,
    record: Record,
    iterator: TableIter<'a>,
}

impl PartialEq for HeapEntry<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry<'_> {}

impl PartialOrd for HeapEntry<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry<'_> {
    // BinaryHeap pops the greatest entry: smallest key, then largest update
    // index, then lowest source number
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .key
            .cmp(&self.key)
            .then_with(|| self.update_index.cmp(&other.update_index))
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Iterator yielding the winning record of every key across tables
pub struct MergedIter<'a> {
    heap: BinaryHeap<HeapEntry<'a>>,
    suppress_deletions: bool,
    done: bool,
}

impl<'a> MergedIter<'a> {
    /// `iterators` must be ordered newest table first
    pub(crate) fn new(iterators: Vec<TableIter<'a>>, suppress_deletions: bool) -> Result<Self> {
        let mut heap = BinaryHeap::with_capacity(iterators.len());
        for (source, iterator) in iterators.into_iter().enumerate() {
            if let Some(entry) = Self::pull(source, iterator)? {
                heap.push(entry);
            }
        }
        Ok(Self {
            heap,
            suppress_deletions,
            done: false,
        })
    }

    /// Read the next record of `iterator` into a heap entry
    fn pull(source: usize, mut iterator: TableIter<'a>) -> Result<Option<HeapEntry<'a>>> {
        match iterator.next() {
            None => Ok(None),
            Some(Err(e)) => Err(e),
            Some(Ok(record)) => Ok(Some(HeapEntry {
                key: record.key(),
                update_index: record.update_index(),
                source,
                record,
                iterator,
            })),
        }
    }

    fn advance(&mut self, entry: HeapEntry<'a>) -> Result<Record> {
        let HeapEntry {
            source,
            record,
            iterator,
            ..
        } = entry;
        if let Some(next) = Self::pull(source, iterator)? {
            self.heap.push(next);
        }
        Ok(record)
    }

    fn next_record(&mut self) -> Result<Option<Record>> {
        while let Some(top) = self.heap.pop() {
            let key = top.key.clone();
            let record = self.advance(top)?;

            // Shadowed copies of the same key in older tables
            while self.heap.peek().map_or(false, |e| e.key == key) {
                if let Some(shadowed) = self.heap.pop() {
                    self.advance(shadowed)?;
                }
            }

            if self.suppress_deletions && record.is_deletion() {
                continue;
            }
            return Ok(Some(record));
        }
        Ok(None)
    }
}

impl Iterator for MergedIter<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
