//! Merged Module
//!
//! A read view over a stack of tables, oldest first. Newer tables shadow
//! older ones per key; tombstones hide older values.
//!
//! ```text
//!   seek("refs/heads/")
//!        │
//!   ┌────┴─────┬──────────┬──────────┐
//!   │ table 2  │ table 1  │ table 0  │   newest → oldest
//!   └────┬─────┴────┬─────┴────┬─────┘
//!        └──────────┼──────────┘
//!             MergedIter (heap)
//! ```

mod iterator;

pub use iterator::MergedIter;

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{ReftableError, Result};
use crate::oid::{HashId, ObjectId};
use crate::record::{log_key, BlockType, LogRecord, RefRecord};
use crate::source::{RecordIter, RefSource};
use crate::table::{into_log, into_ref, Table};

/// Read view over an ordered set of tables
#[derive(Debug, Clone)]
pub struct MergedTable {
    /// Oldest first
    tables: Vec<Arc<Table>>,
    hash_id: HashId,
    suppress_deletions: bool,
}

impl MergedTable {
    /// Build a view over `tables` (oldest first).
    ///
    /// Update index ranges must be non-decreasing and all tables must share
    /// `hash_id`.
    pub fn new(tables: Vec<Arc<Table>>, hash_id: HashId) -> Result<Self> {
        for table in &tables {
            if RefSource::hash_id(table.as_ref()) != hash_id {
                return Err(ReftableError::Format(format!(
                    "table {} uses {:?}, stack uses {:?}",
                    table.name(),
                    RefSource::hash_id(table.as_ref()),
                    hash_id
                )));
            }
        }
        for pair in tables.windows(2) {
            let (older, newer) = (&pair[0], &pair[1]);
            if newer.header().min_update_index < older.header().max_update_index {
                return Err(ReftableError::Format(format!(
                    "table {} (min {}) is older than {} (max {})",
                    newer.name(),
                    newer.header().min_update_index,
                    older.name(),
                    older.header().max_update_index
                )));
            }
        }

        Ok(Self {
            tables,
            hash_id,
            suppress_deletions: true,
        })
    }

    /// Same view, yielding tombstones when `show` is set
    pub fn with_deletions(mut self, show: bool) -> Self {
        self.suppress_deletions = !show;
        self
    }

    /// Tables of the view, oldest first
    pub fn tables(&self) -> &[Arc<Table>] {
        &self.tables
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Sum of the table file sizes
    pub fn size(&self) -> u64 {
        self.tables.iter().map(|t| t.size()).sum()
    }

    /// Merged iterator over `block_type` records from the first key >= `key`
    pub fn seek_records(&self, block_type: BlockType, key: &[u8]) -> Result<MergedIter<'_>> {
        let mut iterators = Vec::with_capacity(self.tables.len());
        for table in self.tables.iter().rev() {
            iterators.push(table.seek_records(block_type, key)?);
        }
        MergedIter::new(iterators, self.suppress_deletions)
    }
}

impl RefSource for MergedTable {
    fn seek_ref(&self, name: &str) -> Result<RecordIter<'_, RefRecord>> {
        let iter = self.seek_records(BlockType::Ref, name.as_bytes())?;
        Ok(Box::new(iter.map(|r| r.and_then(into_ref))))
    }

    fn seek_log(&self, name: &str) -> Result<RecordIter<'_, LogRecord>> {
        let iter = self.seek_records(BlockType::Log, &log_key(name, u64::MAX))?;
        Ok(Box::new(iter.map(|r| r.and_then(into_log))))
    }

    /// Candidates come from each table's own lookup; each is kept only if
    /// the merged view still resolves its name to a value naming `oid`.
    fn refs_for_oid(&self, oid: &ObjectId) -> Result<Vec<RefRecord>> {
        let mut names = BTreeSet::new();
        for table in &self.tables {
            for record in table.refs_for_oid(oid)? {
                names.insert(record.name);
            }
        }

        let mut found = Vec::new();
        for name in names {
            if let Some(current) = self.read_ref(&name)? {
                if current.value.points_at(oid) {
                    found.push(current);
                }
            }
        }
        Ok(found)
    }

    fn min_update_index(&self) -> u64 {
        self.tables
            .first()
            .map_or(0, |t| t.header().min_update_index)
    }

    fn max_update_index(&self) -> u64 {
        self.tables
            .last()
            .map_or(0, |t| t.header().max_update_index)
    }

    fn hash_id(&self) -> HashId {
        self.hash_id
    }
}
