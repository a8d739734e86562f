//! Stack Module
//!
//! An ordered list of immutable tables in one directory, with transactional
//! appends and compaction.
//!
//! ## Directory Layout
//! ```text
//! {dir}/
//!   ├── tables.list                         table names, oldest first
//!   ├── tables.list.lock                    exists while a commit is in flight
//!   ├── compaction.lock                     exists while a compaction runs
//!   ├── 0x000000000001-0x000000000003-1a2b3c4d.ref
//!   └── 0x000000000004-0x000000000004-9f8e7d6c.ref
//! ```
//!
//! ## Commit Protocol
//! 1. Write the new table to a temporary file and sync it
//! 2. Create `tables.list.lock` exclusively
//! 3. Verify `tables.list` still matches what the update was prepared against
//! 4. Rename the table into place, write the new list into the lock file
//! 5. Sync and rename the lock file over `tables.list`
//!
//! A writer that loses the race reloads, re-checks its expectations and
//! tries again.

mod compaction;
mod list;
mod manager;
mod transaction;

pub use compaction::suggest_compaction_segment;
pub use list::{read_list, LockFile};
pub use manager::Stack;
pub use transaction::{validate_name, LogInfo, RefUpdate, Transaction};

pub const LIST_FILE: &str = "tables.list";
pub const LIST_LOCK_FILE: &str = "tables.list.lock";
pub const COMPACTION_LOCK_FILE: &str = "compaction.lock";
pub const TABLE_SUFFIX: &str = ".ref";

/// Prefix of tables still being written
pub(crate) const TEMP_PREFIX: &str = "tmp_";

/// File name for a new table covering `[min, max]`
pub fn table_file_name(min_update_index: u64, max_update_index: u64) -> String {
    format!(
        "0x{:012x}-0x{:012x}-{:08x}{}",
        min_update_index,
        max_update_index,
        rand::random::<u32>(),
        TABLE_SUFFIX
    )
}

/// Update index range encoded in a table file name
pub fn parse_table_name(name: &str) -> Option<(u64, u64)> {
    let stem = name.strip_suffix(TABLE_SUFFIX)?;
    let mut parts = stem.split('-');
    let min = u64::from_str_radix(parts.next()?.strip_prefix("0x")?, 16).ok()?;
    let max = u64::from_str_radix(parts.next()?.strip_prefix("0x")?, 16).ok()?;
    parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some((min, max))
}

/// Point-in-time counters of a stack
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StackStats {
    pub tables: usize,
    pub bytes: u64,
    pub max_update_index: u64,
    pub commits: u64,
    /// Commits that lost a race and were retried
    pub commit_retries: u64,
    pub compactions: u64,
    pub failed_compactions: u64,
    /// Tables folded away by compactions
    pub tables_compacted: u64,
    /// Superseded files whose removal failed and awaits a retry
    pub deferred_deletes: usize,
}
