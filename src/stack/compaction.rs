//! Compaction
//!
//! Merges adjacent tables into one. The geometric policy keeps every table
//! at least `compaction_factor` times larger than all tables above it
//! combined, so the stack stays logarithmic in the number of updates.
//!
//! ```text
//!   sizes (oldest → newest):  [ 900 | 120 | 40 | 10 | 8 ]
//!   take 8;  10 < 2*8 take (18);  40 < 2*18 fails, stop
//!   result:                   [ 900 | 120 | 40 | 18 ]
//! ```
//!
//! Tombstones can only be dropped when the segment reaches the bottom of
//! the stack; anywhere else they still shadow older tables.

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{ReftableError, Result};
use crate::merged::MergedTable;
use crate::source::RefSource;
use crate::table::Table;

use super::list::{is_fresh, remove_stale, LockFile};
use super::manager::{Snapshot, Stack};
use super::{parse_table_name, COMPACTION_LOCK_FILE, LIST_LOCK_FILE, TEMP_PREFIX};

/// Pick the segment `[start, end)` the geometric policy wants merged.
///
/// Walks down from the newest table, taking table `i` while its size is
/// below `factor` times the bytes taken so far. Returns `None` when fewer
/// than two tables would be taken.
pub fn suggest_compaction_segment(sizes: &[u64], factor: u64) -> Option<(usize, usize)> {
    let end = sizes.len();
    if end < 2 {
        return None;
    }

    let mut start = end - 1;
    let mut bytes = sizes[start];
    while start > 0 && sizes[start - 1] < factor.saturating_mul(bytes) {
        start -= 1;
        bytes += sizes[start];
    }

    (end - start >= 2).then_some((start, end))
}

impl Stack {
    /// Merge every table into one. A stack of zero or one table is left
    /// untouched.
    pub fn compact(&self) -> Result<()> {
        let snapshot = self.snapshot();
        if snapshot.names.len() <= 1 {
            debug!(tables = snapshot.names.len(), "Nothing to compact");
            return Ok(());
        }
        self.compact_range(&snapshot, 0, snapshot.names.len())
    }

    /// Run the geometric policy once. Returns whether tables were merged.
    ///
    /// A compaction already running elsewhere is not an error.
    pub fn auto_compact(&self) -> Result<bool> {
        let snapshot = self.snapshot();
        let sizes: Vec<u64> = snapshot.merged.tables().iter().map(|t| t.size()).collect();
        let (start, end) = match suggest_compaction_segment(&sizes, self.config.compaction_factor) {
            Some(segment) => segment,
            None => return Ok(false),
        };

        match self.compact_range(&snapshot, start, end) {
            Ok(()) => Ok(true),
            Err(ReftableError::ConcurrentUpdate(reason)) => {
                debug!(%reason, "Skipping auto-compaction");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Replace tables `[start, end)` of `snapshot` with their merge
    fn compact_range(&self, snapshot: &Snapshot, start: usize, end: usize) -> Result<()> {
        let _marker = LockFile::acquire(&self.dir().join(COMPACTION_LOCK_FILE))?;

        let segment: Vec<Arc<Table>> = snapshot.merged.tables()[start..end].to_vec();
        let segment_names = snapshot.names[start..end].to_vec();
        let min = segment[0].header().min_update_index;
        let max = segment[segment.len() - 1].header().max_update_index;
        let drop_deletions = start == 0;

        debug!(start, end, min, max, drop_deletions, "Compacting tables");

        let view = MergedTable::new(segment, self.config.write_options.hash_id)?.with_deletions(true);
        let written = self.write_table(min, max, |writer| {
            for record in view.seek_ref("")? {
                let record = record?;
                if drop_deletions && record.is_deletion() {
                    continue;
                }
                writer.add_ref(&record)?;
            }
            for record in view.seek_log("")? {
                let record = record?;
                if drop_deletions && record.is_deletion() {
                    continue;
                }
                writer.add_log(&record)?;
            }
            Ok(())
        });
        let pending = match written {
            Ok(pending) => pending,
            Err(e) => {
                self.counters.failed_compactions.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        let new_name = pending.name.clone();
        let prefix = &snapshot.names[..start];
        let committed = self.commit(Some(pending), |current| {
            let unchanged = current.len() >= end
                && current[..start] == *prefix
                && current[start..end] == segment_names[..];
            if !unchanged {
                return Err(ReftableError::ConcurrentUpdate(
                    "compacted tables changed concurrently".to_string(),
                ));
            }
            let mut names = current[..start].to_vec();
            names.push(new_name.clone());
            names.extend_from_slice(&current[end..]);
            Ok(names)
        });
        if let Err(e) = committed {
            self.counters.failed_compactions.fetch_add(1, Ordering::Relaxed);
            return Err(e);
        }

        self.counters.compactions.fetch_add(1, Ordering::Relaxed);
        self.counters
            .tables_compacted
            .fetch_add(segment_names.len() as u64, Ordering::Relaxed);
        info!(
            tables = segment_names.len(),
            table = %new_name,
            min,
            max,
            "Compacted tables"
        );

        self.remove_tables(segment_names);
        Ok(())
    }

    /// Delete superseded table files; failures are kept for a later retry
    fn remove_tables(&self, names: Vec<String>) {
        let mut pending = std::mem::take(&mut *self.deferred.lock());
        pending.extend(names);

        let mut failed = Vec::new();
        for name in pending {
            let path = self.dir().join(&name);
            match fs::remove_file(&path) {
                Ok(()) => debug!(table = %name, "Removed table"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(table = %name, error = %e, "Deferring table removal");
                    failed.push(name);
                }
            }
        }
        self.deferred.lock().extend(failed);
    }

    /// Remove files the stack no longer needs: tables not in the list and
    /// no newer than the stack, abandoned temporary tables and stale lock
    /// files. Returns the number of files removed.
    pub fn clean(&self) -> Result<usize> {
        let timeout = Duration::from_millis(self.config.lock_timeout_ms);
        let compaction_lock = self.dir().join(COMPACTION_LOCK_FILE);
        let list_lock = self.dir().join(LIST_LOCK_FILE);
        let mut removed = 0;

        for lock in [&compaction_lock, &list_lock] {
            if remove_stale(lock, timeout)? {
                warn!(path = %lock.display(), "Removed abandoned lock file");
                removed += 1;
            }
        }
        if is_fresh(&compaction_lock, timeout) || is_fresh(&list_lock, timeout) {
            debug!("Writer active, skipping orphan sweep");
            return Ok(removed);
        }

        self.reload()?;
        let before = self.deferred.lock().len();
        self.remove_tables(Vec::new());
        removed += before.saturating_sub(self.deferred.lock().len());

        let snapshot = self.snapshot();
        let live: HashSet<&str> = snapshot.names.iter().map(String::as_str).collect();
        let max_update_index = snapshot.merged.max_update_index();

        let entries = fs::read_dir(self.dir()).map_err(|e| ReftableError::io_at(self.dir(), e))?;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if live.contains(name.as_str()) {
                continue;
            }
            let path = entry.path();

            if name.starts_with(TEMP_PREFIX) {
                if remove_stale(&path, timeout)? {
                    removed += 1;
                }
                continue;
            }

            match parse_table_name(&name) {
                Some((_, table_max)) if table_max <= max_update_index => {
                    match fs::remove_file(&path) {
                        Ok(()) => {
                            debug!(table = %name, "Removed unreferenced table");
                            removed += 1;
                        }
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => {
                            warn!(table = %name, error = %e, "Deferring table removal");
                            self.deferred.lock().push(name);
                        }
                    }
                }
                _ => {}
            }
        }

        info!(removed, "Cleaned stack directory");
        Ok(removed)
    }
}
