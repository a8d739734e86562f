//! Stack Manager
//!
//! Owns the in-memory view of a stack directory and coordinates commits.
//!
//! ## Concurrency:
//! - `state`: RwLock around the current (names, merged view) snapshot;
//!   readers clone the `Arc` and release the lock immediately
//! - Cross-process exclusion comes from `tables.list.lock`, not from the
//!   in-process lock, so several `Stack`s may share one directory
//! - `reload_lock`: serializes reloads, so a reload that read an older list
//!   cannot install its snapshot after one that read a newer list
//! - Counters are atomics; the deferred-delete list has its own mutex

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{ReftableError, Result};
use crate::merged::MergedTable;
use crate::oid::ObjectId;
use crate::record::{LogEntry, LogRecord, RefRecord, RefValue, Signature};
use crate::source::RefSource;
use crate::table::{Table, TableStats, TableWriter};

use super::list::{read_list, LockFile};
use super::transaction::{validate_name, Transaction};
use super::{table_file_name, StackStats, LIST_FILE, LIST_LOCK_FILE, TEMP_PREFIX};

/// Table list and the view built from it
#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
    pub names: Vec<String>,
    pub merged: Arc<MergedTable>,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub commits: AtomicU64,
    pub commit_retries: AtomicU64,
    pub compactions: AtomicU64,
    pub failed_compactions: AtomicU64,
    pub tables_compacted: AtomicU64,
}

/// Update index range and records of a table about to be written
type PreparedTable = (u64, u64, Vec<RefRecord>, Vec<LogRecord>);

/// A table written to a temporary file, not yet part of the stack
pub(crate) struct PendingTable {
    pub name: String,
    pub file: NamedTempFile,
    pub stats: TableStats,
}

impl PendingTable {
    /// Move the table to its final name inside `dir`
    fn persist(self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(&self.name);
        self.file
            .persist(&path)
            .map_err(|e| ReftableError::io_at(&path, e.error))?;
        Ok(path)
    }
}

/// A reftable stack rooted in one directory
pub struct Stack {
    pub(crate) config: Config,
    state: RwLock<Snapshot>,
    reload_lock: Mutex<()>,
    /// Superseded table files whose removal failed
    pub(crate) deferred: Mutex<Vec<String>>,
    pub(crate) counters: Counters,
}

impl Stack {
    /// Open (or create) the stack in `config.dir`
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.dir).map_err(|e| ReftableError::io_at(&config.dir, e))?;

        let empty = MergedTable::new(Vec::new(), config.write_options.hash_id)?;
        let stack = Self {
            config,
            state: RwLock::new(Snapshot {
                names: Vec::new(),
                merged: Arc::new(empty),
            }),
            reload_lock: Mutex::new(()),
            deferred: Mutex::new(Vec::new()),
            counters: Counters::default(),
        };
        stack.reload()?;

        let snapshot = stack.snapshot();
        info!(
            dir = %stack.config.dir.display(),
            tables = snapshot.names.len(),
            max_update_index = snapshot.merged.max_update_index(),
            "Opened stack"
        );
        Ok(stack)
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn list_path(&self) -> PathBuf {
        self.config.dir.join(LIST_FILE)
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        self.state.read().clone()
    }

    /// Current merged view; stays valid while the stack changes
    pub fn merged(&self) -> Arc<MergedTable> {
        Arc::clone(&self.state.read().merged)
    }

    /// Table file names, oldest first
    pub fn table_names(&self) -> Vec<String> {
        self.state.read().names.clone()
    }

    /// Update index the next transaction will receive
    pub fn next_update_index(&self) -> u64 {
        self.state.read().merged.max_update_index() + 1
    }

    pub fn stats(&self) -> StackStats {
        let snapshot = self.snapshot();
        StackStats {
            tables: snapshot.names.len(),
            bytes: snapshot.merged.size(),
            max_update_index: snapshot.merged.max_update_index(),
            commits: self.counters.commits.load(Ordering::Relaxed),
            commit_retries: self.counters.commit_retries.load(Ordering::Relaxed),
            compactions: self.counters.compactions.load(Ordering::Relaxed),
            failed_compactions: self.counters.failed_compactions.load(Ordering::Relaxed),
            tables_compacted: self.counters.tables_compacted.load(Ordering::Relaxed),
            deferred_deletes: self.deferred.lock().len(),
        }
    }

    // -------------------------------------------------------------------------
    // Loading
    // -------------------------------------------------------------------------

    /// Re-read `tables.list` and open any tables not already open.
    ///
    /// A listed table may vanish if a concurrent compaction replaced it
    /// between reading the list and opening the file; the list is re-read
    /// up to `reload_retries` times.
    pub fn reload(&self) -> Result<()> {
        let _guard = self.reload_lock.lock();
        let list_path = self.list_path();
        let mut attempt = 0;
        loop {
            let names = read_list(&list_path)?;
            match self.load_tables(&names) {
                Ok(merged) => {
                    let mut state = self.state.write();
                    if state.names != names {
                        debug!(tables = names.len(), "Reloaded table list");
                    }
                    *state = Snapshot {
                        names,
                        merged: Arc::new(merged),
                    };
                    return Ok(());
                }
                Err(ReftableError::IoPath { ref source, .. })
                    if source.kind() == ErrorKind::NotFound && attempt < self.config.reload_retries =>
                {
                    attempt += 1;
                    debug!(attempt, "Listed table vanished, re-reading list");
                    thread::sleep(backoff(attempt));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn load_tables(&self, names: &[String]) -> Result<MergedTable> {
        let current = self.merged();
        let open: HashMap<&str, &Arc<Table>> = current
            .tables()
            .iter()
            .map(|t| (t.name(), t))
            .collect();

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let table = match open.get(name.as_str()) {
                Some(table) => Arc::clone(table),
                None => Arc::new(Table::open(&self.config.dir.join(name))?),
            };
            tables.push(table);
        }
        MergedTable::new(tables, self.config.write_options.hash_id)
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Current value of `name` and the update index that set it
    pub fn resolve(&self, name: &str) -> Result<Option<(RefValue, u64)>> {
        Ok(self
            .merged()
            .read_ref(name)?
            .map(|record| (record.value, record.update_index)))
    }

    pub fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.merged().read_ref(name)?.is_some())
    }

    /// Live refs whose name starts with `prefix`, in name order
    pub fn iterate(&self, prefix: &str) -> Result<Vec<(String, RefValue)>> {
        let merged = self.merged();
        let mut refs = Vec::new();
        for record in merged.seek_ref(prefix)? {
            let record = record?;
            if !record.name.starts_with(prefix) {
                break;
            }
            refs.push((record.name, record.value));
        }
        Ok(refs)
    }

    /// Live refs whose value names `oid`
    pub fn refs_for_oid(&self, oid: &ObjectId) -> Result<Vec<RefRecord>> {
        self.merged().refs_for_oid(oid)
    }

    /// Log entries of `name`, newest first
    pub fn log(&self, name: &str) -> Result<Vec<LogRecord>> {
        let merged = self.merged();
        let mut entries = Vec::new();
        for record in merged.seek_log(name)? {
            let record = record?;
            if record.name != name {
                break;
            }
            entries.push(record);
        }
        Ok(entries)
    }

    /// Newest log entry of `name`
    pub fn read_log(&self, name: &str) -> Result<Option<LogRecord>> {
        self.merged().read_log(name)
    }

    pub fn has_log(&self, name: &str) -> Result<bool> {
        Ok(self.read_log(name)?.is_some())
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Commit `transaction` as one new table; returns its update index
    pub fn apply_transaction(&self, transaction: Transaction) -> Result<u64> {
        transaction.validate()?;
        self.add_table(|snapshot| {
            let update_index = snapshot.merged.max_update_index() + 1;
            let (refs, logs) = transaction.prepare(&snapshot.merged, update_index)?;
            Ok(Some((update_index, update_index, refs, logs)))
        })
    }

    /// Move `old` to `new` as one table. Without `force` an existing `new`
    /// is a conflict. `old` is logged as cleared and `new` as unchanged.
    pub fn rename_ref(
        &self,
        old: &str,
        new: &str,
        force: bool,
        committer: Signature,
        message: &str,
    ) -> Result<u64> {
        validate_name(old)?;
        validate_name(new)?;
        if old == new {
            return Err(ReftableError::Conflict {
                name: old.to_string(),
                reason: "rename onto itself".to_string(),
            });
        }

        self.add_table(|snapshot| {
            let merged = &snapshot.merged;
            let current = merged.read_ref(old)?.ok_or_else(|| ReftableError::Conflict {
                name: old.to_string(),
                reason: "does not exist".to_string(),
            })?;
            if !force && merged.read_ref(new)?.is_some() {
                return Err(ReftableError::Conflict {
                    name: new.to_string(),
                    reason: "already exists".to_string(),
                });
            }

            let update_index = merged.max_update_index() + 1;
            let zero = ObjectId::zero(merged.hash_id());
            let id = current.value.object_id().cloned().unwrap_or_else(|| zero.clone());
            let entry = |old_id: ObjectId, new_id: ObjectId| LogEntry {
                old_id,
                new_id,
                committer: committer.clone(),
                message: message.to_string(),
            };

            let refs = vec![
                RefRecord::deletion(old, update_index),
                RefRecord::new(new, update_index, current.value),
            ];
            let logs = vec![
                LogRecord::new(old, update_index, entry(id.clone(), zero)),
                LogRecord::new(new, update_index, entry(id.clone(), id)),
            ];
            Ok(Some((update_index, update_index, refs, logs)))
        })
    }

    /// Append log entries for `name`, each under its own update index.
    /// Returns the last update index used.
    pub fn append_logs(&self, name: &str, entries: Vec<LogEntry>) -> Result<u64> {
        validate_name(name)?;
        if entries.is_empty() {
            return Err(ReftableError::InvalidState("no log entries to append".to_string()));
        }
        self.add_table(|snapshot| {
            let min = snapshot.merged.max_update_index() + 1;
            Ok(Some(numbered_logs(name, min, entries.iter())))
        })
    }

    /// Store the history of `name` given oldest first, skipping entries the
    /// stack already holds. Returns the last update index used, or `None`
    /// when every entry was already stored.
    pub fn write_log(&self, name: &str, entries: Vec<LogEntry>) -> Result<Option<u64>> {
        validate_name(name)?;
        self.reload()?;
        self.commit_table(|snapshot| {
            let mut stored = Vec::new();
            for record in snapshot.merged.seek_log(name)? {
                let record = record?;
                if record.name != name {
                    break;
                }
                if let Some(entry) = record.entry() {
                    stored.push(entry.clone());
                }
            }

            let fresh: Vec<&LogEntry> = entries
                .iter()
                .filter(|entry| !stored.iter().any(|s| same_log_entry(s, entry)))
                .collect();
            if fresh.is_empty() {
                debug!(refname = name, "Log already stored");
                return Ok(None);
            }
            let min = snapshot.merged.max_update_index() + 1;
            Ok(Some(numbered_logs(name, min, fresh.into_iter())))
        })
    }

    /// Copy the newest log entry of `old` to `new` and mark the log of `old`
    /// with a tombstone. Returns the update index used.
    pub fn rename_log(&self, old: &str, new: &str) -> Result<u64> {
        validate_name(old)?;
        validate_name(new)?;
        self.reload()?;
        self.add_table(|snapshot| {
            let newest = snapshot
                .merged
                .read_log(old)?
                .and_then(|record| record.entry().cloned())
                .ok_or_else(|| ReftableError::Conflict {
                    name: old.to_string(),
                    reason: "has no log".to_string(),
                })?;

            let update_index = snapshot.merged.max_update_index() + 1;
            let logs = vec![
                LogRecord::deletion(old, update_index),
                LogRecord::new(new, update_index, newest),
            ];
            Ok(Some((update_index, update_index, Vec::new(), logs)))
        })
    }

    /// Prepare, write and commit a table, retrying lost races
    fn add_table<F>(&self, mut prepare: F) -> Result<u64>
    where
        F: FnMut(&Snapshot) -> Result<Option<PreparedTable>>,
    {
        self.commit_table(&mut prepare)?
            .ok_or_else(|| ReftableError::InvalidState("nothing to commit".to_string()))
    }

    /// Like `add_table`, but `prepare` may decline by returning `None`
    fn commit_table<F>(&self, mut prepare: F) -> Result<Option<u64>>
    where
        F: FnMut(&Snapshot) -> Result<Option<PreparedTable>>,
    {
        let mut attempt = 0;
        loop {
            let snapshot = self.snapshot();
            let result = prepare(&snapshot).and_then(|prepared| {
                let (min, max, refs, logs) = match prepared {
                    Some(prepared) => prepared,
                    None => return Ok(None),
                };
                let pending = self.write_table(min, max, |writer| {
                    writer.add_refs(refs)?;
                    writer.add_logs(logs)
                })?;
                let name = pending.name.clone();
                self.commit(Some(pending), |current| {
                    if current != snapshot.names.as_slice() {
                        return Err(ReftableError::ConcurrentUpdate(
                            "table list changed since it was read".to_string(),
                        ));
                    }
                    let mut names = current.to_vec();
                    names.push(name.clone());
                    Ok(names)
                })?;
                info!(table = %name, update_index = max, "Committed table");
                Ok(Some(max))
            });

            match result {
                Ok(None) => return Ok(None),
                Ok(Some(update_index)) => {
                    self.counters.commits.fetch_add(1, Ordering::Relaxed);
                    if self.config.auto_compact {
                        if let Err(e) = self.auto_compact() {
                            warn!(error = %e, "Auto-compaction failed");
                        }
                    }
                    return Ok(Some(update_index));
                }
                Err(e) if e.is_retryable() && attempt < self.config.commit_retries => {
                    attempt += 1;
                    self.counters.commit_retries.fetch_add(1, Ordering::Relaxed);
                    debug!(attempt, error = %e, "Lost commit race, reloading");
                    thread::sleep(backoff(attempt));
                    self.reload()?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Write a table covering `[min, max]` to a temporary file in the stack
    /// directory; `fill` adds the records
    pub(crate) fn write_table<F>(&self, min: u64, max: u64, fill: F) -> Result<PendingTable>
    where
        F: FnOnce(&mut TableWriter<BufWriter<&mut File>>) -> Result<()>,
    {
        let dir = &self.config.dir;
        let mut file = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(dir)
            .map_err(|e| ReftableError::io_at(dir, e))?;

        let stats = {
            let mut writer = TableWriter::new(BufWriter::new(file.as_file_mut()), self.config.write_options)?;
            writer.set_limits(min, max)?;
            fill(&mut writer)?;
            writer.finish()?
        };
        file.as_file()
            .sync_all()
            .map_err(|e| ReftableError::io_at(file.path(), e))?;

        Ok(PendingTable {
            name: table_file_name(min, max),
            file,
            stats,
        })
    }

    /// Swap in a new table list under `tables.list.lock`.
    ///
    /// `update_list` receives the list as currently on disk and returns the
    /// replacement, or fails to abort the commit.
    pub(crate) fn commit<F>(&self, pending: Option<PendingTable>, update_list: F) -> Result<()>
    where
        F: FnOnce(&[String]) -> Result<Vec<String>>,
    {
        let list_path = self.list_path();
        let lock = LockFile::acquire(&self.config.dir.join(LIST_LOCK_FILE))?;
        let current = read_list(&list_path)?;
        let names = update_list(&current)?;

        let persisted = match pending {
            Some(pending) => {
                debug!(
                    table = %pending.name,
                    refs = pending.stats.refs.records,
                    logs = pending.stats.logs.records,
                    bytes = pending.stats.bytes_written,
                    "Persisting table"
                );
                Some(pending.persist(&self.config.dir)?)
            }
            None => None,
        };

        if let Err(e) = lock.commit_list(&list_path, &names) {
            if let Some(path) = persisted {
                let _ = std::fs::remove_file(path);
            }
            return Err(e);
        }

        // The new list is in place; a failed reload only leaves this view stale
        if let Err(e) = self.reload() {
            warn!(error = %e, "Reload after commit failed");
        }
        Ok(())
    }
}

/// Number `entries` from `min` upward, one update index each
fn numbered_logs<'a>(name: &str, min: u64, entries: impl Iterator<Item = &'a LogEntry>) -> PreparedTable {
    let logs: Vec<LogRecord> = entries
        .enumerate()
        .map(|(i, entry)| LogRecord::new(name, min + i as u64, entry.clone()))
        .collect();
    let max = min + logs.len().saturating_sub(1) as u64;
    (min, max, Vec::new(), logs)
}

/// Entries match on time, zone, ids and message; the committer identity is
/// not compared
fn same_log_entry(a: &LogEntry, b: &LogEntry) -> bool {
    a.committer.time == b.committer.time
        && a.committer.tz_offset == b.committer.tz_offset
        && a.old_id == b.old_id
        && a.new_id == b.new_id
        && a.message == b.message
}

/// Randomized delay before retry `attempt`
pub(crate) fn backoff(attempt: usize) -> Duration {
    let jitter = rand::thread_rng().gen_range(1..=10u64);
    Duration::from_millis(jitter * attempt.min(10) as u64)
}
