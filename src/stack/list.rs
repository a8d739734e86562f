//! Table list and lock files
//!
//! `tables.list` holds one table file name per line, oldest first. It is only
//! ever replaced by renaming a fully written lock file over it, so readers
//! see either the old or the new list.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{ReftableError, Result};

/// Read the table names of a list file; a missing file is an empty stack
pub fn read_list(path: &Path) -> Result<Vec<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(ReftableError::io_at(path, e)),
    }
}

/// Exclusive lock held by creating a file with `create_new`.
///
/// Dropping the guard removes the file unless it was committed.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    file: Option<File>,
    released: bool,
}

impl LockFile {
    /// Create `path`; fails with `ConcurrentUpdate` if another holder exists
    pub fn acquire(path: &Path) -> Result<Self> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => Ok(Self {
                path: path.to_path_buf(),
                file: Some(file),
                released: false,
            }),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(ReftableError::ConcurrentUpdate(
                format!("{} is held by another writer", path.display()),
            )),
            Err(e) => Err(ReftableError::io_at(path, e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `names` into the lock file, sync it and rename it over `target`
    pub fn commit_list(mut self, target: &Path, names: &[String]) -> Result<()> {
        let mut content = String::new();
        for name in names {
            content.push_str(name);
            content.push('\n');
        }

        if let Some(mut file) = self.file.take() {
            file.write_all(content.as_bytes())
                .and_then(|_| file.sync_all())
                .map_err(|e| ReftableError::io_at(&self.path, e))?;
        }
        fs::rename(&self.path, target).map_err(|e| ReftableError::io_at(target, e))?;
        self.released = true;
        sync_parent(target);
        Ok(())
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.file.take();
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove lock file");
            }
        }
    }
}

/// Remove `path` if it is older than `timeout`. Returns whether it was removed.
pub fn remove_stale(path: &Path, timeout: Duration) -> Result<bool> {
    let modified = match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => modified,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(ReftableError::io_at(path, e)),
    };
    let age = modified.elapsed().unwrap_or_default();
    if age < timeout {
        return Ok(false);
    }

    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), age_ms = age.as_millis() as u64, "Removed stale file");
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(ReftableError::io_at(path, e)),
    }
}

/// Whether `path` exists and is younger than `timeout`
pub fn is_fresh(path: &Path, timeout: Duration) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|modified| modified.elapsed().unwrap_or_default() < timeout)
        .unwrap_or(false)
}

/// Persist a rename by syncing the containing directory (best effort)
fn sync_parent(path: &Path) {
    #[cfg(unix)]
    if let Some(dir) = path.parent() {
        if let Ok(handle) = File::open(dir) {
            let _ = handle.sync_all();
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

