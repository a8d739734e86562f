//! Transactions
//!
//! A batch of ref updates committed together as one table. Every update of a
//! transaction shares one fresh update index.

use std::collections::HashSet;

use crate::error::{ReftableError, Result};
use crate::merged::MergedTable;
use crate::oid::ObjectId;
use crate::record::{LogEntry, LogRecord, RefRecord, RefValue, Signature};
use crate::source::RefSource;

/// Reflog information attached to an update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogInfo {
    pub committer: Signature,
    pub message: String,
}

/// One reference change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub name: String,
    /// Value the name must currently have; `Some(Deletion)` means the name
    /// must not exist, `None` skips the check
    pub expected: Option<RefValue>,
    pub new_value: RefValue,
    pub log: Option<LogInfo>,
}

impl RefUpdate {
    /// Unconditionally set `name` to `value`
    pub fn new(name: impl Into<String>, value: RefValue) -> Self {
        Self {
            name: name.into(),
            expected: None,
            new_value: value,
            log: None,
        }
    }

    /// Create `name`, failing if it already exists
    pub fn create(name: impl Into<String>, value: RefValue) -> Self {
        Self::new(name, value).expect(RefValue::Deletion)
    }

    /// Delete `name`
    pub fn delete(name: impl Into<String>) -> Self {
        Self::new(name, RefValue::Deletion)
    }

    /// Require the current value to be `value`
    pub fn expect(mut self, value: RefValue) -> Self {
        self.expected = Some(value);
        self
    }

    pub fn with_log(mut self, committer: Signature, message: impl Into<String>) -> Self {
        self.log = Some(LogInfo {
            committer,
            message: message.into(),
        });
        self
    }
}

/// Ordered batch of updates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    updates: Vec<RefUpdate>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style push
    pub fn update(mut self, update: RefUpdate) -> Self {
        self.updates.push(update);
        self
    }

    pub fn push(&mut self, update: RefUpdate) {
        self.updates.push(update);
    }

    pub fn updates(&self) -> &[RefUpdate] {
        &self.updates
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Structural checks that do not depend on the stack contents
    pub fn validate(&self) -> Result<()> {
        if self.updates.is_empty() {
            return Err(ReftableError::InvalidState("empty transaction".to_string()));
        }
        let mut seen = HashSet::with_capacity(self.updates.len());
        for update in &self.updates {
            validate_name(&update.name)?;
            if !seen.insert(update.name.as_str()) {
                return Err(ReftableError::DuplicateName(update.name.clone()));
            }
            if let RefValue::Symbolic(target) = &update.new_value {
                validate_name(target)?;
            }
        }
        Ok(())
    }

    /// Check expectations against `merged` and build the records to write
    /// at `update_index`
    pub(crate) fn prepare(
        &self,
        merged: &MergedTable,
        update_index: u64,
    ) -> Result<(Vec<RefRecord>, Vec<LogRecord>)> {
        let zero = ObjectId::zero(merged.hash_id());
        let mut refs = Vec::with_capacity(self.updates.len());
        let mut logs = Vec::new();

        for update in &self.updates {
            let current = merged.read_ref(&update.name)?;
            check_expected(update, current.as_ref())?;

            refs.push(RefRecord::new(
                update.name.clone(),
                update_index,
                update.new_value.clone(),
            ));

            if let Some(log) = &update.log {
                let old_id = current
                    .as_ref()
                    .and_then(|r| r.value.object_id())
                    .cloned()
                    .unwrap_or_else(|| zero.clone());
                let new_id = update
                    .new_value
                    .object_id()
                    .cloned()
                    .unwrap_or_else(|| zero.clone());
                logs.push(LogRecord::new(
                    update.name.clone(),
                    update_index,
                    LogEntry {
                        old_id,
                        new_id,
                        committer: log.committer.clone(),
                        message: log.message.clone(),
                    },
                ));
            }
        }
        Ok((refs, logs))
    }
}

fn check_expected(update: &RefUpdate, current: Option<&RefRecord>) -> Result<()> {
    let conflict = |reason: String| ReftableError::Conflict {
        name: update.name.clone(),
        reason,
    };
    match (&update.expected, current) {
        (None, _) => Ok(()),
        (Some(RefValue::Deletion), None) => Ok(()),
        (Some(RefValue::Deletion), Some(_)) => Err(conflict("already exists".to_string())),
        (Some(_), None) => Err(conflict("does not exist".to_string())),
        (Some(expected), Some(current)) if *expected == current.value => Ok(()),
        (Some(_), Some(current)) => Err(conflict(format!(
            "changed at update index {}",
            current.update_index
        ))),
    }
}

/// Names must be non-empty and free of NUL and newline bytes
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.bytes().any(|b| b == 0 || b == b'\n') {
        return Err(ReftableError::InvalidName(name.to_string()));
    }
    Ok(())
}
