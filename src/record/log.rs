//! Log records
//!
//! The key of a log record is `name NUL be64(u64::MAX - update_index)`, so a
//! name's history sorts newest first and seeking to the bare name lands on
//! its most recent entry.

use crate::error::{ReftableError, Result};
use crate::oid::ObjectId;

use super::reference::{put_id, take_id};
use super::varint::{get_string, get_varint, put_bytes, put_varint};

pub(crate) const VALUE_DELETION: u8 = 0;
pub(crate) const VALUE_UPDATE: u8 = 1;

/// Who made a change, and when
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Signature {
    pub name: String,
    pub email: String,
    /// Seconds since the Unix epoch
    pub time: u64,
    /// Timezone offset in minutes (e.g. -130 for -02:10)
    pub tz_offset: i16,
}

impl Signature {
    pub fn new(name: impl Into<String>, email: impl Into<String>, time: u64, tz_offset: i16) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            time,
            tz_offset,
        }
    }
}

/// One entry of a reference's change history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub old_id: ObjectId,
    pub new_id: ObjectId,
    pub committer: Signature,
    pub message: String,
}

/// Value of a log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogValue {
    /// Tombstone hiding older copies of the same `(name, update_index)`
    Deletion,
    Update(LogEntry),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub name: String,
    pub update_index: u64,
    pub value: LogValue,
}

impl LogRecord {
    pub fn new(name: impl Into<String>, update_index: u64, entry: LogEntry) -> Self {
        Self {
            name: name.into(),
            update_index,
            value: LogValue::Update(entry),
        }
    }

    pub fn deletion(name: impl Into<String>, update_index: u64) -> Self {
        Self {
            name: name.into(),
            update_index,
            value: LogValue::Deletion,
        }
    }

    pub fn is_deletion(&self) -> bool {
        matches!(self.value, LogValue::Deletion)
    }

    pub fn entry(&self) -> Option<&LogEntry> {
        match &self.value {
            LogValue::Update(entry) => Some(entry),
            LogValue::Deletion => None,
        }
    }

    pub fn key(&self) -> Vec<u8> {
        log_key(&self.name, self.update_index)
    }

    pub(crate) fn value_type(&self) -> u8 {
        match self.value {
            LogValue::Deletion => VALUE_DELETION,
            LogValue::Update(_) => VALUE_UPDATE,
        }
    }

    pub(crate) fn encode_value(&self, buf: &mut Vec<u8>, hash_size: usize) -> Result<()> {
        let entry = match &self.value {
            LogValue::Deletion => return Ok(()),
            LogValue::Update(entry) => entry,
        };
        put_id(buf, &entry.old_id, hash_size)?;
        put_id(buf, &entry.new_id, hash_size)?;
        put_bytes(buf, entry.committer.name.as_bytes());
        put_bytes(buf, entry.committer.email.as_bytes());
        put_varint(buf, entry.committer.time);
        buf.extend_from_slice(&(entry.committer.tz_offset as u16).to_be_bytes());
        put_bytes(buf, entry.message.as_bytes());
        Ok(())
    }

    pub(crate) fn decode(key: &[u8], value_type: u8, mut value: &[u8], hash_size: usize) -> Result<Self> {
        let (name, update_index) = split_log_key(key)?;

        let log_value = match value_type {
            VALUE_DELETION => LogValue::Deletion,
            VALUE_UPDATE => {
                let old_id = take_id(&mut value, hash_size)?;
                let new_id = take_id(&mut value, hash_size)?;
                let (committer_name, n) = get_string(value)?;
                value = &value[n..];
                let (email, n) = get_string(value)?;
                value = &value[n..];
                let (time, n) = get_varint(value)?;
                value = &value[n..];
                if value.len() < 2 {
                    return Err(ReftableError::Format("log tz offset: truncated".to_string()));
                }
                let tz_offset = u16::from_be_bytes([value[0], value[1]]) as i16;
                value = &value[2..];
                let (message, n) = get_string(value)?;
                value = &value[n..];

                LogValue::Update(LogEntry {
                    old_id,
                    new_id,
                    committer: Signature {
                        name: committer_name,
                        email,
                        time,
                        tz_offset,
                    },
                    message,
                })
            }
            other => {
                return Err(ReftableError::Format(format!(
                    "unknown log value type {}",
                    other
                )))
            }
        };

        if !value.is_empty() {
            return Err(ReftableError::Format(format!(
                "{} trailing bytes after log record {:?}",
                value.len(),
                name
            )));
        }

        Ok(Self {
            name,
            update_index,
            value: log_value,
        })
    }
}

/// Build the key of the log record for `name` at `update_index`
pub fn log_key(name: &str, update_index: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(name.len() + 9);
    key.extend_from_slice(name.as_bytes());
    key.push(0);
    key.extend_from_slice(&(u64::MAX - update_index).to_be_bytes());
    key
}

fn split_log_key(key: &[u8]) -> Result<(String, u64)> {
    if key.len() < 9 || key[key.len() - 9] != 0 {
        return Err(ReftableError::Format(format!(
            "malformed log key of {} bytes",
            key.len()
        )));
    }
    let (name, suffix) = key.split_at(key.len() - 9);
    let mut inverted = [0u8; 8];
    inverted.copy_from_slice(&suffix[1..]);
    let name = String::from_utf8(name.to_vec())
        .map_err(|_| ReftableError::Format("log name is not valid UTF-8".to_string()))?;
    Ok((name, u64::MAX - u64::from_be_bytes(inverted)))
}
