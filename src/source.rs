//! Read contract shared by single tables and merged views

use crate::error::Result;
use crate::oid::{HashId, ObjectId};
use crate::record::{LogRecord, RefRecord};

/// Boxed record iterator borrowing its source
pub type RecordIter<'a, T> = Box<dyn Iterator<Item = Result<T>> + 'a>;

/// Anything that can answer ref and log lookups
pub trait RefSource {
    /// Ref records from the first name >= `name`, in name order
    fn seek_ref(&self, name: &str) -> Result<RecordIter<'_, RefRecord>>;

    /// Log records from the newest entry of `name` onwards, in key order
    fn seek_log(&self, name: &str) -> Result<RecordIter<'_, LogRecord>>;

    fn refs_for_oid(&self, oid: &ObjectId) -> Result<Vec<RefRecord>>;

    fn min_update_index(&self) -> u64;

    fn max_update_index(&self) -> u64;

    fn hash_id(&self) -> HashId;

    /// Record stored under exactly `name`
    fn read_ref(&self, name: &str) -> Result<Option<RefRecord>> {
        match self.seek_ref(name)?.next() {
            Some(Ok(record)) if record.name == name => Ok(Some(record)),
            Some(Err(e)) => Err(e),
            _ => Ok(None),
        }
    }

    /// Newest log record of `name`
    fn read_log(&self, name: &str) -> Result<Option<LogRecord>> {
        match self.seek_log(name)?.next() {
            Some(Ok(record)) if record.name == name => Ok(Some(record)),
            Some(Err(e)) => Err(e),
            _ => Ok(None),
        }
    }
}
