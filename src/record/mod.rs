//! Record Module
//!
//! Binary codec for the four record kinds stored in blocks.
//!
//! ## Entry Format
//! ```text
//! ┌──────────────┬──────────────────────────┬────────┬─────────────┬───────┐
//! │ prefix_len   │ suffix_len << 3 | vtype  │ suffix │ value_len   │ value │
//! │ (varint)     │ (varint)                 │        │ (varint)    │       │
//! └──────────────┴──────────────────────────┴────────┴─────────────┴───────┘
//! ```
//!
//! `prefix_len` bytes are shared with the previous key in the block; the
//! first record of a block and every restart point use an empty previous key.
//! The 3-bit value type distinguishes e.g. a ref tombstone from a ref with a
//! value, independently of `value_len`.

mod log;
mod obj;
mod reference;
pub mod varint;

pub use log::{log_key, LogEntry, LogRecord, LogValue, Signature};
pub use obj::{IndexRecord, ObjRecord};
pub use reference::{RefRecord, RefValue};

use crate::error::{ReftableError, Result};

use varint::{common_prefix_len, get_varint, put_varint};

// =============================================================================
// Block Types
// =============================================================================

/// Kind of records a block holds; stored as the block's first byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockType {
    Ref,
    Log,
    Obj,
    Index,
}

impl BlockType {
    pub fn as_u8(self) -> u8 {
        match self {
            BlockType::Ref => b'r',
            BlockType::Log => b'g',
            BlockType::Obj => b'o',
            BlockType::Index => b'i',
        }
    }

    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            b'r' => Some(BlockType::Ref),
            b'g' => Some(BlockType::Log),
            b'o' => Some(BlockType::Obj),
            b'i' => Some(BlockType::Index),
            _ => None,
        }
    }
}

// =============================================================================
// Record
// =============================================================================

/// Any record that can live in a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Ref(RefRecord),
    Log(LogRecord),
    Obj(ObjRecord),
    Index(IndexRecord),
}

impl Record {
    pub fn block_type(&self) -> BlockType {
        match self {
            Record::Ref(_) => BlockType::Ref,
            Record::Log(_) => BlockType::Log,
            Record::Obj(_) => BlockType::Obj,
            Record::Index(_) => BlockType::Index,
        }
    }

    /// Sort key of the record within its block type
    pub fn key(&self) -> Vec<u8> {
        match self {
            Record::Ref(r) => r.name.as_bytes().to_vec(),
            Record::Log(l) => l.key(),
            Record::Obj(o) => o.prefix.clone(),
            Record::Index(i) => i.last_key.clone(),
        }
    }

    pub fn value_type(&self) -> u8 {
        match self {
            Record::Ref(r) => r.value.value_type(),
            Record::Log(l) => l.value_type(),
            Record::Obj(o) => o.value_type(),
            Record::Index(_) => 0,
        }
    }

    pub fn is_deletion(&self) -> bool {
        match self {
            Record::Ref(r) => r.is_deletion(),
            Record::Log(l) => l.is_deletion(),
            Record::Obj(_) | Record::Index(_) => false,
        }
    }

    /// Update index of ref and log records; 0 for structural records
    pub fn update_index(&self) -> u64 {
        match self {
            Record::Ref(r) => r.update_index,
            Record::Log(l) => l.update_index,
            Record::Obj(_) | Record::Index(_) => 0,
        }
    }

    /// Serialize the value part (without the key header)
    pub fn encode_value(&self, hash_size: usize) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            Record::Ref(r) => r.encode_value(&mut buf, hash_size)?,
            Record::Log(l) => l.encode_value(&mut buf, hash_size)?,
            Record::Obj(o) => o.encode_value(&mut buf),
            Record::Index(i) => i.encode_value(&mut buf),
        }
        Ok(buf)
    }

    /// Encode the full entry, prefix-compressed against `prev_key`
    pub fn encode(&self, prev_key: &[u8], hash_size: usize) -> Result<Vec<u8>> {
        let key = self.key();
        let value = self.encode_value(hash_size)?;
        let mut buf = Vec::with_capacity(key.len() + value.len() + 8);
        encode_key(&mut buf, prev_key, &key, self.value_type());
        put_varint(&mut buf, value.len() as u64);
        buf.extend_from_slice(&value);
        Ok(buf)
    }

    /// Rebuild a record from its decoded key and value
    pub fn decode(
        block_type: BlockType,
        key: &[u8],
        value_type: u8,
        value: &[u8],
        hash_size: usize,
    ) -> Result<Self> {
        match block_type {
            BlockType::Ref => RefRecord::decode(key, value_type, value, hash_size).map(Record::Ref),
            BlockType::Log => LogRecord::decode(key, value_type, value, hash_size).map(Record::Log),
            BlockType::Obj => ObjRecord::decode(key, value_type, value).map(Record::Obj),
            BlockType::Index => IndexRecord::decode(key, value).map(Record::Index),
        }
    }

    /// Decode one full entry from the front of `buf`.
    ///
    /// Returns the record, its reconstructed key, and the bytes consumed.
    pub fn decode_from(
        buf: &[u8],
        prev_key: &[u8],
        block_type: BlockType,
        hash_size: usize,
    ) -> Result<(Self, Vec<u8>, usize)> {
        let entry = decode_entry(buf, prev_key)?;
        let record = Self::decode(block_type, &entry.key, entry.value_type, entry.value, hash_size)?;
        Ok((record, entry.key, entry.len))
    }

    pub fn as_ref_record(&self) -> Option<&RefRecord> {
        match self {
            Record::Ref(r) => Some(r),
            _ => None,
        }
    }
}

impl From<RefRecord> for Record {
    fn from(r: RefRecord) -> Self {
        Record::Ref(r)
    }
}

impl From<LogRecord> for Record {
    fn from(l: LogRecord) -> Self {
        Record::Log(l)
    }
}

impl From<ObjRecord> for Record {
    fn from(o: ObjRecord) -> Self {
        Record::Obj(o)
    }
}

impl From<IndexRecord> for Record {
    fn from(i: IndexRecord) -> Self {
        Record::Index(i)
    }
}

// =============================================================================
// Key Framing
// =============================================================================

/// Write the key header and suffix of an entry
pub fn encode_key(buf: &mut Vec<u8>, prev_key: &[u8], key: &[u8], value_type: u8) {
    let prefix_len = common_prefix_len(prev_key, key);
    let suffix_len = (key.len() - prefix_len) as u64;
    put_varint(buf, prefix_len as u64);
    put_varint(buf, suffix_len << 3 | (value_type & 0x7) as u64);
    buf.extend_from_slice(&key[prefix_len..]);
}

/// Raw entry, decoded up to (but not including) the value semantics
#[derive(Debug)]
pub struct RawEntry<'a> {
    pub key: Vec<u8>,
    pub value_type: u8,
    pub value: &'a [u8],
    /// Total bytes the entry occupies
    pub len: usize,
}

/// Decode an entry's key and locate its value bytes
pub fn decode_entry<'a>(buf: &'a [u8], prev_key: &[u8]) -> Result<RawEntry<'a>> {
    let (prefix_len, mut pos) = get_varint(buf)?;
    if prefix_len > prev_key.len() as u64 {
        return Err(ReftableError::Format(format!(
            "key prefix {} longer than previous key {}",
            prefix_len,
            prev_key.len()
        )));
    }
    let prefix_len = prefix_len as usize;

    let (suffix_tag, n) = get_varint(&buf[pos..])?;
    pos += n;
    let value_type = (suffix_tag & 0x7) as u8;
    let suffix_len = usize::try_from(suffix_tag >> 3)
        .map_err(|_| ReftableError::Format("key suffix overflows usize".to_string()))?;

    let suffix_end = pos
        .checked_add(suffix_len)
        .filter(|end| *end <= buf.len())
        .ok_or_else(|| ReftableError::Format("key suffix: truncated".to_string()))?;
    let mut key = Vec::with_capacity(prefix_len + suffix_len);
    key.extend_from_slice(&prev_key[..prefix_len]);
    key.extend_from_slice(&buf[pos..suffix_end]);
    pos = suffix_end;

    let (value_len, n) = get_varint(&buf[pos..])?;
    pos += n;
    let value_end = usize::try_from(value_len)
        .ok()
        .and_then(|len| pos.checked_add(len))
        .filter(|end| *end <= buf.len())
        .ok_or_else(|| ReftableError::Format("value: truncated".to_string()))?;

    Ok(RawEntry {
        key,
        value_type,
        value: &buf[pos..value_end],
        len: value_end,
    })
}
