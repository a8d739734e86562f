//! Object-index and index records
//!
//! Neither kind is ever a deletion. Obj records map an object-id prefix to
//! the ref blocks that may hold references to it; index records map the last
//! key of a child block to that block's offset.

use crate::error::{ReftableError, Result};

use super::varint::{get_varint, put_varint};

/// Reverse index entry: object-id prefix → ref block offsets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjRecord {
    pub prefix: Vec<u8>,
    /// Strictly increasing ref block offsets
    pub offsets: Vec<u64>,
}

impl ObjRecord {
    /// Small offset counts ride in the value type tag
    pub(crate) fn value_type(&self) -> u8 {
        match self.offsets.len() {
            n @ 1..=7 => n as u8,
            _ => 0,
        }
    }

    pub(crate) fn encode_value(&self, buf: &mut Vec<u8>) {
        if self.value_type() == 0 {
            put_varint(buf, self.offsets.len() as u64);
        }
        let mut last = 0;
        for (i, &offset) in self.offsets.iter().enumerate() {
            if i == 0 {
                put_varint(buf, offset);
            } else {
                put_varint(buf, offset - last);
            }
            last = offset;
        }
    }

    pub(crate) fn decode(key: &[u8], value_type: u8, mut value: &[u8]) -> Result<Self> {
        let count = if value_type == 0 {
            let (count, n) = get_varint(value)?;
            value = &value[n..];
            count
        } else {
            value_type as u64
        };

        // Each offset takes at least one byte
        if count > value.len() as u64 {
            return Err(ReftableError::Format(format!(
                "obj record claims {} offsets in {} bytes",
                count,
                value.len()
            )));
        }

        let mut offsets = Vec::with_capacity(count as usize);
        let mut last = 0u64;
        for i in 0..count {
            let (delta, n) = get_varint(value)?;
            value = &value[n..];
            last = if i == 0 {
                delta
            } else {
                last.checked_add(delta)
                    .ok_or_else(|| ReftableError::Format("obj offset overflows".to_string()))?
            };
            offsets.push(last);
        }

        if !value.is_empty() {
            return Err(ReftableError::Format(
                "trailing bytes after obj record".to_string(),
            ));
        }

        Ok(Self {
            prefix: key.to_vec(),
            offsets,
        })
    }
}

/// Entry of an index block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    /// Last key stored in the child block
    pub last_key: Vec<u8>,
    /// Offset of the child block in the file
    pub offset: u64,
}

impl IndexRecord {
    pub(crate) fn encode_value(&self, buf: &mut Vec<u8>) {
        put_varint(buf, self.offset);
    }

    pub(crate) fn decode(key: &[u8], value: &[u8]) -> Result<Self> {
        let (offset, n) = get_varint(value)?;
        if n != value.len() {
            return Err(ReftableError::Format(
                "trailing bytes after index record".to_string(),
            ));
        }
        Ok(Self {
            last_key: key.to_vec(),
            offset,
        })
    }
}
