//! Ref records
//!
//! A ref record binds a name to an object id, a peeled pair, a symbolic
//! target, or a deletion tombstone. The value type tag lives in the key
//! header; the value starts with the update index.

use crate::error::{ReftableError, Result};
use crate::oid::ObjectId;

use super::varint::{get_string, get_varint, put_bytes, put_varint};

pub(crate) const VALUE_DELETION: u8 = 0;
pub(crate) const VALUE_OBJECT: u8 = 1;
pub(crate) const VALUE_PEELED: u8 = 2;
pub(crate) const VALUE_SYMBOLIC: u8 = 3;

/// What a reference points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefValue {
    /// Tombstone: the name is deleted as of this update index
    Deletion,

    /// Direct reference to an object
    Object(ObjectId),

    /// Annotated tag: the tag object and the object it peels to
    Peeled { target: ObjectId, peeled: ObjectId },

    /// Symbolic reference to another name
    Symbolic(String),
}

impl RefValue {
    pub fn is_deletion(&self) -> bool {
        matches!(self, RefValue::Deletion)
    }

    /// The object id the reference resolves to directly, if any
    pub fn object_id(&self) -> Option<&ObjectId> {
        match self {
            RefValue::Object(id) | RefValue::Peeled { target: id, .. } => Some(id),
            _ => None,
        }
    }

    /// Whether the value names an id starting with `oid`, directly or
    /// through its peeled id. A full-length `oid` must match exactly.
    pub fn points_at(&self, oid: &ObjectId) -> bool {
        let prefix = oid.as_bytes();
        match self {
            RefValue::Object(id) => id.as_bytes().starts_with(prefix),
            RefValue::Peeled { target, peeled } => {
                target.as_bytes().starts_with(prefix) || peeled.as_bytes().starts_with(prefix)
            }
            _ => false,
        }
    }

    pub(crate) fn value_type(&self) -> u8 {
        match self {
            RefValue::Deletion => VALUE_DELETION,
            RefValue::Object(_) => VALUE_OBJECT,
            RefValue::Peeled { .. } => VALUE_PEELED,
            RefValue::Symbolic(_) => VALUE_SYMBOLIC,
        }
    }
}

/// A named reference at a given update index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefRecord {
    pub name: String,
    pub update_index: u64,
    pub value: RefValue,
}

impl RefRecord {
    pub fn new(name: impl Into<String>, update_index: u64, value: RefValue) -> Self {
        Self {
            name: name.into(),
            update_index,
            value,
        }
    }

    pub fn deletion(name: impl Into<String>, update_index: u64) -> Self {
        Self::new(name, update_index, RefValue::Deletion)
    }

    pub fn is_deletion(&self) -> bool {
        self.value.is_deletion()
    }

    pub(crate) fn encode_value(&self, buf: &mut Vec<u8>, hash_size: usize) -> Result<()> {
        put_varint(buf, self.update_index);
        match &self.value {
            RefValue::Deletion => {}
            RefValue::Object(id) => put_id(buf, id, hash_size)?,
            RefValue::Peeled { target, peeled } => {
                put_id(buf, target, hash_size)?;
                put_id(buf, peeled, hash_size)?;
            }
            RefValue::Symbolic(target) => put_bytes(buf, target.as_bytes()),
        }
        Ok(())
    }

    pub(crate) fn decode(key: &[u8], value_type: u8, mut value: &[u8], hash_size: usize) -> Result<Self> {
        let name = String::from_utf8(key.to_vec())
            .map_err(|_| ReftableError::Format("ref name is not valid UTF-8".to_string()))?;

        let (update_index, n) = get_varint(value)?;
        value = &value[n..];

        let ref_value = match value_type {
            VALUE_DELETION => RefValue::Deletion,
            VALUE_OBJECT => RefValue::Object(take_id(&mut value, hash_size)?),
            VALUE_PEELED => {
                let target = take_id(&mut value, hash_size)?;
                let peeled = take_id(&mut value, hash_size)?;
                RefValue::Peeled { target, peeled }
            }
            VALUE_SYMBOLIC => {
                let (target, n) = get_string(value)?;
                value = &value[n..];
                RefValue::Symbolic(target)
            }
            other => {
                return Err(ReftableError::Format(format!(
                    "unknown ref value type {}",
                    other
                )))
            }
        };

        if !value.is_empty() {
            return Err(ReftableError::Format(format!(
                "{} trailing bytes after ref record {:?}",
                value.len(),
                name
            )));
        }

        Ok(Self {
            name,
            update_index,
            value: ref_value,
        })
    }
}

pub(crate) fn put_id(buf: &mut Vec<u8>, id: &ObjectId, hash_size: usize) -> Result<()> {
    if id.len() != hash_size {
        return Err(ReftableError::Format(format!(
            "object id {} is {} bytes, table hash is {}",
            id,
            id.len(),
            hash_size
        )));
    }
    buf.extend_from_slice(id.as_bytes());
    Ok(())
}

pub(crate) fn take_id(value: &mut &[u8], hash_size: usize) -> Result<ObjectId> {
    if value.len() < hash_size {
        return Err(ReftableError::Format("object id: truncated".to_string()));
    }
    let (id, rest) = value.split_at(hash_size);
    *value = rest;
    Ok(ObjectId::from_bytes(id))
}
