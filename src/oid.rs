//! Object ids
//!
//! References point into an external content-addressed object store; this
//! crate only needs the raw id bytes and the width of the hash.

use std::fmt;

use crate::error::{ReftableError, Result};

/// Hash function used for object ids in a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashId {
    #[default]
    Sha1,
    Sha256,
}

impl HashId {
    /// Width of an object id in bytes
    pub fn size(self) -> usize {
        match self {
            HashId::Sha1 => 20,
            HashId::Sha256 => 32,
        }
    }

    /// 4-byte identifier stored in version 2 headers
    pub fn format_id(self) -> [u8; 4] {
        match self {
            HashId::Sha1 => *b"sha1",
            HashId::Sha256 => *b"s256",
        }
    }

    pub fn from_format_id(id: [u8; 4]) -> Result<Self> {
        match &id {
            b"sha1" => Ok(HashId::Sha1),
            b"s256" => Ok(HashId::Sha256),
            _ => Err(ReftableError::Unsupported(format!(
                "unknown hash id {:?}",
                String::from_utf8_lossy(&id)
            ))),
        }
    }
}

/// Raw object id
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(Vec<u8>);

impl ObjectId {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        ObjectId(bytes.to_vec())
    }

    /// The all-zero id, used for "no previous value" in log entries
    pub fn zero(hash_id: HashId) -> Self {
        ObjectId(vec![0; hash_id.size()])
    }

    /// Parse a lowercase or uppercase hex string
    pub fn from_hex(hex: &str) -> Result<Self> {
        if hex.len() % 2 != 0 {
            return Err(ReftableError::Format(format!(
                "odd-length object id {:?}",
                hex
            )));
        }
        let digits = hex.as_bytes();
        let mut bytes = Vec::with_capacity(digits.len() / 2);
        for pair in digits.chunks(2) {
            let hi = hex_value(pair[0]);
            let lo = hex_value(pair[1]);
            match (hi, lo) {
                (Some(hi), Some(lo)) => bytes.push(hi << 4 | lo),
                _ => {
                    return Err(ReftableError::Format(format!(
                        "invalid hex in object id {:?}",
                        hex
                    )))
                }
            }
        }
        Ok(ObjectId(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    pub fn to_hex(&self) -> String {
        const DIGITS: &[u8; 16] = b"0123456789abcdef";
        let mut out = String::with_capacity(self.0.len() * 2);
        for &b in &self.0 {
            out.push(DIGITS[(b >> 4) as usize] as char);
            out.push(DIGITS[(b & 0xf) as usize] as char);
        }
        out
    }
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl From<&[u8]> for ObjectId {
    fn from(bytes: &[u8]) -> Self {
        ObjectId::from_bytes(bytes)
    }
}
