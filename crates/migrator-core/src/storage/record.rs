//! On-disk row payload.

use crate::error::Error;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};

use super::Row;

/// The stored value of a row; the id lives in the key.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct StoredRow {
    /// Last-modified time in milliseconds.
    pub utime: i64,

    /// Serialized entity columns.
    pub data: Vec<u8>,
}

impl StoredRow {
    /// Split a row into its stored payload.
    pub fn from_row(row: &Row) -> Self {
        Self {
            utime: row.utime,
            data: row.data.clone(),
        }
    }

    /// Rejoin the payload with its id.
    pub fn into_row(self, id: i64) -> Row {
        Row {
            id,
            utime: self.utime,
            data: self.data,
        }
    }

    /// Serialize the payload to bytes using rkyv.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a payload from bytes using rkyv.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        // sled hands out unaligned buffers
        let mut aligned = AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}
