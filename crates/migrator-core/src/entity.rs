//! The record contract every migrated table implements.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A record type that can be reconciled between two stores.
///
/// Implementations serialize to the column set that is copied between stores,
/// so every serialized field counts as a migrated column.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Identity used as the reconciliation key. Must be the same in both stores.
    fn id(&self) -> i64;

    /// Last-modified time in milliseconds, used as the incremental watermark.
    fn utime(&self) -> i64;

    /// Structural equivalence against the same record read from the other store.
    ///
    /// Fields that are allowed to drift (pure audit timestamps, for instance) are
    /// excluded; each implementation documents which ones.
    fn compare_to(&self, other: &Self) -> bool;
}

/// A schemaless record: an id, a modification time, and arbitrary columns.
///
/// Lets the control surface migrate any table without a compiled-in type.
/// `compare_to` checks the id and every column except `utime`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRecord {
    /// Primary key.
    pub id: i64,
    /// Last-modified time in milliseconds.
    #[serde(default)]
    pub utime: i64,
    /// Every other column.
    #[serde(flatten)]
    pub columns: Map<String, Value>,
}

impl JsonRecord {
    /// Create a record with no columns.
    pub fn new(id: i64, utime: i64) -> Self {
        Self {
            id,
            utime,
            columns: Map::new(),
        }
    }

    /// Set a column.
    pub fn with_column(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.columns.insert(name.into(), value.into());
        self
    }
}

impl Entity for JsonRecord {
    fn id(&self) -> i64 {
        self.id
    }

    fn utime(&self) -> i64 {
        self.utime
    }

    fn compare_to(&self, other: &Self) -> bool {
        self.id == other.id && self.columns == other.columns
    }
}
