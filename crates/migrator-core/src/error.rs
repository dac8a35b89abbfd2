//! Core error types.

use std::time::Duration;

use thiserror::Error;

/// Storage and proxy errors.
///
/// Every [`Connection`](crate::storage::Connection) implementation, including the
/// double-write proxy, reports failures through this type.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// The query matched no row.
    #[error("no rows in result set")]
    NoRows,

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Key decoding error.
    #[error("invalid key format")]
    InvalidKey,

    /// A blocking storage task panicked or was cancelled.
    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Transaction error.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// The store cannot be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A bounded lookup did not finish in time.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Operation that cannot be correlated across two pools.
    #[error("{0} is unsupported in double-write mode")]
    UnsupportedInDoubleWrite(&'static str),

    /// The pattern cell holds a value that is not a write pattern.
    #[error("unknown write pattern: {0}")]
    UnknownPattern(u8),
}

impl Error {
    /// Whether this error only signals an empty result.
    pub fn is_no_rows(&self) -> bool {
        matches!(self, Error::NoRows)
    }
}
