//! Storage connection interface and the sled-backed pool.
//!
//! The migration machinery only talks to stores through [`Connection`]. It needs
//! plain mutations, reads, transactions, an ordered scan by id and an IN-list
//! lookup; [`Statement`] and [`Query`] describe exactly those.

mod config;
mod engine;
mod record;
mod transaction;

pub mod key;

pub use config::StorageConfig;
pub use engine::SledPool;
pub use record::StoredRow;
pub use transaction::SledTransaction;

use async_trait::async_trait;

use crate::entity::Entity;
use crate::error::Error;

/// A row as seen by the migration layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// Primary key.
    pub id: i64,
    /// Last-modified time in milliseconds.
    pub utime: i64,
    /// Serialized entity columns.
    pub data: Vec<u8>,
}

impl Row {
    /// Build a row from an entity.
    pub fn from_entity<T: Entity>(entity: &T) -> Result<Self, Error> {
        let data = serde_json::to_vec(entity).map_err(|e| Error::Serialization(e.to_string()))?;
        Ok(Self {
            id: entity.id(),
            utime: entity.utime(),
            data,
        })
    }

    /// Decode the row into an entity.
    pub fn decode<T: Entity>(&self) -> Result<T, Error> {
        serde_json::from_slice(&self.data).map_err(|e| Error::Deserialization(e.to_string()))
    }
}

/// A mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Insert, or overwrite every column of an existing row.
    Upsert {
        /// Table name.
        table: String,
        /// Row to write.
        row: Row,
    },
    /// Delete by id. Deleting an absent row is not an error.
    Delete {
        /// Table name.
        table: String,
        /// Row id.
        id: i64,
    },
}

impl Statement {
    /// Upsert an entity.
    pub fn upsert<T: Entity>(table: impl Into<String>, entity: &T) -> Result<Self, Error> {
        Ok(Statement::Upsert {
            table: table.into(),
            row: Row::from_entity(entity)?,
        })
    }

    /// Delete a row by id.
    pub fn delete(table: impl Into<String>, id: i64) -> Self {
        Statement::Delete {
            table: table.into(),
            id,
        }
    }

    /// Table the statement targets.
    pub fn table(&self) -> &str {
        match self {
            Statement::Upsert { table, .. } | Statement::Delete { table, .. } => table,
        }
    }
}

/// A read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Rows ordered by id, optionally `utime >= since_utime`, starting strictly
    /// after `after_id`.
    ///
    /// Paging by the last id seen keeps a cursor stable while rows before it
    /// are deleted.
    Scan {
        /// Table name.
        table: String,
        /// Watermark filter.
        since_utime: Option<i64>,
        /// Exclusive lower id bound; `None` starts at the first row.
        after_id: Option<i64>,
        /// Maximum rows to return.
        limit: usize,
    },
    /// A single row by id.
    ById {
        /// Table name.
        table: String,
        /// Row id.
        id: i64,
    },
    /// Every existing row among `ids`, ordered by id.
    ByIds {
        /// Table name.
        table: String,
        /// Ids to look up.
        ids: Vec<i64>,
    },
}

impl Query {
    /// Ordered scan page.
    pub fn scan(
        table: impl Into<String>,
        since_utime: Option<i64>,
        after_id: Option<i64>,
        limit: usize,
    ) -> Self {
        Query::Scan {
            table: table.into(),
            since_utime,
            after_id,
            limit,
        }
    }

    /// Lookup by id.
    pub fn by_id(table: impl Into<String>, id: i64) -> Self {
        Query::ById {
            table: table.into(),
            id,
        }
    }

    /// IN-list lookup.
    pub fn by_ids(table: impl Into<String>, ids: Vec<i64>) -> Self {
        Query::ByIds {
            table: table.into(),
            ids,
        }
    }

    /// Table the query reads.
    pub fn table(&self) -> &str {
        match self {
            Query::Scan { table, .. } | Query::ById { table, .. } | Query::ByIds { table, .. } => {
                table
            }
        }
    }
}

/// Outcome of a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecResult {
    /// Rows inserted, overwritten or deleted.
    pub rows_affected: u64,
}

/// A pooled store connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Execute a mutation.
    async fn exec(&self, stmt: &Statement) -> Result<ExecResult, Error>;

    /// Run a read returning any number of rows.
    async fn query(&self, query: &Query) -> Result<Vec<Row>, Error>;

    /// Run a read returning its first row, or [`Error::NoRows`].
    async fn query_row(&self, query: &Query) -> Result<Row, Error> {
        self.query(query).await?.into_iter().next().ok_or(Error::NoRows)
    }

    /// Begin a transaction.
    async fn begin(&self) -> Result<Box<dyn Transaction>, Error>;

    /// Prepare a statement for repeated execution.
    async fn prepare(&self, stmt: &Statement) -> Result<Box<dyn PreparedStatement>, Error>;
}

/// An open transaction. Dropping it without committing discards its writes.
#[async_trait]
pub trait Transaction: Send {
    /// Execute a mutation inside the transaction.
    async fn exec(&mut self, stmt: &Statement) -> Result<ExecResult, Error>;

    /// Read, observing this transaction's own uncommitted writes.
    async fn query(&mut self, query: &Query) -> Result<Vec<Row>, Error>;

    /// Read the first row, or [`Error::NoRows`].
    async fn query_row(&mut self, query: &Query) -> Result<Row, Error> {
        self.query(query).await?.into_iter().next().ok_or(Error::NoRows)
    }

    /// Apply every write atomically.
    async fn commit(self: Box<Self>) -> Result<(), Error>;

    /// Discard every write.
    async fn rollback(self: Box<Self>) -> Result<(), Error>;
}

/// A statement bound to a connection.
#[async_trait]
pub trait PreparedStatement: Send + Sync {
    /// Execute the statement.
    async fn exec(&self) -> Result<ExecResult, Error>;
}

/// Apply ordered-scan semantics to rows already sorted by id.
pub(crate) fn page<I>(rows: I, since_utime: Option<i64>, after_id: Option<i64>, limit: usize) -> Vec<Row>
where
    I: IntoIterator<Item = Row>,
{
    rows.into_iter()
        .filter(|row| after_id.map_or(true, |after| row.id > after))
        .filter(|row| since_utime.map_or(true, |since| row.utime >= since))
        .take(limit)
        .collect()
}
