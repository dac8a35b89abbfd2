//! Transactions for the sled pool.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;

use super::{page, ExecResult, Query, Row, SledPool, Statement, Transaction};
use crate::error::Error;

/// A buffered transaction.
///
/// Statements are collected and applied atomically on commit. Reads inside the
/// transaction see its own uncommitted writes layered over committed data.
pub struct SledTransaction {
    pool: SledPool,
    ops: Vec<Statement>,
    /// Local cache for uncommitted writes ((table, id) -> row, None = deleted).
    write_cache: HashMap<(String, i64), Option<Row>>,
}

impl SledTransaction {
    /// Create a new transaction.
    pub(crate) fn new(pool: SledPool) -> Self {
        Self {
            pool,
            ops: Vec::new(),
            write_cache: HashMap::new(),
        }
    }

    fn cached(&self, table: &str, id: i64) -> Option<&Option<Row>> {
        self.write_cache.get(&(table.to_string(), id))
    }

    fn read_one(&self, table: &str, id: i64) -> Result<Option<Row>, Error> {
        match self.cached(table, id) {
            Some(cached) => Ok(cached.clone()),
            None => self.pool.get(table, id),
        }
    }
}

#[async_trait]
impl Transaction for SledTransaction {
    async fn exec(&mut self, stmt: &Statement) -> Result<ExecResult, Error> {
        let rows_affected = match stmt {
            Statement::Upsert { table, row } => {
                self.write_cache
                    .insert((table.clone(), row.id), Some(row.clone()));
                1
            }
            Statement::Delete { table, id } => {
                let existed = self.read_one(table, *id)?.is_some();
                self.write_cache.insert((table.clone(), *id), None);
                u64::from(existed)
            }
        };
        self.ops.push(stmt.clone());
        Ok(ExecResult { rows_affected })
    }

    async fn query(&mut self, query: &Query) -> Result<Vec<Row>, Error> {
        match query {
            Query::ById { table, id } => Ok(self.read_one(table, *id)?.into_iter().collect()),
            Query::ByIds { table, ids } => {
                let mut rows = BTreeMap::new();
                for id in ids {
                    if let Some(row) = self.read_one(table, *id)? {
                        rows.insert(*id, row);
                    }
                }
                Ok(rows.into_values().collect())
            }
            Query::Scan {
                table,
                since_utime,
                after_id,
                limit,
            } => {
                let mut rows = BTreeMap::new();
                for row in self.pool.scan_after(table, *after_id) {
                    let row = row?;
                    rows.insert(row.id, row);
                }
                for ((cached_table, id), cached) in &self.write_cache {
                    if cached_table != table {
                        continue;
                    }
                    match cached {
                        Some(row) => rows.insert(*id, row.clone()),
                        None => rows.remove(id),
                    };
                }
                Ok(page(rows.into_values(), *since_utime, *after_id, *limit))
            }
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), Error> {
        if self.ops.is_empty() {
            return Ok(());
        }
        let SledTransaction { pool, ops, .. } = *self;
        pool
            .blocking(move |pool| pool.apply_all(&ops))
            .await
            .map_err(|e| Error::Transaction(e.to_string()))
    }

    async fn rollback(self: Box<Self>) -> Result<(), Error> {
        Ok(())
    }
}
