//! Sled-backed connection pool.

use std::ops::Bound;

use async_trait::async_trait;
use sled::{Batch, Db, Tree};

use super::key::{decode_id, row_key, table_prefix};
use super::{
    Connection, ExecResult, PreparedStatement, Query, Row, SledTransaction, Statement,
    StorageConfig, StoredRow,
};
use crate::error::Error;

/// Tree name for table rows.
const ROWS_TREE: &str = "rows";

/// A store implementing [`Connection`] on top of sled.
///
/// All tables share one tree keyed by `[name len][table][id]`, so a scan of a
/// table is a range scan in id order and a transaction commit is a single atomic
/// batch. Cloning is cheap and shares the underlying database.
///
/// The async [`Connection`] methods run sled on the blocking pool, so a caller's
/// deadline can fire while a slow read is still in progress.
#[derive(Clone)]
pub struct SledPool {
    /// The underlying sled database.
    db: Db,

    /// Tree for table rows.
    rows: Tree,
}

impl SledPool {
    /// Open or create a pool with the given configuration.
    pub fn open(config: StorageConfig) -> Result<Self, Error> {
        let db = config.to_sled_config().open()?;
        let rows = db.open_tree(ROWS_TREE)?;
        Ok(Self { db, rows })
    }

    /// Open a throwaway in-memory pool.
    pub fn temporary() -> Result<Self, Error> {
        Self::open(StorageConfig::temporary())
    }

    /// Read one row.
    pub fn get(&self, table: &str, id: i64) -> Result<Option<Row>, Error> {
        match self.rows.get(row_key(table, id))? {
            Some(bytes) => Ok(Some(StoredRow::from_bytes(&bytes)?.into_row(id))),
            None => Ok(None),
        }
    }

    /// Iterate a table in id order.
    pub fn scan_table(&self, table: &str) -> impl Iterator<Item = Result<Row, Error>> + '_ {
        self.scan_after(table, None)
    }

    /// Iterate a table in id order, starting strictly after `after_id`.
    ///
    /// Rows are read and decoded lazily.
    pub fn scan_after(
        &self,
        table: &str,
        after_id: Option<i64>,
    ) -> impl Iterator<Item = Result<Row, Error>> + '_ {
        let prefix_len = table_prefix(table).len();
        let start = match after_id {
            Some(id) => Bound::Excluded(row_key(table, id)),
            None => Bound::Included(row_key(table, i64::MIN)),
        };
        let end = Bound::Included(row_key(table, i64::MAX));

        self.rows.range((start, end)).map(move |result| {
            let (key, value) = result?;
            let id = decode_id(&key[prefix_len..]).ok_or(Error::InvalidKey)?;
            Ok(StoredRow::from_bytes(&value)?.into_row(id))
        })
    }

    /// Run `op` against this pool on the blocking thread pool.
    pub(crate) async fn blocking<R, F>(&self, op: F) -> Result<R, Error>
    where
        F: FnOnce(&SledPool) -> Result<R, Error> + Send + 'static,
        R: Send + 'static,
    {
        let pool = self.clone();
        tokio::task::spawn_blocking(move || op(&pool)).await?
    }

    /// Number of rows in a table.
    pub fn count(&self, table: &str) -> Result<usize, Error> {
        let mut n = 0;
        for row in self.scan_table(table) {
            row?;
            n += 1;
        }
        Ok(n)
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.db.flush()?;
        Ok(())
    }

    /// Check if the database was recovered from a previous crash.
    pub fn was_recovered(&self) -> bool {
        self.db.was_recovered()
    }

    /// Execute a statement immediately.
    pub(crate) fn apply(&self, stmt: &Statement) -> Result<ExecResult, Error> {
        match stmt {
            Statement::Upsert { table, row } => {
                let value = StoredRow::from_row(row).to_bytes()?;
                self.rows.insert(row_key(table, row.id), value)?;
                Ok(ExecResult { rows_affected: 1 })
            }
            Statement::Delete { table, id } => {
                let removed = self.rows.remove(row_key(table, *id))?;
                Ok(ExecResult {
                    rows_affected: u64::from(removed.is_some()),
                })
            }
        }
    }

    /// Apply a batch of statements atomically.
    pub(crate) fn apply_all(&self, stmts: &[Statement]) -> Result<(), Error> {
        let mut batch = Batch::default();
        for stmt in stmts {
            match stmt {
                Statement::Upsert { table, row } => {
                    batch.insert(row_key(table, row.id), StoredRow::from_row(row).to_bytes()?);
                }
                Statement::Delete { table, id } => {
                    batch.remove(row_key(table, *id));
                }
            }
        }
        self.rows.apply_batch(batch)?;
        Ok(())
    }

    /// Evaluate a query against committed data.
    pub(crate) fn select(&self, query: &Query) -> Result<Vec<Row>, Error> {
        match query {
            Query::Scan {
                table,
                since_utime,
                after_id,
                limit,
            } => {
                let mut rows = Vec::with_capacity((*limit).min(1024));
                for row in self.scan_after(table, *after_id) {
                    if rows.len() >= *limit {
                        break;
                    }
                    let row = row?;
                    if since_utime.map_or(true, |since| row.utime >= since) {
                        rows.push(row);
                    }
                }
                Ok(rows)
            }
            Query::ById { table, id } => Ok(self.get(table, *id)?.into_iter().collect()),
            Query::ByIds { table, ids } => {
                let mut ids = ids.clone();
                ids.sort_unstable();
                ids.dedup();

                let mut rows = Vec::with_capacity(ids.len());
                for id in ids {
                    if let Some(row) = self.get(table, id)? {
                        rows.push(row);
                    }
                }
                Ok(rows)
            }
        }
    }
}

#[async_trait]
impl Connection for SledPool {
    async fn exec(&self, stmt: &Statement) -> Result<ExecResult, Error> {
        let stmt = stmt.clone();
        self.blocking(move |pool| pool.apply(&stmt)).await
    }

    async fn query(&self, query: &Query) -> Result<Vec<Row>, Error> {
        let query = query.clone();
        self.blocking(move |pool| pool.select(&query)).await
    }

    async fn begin(&self) -> Result<Box<dyn super::Transaction>, Error> {
        Ok(Box::new(SledTransaction::new(self.clone())))
    }

    async fn prepare(&self, stmt: &Statement) -> Result<Box<dyn PreparedStatement>, Error> {
        Ok(Box::new(SledPrepared {
            pool: self.clone(),
            stmt: stmt.clone(),
        }))
    }
}

/// A statement bound to a [`SledPool`].
struct SledPrepared {
    pool: SledPool,
    stmt: Statement,
}

#[async_trait]
impl PreparedStatement for SledPrepared {
    async fn exec(&self) -> Result<ExecResult, Error> {
        let stmt = self.stmt.clone();
        self.pool.blocking(move |pool| pool.apply(&stmt)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, utime: i64, data: &str) -> Row {
        Row {
            id,
            utime,
            data: data.as_bytes().to_vec(),
        }
    }

    fn upsert(table: &str, row: Row) -> Statement {
        Statement::Upsert {
            table: table.to_string(),
            row,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_query_row() {
        let pool = SledPool::temporary().unwrap();
        let result = pool.exec(&upsert("user", row(1, 10, "a"))).await.unwrap();
        assert_eq!(result.rows_affected, 1);

        let found = pool.query_row(&Query::by_id("user", 1)).await.unwrap();
        assert_eq!(found, row(1, 10, "a"));

        // Upsert overwrites
        pool.exec(&upsert("user", row(1, 11, "b"))).await.unwrap();
        let found = pool.query_row(&Query::by_id("user", 1)).await.unwrap();
        assert_eq!(found.data, b"b".to_vec());
        assert_eq!(pool.count("user").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_query_row_no_rows() {
        let pool = SledPool::temporary().unwrap();
        let err = pool.query_row(&Query::by_id("user", 404)).await.unwrap_err();
        assert!(err.is_no_rows());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let pool = SledPool::temporary().unwrap();
        pool.exec(&upsert("user", row(1, 1, "a"))).await.unwrap();

        let first = pool.exec(&Statement::delete("user", 1)).await.unwrap();
        let second = pool.exec(&Statement::delete("user", 1)).await.unwrap();
        assert_eq!(first.rows_affected, 1);
        assert_eq!(second.rows_affected, 0);
        assert!(pool.get("user", 1).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scan_orders_by_id_with_negative_ids() {
        let pool = SledPool::temporary().unwrap();
        for id in [5, -3, 0, 12, 7] {
            pool.exec(&upsert("t", row(id, id * 10, "x"))).await.unwrap();
        }
        // Another table must not leak into the scan.
        pool.exec(&upsert("t2", row(1, 0, "y"))).await.unwrap();

        let rows = pool.query(&Query::scan("t", None, None, 100)).await.unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![-3, 0, 5, 7, 12]);

        // utime >= 50 leaves 5, 7 and 12; the cursor skips 5.
        let rows = pool.query(&Query::scan("t", Some(50), Some(5), 1)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, 7);
    }

    #[tokio::test]
    async fn test_scan_cursor_survives_deletes_behind_it() {
        let pool = SledPool::temporary().unwrap();
        for id in 1..=6 {
            pool.exec(&upsert("t", row(id, 0, "x"))).await.unwrap();
        }

        let first = pool.query(&Query::scan("t", None, None, 2)).await.unwrap();
        let last = first.last().map(|r| r.id);
        assert_eq!(last, Some(2));

        for r in &first {
            pool.exec(&Statement::delete("t", r.id)).await.unwrap();
        }

        let next = pool.query(&Query::scan("t", None, last, 2)).await.unwrap();
        let ids: Vec<i64> = next.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 4]);
    }

    #[tokio::test]
    async fn test_scan_ignores_table_sharing_name_bytes() {
        let pool = SledPool::temporary().unwrap();
        pool.exec(&upsert("a", row(1, 0, "x"))).await.unwrap();
        pool.exec(&upsert("a\0b", row(2, 0, "y"))).await.unwrap();

        let rows = pool.query(&Query::scan("a", None, None, 10)).await.unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1]);
        assert_eq!(pool.count("a\0b").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_by_ids_returns_present_rows() {
        let pool = SledPool::temporary().unwrap();
        for id in [1, 2, 4] {
            pool.exec(&upsert("t", row(id, 0, "x"))).await.unwrap();
        }

        let rows = pool.query(&Query::by_ids("t", vec![4, 3, 2, 2])).await.unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 4]);
    }

    #[tokio::test]
    async fn test_prepared_statement() {
        let pool = SledPool::temporary().unwrap();
        let prepared = pool.prepare(&upsert("t", row(3, 0, "p"))).await.unwrap();
        prepared.exec().await.unwrap();
        assert!(pool.get("t", 3).unwrap().is_some());
    }

    #[test]
    fn test_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig::new(dir.path());

        {
            let pool = SledPool::open(config.clone()).unwrap();
            pool.apply(&upsert("t", row(1, 2, "kept"))).unwrap();
            pool.flush().unwrap();
        }

        {
            let pool = SledPool::open(config).unwrap();
            let found = pool.get("t", 1).unwrap().unwrap();
            assert_eq!(found.data, b"kept".to_vec());
        }
    }
}
