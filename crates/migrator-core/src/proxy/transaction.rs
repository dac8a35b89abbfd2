//! Transactions spanning both pools.

use async_trait::async_trait;
use tracing::warn;

use crate::error::Error;
use crate::pattern::{Direction, WritePattern};
use crate::storage::{ExecResult, Query, Row, Statement, Transaction};

/// One side's transaction.
pub(crate) struct TxLeg {
    pub(crate) side: Direction,
    pub(crate) tx: Box<dyn Transaction>,
}

/// A transaction opened through a [`DoubleWritePool`](super::DoubleWritePool).
///
/// The pattern is fixed when the transaction begins; a phase switch while it is
/// open does not reroute it. The secondary leg is absent for `*_ONLY` patterns
/// and when it failed to begin.
pub struct DoubleWriteTransaction {
    pattern: WritePattern,
    primary: TxLeg,
    secondary: Option<TxLeg>,
}

impl DoubleWriteTransaction {
    pub(crate) fn new(pattern: WritePattern, primary: TxLeg, secondary: Option<TxLeg>) -> Self {
        Self {
            pattern,
            primary,
            secondary,
        }
    }
}

#[async_trait]
impl Transaction for DoubleWriteTransaction {
    async fn exec(&mut self, stmt: &Statement) -> Result<ExecResult, Error> {
        let result = self.primary.tx.exec(stmt).await?;

        if let Some(secondary) = self.secondary.as_mut() {
            if let Err(err) = secondary.tx.exec(stmt).await {
                warn!(
                    pattern = %self.pattern,
                    side = %secondary.side,
                    table = stmt.table(),
                    error = %err,
                    "secondary transactional write failed"
                );
            }
        }

        Ok(result)
    }

    async fn query(&mut self, query: &Query) -> Result<Vec<Row>, Error> {
        self.primary.tx.query(query).await
    }

    async fn query_row(&mut self, query: &Query) -> Result<Row, Error> {
        self.primary.tx.query_row(query).await
    }

    async fn commit(self: Box<Self>) -> Result<(), Error> {
        let DoubleWriteTransaction {
            pattern,
            primary,
            secondary,
        } = *self;

        if let Err(err) = primary.tx.commit().await {
            // Nothing became visible on the primary; keep the shadow in step.
            if let Some(secondary) = secondary {
                if let Err(rollback_err) = secondary.tx.rollback().await {
                    warn!(
                        pattern = %pattern,
                        side = %secondary.side,
                        error = %rollback_err,
                        "secondary rollback after failed primary commit failed"
                    );
                }
            }
            return Err(err);
        }

        if let Some(secondary) = secondary {
            if let Err(err) = secondary.tx.commit().await {
                warn!(
                    pattern = %pattern,
                    side = %secondary.side,
                    error = %err,
                    "secondary commit failed"
                );
            }
        }

        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), Error> {
        let DoubleWriteTransaction {
            pattern,
            primary,
            secondary,
        } = *self;

        let result = primary.tx.rollback().await;

        if let Some(secondary) = secondary {
            if let Err(err) = secondary.tx.rollback().await {
                warn!(
                    pattern = %pattern,
                    side = %secondary.side,
                    error = %err,
                    "secondary rollback failed"
                );
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::pattern::WritePattern;
    use crate::proxy::DoubleWritePool;
    use crate::storage::{Connection, Query, Row, Statement};
    use crate::testing::FaultyPool;
    use std::sync::atomic::Ordering;

    fn upsert(id: i64) -> Statement {
        Statement::Upsert {
            table: "t".to_string(),
            row: Row {
                id,
                utime: 0,
                data: b"x".to_vec(),
            },
        }
    }

    fn src_first() -> (std::sync::Arc<FaultyPool>, std::sync::Arc<FaultyPool>, DoubleWritePool) {
        let src = FaultyPool::new("src");
        let dst = FaultyPool::new("dst");
        let pool = DoubleWritePool::new(src.clone(), dst.clone());
        pool.update_pattern(WritePattern::SrcFirst).unwrap();
        (src, dst, pool)
    }

    #[tokio::test]
    async fn test_commit_reaches_both() {
        let (src, dst, pool) = src_first();
        let mut tx = pool.begin().await.unwrap();
        tx.exec(&upsert(1)).await.unwrap();
        tx.exec(&upsert(2)).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(src.inner.count("t").unwrap(), 2);
        assert_eq!(dst.inner.count("t").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_rollback_reaches_both() {
        let (src, dst, pool) = src_first();
        let mut tx = pool.begin().await.unwrap();
        tx.exec(&upsert(1)).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(src.inner.count("t").unwrap(), 0);
        assert_eq!(dst.inner.count("t").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_secondary_begin_failure_tolerated() {
        let (src, dst, pool) = src_first();
        dst.faults.fail_begin.store(true, Ordering::SeqCst);

        let mut tx = pool.begin().await.unwrap();
        tx.exec(&upsert(1)).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(src.inner.count("t").unwrap(), 1);
        assert_eq!(dst.inner.count("t").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_primary_begin_failure_propagates() {
        let (src, _dst, pool) = src_first();
        src.faults.fail_begin.store(true, Ordering::SeqCst);
        assert!(matches!(pool.begin().await.err(), Some(Error::Transaction(_))));
    }

    #[tokio::test]
    async fn test_secondary_commit_failure_swallowed() {
        let (src, dst, pool) = src_first();
        dst.faults.fail_commit.store(true, Ordering::SeqCst);

        let mut tx = pool.begin().await.unwrap();
        tx.exec(&upsert(1)).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(src.inner.count("t").unwrap(), 1);
        assert_eq!(dst.inner.count("t").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_primary_commit_failure_propagates() {
        let (src, dst, pool) = src_first();
        src.faults.fail_commit.store(true, Ordering::SeqCst);

        let mut tx = pool.begin().await.unwrap();
        tx.exec(&upsert(1)).await.unwrap();
        assert!(tx.commit().await.is_err());

        assert_eq!(src.inner.count("t").unwrap(), 0);
        assert_eq!(dst.inner.count("t").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_primary_exec_failure_skips_secondary() {
        let (src, dst, pool) = src_first();
        let mut tx = pool.begin().await.unwrap();
        src.faults.set_fail_writes(true);

        assert!(tx.exec(&upsert(1)).await.is_err());
        src.faults.set_fail_writes(false);
        tx.commit().await.unwrap();

        assert_eq!(dst.inner.count("t").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_transaction_reads_primary() {
        let (_src, dst, pool) = src_first();
        dst.inner.apply(&upsert(9)).unwrap();

        let mut tx = pool.begin().await.unwrap();
        let err = tx.query_row(&Query::by_id("t", 9)).await.unwrap_err();
        assert!(err.is_no_rows());
        tx.exec(&upsert(9)).await.unwrap();
        assert!(tx.query_row(&Query::by_id("t", 9)).await.is_ok());
    }
}
