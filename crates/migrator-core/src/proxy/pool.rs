//! The double-write pool.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::transaction::{DoubleWriteTransaction, TxLeg};
use crate::error::Error;
use crate::pattern::{Direction, PatternCell, PatternError, WritePattern};
use crate::storage::{
    Connection, ExecResult, PreparedStatement, Query, Row, Statement, Transaction,
};

/// One side of a routed operation.
#[derive(Clone, Copy)]
struct Leg<'a> {
    side: Direction,
    conn: &'a dyn Connection,
}

/// Where one operation goes under the pattern loaded for it.
struct Route<'a> {
    pattern: WritePattern,
    primary: Leg<'a>,
    secondary: Option<Leg<'a>>,
}

/// A connection that routes to `src` and `dst` by the active write pattern.
#[derive(Clone)]
pub struct DoubleWritePool {
    src: Arc<dyn Connection>,
    dst: Arc<dyn Connection>,
    pattern: Arc<PatternCell>,
}

impl DoubleWritePool {
    /// Create a pool with its own pattern cell, starting at `SRC_ONLY`.
    pub fn new(src: Arc<dyn Connection>, dst: Arc<dyn Connection>) -> Self {
        Self::with_pattern_cell(src, dst, Arc::new(PatternCell::default()))
    }

    /// Create a pool that follows a shared pattern cell.
    pub fn with_pattern_cell(
        src: Arc<dyn Connection>,
        dst: Arc<dyn Connection>,
        pattern: Arc<PatternCell>,
    ) -> Self {
        Self { src, dst, pattern }
    }

    /// The active pattern.
    pub fn pattern(&self) -> Result<WritePattern, PatternError> {
        self.pattern.load()
    }

    /// Switch the pattern, returning the previous one.
    pub fn update_pattern(&self, pattern: WritePattern) -> Result<WritePattern, PatternError> {
        self.pattern.store(pattern)
    }

    fn conn(&self, side: Direction) -> &dyn Connection {
        match side {
            Direction::Src => self.src.as_ref(),
            Direction::Dst => self.dst.as_ref(),
        }
    }

    fn route(&self) -> Result<Route<'_>, Error> {
        let pattern = self.pattern.load().map_err(|e| match e {
            PatternError::Corrupt(raw) => Error::UnknownPattern(raw),
            other => Error::Transaction(other.to_string()),
        })?;

        let primary = pattern.authoritative();
        Ok(Route {
            pattern,
            primary: Leg {
                side: primary,
                conn: self.conn(primary),
            },
            secondary: pattern.shadow().map(|side| Leg {
                side,
                conn: self.conn(side),
            }),
        })
    }
}

#[async_trait]
impl Connection for DoubleWritePool {
    async fn exec(&self, stmt: &Statement) -> Result<ExecResult, Error> {
        let route = self.route()?;

        // Primary: authoritative, a failure ends the operation here.
        let result = route.primary.conn.exec(stmt).await?;

        // Secondary: shadow copy, failures are left to reconciliation.
        if let Some(secondary) = route.secondary {
            if let Err(err) = secondary.conn.exec(stmt).await {
                warn!(
                    pattern = %route.pattern,
                    side = %secondary.side,
                    table = stmt.table(),
                    error = %err,
                    "secondary write failed"
                );
            }
        }

        Ok(result)
    }

    async fn query(&self, query: &Query) -> Result<Vec<Row>, Error> {
        let route = self.route()?;
        route.primary.conn.query(query).await
    }

    async fn query_row(&self, query: &Query) -> Result<Row, Error> {
        let route = self.route()?;
        route.primary.conn.query_row(query).await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, Error> {
        let route = self.route()?;

        let primary = TxLeg {
            side: route.primary.side,
            tx: route.primary.conn.begin().await?,
        };

        let secondary = match route.secondary {
            Some(leg) => match leg.conn.begin().await {
                Ok(tx) => Some(TxLeg { side: leg.side, tx }),
                Err(err) => {
                    warn!(
                        pattern = %route.pattern,
                        side = %leg.side,
                        error = %err,
                        "secondary transaction failed to begin"
                    );
                    None
                }
            },
            None => None,
        };

        Ok(Box::new(DoubleWriteTransaction::new(
            route.pattern,
            primary,
            secondary,
        )))
    }

    async fn prepare(&self, _stmt: &Statement) -> Result<Box<dyn PreparedStatement>, Error> {
        Err(Error::UnsupportedInDoubleWrite("prepare"))
    }
}
