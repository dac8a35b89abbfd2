//! Test doubles shared by unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::Error;
use crate::storage::{
    Connection, ExecResult, PreparedStatement, Query, Row, SledPool, Statement, Transaction,
};

/// Switches that make a [`FaultyPool`] fail.
#[derive(Default)]
pub struct Faults {
    pub offline: AtomicBool,
    pub fail_writes: AtomicBool,
    pub fail_begin: AtomicBool,
    pub fail_commit: AtomicBool,
    pub execs: AtomicUsize,
    pub queries: AtomicUsize,
    /// Id whose by-id lookup stalls, and for how long.
    pub slow_lookup: Mutex<Option<(i64, Duration)>>,
}

impl Faults {
    pub fn set_offline(&self, on: bool) {
        self.offline.store(on, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, on: bool) {
        self.fail_writes.store(on, Ordering::SeqCst);
    }

    pub fn set_slow_lookup(&self, id: i64, delay: Duration) {
        *self.slow_lookup.lock() = Some((id, delay));
    }

    fn stall_for(&self, query: &Query) -> Option<Duration> {
        match (query, *self.slow_lookup.lock()) {
            (Query::ById { id, .. }, Some((slow, delay))) if *id == slow => Some(delay),
            _ => None,
        }
    }

    fn check(&self, name: &str) -> Result<(), Error> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Unavailable(name.to_string()));
        }
        Ok(())
    }
}

/// A [`SledPool`] whose operations can be made to fail.
pub struct FaultyPool {
    pub name: &'static str,
    pub inner: SledPool,
    pub faults: Arc<Faults>,
}

impl FaultyPool {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            inner: SledPool::temporary().unwrap(),
            faults: Arc::new(Faults::default()),
        })
    }
}

#[async_trait]
impl Connection for FaultyPool {
    async fn exec(&self, stmt: &Statement) -> Result<ExecResult, Error> {
        self.faults.check(self.name)?;
        self.faults.execs.fetch_add(1, Ordering::SeqCst);
        if self.faults.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Unavailable(format!("{} rejected write", self.name)));
        }
        self.inner.exec(stmt).await
    }

    async fn query(&self, query: &Query) -> Result<Vec<Row>, Error> {
        self.faults.check(self.name)?;
        self.faults.queries.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.faults.stall_for(query) {
            tokio::time::sleep(delay).await;
        }
        self.inner.query(query).await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, Error> {
        self.faults.check(self.name)?;
        if self.faults.fail_begin.load(Ordering::SeqCst) {
            return Err(Error::Transaction(format!("{} refused begin", self.name)));
        }
        Ok(Box::new(FaultyTransaction {
            inner: self.inner.begin().await?,
            faults: self.faults.clone(),
            name: self.name,
        }))
    }

    async fn prepare(&self, stmt: &Statement) -> Result<Box<dyn PreparedStatement>, Error> {
        self.faults.check(self.name)?;
        self.inner.prepare(stmt).await
    }
}

struct FaultyTransaction {
    inner: Box<dyn Transaction>,
    faults: Arc<Faults>,
    name: &'static str,
}

#[async_trait]
impl Transaction for FaultyTransaction {
    async fn exec(&mut self, stmt: &Statement) -> Result<ExecResult, Error> {
        if self.faults.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Unavailable(format!("{} rejected write", self.name)));
        }
        self.inner.exec(stmt).await
    }

    async fn query(&mut self, query: &Query) -> Result<Vec<Row>, Error> {
        self.inner.query(query).await
    }

    async fn commit(self: Box<Self>) -> Result<(), Error> {
        if self.faults.fail_commit.load(Ordering::SeqCst) {
            return Err(Error::Transaction(format!("{} commit failed", self.name)));
        }
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), Error> {
        self.inner.rollback().await
    }
}
