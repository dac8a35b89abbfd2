//! Bidirectional table scan.

use std::collections::HashSet;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{classify, ValidationReport, ValidatorConfig};
use crate::entity::Entity;
use crate::error::Error;
use crate::event::{InconsistencyType, InconsistentEvent};
use crate::notifier::Notifier;
use crate::pattern::Direction;
use crate::storage::{Connection, Query, Row};

/// Compares `base` against `target` for one table of entity type `T`.
///
/// Built per run with a fixed `(base, target, direction)` binding. The cursors
/// live on the stack of each scan, so one validator may run several passes.
pub struct Validator<T> {
    base: Arc<dyn Connection>,
    target: Arc<dyn Connection>,
    table: String,
    direction: Direction,
    notifier: Arc<dyn Notifier>,
    config: ValidatorConfig,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Validator<T> {
    /// Create a full-mode validator with default settings.
    ///
    /// `direction` names the authoritative side, i.e. which store `base` is.
    pub fn new(
        base: Arc<dyn Connection>,
        target: Arc<dyn Connection>,
        table: impl Into<String>,
        direction: Direction,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            base,
            target,
            table: table.into(),
            direction,
            notifier,
            config: ValidatorConfig::default(),
            _entity: PhantomData,
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: ValidatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Switch to a terminating full pass.
    pub fn full(mut self) -> Self {
        self.config = self.config.full();
        self
    }

    /// Switch to incremental tailing from `since_utime`.
    pub fn incremental(mut self, since_utime: i64, interval: Duration) -> Self {
        self.config = self.config.incremental(since_utime, interval);
        self
    }

    /// The authoritative side.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The active configuration.
    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Run both scan directions concurrently until both finish or `cancel` fires.
    pub async fn validate(&self, cancel: CancellationToken) -> ValidationReport {
        info!(
            table = %self.table,
            direction = %self.direction,
            mode = ?self.config.mode,
            "validation started"
        );

        let (forward, backward) =
            tokio::join!(self.base_to_target(&cancel), self.target_to_base(&cancel));

        let mut report = forward.merge(backward);
        report.cancelled = cancel.is_cancelled();

        info!(
            table = %self.table,
            direction = %self.direction,
            base_scanned = report.base_scanned,
            target_scanned = report.target_scanned,
            events = report.events(),
            lookup_failures = report.lookup_failures,
            cancelled = report.cancelled,
            "validation finished"
        );
        report
    }

    /// Walk base one row at a time and look each id up in target.
    ///
    /// The cursor is the last base id visited. A failed cursor read is retried
    /// from the same id, subject to the failure budget.
    async fn base_to_target(&self, cancel: &CancellationToken) -> ValidationReport {
        let mut report = ValidationReport::default();
        let mut failures = 0u32;
        let mut after: Option<i64> = None;

        while !cancel.is_cancelled() {
            let cursor = Query::scan(&self.table, self.config.since_utime(), after, 1);
            let base_row = match self.bounded(self.base.query_row(&cursor)).await {
                Ok(row) => row,
                Err(Error::NoRows) => match self.config.interval() {
                    None => break,
                    Some(interval) => {
                        if !pause(cancel, interval).await {
                            break;
                        }
                        continue;
                    }
                },
                Err(err) => {
                    warn!(table = %self.table, after, error = %err, "base scan lookup failed");
                    report.lookup_failures += 1;
                    if !self.absorb_failure(&mut failures, cancel, &mut report, "base_to_target").await {
                        break;
                    }
                    continue;
                }
            };

            failures = 0;
            after = Some(base_row.id);
            report.base_scanned += 1;
            self.check_target(&base_row, &mut report).await;
        }

        report
    }

    /// Compare one base row with its target counterpart.
    async fn check_target(&self, base_row: &Row, report: &mut ValidationReport) {
        let base: T = match base_row.decode() {
            Ok(entity) => entity,
            Err(err) => {
                warn!(table = %self.table, id = base_row.id, error = %err, "undecodable base row");
                report.lookup_failures += 1;
                return;
            }
        };

        let lookup = Query::by_id(&self.table, base_row.id);
        let kind = match self.bounded(self.target.query_row(&lookup)).await {
            Ok(target_row) => match target_row.decode::<T>() {
                Ok(target) => classify(Some(&base), Some(&target)),
                Err(err) => {
                    debug!(table = %self.table, id = base_row.id, error = %err, "undecodable target row");
                    Some(InconsistencyType::Neq)
                }
            },
            Err(Error::NoRows) => classify(Some(&base), None),
            Err(err) => {
                warn!(table = %self.table, id = base_row.id, error = %err, "target lookup failed");
                report.lookup_failures += 1;
                return;
            }
        };

        if let Some(kind) = kind {
            self.notify(base_row.id, kind, report).await;
        }
    }

    /// Walk target in batches and report ids base does not have.
    ///
    /// Batches are keyed on the last target id seen, so deleting reported rows
    /// from target while the scan runs does not move rows past the cursor.
    async fn target_to_base(&self, cancel: &CancellationToken) -> ValidationReport {
        let mut report = ValidationReport::default();
        let mut failures = 0u32;
        let mut after: Option<i64> = None;
        let batch_size = self.config.batch_size;

        while !cancel.is_cancelled() {
            let cursor = Query::scan(&self.table, self.config.since_utime(), after, batch_size);
            let batch = match self.bounded(self.target.query(&cursor)).await {
                Ok(rows) => rows,
                Err(err) => {
                    warn!(table = %self.table, after, error = %err, "target batch lookup failed");
                    report.lookup_failures += 1;
                    if !self.absorb_failure(&mut failures, cancel, &mut report, "target_to_base").await {
                        break;
                    }
                    continue;
                }
            };
            failures = 0;

            if batch.is_empty() {
                match self.config.interval() {
                    None => break,
                    Some(interval) => {
                        if !pause(cancel, interval).await {
                            break;
                        }
                        continue;
                    }
                }
            }

            report.target_scanned += batch.len() as u64;
            after = batch.last().map(|row| row.id);

            let ids: Vec<i64> = batch.iter().map(|row| row.id).collect();
            match self.bounded(self.base.query(&Query::by_ids(&self.table, ids.clone()))).await {
                Ok(base_rows) => {
                    let present: HashSet<i64> = base_rows.iter().map(|row| row.id).collect();
                    for id in ids.into_iter().filter(|id| !present.contains(id)) {
                        self.notify(id, InconsistencyType::BaseMissing, &mut report).await;
                    }
                }
                Err(err) => {
                    warn!(
                        table = %self.table,
                        first_id = ids.first().copied(),
                        error = %err,
                        "base batch lookup failed"
                    );
                    report.lookup_failures += 1;
                }
            }

            if batch.len() < batch_size {
                match self.config.interval() {
                    None => break,
                    Some(interval) => {
                        if !pause(cancel, interval).await {
                            break;
                        }
                    }
                }
            }
        }

        report
    }

    /// Publish one event. Failures are logged and counted, never fatal.
    async fn notify(&self, id: i64, kind: InconsistencyType, report: &mut ValidationReport) {
        let event = InconsistentEvent::new(id, self.direction, kind);
        report.record(kind);

        match tokio::time::timeout(self.config.notify_timeout, self.notifier.produce(&event)).await {
            Ok(Ok(())) => {
                debug!(table = %self.table, id, kind = %kind, "inconsistency reported");
            }
            Ok(Err(err)) => {
                warn!(table = %self.table, id, kind = %kind, error = %err, "failed to publish inconsistency");
                report.notify_failures += 1;
            }
            Err(_) => {
                warn!(table = %self.table, id, kind = %kind, "publishing inconsistency timed out");
                report.notify_failures += 1;
            }
        }
    }

    /// Wrap a lookup in its own deadline.
    async fn bounded<R, F>(&self, lookup: F) -> Result<R, Error>
    where
        F: Future<Output = Result<R, Error>>,
    {
        match tokio::time::timeout(self.config.lookup_timeout, lookup).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(self.config.lookup_timeout)),
        }
    }

    /// Count a cursor failure. Returns false when the scan should stop.
    async fn absorb_failure(
        &self,
        failures: &mut u32,
        cancel: &CancellationToken,
        report: &mut ValidationReport,
        scan: &'static str,
    ) -> bool {
        *failures += 1;
        if *failures < self.config.max_consecutive_failures {
            return true;
        }

        match self.config.interval() {
            None => {
                error!(table = %self.table, scan, failures = *failures, "store unreachable, abandoning pass");
                report.aborted = true;
                false
            }
            Some(interval) => {
                warn!(table = %self.table, scan, failures = *failures, "store unreachable, backing off");
                *failures = 0;
                pause(cancel, interval).await
            }
        }
    }
}

/// Sleep for `interval`. Returns false if cancelled first.
async fn pause(cancel: &CancellationToken, interval: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(interval) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::entity::JsonRecord;
    use crate::fixer::OverrideFixer;
    use crate::notifier::{channel, BusReceiver, ChannelNotifier, NotifyError};
    use crate::storage::{SledPool, Statement};
    use crate::testing::FaultyPool;

    const TABLE: &str = "article";

    fn record(id: i64, v: &str) -> JsonRecord {
        JsonRecord::new(id, id * 10).with_column("v", v)
    }

    async fn put(pool: &dyn Connection, record: &JsonRecord) {
        pool.exec(&Statement::upsert(TABLE, record).unwrap()).await.unwrap();
    }

    fn drain(rx: &mut BusReceiver) -> Vec<InconsistentEvent> {
        let mut events = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            events.push(InconsistentEvent::decode(&msg.payload).unwrap());
        }
        events.sort_by_key(|e| e.id);
        events
    }

    /// Repairs each event before returning, like a consumer that keeps up.
    struct RepairingNotifier {
        fixer: OverrideFixer<JsonRecord>,
        reported: AtomicUsize,
    }

    #[async_trait]
    impl Notifier for RepairingNotifier {
        async fn produce(&self, event: &InconsistentEvent) -> Result<(), NotifyError> {
            self.reported.fetch_add(1, Ordering::SeqCst);
            self.fixer.fix(event).await.unwrap();
            Ok(())
        }
    }

    fn validator(
        base: Arc<dyn Connection>,
        target: Arc<dyn Connection>,
    ) -> (Validator<JsonRecord>, BusReceiver) {
        let (tx, rx) = channel(1024);
        let notifier = Arc::new(ChannelNotifier::new(tx));
        let config = ValidatorConfig::default().with_batch_size(2);
        let validator = Validator::new(base, target, TABLE, Direction::Src, notifier).with_config(config);
        (validator, rx)
    }

    #[tokio::test]
    async fn test_full_pass_classifies_each_id_once() {
        let base = Arc::new(SledPool::temporary().unwrap());
        let target = Arc::new(SledPool::temporary().unwrap());

        put(base.as_ref(), &record(1, "same")).await;
        put(target.as_ref(), &record(1, "same")).await;
        put(base.as_ref(), &record(2, "base-only")).await;
        put(base.as_ref(), &record(3, "a")).await;
        put(target.as_ref(), &record(3, "b")).await;
        put(target.as_ref(), &record(4, "target-only")).await;
        put(target.as_ref(), &record(5, "target-only")).await;

        let (validator, mut rx) = validator(base, target);
        let report = validator.validate(CancellationToken::new()).await;

        assert_eq!(report.base_scanned, 3);
        assert_eq!(report.target_scanned, 4);
        assert_eq!(report.target_missing, 1);
        assert_eq!(report.neq, 1);
        assert_eq!(report.base_missing, 2);
        assert!(!report.cancelled);

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                InconsistentEvent::new(2, Direction::Src, InconsistencyType::TargetMissing),
                InconsistentEvent::new(3, Direction::Src, InconsistencyType::Neq),
                InconsistentEvent::new(4, Direction::Src, InconsistencyType::BaseMissing),
                InconsistentEvent::new(5, Direction::Src, InconsistencyType::BaseMissing),
            ]
        );
    }

    #[tokio::test]
    async fn test_incremental_respects_watermark_and_cancels() {
        let base = Arc::new(SledPool::temporary().unwrap());
        let target = Arc::new(SledPool::temporary().unwrap());
        // utime = id * 10
        put(base.as_ref(), &record(1, "old")).await;
        put(base.as_ref(), &record(5, "new")).await;

        let (validator, mut rx) = validator(base.clone(), target);
        let validator = validator.incremental(30, Duration::from_millis(10));

        let cancel = CancellationToken::new();
        let run = {
            let cancel = cancel.clone();
            tokio::spawn(async move { validator.validate(cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        // A row written while tailing is picked up.
        put(base.as_ref(), &record(7, "later")).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        cancel.cancel();
        let report = run.await.unwrap();
        assert!(report.cancelled);

        let ids: Vec<i64> = drain(&mut rx).iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![5, 7]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let base = Arc::new(SledPool::temporary().unwrap());
        let target = Arc::new(SledPool::temporary().unwrap());
        put(base.as_ref(), &record(1, "x")).await;

        let (validator, mut rx) = validator(base, target);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = validator.validate(cancel).await;
        assert!(report.cancelled);
        assert_eq!(report.base_scanned, 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_target_lookup_failure_is_skipped() {
        let base = FaultyPool::new("base");
        let target = FaultyPool::new("target");
        put(base.as_ref(), &record(1, "x")).await;
        put(base.as_ref(), &record(2, "y")).await;
        target.faults.set_offline(true);

        let (validator, mut rx) = validator(base, target.clone());
        let validator = validator.with_config(
            ValidatorConfig::default().with_max_consecutive_failures(3),
        );
        let report = validator.validate(CancellationToken::new()).await;

        // Both base rows visited despite every target lookup failing.
        assert_eq!(report.base_scanned, 2);
        assert!(report.lookup_failures >= 2);
        assert!(report.aborted);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_base_abandons_full_pass() {
        let base = FaultyPool::new("base");
        let target = Arc::new(SledPool::temporary().unwrap());
        base.faults.set_offline(true);

        let (validator, _rx) = validator(base, target);
        let validator = validator.with_config(
            ValidatorConfig::default().with_max_consecutive_failures(4),
        );
        let report = validator.validate(CancellationToken::new()).await;

        assert!(report.aborted);
        assert_eq!(report.base_scanned, 0);
        // Target is empty, so only the base cursor failed.
        assert_eq!(report.lookup_failures, 4);
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_stop_scan() {
        let base = Arc::new(SledPool::temporary().unwrap());
        let target = Arc::new(SledPool::temporary().unwrap());
        put(base.as_ref(), &record(1, "x")).await;
        put(base.as_ref(), &record(2, "y")).await;

        let (validator, rx) = validator(base, target);
        drop(rx);

        let report = validator.validate(CancellationToken::new()).await;
        assert_eq!(report.target_missing, 2);
        assert_eq!(report.notify_failures, 2);
    }

    #[tokio::test]
    async fn test_orphans_repaired_mid_scan_are_all_reported() {
        let base = Arc::new(SledPool::temporary().unwrap());
        let target = Arc::new(SledPool::temporary().unwrap());
        for id in 1..=4 {
            put(target.as_ref(), &record(id, "orphan")).await;
        }

        let notifier = Arc::new(RepairingNotifier {
            fixer: OverrideFixer::new(base.clone(), target.clone(), TABLE),
            reported: AtomicUsize::new(0),
        });
        let validator = Validator::<JsonRecord>::new(
            base,
            target.clone(),
            TABLE,
            Direction::Src,
            notifier.clone(),
        )
        .with_config(ValidatorConfig::default().with_batch_size(2));

        let report = validator.validate(CancellationToken::new()).await;

        // Deleting rows behind the cursor must not push later rows past it.
        assert_eq!(report.target_scanned, 4);
        assert_eq!(report.base_missing, 4);
        assert_eq!(notifier.reported.load(Ordering::SeqCst), 4);
        assert_eq!(target.count(TABLE).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_slow_lookup_times_out_and_scan_continues() {
        let base = Arc::new(SledPool::temporary().unwrap());
        let target = FaultyPool::new("target");
        for id in 1..=3 {
            put(base.as_ref(), &record(id, "base-only")).await;
        }
        target.faults.set_slow_lookup(2, Duration::from_secs(5));

        let (validator, mut rx) = validator(base, target);
        let validator = validator.with_config(
            ValidatorConfig::default()
                .with_batch_size(2)
                .with_lookup_timeout(Duration::from_millis(50)),
        );
        let report = validator.validate(CancellationToken::new()).await;

        assert_eq!(report.base_scanned, 3);
        assert_eq!(report.lookup_failures, 1);
        assert_eq!(report.target_missing, 2);
        assert!(!report.aborted);

        let ids: Vec<i64> = drain(&mut rx).iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_incremental_reports_new_target_only_row_once() {
        let base = Arc::new(SledPool::temporary().unwrap());
        let target = Arc::new(SledPool::temporary().unwrap());

        let (validator, mut rx) = validator(base, target.clone());
        let validator = validator.incremental(0, Duration::from_millis(10));

        let cancel = CancellationToken::new();
        let run = {
            let cancel = cancel.clone();
            tokio::spawn(async move { validator.validate(cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        put(target.as_ref(), &record(4, "orphan")).await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        cancel.cancel();
        let report = run.await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.base_missing, 1);
        assert_eq!(
            drain(&mut rx),
            vec![InconsistentEvent::new(4, Direction::Src, InconsistencyType::BaseMissing)]
        );
    }
}
