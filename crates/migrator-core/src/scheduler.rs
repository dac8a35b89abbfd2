//! Migration scheduler.
//!
//! Owns the write pattern and at most one full and one incremental validation
//! run. Starting a run of either kind cancels and waits out the previous run of
//! the same kind, then binds the new run to whichever store the current pattern
//! makes authoritative.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::entity::Entity;
use crate::notifier::Notifier;
use crate::pattern::{Direction, PatternCell, PatternError, TransitionPolicy, WritePattern};
use crate::proxy::DoubleWritePool;
use crate::storage::Connection;
use crate::validator::{ValidationReport, Validator, ValidatorConfig};

/// Scheduler configuration.
#[derive(Debug, Clone, Default)]
pub struct SchedulerConfig {
    /// Settings applied to every validation run. The scan mode is chosen per
    /// start call.
    pub validator: ValidatorConfig,
    /// Policy for pattern switches.
    pub transition_policy: TransitionPolicy,
}

impl SchedulerConfig {
    /// Set the validator settings.
    pub fn with_validator(mut self, validator: ValidatorConfig) -> Self {
        self.validator = validator;
        self
    }

    /// Set the transition policy.
    pub fn with_transition_policy(mut self, policy: TransitionPolicy) -> Self {
        self.transition_policy = policy;
        self
    }
}

/// Snapshot of the scheduler state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    /// Active write pattern.
    pub pattern: WritePattern,
    /// A full pass is in progress.
    pub full_running: bool,
    /// An incremental run is tailing.
    pub incremental_running: bool,
    /// Authoritative side of the latest full run.
    pub full_direction: Option<Direction>,
    /// Authoritative side of the latest incremental run.
    pub incremental_direction: Option<Direction>,
}

struct ValidationRun {
    cancel: CancellationToken,
    handle: JoinHandle<ValidationReport>,
    direction: Direction,
}

impl ValidationRun {
    async fn stop(self, kind: &'static str) -> Option<ValidationReport> {
        self.cancel.cancel();
        match self.handle.await {
            Ok(report) => Some(report),
            Err(err) => {
                warn!(kind, error = %err, "validation task failed");
                None
            }
        }
    }
}

/// Drives one table through the migration phases.
pub struct Scheduler<T> {
    table: String,
    src: Arc<dyn Connection>,
    dst: Arc<dyn Connection>,
    pattern: Arc<PatternCell>,
    notifier: Arc<dyn Notifier>,
    config: SchedulerConfig,
    full: Mutex<Option<ValidationRun>>,
    incremental: Mutex<Option<ValidationRun>>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Scheduler<T> {
    /// Create a scheduler at `SRC_ONLY` with no runs.
    pub fn new(
        src: Arc<dyn Connection>,
        dst: Arc<dyn Connection>,
        table: impl Into<String>,
        notifier: Arc<dyn Notifier>,
        config: SchedulerConfig,
    ) -> Self {
        let pattern = Arc::new(PatternCell::new(config.transition_policy));
        Self {
            table: table.into(),
            src,
            dst,
            pattern,
            notifier,
            config,
            full: Mutex::new(None),
            incremental: Mutex::new(None),
            _entity: PhantomData,
        }
    }

    /// Table being migrated.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// A double-write pool that follows this scheduler's pattern.
    pub fn pool(&self) -> DoubleWritePool {
        DoubleWritePool::with_pattern_cell(self.src.clone(), self.dst.clone(), self.pattern.clone())
    }

    /// The active pattern.
    pub fn pattern(&self) -> Result<WritePattern, PatternError> {
        self.pattern.load()
    }

    /// Switch the write pattern, returning the previous one.
    ///
    /// Running validators keep the direction they started with.
    pub fn set_pattern(&self, pattern: WritePattern) -> Result<WritePattern, PatternError> {
        self.pattern.store(pattern)
    }

    /// Start a full pass, replacing any full pass in progress.
    pub async fn start_full_validation(&self) -> Result<Direction, PatternError> {
        let mut slot = self.full.lock().await;
        if let Some(prev) = slot.take() {
            prev.stop("full").await;
        }

        let config = self.config.validator.clone().full();
        let run = self.spawn(config)?;
        let direction = run.direction;
        *slot = Some(run);

        info!(table = %self.table, direction = %direction, "full validation started");
        Ok(direction)
    }

    /// Stop the full pass, returning its report if one was running.
    pub async fn stop_full_validation(&self) -> Option<ValidationReport> {
        let run = self.full.lock().await.take()?;
        let report = run.stop("full").await;
        info!(table = %self.table, "full validation stopped");
        report
    }

    /// Start tailing rows with `utime >= utime`, replacing any incremental run.
    pub async fn start_incremental_validation(
        &self,
        utime: i64,
        interval_ms: u64,
    ) -> Result<Direction, PatternError> {
        let mut slot = self.incremental.lock().await;
        if let Some(prev) = slot.take() {
            prev.stop("incremental").await;
        }

        let interval = Duration::from_millis(interval_ms.max(1));
        let config = self.config.validator.clone().incremental(utime, interval);
        let run = self.spawn(config)?;
        let direction = run.direction;
        *slot = Some(run);

        info!(
            table = %self.table,
            direction = %direction,
            utime,
            interval_ms,
            "incremental validation started"
        );
        Ok(direction)
    }

    /// Stop the incremental run, returning its report if one was running.
    pub async fn stop_incremental_validation(&self) -> Option<ValidationReport> {
        let run = self.incremental.lock().await.take()?;
        let report = run.stop("incremental").await;
        info!(table = %self.table, "incremental validation stopped");
        report
    }

    /// Current pattern and run state.
    pub async fn status(&self) -> Result<SchedulerStatus, PatternError> {
        let pattern = self.pattern.load()?;
        let full = self.full.lock().await;
        let incremental = self.incremental.lock().await;

        Ok(SchedulerStatus {
            pattern,
            full_running: full.as_ref().is_some_and(|run| !run.handle.is_finished()),
            incremental_running: incremental.as_ref().is_some_and(|run| !run.handle.is_finished()),
            full_direction: full.as_ref().map(|run| run.direction),
            incremental_direction: incremental.as_ref().map(|run| run.direction),
        })
    }

    /// Stop every run.
    pub async fn shutdown(&self) {
        self.stop_full_validation().await;
        self.stop_incremental_validation().await;
    }

    fn conn(&self, side: Direction) -> Arc<dyn Connection> {
        match side {
            Direction::Src => self.src.clone(),
            Direction::Dst => self.dst.clone(),
        }
    }

    fn spawn(&self, config: ValidatorConfig) -> Result<ValidationRun, PatternError> {
        let direction = self.pattern.load()?.authoritative();
        let base = self.conn(direction);
        let target = self.conn(direction.opposite());

        let validator: Validator<T> =
            Validator::new(base, target, self.table.clone(), direction, self.notifier.clone())
                .with_config(config);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { validator.validate(token).await });

        Ok(ValidationRun {
            cancel,
            handle,
            direction,
        })
    }
}

impl<T> Drop for Scheduler<T> {
    fn drop(&mut self) {
        for slot in [self.full.get_mut(), self.incremental.get_mut()] {
            if let Some(run) = slot.as_ref() {
                run.cancel.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::JsonRecord;
    use crate::event::{InconsistencyType, InconsistentEvent};
    use crate::notifier::{channel, BusReceiver, ChannelNotifier};
    use crate::storage::{SledPool, Statement};

    const TABLE: &str = "article";

    fn setup() -> (Arc<SledPool>, Arc<SledPool>, Scheduler<JsonRecord>, BusReceiver) {
        let src = Arc::new(SledPool::temporary().unwrap());
        let dst = Arc::new(SledPool::temporary().unwrap());
        let (tx, rx) = channel(64);
        let scheduler = Scheduler::new(
            src.clone(),
            dst.clone(),
            TABLE,
            Arc::new(ChannelNotifier::new(tx)),
            SchedulerConfig::default(),
        );
        (src, dst, scheduler, rx)
    }

    async fn put(pool: &dyn Connection, id: i64) {
        let record = JsonRecord::new(id, 1).with_column("v", "x");
        pool.exec(&Statement::upsert(TABLE, &record).unwrap()).await.unwrap();
    }

    #[tokio::test]
    async fn test_initial_state() {
        let (_src, _dst, scheduler, _rx) = setup();
        let status = scheduler.status().await.unwrap();
        assert_eq!(status.pattern, WritePattern::SrcOnly);
        assert!(!status.full_running);
        assert!(!status.incremental_running);
        assert_eq!(status.full_direction, None);
        assert!(scheduler.stop_full_validation().await.is_none());
    }

    #[tokio::test]
    async fn test_full_direction_follows_pattern() {
        let (src, dst, scheduler, mut rx) = setup();
        put(src.as_ref(), 1).await;
        put(dst.as_ref(), 2).await;

        assert_eq!(scheduler.start_full_validation().await.unwrap(), Direction::Src);
        let msg = rx.recv().await.unwrap();
        assert_eq!(InconsistentEvent::decode(&msg.payload).unwrap().direction, Direction::Src);
        scheduler.stop_full_validation().await;
        while rx.try_recv().is_ok() {}

        scheduler.set_pattern(WritePattern::SrcFirst).unwrap();
        scheduler.set_pattern(WritePattern::DstFirst).unwrap();
        assert_eq!(scheduler.start_full_validation().await.unwrap(), Direction::Dst);

        let report = scheduler.stop_full_validation().await.unwrap();
        assert!(report.events() <= 2);
        let status = scheduler.status().await.unwrap();
        assert_eq!(status.pattern, WritePattern::DstFirst);
        assert_eq!(status.full_direction, None);
    }

    #[tokio::test]
    async fn test_full_pass_finishes_on_its_own() {
        let (src, _dst, scheduler, mut rx) = setup();
        put(src.as_ref(), 1).await;

        scheduler.start_full_validation().await.unwrap();
        let event = InconsistentEvent::decode(&rx.recv().await.unwrap().payload).unwrap();
        assert_eq!(event.kind, InconsistencyType::TargetMissing);

        let mut finished = false;
        for _ in 0..100 {
            if !scheduler.status().await.unwrap().full_running {
                finished = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(finished);

        let report = scheduler.stop_full_validation().await.unwrap();
        assert!(!report.cancelled);
        assert_eq!(report.target_missing, 1);
    }

    #[tokio::test]
    async fn test_restart_replaces_incremental_run() {
        let (_src, _dst, scheduler, _rx) = setup();

        scheduler.start_incremental_validation(0, 10).await.unwrap();
        scheduler.start_incremental_validation(0, 10).await.unwrap();
        let status = scheduler.status().await.unwrap();
        assert!(status.incremental_running);
        assert_eq!(status.incremental_direction, Some(Direction::Src));

        let report = scheduler.stop_incremental_validation().await.unwrap();
        assert!(report.cancelled);
        assert!(!scheduler.status().await.unwrap().incremental_running);
    }

    #[tokio::test]
    async fn test_forward_only_policy() {
        let src = Arc::new(SledPool::temporary().unwrap());
        let dst = Arc::new(SledPool::temporary().unwrap());
        let (tx, _rx) = channel(4);
        let config = SchedulerConfig::default().with_transition_policy(TransitionPolicy::ForwardOnly);
        let scheduler: Scheduler<JsonRecord> =
            Scheduler::new(src, dst, TABLE, Arc::new(ChannelNotifier::new(tx)), config);

        assert!(scheduler.set_pattern(WritePattern::DstOnly).is_err());
        assert_eq!(scheduler.set_pattern(WritePattern::SrcFirst), Ok(WritePattern::SrcOnly));
        assert_eq!(scheduler.pool().pattern(), Ok(WritePattern::SrcFirst));
    }
}
