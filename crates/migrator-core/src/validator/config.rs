//! Validator configuration.

use std::time::Duration;

/// Default rows per target-to-base batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default deadline for one lookup.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(1);

/// Default deadline for publishing one event.
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(1);

/// Default number of back-to-back cursor failures tolerated per direction.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 16;

/// Whether a pass terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// One terminating pass over the whole table.
    Full,
    /// Tail rows with `utime >= since_utime`, sleeping `interval` whenever the
    /// scan runs dry. Exits only on cancellation.
    Incremental {
        /// Watermark in milliseconds.
        since_utime: i64,
        /// Pause between polls once caught up.
        interval: Duration,
    },
}

/// Configuration for a validation run.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Rows per target-to-base batch.
    pub batch_size: usize,
    /// Deadline for one row or batch lookup.
    pub lookup_timeout: Duration,
    /// Deadline for publishing one event.
    pub notify_timeout: Duration,
    /// Back-to-back cursor failures before a full pass gives up on a direction,
    /// or an incremental pass backs off for one interval.
    pub max_consecutive_failures: u32,
    /// Full or incremental.
    pub mode: ScanMode,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            notify_timeout: DEFAULT_NOTIFY_TIMEOUT,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            mode: ScanMode::Full,
        }
    }
}

impl ValidatorConfig {
    /// Set the batch size. Zero is raised to one.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Set the lookup deadline.
    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Set the publish deadline.
    pub fn with_notify_timeout(mut self, timeout: Duration) -> Self {
        self.notify_timeout = timeout;
        self
    }

    /// Set the consecutive failure budget. Zero is raised to one.
    pub fn with_max_consecutive_failures(mut self, max: u32) -> Self {
        self.max_consecutive_failures = max.max(1);
        self
    }

    /// Switch to a terminating full pass.
    pub fn full(mut self) -> Self {
        self.mode = ScanMode::Full;
        self
    }

    /// Switch to an incremental tailing pass.
    pub fn incremental(mut self, since_utime: i64, interval: Duration) -> Self {
        self.mode = ScanMode::Incremental {
            since_utime,
            interval,
        };
        self
    }

    /// Watermark filter for scans, if incremental.
    pub fn since_utime(&self) -> Option<i64> {
        match self.mode {
            ScanMode::Full => None,
            ScanMode::Incremental { since_utime, .. } => Some(since_utime),
        }
    }

    /// Sleep interval once caught up, if incremental.
    pub fn interval(&self) -> Option<Duration> {
        match self.mode {
            ScanMode::Full => None,
            ScanMode::Incremental { interval, .. } => Some(interval),
        }
    }
}
