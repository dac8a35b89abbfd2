//! Write patterns and the shared cell that holds the active one.
//!
//! The pattern is read on every storage operation routed through the proxy, so
//! reads are a single atomic load. Writes are operator-triggered phase
//! transitions and are serialized behind a mutex.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// One side of the migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// The old store.
    #[serde(rename = "SRC")]
    Src,
    /// The new store.
    #[serde(rename = "DST")]
    Dst,
}

impl Direction {
    /// Wire name of this side.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Src => "SRC",
            Direction::Dst => "DST",
        }
    }

    /// The other side.
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Src => Direction::Dst,
            Direction::Dst => Direction::Src,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which store(s) receive writes, and which one answers reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum WritePattern {
    /// Only `src` is read and written.
    #[serde(rename = "SRC_ONLY")]
    SrcOnly = 0,
    /// `src` is authoritative, `dst` receives shadow writes.
    #[serde(rename = "SRC_FIRST")]
    SrcFirst = 1,
    /// `dst` is authoritative, `src` receives shadow writes.
    #[serde(rename = "DST_FIRST")]
    DstFirst = 2,
    /// Only `dst` is read and written.
    #[serde(rename = "DST_ONLY")]
    DstOnly = 3,
}

impl WritePattern {
    /// All patterns in migration order.
    pub const ALL: [WritePattern; 4] = [
        WritePattern::SrcOnly,
        WritePattern::SrcFirst,
        WritePattern::DstFirst,
        WritePattern::DstOnly,
    ];

    /// Wire name of this pattern.
    pub fn as_str(&self) -> &'static str {
        match self {
            WritePattern::SrcOnly => "SRC_ONLY",
            WritePattern::SrcFirst => "SRC_FIRST",
            WritePattern::DstFirst => "DST_FIRST",
            WritePattern::DstOnly => "DST_ONLY",
        }
    }

    /// Decode the cell representation.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(WritePattern::SrcOnly),
            1 => Some(WritePattern::SrcFirst),
            2 => Some(WritePattern::DstFirst),
            3 => Some(WritePattern::DstOnly),
            _ => None,
        }
    }

    /// The side whose failures propagate and which serves reads.
    pub fn authoritative(&self) -> Direction {
        match self {
            WritePattern::SrcOnly | WritePattern::SrcFirst => Direction::Src,
            WritePattern::DstFirst | WritePattern::DstOnly => Direction::Dst,
        }
    }

    /// The side that receives best-effort shadow writes, if any.
    pub fn shadow(&self) -> Option<Direction> {
        match self {
            WritePattern::SrcFirst => Some(Direction::Dst),
            WritePattern::DstFirst => Some(Direction::Src),
            WritePattern::SrcOnly | WritePattern::DstOnly => None,
        }
    }

    /// The next phase in the documented order.
    pub fn next(&self) -> Option<WritePattern> {
        match self {
            WritePattern::SrcOnly => Some(WritePattern::SrcFirst),
            WritePattern::SrcFirst => Some(WritePattern::DstFirst),
            WritePattern::DstFirst => Some(WritePattern::DstOnly),
            WritePattern::DstOnly => None,
        }
    }
}

impl fmt::Display for WritePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WritePattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WritePattern::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| PatternError::Unknown(s.to_string()))
    }
}

/// Pattern errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatternError {
    /// Unrecognized pattern name.
    #[error("unknown write pattern: {0}")]
    Unknown(String),

    /// The cell holds a value outside the pattern range.
    #[error("write pattern cell holds invalid value {0}")]
    Corrupt(u8),

    /// Transition rejected by a forward-only policy.
    #[error("illegal pattern transition {from} -> {to}")]
    IllegalTransition {
        /// Active pattern.
        from: WritePattern,
        /// Requested pattern.
        to: WritePattern,
    },
}

/// How the cell treats transitions outside the documented forward order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransitionPolicy {
    /// Any transition is applied; backward ones are logged as warnings.
    #[default]
    OperatorTrusted,
    /// Only staying put or advancing exactly one phase is allowed.
    ForwardOnly,
}

/// Process-wide holder of the active [`WritePattern`].
#[derive(Debug)]
pub struct PatternCell {
    current: AtomicU8,
    writer: Mutex<()>,
    policy: TransitionPolicy,
}

impl PatternCell {
    /// Create a cell at `SRC_ONLY`.
    pub fn new(policy: TransitionPolicy) -> Self {
        Self::with_pattern(WritePattern::SrcOnly, policy)
    }

    /// Create a cell at a given pattern, e.g. when reconstructing after restart.
    pub fn with_pattern(pattern: WritePattern, policy: TransitionPolicy) -> Self {
        Self {
            current: AtomicU8::new(pattern as u8),
            writer: Mutex::new(()),
            policy,
        }
    }

    /// The transition policy.
    pub fn policy(&self) -> TransitionPolicy {
        self.policy
    }

    /// Load the active pattern.
    pub fn load(&self) -> Result<WritePattern, PatternError> {
        let raw = self.current.load(Ordering::Acquire);
        WritePattern::from_u8(raw).ok_or(PatternError::Corrupt(raw))
    }

    /// Switch to `next`, returning the previous pattern.
    pub fn store(&self, next: WritePattern) -> Result<WritePattern, PatternError> {
        let _guard = self.writer.lock();
        let prev = self.load()?;

        let forward = prev == next || prev.next() == Some(next);
        if !forward {
            match self.policy {
                TransitionPolicy::ForwardOnly => {
                    return Err(PatternError::IllegalTransition {
                        from: prev,
                        to: next,
                    });
                }
                TransitionPolicy::OperatorTrusted if next < prev => {
                    warn!(from = %prev, to = %next, "backward write pattern transition");
                }
                TransitionPolicy::OperatorTrusted => {
                    warn!(from = %prev, to = %next, "write pattern transition skips a phase");
                }
            }
        }

        self.current.store(next as u8, Ordering::Release);
        info!(from = %prev, to = %next, "write pattern switched");
        Ok(prev)
    }
}

impl Default for PatternCell {
    fn default() -> Self {
        Self::new(TransitionPolicy::default())
    }
}
