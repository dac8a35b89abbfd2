//! Inconsistency events and their wire format.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pattern::Direction;

/// Default bus topic for inconsistency events.
pub const DEFAULT_TOPIC: &str = "inconsistent_entity";

/// Kind of drift detected for one id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InconsistencyType {
    /// Present in base, absent in target.
    TargetMissing,
    /// Present in target, absent in base.
    BaseMissing,
    /// Present in both with different content.
    Neq,
}

impl InconsistencyType {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            InconsistencyType::TargetMissing => "target_missing",
            InconsistencyType::BaseMissing => "base_missing",
            InconsistencyType::Neq => "neq",
        }
    }
}

impl fmt::Display for InconsistencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InconsistencyType {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "target_missing" => Ok(InconsistencyType::TargetMissing),
            "base_missing" => Ok(InconsistencyType::BaseMissing),
            "neq" => Ok(InconsistencyType::Neq),
            other => Err(EventError::UnknownType(other.to_string())),
        }
    }
}

/// Event errors.
#[derive(Debug, Error)]
pub enum EventError {
    /// Payload is not a valid event document.
    #[error("malformed event: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The `Type` field names no known drift kind.
    #[error("unknown inconsistency type: {0}")]
    UnknownType(String),

    /// The `Direction` field names no known side.
    #[error("unknown direction: {0}")]
    UnknownDirection(String),
}

/// One detected drift between base and target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InconsistentEvent {
    /// Id of the drifted record.
    pub id: i64,
    /// Side that was authoritative for the run that found it.
    pub direction: Direction,
    /// Drift kind.
    pub kind: InconsistencyType,
}

/// On-the-wire shape. Kept stringly typed so that decoding can report unknown
/// values precisely instead of a generic serde failure.
#[derive(Serialize, Deserialize)]
struct WireEvent {
    #[serde(rename = "ID")]
    id: i64,
    #[serde(rename = "Direction")]
    direction: String,
    #[serde(rename = "Type")]
    kind: String,
}

impl InconsistentEvent {
    /// Create an event.
    pub fn new(id: i64, direction: Direction, kind: InconsistencyType) -> Self {
        Self {
            id,
            direction,
            kind,
        }
    }

    /// Encode to the JSON wire format.
    pub fn encode(&self) -> Result<Vec<u8>, EventError> {
        let wire = WireEvent {
            id: self.id,
            direction: self.direction.as_str().to_string(),
            kind: self.kind.as_str().to_string(),
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    /// Decode from the JSON wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, EventError> {
        let wire: WireEvent = serde_json::from_slice(bytes)?;
        let direction = match wire.direction.as_str() {
            "SRC" => Direction::Src,
            "DST" => Direction::Dst,
            other => return Err(EventError::UnknownDirection(other.to_string())),
        };
        Ok(Self {
            id: wire.id,
            direction,
            kind: wire.kind.parse()?,
        })
    }
}
