//! Ingest-tier segment store.
//!
//! Segments move `Writing -> Flushed -> Pending -> Committed`, with
//! `Pending -> Failed -> Flushed` when a lease is released or expires.

pub mod ingest_log;
pub mod segment;

pub use ingest_log::IngestLog;
pub use segment::ActiveSegment;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::record::uuid_timestamp_ms;

pub const ACTIVE_EXT: &str = "active";
pub const FLUSHED_EXT: &str = "flushed";
pub const PENDING_EXT: &str = "pending";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegmentId(Uuid);

impl SegmentId {
    pub fn new() -> Self {
        SegmentId(Uuid::now_v7())
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        let ms = uuid_timestamp_ms(&self.0) as i64;
        Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
    }
}

impl Default for SegmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for SegmentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::try_parse(s).map(SegmentId)
    }
}

/// Opaque claim token, unique per claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseId(Uuid);

impl LeaseId {
    pub fn new() -> Self {
        LeaseId(Uuid::new_v4())
    }
}

impl Default for LeaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for LeaseId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::try_parse(s).map(LeaseId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestState {
    Writing,
    Flushed,
    Pending,
    Committed,
    Failed,
}

impl IngestState {
    pub fn can_transition_to(self, next: IngestState) -> bool {
        use IngestState::*;
        matches!(
            (self, next),
            (Writing, Flushed)
                | (Flushed, Pending)
                | (Pending, Committed)
                | (Pending, Failed)
                | (Failed, Flushed)
        )
    }
}

impl fmt::Display for IngestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngestState::Writing => "writing",
            IngestState::Flushed => "flushed",
            IngestState::Pending => "pending",
            IngestState::Committed => "committed",
            IngestState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Durability policy for the active segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// fsync only when the segment is flushed.
    #[default]
    OnFlush,
    /// fsync after every appended record.
    Immediate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub id: SegmentId,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub state: IngestState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub lease_id: LeaseId,
    pub segment_id: SegmentId,
    pub size: u64,
    pub expires_at: DateTime<Utc>,
}
