//! Store-tier segment store: replicated segments, compaction output and the
//! trash used for two-phase deletion.

pub mod store_log;

pub use store_log::StoreLog;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::record::{RecordId, RecordLine};

pub const FRESH_EXT: &str = "fresh";
pub const COMPACTED_EXT: &str = "compacted";
pub const RECEIVING_EXT: &str = "receiving";
pub const COMPACTING_EXT: &str = "compacting";
pub const TRASHED_EXT: &str = "trashed";
pub const TRASH_DIR: &str = "trash";

/// Identifies a store segment by the smallest and largest record id it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreSegmentId {
    pub low: RecordId,
    pub high: RecordId,
}

impl StoreSegmentId {
    pub fn new(low: RecordId, high: RecordId) -> Self {
        StoreSegmentId { low, high }
    }

    pub fn from_records(records: &[RecordLine<'_>]) -> Option<Self> {
        crate::merge::id_range(records).map(|(low, high)| StoreSegmentId { low, high })
    }

    pub fn oldest_ms(&self) -> u64 {
        self.low.timestamp_ms()
    }

    pub fn newest_ms(&self) -> u64 {
        self.high.timestamp_ms()
    }

    /// Whether any record in the segment could fall in `[from_ms, to_ms]`.
    pub fn overlaps(&self, from_ms: u64, to_ms: u64) -> bool {
        self.oldest_ms() <= to_ms && self.newest_ms() >= from_ms
    }
}

impl fmt::Display for StoreSegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.low, self.high)
    }
}

impl FromStr for StoreSegmentId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (low, high) = s
            .split_once('-')
            .ok_or_else(|| format!("store segment id '{s}' is not <low>-<high>"))?;
        let low: RecordId = low.parse().map_err(|e| format!("bad low id: {e}"))?;
        let high: RecordId = high.parse().map_err(|e| format!("bad high id: {e}"))?;
        if low > high {
            return Err(format!("store segment id '{s}' has low > high"));
        }
        Ok(StoreSegmentId { low, high })
    }
}

impl Serialize for StoreSegmentId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for StoreSegmentId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreState {
    /// Received by replication, not yet merged.
    Fresh,
    /// Output of a compaction merge.
    Compacted,
}

impl StoreState {
    pub fn extension(self) -> &'static str {
        match self {
            StoreState::Fresh => FRESH_EXT,
            StoreState::Compacted => COMPACTED_EXT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSegmentInfo {
    pub id: StoreSegmentId,
    pub size: u64,
    pub state: StoreState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrashedSegment {
    pub id: StoreSegmentId,
    pub size: u64,
    pub trashed_at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaAck {
    pub segment_id: StoreSegmentId,
    pub size: u64,
    pub duplicate: bool,
}

/// Filter for a time-range query. Bounds are inclusive and compared against
/// the arrival time encoded in each record id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryParams {
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl QueryParams {
    pub fn from_ms(&self) -> u64 {
        self.from
            .map(|t| t.timestamp_millis().max(0) as u64)
            .unwrap_or(0)
    }

    pub fn to_ms(&self) -> u64 {
        self.to
            .map(|t| t.timestamp_millis().max(0) as u64)
            .unwrap_or(u64::MAX)
    }

    pub fn matches(&self, record: &RecordLine<'_>) -> bool {
        let ts = record.id.timestamp_ms();
        if ts < self.from_ms() || ts > self.to_ms() {
            return false;
        }
        match &self.q {
            Some(needle) if !needle.is_empty() => contains(record.payload(), needle.as_bytes()),
            _ => true,
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}
