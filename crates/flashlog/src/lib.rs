//! Core of the flashlog log-aggregation system: record ids and line format,
//! the ingest and store segment stores, merging and compaction, and the
//! process plumbing shared by every node.

pub mod compactor;
pub mod config;
pub mod error;
pub mod file_io;
pub mod group;
pub mod ingest;
pub mod merge;
pub mod record;
pub mod stats;
pub mod store;
pub mod telemetry;

pub use compactor::{CompactionReport, Compactor, CompactorConfig};
pub use config::{GossipConfig, IngestConfig, StoreConfig};
pub use error::{ConfigError, SegmentError, StorageError};
pub use group::{Group, Shutdown, ShutdownTrigger};
pub use ingest::{
    ActiveSegment, IngestLog, IngestState, Lease, LeaseId, SegmentId, SegmentInfo, SyncMode,
};
pub use record::{RecordId, RecordIdGenerator, RecordLine};
pub use stats::{NodeStats, StatsSnapshot};
pub use store::{
    QueryParams, ReplicaAck, StoreLog, StoreSegmentId, StoreSegmentInfo, StoreState,
    TrashedSegment,
};

// Re-export logging macros for consistent usage across the crate
pub use log::{debug, error, info, trace, warn};
