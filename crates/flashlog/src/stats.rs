use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Process-wide counters shared by every unit of a node.
#[derive(Debug, Default)]
pub struct NodeStats {
    connected_clients: AtomicU64,
    written_bytes: AtomicU64,
    written_records: AtomicU64,
    flushed_segments: AtomicU64,
    flushed_bytes: AtomicU64,
    failed_segments: AtomicU64,
    committed_segments: AtomicU64,
    committed_bytes: AtomicU64,
    consumed_segments: AtomicU64,
    consumed_bytes: AtomicU64,
    replicated_segments_ingress: AtomicU64,
    replicated_bytes_ingress: AtomicU64,
    replicated_segments_egress: AtomicU64,
    replicated_bytes_egress: AtomicU64,
    compactions: AtomicU64,
    trashed_segments: AtomicU64,
    purged_segments: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub connected_clients: u64,
    pub written_bytes: u64,
    pub written_records: u64,
    pub flushed_segments: u64,
    pub flushed_bytes: u64,
    pub failed_segments: u64,
    pub committed_segments: u64,
    pub committed_bytes: u64,
    pub consumed_segments: u64,
    pub consumed_bytes: u64,
    pub replicated_segments_ingress: u64,
    pub replicated_bytes_ingress: u64,
    pub replicated_segments_egress: u64,
    pub replicated_bytes_egress: u64,
    pub compactions: u64,
    pub trashed_segments: u64,
    pub purged_segments: u64,
}

fn add(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

impl NodeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client_connected(&self) {
        add(&self.connected_clients, 1);
    }

    pub fn client_disconnected(&self) {
        let _ = self
            .connected_clients
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn record_written(&self, bytes: u64) {
        add(&self.written_records, 1);
        add(&self.written_bytes, bytes);
    }

    pub fn segment_flushed(&self, bytes: u64) {
        add(&self.flushed_segments, 1);
        add(&self.flushed_bytes, bytes);
    }

    pub fn segments_failed(&self, count: u64) {
        add(&self.failed_segments, count);
    }

    pub fn segment_committed(&self, bytes: u64) {
        add(&self.committed_segments, 1);
        add(&self.committed_bytes, bytes);
    }

    pub fn segments_consumed(&self, count: u64, bytes: u64) {
        add(&self.consumed_segments, count);
        add(&self.consumed_bytes, bytes);
    }

    pub fn replica_received(&self, bytes: u64) {
        add(&self.replicated_segments_ingress, 1);
        add(&self.replicated_bytes_ingress, bytes);
    }

    pub fn replica_sent(&self, bytes: u64) {
        add(&self.replicated_segments_egress, 1);
        add(&self.replicated_bytes_egress, bytes);
    }

    pub fn compacted(&self, merges: u64, trashed: u64, purged: u64) {
        add(&self.compactions, merges);
        add(&self.trashed_segments, trashed);
        add(&self.purged_segments, purged);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            connected_clients: get(&self.connected_clients),
            written_bytes: get(&self.written_bytes),
            written_records: get(&self.written_records),
            flushed_segments: get(&self.flushed_segments),
            flushed_bytes: get(&self.flushed_bytes),
            failed_segments: get(&self.failed_segments),
            committed_segments: get(&self.committed_segments),
            committed_bytes: get(&self.committed_bytes),
            consumed_segments: get(&self.consumed_segments),
            consumed_bytes: get(&self.consumed_bytes),
            replicated_segments_ingress: get(&self.replicated_segments_ingress),
            replicated_bytes_ingress: get(&self.replicated_bytes_ingress),
            replicated_segments_egress: get(&self.replicated_segments_egress),
            replicated_bytes_egress: get(&self.replicated_bytes_egress),
            compactions: get(&self.compactions),
            trashed_segments: get(&self.trashed_segments),
            purged_segments: get(&self.purged_segments),
        }
    }
}
