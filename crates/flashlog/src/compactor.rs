//! Background maintenance of a store node: merge small segments, move expired
//! segments to the trash, and purge the trash.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;

use crate::error::SegmentError;
use crate::group::Shutdown;
use crate::record::now_ms;
use crate::stats::NodeStats;
use crate::store::{StoreLog, StoreSegmentId, StoreSegmentInfo};

#[derive(Debug, Clone)]
pub struct CompactorConfig {
    pub segment_target_size: u64,
    pub segment_retain: Duration,
    pub segment_purge: Duration,
    pub compact_interval: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompactionReport {
    pub merged_inputs: usize,
    pub merged_outputs: Vec<StoreSegmentId>,
    pub trashed: Vec<StoreSegmentId>,
    pub purged: usize,
}

impl CompactionReport {
    pub fn is_empty(&self) -> bool {
        self.merged_outputs.is_empty() && self.trashed.is_empty() && self.purged == 0
    }
}

pub struct Compactor {
    store: Arc<StoreLog>,
    config: CompactorConfig,
    stats: Arc<NodeStats>,
}

impl Compactor {
    pub fn new(store: Arc<StoreLog>, config: CompactorConfig, stats: Arc<NodeStats>) -> Self {
        Compactor {
            store,
            config,
            stats,
        }
    }

    /// One full maintenance pass evaluated at wall-clock time `now_ms`.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn compact_at(&self, now_ms: u64) -> Result<CompactionReport, SegmentError> {
        let mut report = CompactionReport::default();

        let segments = self.store.list_segments()?;
        for group in plan_merges(&segments, self.config.segment_target_size) {
            if let Some(output) = self.store.merge_segments(&group)? {
                report.merged_inputs += group.len();
                report.merged_outputs.push(output.id);
            }
        }

        let retain_before = now_ms.saturating_sub(millis(self.config.segment_retain));
        for segment in self.store.list_segments()? {
            if segment.id.newest_ms() < retain_before {
                self.store.trash_segment(segment.id, now_ms)?;
                report.trashed.push(segment.id);
            }
        }

        let purge_before = now_ms.saturating_sub(millis(self.config.segment_purge));
        for trashed in self.store.list_trashed()? {
            if trashed.trashed_at_ms < purge_before {
                self.store.purge_segment(&trashed)?;
                report.purged += 1;
            }
        }

        self.stats.compacted(
            report.merged_outputs.len() as u64,
            report.trashed.len() as u64,
            report.purged as u64,
        );
        Ok(report)
    }

    pub async fn run(self: Arc<Self>, shutdown: Shutdown) -> Result<(), SegmentError> {
        let mut ticker = tokio::time::interval(self.config.compact_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            "Compactor running every {:?}",
            self.config.compact_interval
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let compactor = Arc::clone(&self);
            let pass = tokio::task::spawn_blocking(move || compactor.compact_at(now_ms())).await;
            match pass {
                Ok(Ok(report)) if report.is_empty() => debug!("Compaction pass found nothing to do"),
                Ok(Ok(report)) => info!(
                    "Compaction merged {} segments into {}, trashed {}, purged {}",
                    report.merged_inputs,
                    report.merged_outputs.len(),
                    report.trashed.len(),
                    report.purged
                ),
                Ok(Err(e)) => warn!("Compaction pass failed, retrying next tick: {e}"),
                Err(e) => warn!("Compaction pass panicked: {e}"),
            }
        }
        info!("Compactor stopped");
        Ok(())
    }
}

/// Walk segments in id order and group runs of consecutive segments whose
/// combined size stays within `target`. Groups of one are left alone.
pub fn plan_merges(segments: &[StoreSegmentInfo], target: u64) -> Vec<Vec<StoreSegmentId>> {
    let mut groups = Vec::new();
    let mut current: Vec<StoreSegmentId> = Vec::new();
    let mut size = 0u64;

    for segment in segments {
        if !current.is_empty() && size + segment.size > target {
            if current.len() >= 2 {
                groups.push(std::mem::take(&mut current));
            }
            current.clear();
            size = 0;
        }
        current.push(segment.id);
        size += segment.size;
    }
    if current.len() >= 2 {
        groups.push(current);
    }
    groups
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
