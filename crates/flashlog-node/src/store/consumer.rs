//! Store-side consumer: moves flushed ingest segments into the store tier.
//!
//! One attempt gathers leases from the ingest peers, merges their bodies by
//! record id into a single store segment, and replicates it to
//! `replication_factor` distinct store peers. Leases are committed only when
//! every target acknowledged; any failure releases them all so the segments
//! stay retryable as a whole.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use flashlog::merge::merge_bodies;
use flashlog::record::parse_records;
use flashlog::{Lease, NodeStats, Shutdown, StoreSegmentId};
use flashlog_cluster::{MembershipView, Peer, Role};
use futures_util::future::join_all;
use log::{debug, info, warn};
use rand::seq::SliceRandom;

use crate::error::NodeError;
use crate::transport::PeerTransport;

#[derive(Debug, Clone, Copy)]
pub struct ConsumerConfig {
    pub target_size: u64,
    pub target_age: Duration,
    pub replication_factor: usize,
    pub idle_backoff: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConsumeOutcome {
    /// Nothing was claimable.
    Idle,
    Replicated {
        segment_id: StoreSegmentId,
        segments: usize,
        size: u64,
    },
    /// The attempt failed; every lease was released.
    Abandoned { reason: String },
}

struct Claimed {
    ingest: String,
    lease: Lease,
    body: Bytes,
}

pub struct Consumer {
    worker: usize,
    transport: Arc<dyn PeerTransport>,
    membership: Arc<dyn MembershipView>,
    stats: Arc<NodeStats>,
    config: ConsumerConfig,
    cursor: usize,
}

impl Consumer {
    pub fn new(
        worker: usize,
        transport: Arc<dyn PeerTransport>,
        membership: Arc<dyn MembershipView>,
        stats: Arc<NodeStats>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            worker,
            transport,
            membership,
            stats,
            config,
            cursor: worker,
        }
    }

    /// Loop until shutdown, backing off when there is nothing to consume.
    /// An attempt in flight is allowed to finish.
    pub async fn run(mut self, shutdown: Shutdown) -> Result<(), NodeError> {
        info!("Consumer {} started", self.worker);
        while !shutdown.is_cancelled() {
            let outcome = self.consume_once().await;
            let idle = match &outcome {
                ConsumeOutcome::Idle => true,
                ConsumeOutcome::Replicated {
                    segment_id,
                    segments,
                    size,
                } => {
                    info!(
                        "Consumer {} replicated {segment_id} ({segments} ingest segments, {size} bytes)",
                        self.worker
                    );
                    false
                }
                ConsumeOutcome::Abandoned { reason } => {
                    warn!("Consumer {} abandoned attempt: {reason}", self.worker);
                    true
                }
            };
            if idle {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.idle_backoff) => {}
                }
            }
        }
        info!("Consumer {} stopped", self.worker);
        Ok(())
    }

    /// One gather, merge, replicate and commit attempt.
    #[tracing::instrument(level = "debug", skip(self), fields(worker = self.worker))]
    pub async fn consume_once(&mut self) -> ConsumeOutcome {
        let sources = self.membership.peers_by_role(Role::Ingest);
        if sources.is_empty() {
            return ConsumeOutcome::Idle;
        }

        let claimed = self.gather(&sources).await;
        if claimed.is_empty() {
            return ConsumeOutcome::Idle;
        }

        let bodies: Vec<&[u8]> = claimed.iter().map(|c| c.body.as_ref()).collect();
        let merged = match merge_bodies(&bodies) {
            Ok(merged) => merged,
            Err(reason) => {
                self.release_all(&claimed).await;
                return ConsumeOutcome::Abandoned {
                    reason: format!("unreadable ingest segment: {reason}"),
                };
            }
        };
        let segment_id = match parse_records(&merged)
            .ok()
            .and_then(|records| StoreSegmentId::from_records(&records))
        {
            Some(id) => id,
            None => {
                // empty bodies hold nothing to replicate
                self.commit_all(&claimed).await;
                return ConsumeOutcome::Idle;
            }
        };

        let targets = self.choose_targets();
        if targets.len() < self.config.replication_factor {
            self.release_all(&claimed).await;
            return ConsumeOutcome::Abandoned {
                reason: format!(
                    "{} store peers available, replication factor is {}",
                    targets.len(),
                    self.config.replication_factor
                ),
            };
        }

        let size = merged.len() as u64;
        let body = Bytes::from(merged);
        if let Err(e) = self.replicate(segment_id, &body, &targets).await {
            self.release_all(&claimed).await;
            return ConsumeOutcome::Abandoned {
                reason: format!("replication of {segment_id} failed: {e}"),
            };
        }

        self.commit_all(&claimed).await;
        self.stats.segments_consumed(
            claimed.len() as u64,
            claimed.iter().map(|c| c.body.len() as u64).sum(),
        );
        ConsumeOutcome::Replicated {
            segment_id,
            segments: claimed.len(),
            size,
        }
    }

    /// Claim segments round-robin over the ingest peers until the target size
    /// or age is reached or a whole round finds nothing new.
    async fn gather(&mut self, sources: &[Peer]) -> Vec<Claimed> {
        let started = Instant::now();
        let mut claimed = Vec::new();
        let mut total = 0u64;
        let mut exhausted = HashSet::new();
        let start = self.cursor % sources.len();
        self.cursor = self.cursor.wrapping_add(1);

        'rounds: loop {
            let mut progressed = false;
            for step in 0..sources.len() {
                if total >= self.config.target_size || started.elapsed() >= self.config.target_age {
                    break 'rounds;
                }
                let index = (start + step) % sources.len();
                if exhausted.contains(&index) {
                    continue;
                }
                let ingest = &sources[index].api_addr;
                match self.claim_one(ingest).await {
                    Ok(Some(item)) => {
                        total += item.body.len() as u64;
                        claimed.push(item);
                        progressed = true;
                    }
                    Ok(None) => {
                        exhausted.insert(index);
                    }
                    Err(e) => {
                        debug!("Skipping ingest {ingest}: {e}");
                        exhausted.insert(index);
                    }
                }
            }
            if !progressed {
                break;
            }
        }
        claimed
    }

    async fn claim_one(&self, ingest: &str) -> Result<Option<Claimed>, NodeError> {
        let Some(lease) = self.transport.claim_next(ingest).await? else {
            return Ok(None);
        };
        match self.transport.read_lease(ingest, lease.lease_id).await {
            Ok(body) => Ok(Some(Claimed {
                ingest: ingest.to_string(),
                lease,
                body,
            })),
            Err(e) => {
                if let Err(release_err) = self.transport.release(ingest, lease.lease_id).await {
                    debug!("Release of {} on {ingest} failed: {release_err}", lease.lease_id);
                }
                Err(e)
            }
        }
    }

    fn choose_targets(&self) -> Vec<Peer> {
        let mut stores = self.membership.peers_by_role(Role::Store);
        stores.shuffle(&mut rand::thread_rng());
        stores.truncate(self.config.replication_factor);
        stores
    }

    async fn replicate(
        &self,
        segment_id: StoreSegmentId,
        body: &Bytes,
        targets: &[Peer],
    ) -> Result<(), NodeError> {
        let sends = targets.iter().map(|target| {
            self.transport
                .replicate(&target.api_addr, segment_id, body.clone())
        });
        let results = join_all(sends).await;

        let mut first_error = None;
        for (target, result) in targets.iter().zip(results) {
            match result {
                Ok(ack) => {
                    if !ack.duplicate {
                        self.stats.replica_sent(ack.size);
                    }
                }
                Err(e) => {
                    warn!("Replica of {segment_id} to {} failed: {e}", target.api_addr);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn commit_all(&self, claimed: &[Claimed]) {
        for item in claimed {
            match self.transport.commit(&item.ingest, item.lease.lease_id).await {
                Ok(_) => {}
                Err(e) if e.is_lease_expired() => warn!(
                    "Lease on {} expired before commit; the store keeps a duplicate",
                    item.lease.segment_id
                ),
                Err(e) => warn!(
                    "Commit of {} on {} failed: {e}",
                    item.lease.segment_id, item.ingest
                ),
            }
        }
    }

    async fn release_all(&self, claimed: &[Claimed]) {
        for item in claimed {
            if let Err(e) = self.transport.release(&item.ingest, item.lease.lease_id).await {
                debug!(
                    "Release of {} on {} failed, it will expire: {e}",
                    item.lease.segment_id, item.ingest
                );
            }
        }
    }
}
