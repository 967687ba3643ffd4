use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{SegmentError, StorageError};
use crate::file_io::FileIo;
use crate::stats::NodeStats;
use crate::ingest::{
    ACTIVE_EXT, ActiveSegment, FLUSHED_EXT, IngestState, Lease, LeaseId, PENDING_EXT, SegmentId,
    SegmentInfo, SyncMode,
};

const LEASE_RECORD_RETENTION: Duration = Duration::from_secs(60);

struct SegmentSlot {
    state: IngestState,
    size: u64,
    lease: Option<HeldLease>,
}

#[derive(Clone, Copy)]
struct HeldLease {
    id: LeaseId,
    expires: Instant,
}

/// Where a lease points. Kept after the lease lapses so that a late commit
/// reports `LeaseExpired` rather than `LeaseNotFound`.
#[derive(Clone, Copy)]
struct LeaseRecord {
    segment_id: SegmentId,
    expires: Instant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestCounts {
    pub writing: usize,
    pub flushed: usize,
    pub pending: usize,
}

/// File-backed segment store for an ingest node.
///
/// Each segment has its own lock; the maps themselves are only touched to
/// look up or remove an entry, never while a segment lock is being acquired.
pub struct IngestLog {
    root: PathBuf,
    pending_timeout: Duration,
    sync_mode: SyncMode,
    segments: DashMap<SegmentId, Arc<Mutex<SegmentSlot>>>,
    leases: DashMap<LeaseId, LeaseRecord>,
    /// Counts every segment failed back to flushed, however the lease ended.
    stats: Arc<NodeStats>,
}

impl IngestLog {
    #[tracing::instrument(level = "info", skip_all, fields(root = %root.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(
        root: P,
        pending_timeout: Duration,
        sync_mode: SyncMode,
    ) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        FileIo::ensure_directory_exists(&root)?;

        let log = IngestLog {
            root,
            pending_timeout,
            sync_mode,
            segments: DashMap::new(),
            leases: DashMap::new(),
            stats: Arc::new(NodeStats::new()),
        };
        log.recover()?;
        Ok(log)
    }

    /// Report segment failures into the node's shared counters.
    pub fn with_stats(mut self, stats: Arc<NodeStats>) -> Self {
        self.stats = stats;
        self
    }

    fn recover(&self) -> Result<(), StorageError> {
        for (stem, path) in FileIo::list_with_extension(&self.root, PENDING_EXT)? {
            FileIo::rename_durably(&path, &path.with_extension(FLUSHED_EXT))?;
            info!("Reverted unfinished lease on segment {stem}");
        }

        for (stem, path) in FileIo::list_with_extension(&self.root, ACTIVE_EXT)? {
            self.recover_active(&stem, &path)?;
        }

        let mut recovered = 0;
        for (stem, path) in FileIo::list_with_extension(&self.root, FLUSHED_EXT)? {
            let Ok(id) = stem.parse::<SegmentId>() else {
                warn!("Skipping unrecognised file {}", path.display());
                continue;
            };
            let size = FileIo::file_size(&path)?;
            self.insert_slot(id, IngestState::Flushed, size);
            recovered += 1;
        }

        info!(
            "Recovered {recovered} flushed segments in {}",
            self.root.display()
        );
        Ok(())
    }

    /// Cut an interrupted segment back to its last complete record.
    fn recover_active(&self, stem: &str, path: &Path) -> Result<(), StorageError> {
        let body = FileIo::read_all(path)?;
        let complete = body
            .iter()
            .rposition(|b| *b == b'\n')
            .map(|pos| pos + 1)
            .unwrap_or(0);

        if complete == 0 {
            FileIo::remove(path)?;
            debug!("Removed empty active segment {stem}");
            return Ok(());
        }
        if complete < body.len() {
            warn!(
                "Active segment {stem} ends with a partial record, dropping {} bytes",
                body.len() - complete
            );
            FileIo::truncate(path, complete as u64)?;
        }
        FileIo::rename_durably(path, &path.with_extension(FLUSHED_EXT))
    }

    fn insert_slot(&self, id: SegmentId, state: IngestState, size: u64) {
        self.segments.insert(
            id,
            Arc::new(Mutex::new(SegmentSlot {
                state,
                size,
                lease: None,
            })),
        );
    }

    fn slot(&self, id: &SegmentId) -> Option<Arc<Mutex<SegmentSlot>>> {
        self.segments.get(id).map(|entry| Arc::clone(entry.value()))
    }

    fn snapshot(&self) -> Vec<(SegmentId, Arc<Mutex<SegmentSlot>>)> {
        let mut slots: Vec<_> = self
            .segments
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        slots.sort_by_key(|(id, _)| *id);
        slots
    }

    fn path_for(&self, id: SegmentId, ext: &str) -> PathBuf {
        self.root.join(format!("{id}.{ext}"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pending_timeout(&self) -> Duration {
        self.pending_timeout
    }

    pub fn create_segment(&self) -> Result<ActiveSegment, StorageError> {
        let id = SegmentId::new();
        let segment = ActiveSegment::create(id, self.path_for(id, ACTIVE_EXT), self.sync_mode)?;
        self.insert_slot(id, IngestState::Writing, 0);
        debug!("Opened segment {id}");
        Ok(segment)
    }

    /// Close the active segment and make it claimable. An empty segment is
    /// discarded and `None` is returned.
    #[tracing::instrument(level = "debug", skip(self, active), fields(segment = %active.id(), size = active.size()))]
    pub fn flush_segment(&self, active: ActiveSegment) -> Result<Option<SegmentInfo>, SegmentError> {
        let id = active.id();
        let slot = self.slot(&id).ok_or_else(|| SegmentError::SegmentNotFound {
            segment_id: id.to_string(),
        })?;
        let mut slot = slot.lock();
        transition(id, &mut slot, IngestState::Flushed)?;

        if active.is_empty() {
            drop(active);
            self.segments.remove(&id);
            FileIo::remove(&self.path_for(id, ACTIVE_EXT))?;
            return Ok(None);
        }

        active.sync()?;
        let size = active.size();
        let path = active.path().to_path_buf();
        drop(active);
        if let Err(e) = FileIo::rename_durably(&path, &self.path_for(id, FLUSHED_EXT)) {
            slot.state = IngestState::Writing;
            return Err(e.into());
        }
        slot.size = size;

        Ok(Some(SegmentInfo {
            id,
            size,
            created_at: id.created_at(),
            state: IngestState::Flushed,
        }))
    }

    /// Flushed segments, oldest first. Expired leases are failed on the way.
    pub fn list_flushed(&self) -> Result<Vec<SegmentInfo>, SegmentError> {
        let now = Instant::now();
        let mut flushed = Vec::new();
        for (id, slot) in self.snapshot() {
            let mut slot = slot.lock();
            self.fail_if_expired(id, &mut slot, now)?;
            if slot.state == IngestState::Flushed {
                flushed.push(SegmentInfo {
                    id,
                    size: slot.size,
                    created_at: id.created_at(),
                    state: slot.state,
                });
            }
        }
        Ok(flushed)
    }

    pub fn counts(&self) -> IngestCounts {
        let mut counts = IngestCounts::default();
        for (_, slot) in self.snapshot() {
            match slot.lock().state {
                IngestState::Writing => counts.writing += 1,
                IngestState::Flushed | IngestState::Failed => counts.flushed += 1,
                IngestState::Pending => counts.pending += 1,
                IngestState::Committed => {}
            }
        }
        counts
    }

    #[tracing::instrument(level = "debug", skip(self), fields(segment = %id))]
    pub fn claim(&self, id: SegmentId) -> Result<Lease, SegmentError> {
        let slot = self.slot(&id).ok_or_else(|| SegmentError::SegmentNotFound {
            segment_id: id.to_string(),
        })?;
        let mut slot = slot.lock();
        let now = Instant::now();
        self.fail_if_expired(id, &mut slot, now)?;

        match slot.state {
            IngestState::Flushed => {}
            IngestState::Pending => {
                return Err(SegmentError::AlreadyClaimed {
                    segment_id: id.to_string(),
                });
            }
            IngestState::Committed => {
                return Err(SegmentError::SegmentNotFound {
                    segment_id: id.to_string(),
                });
            }
            from @ (IngestState::Writing | IngestState::Failed) => {
                return Err(SegmentError::InvalidTransition {
                    segment_id: id.to_string(),
                    from,
                    to: IngestState::Pending,
                });
            }
        }

        FileIo::rename_durably(
            &self.path_for(id, FLUSHED_EXT),
            &self.path_for(id, PENDING_EXT),
        )?;
        slot.state = IngestState::Pending;

        let lease_id = LeaseId::new();
        let expires = now + self.pending_timeout;
        slot.lease = Some(HeldLease {
            id: lease_id,
            expires,
        });
        self.leases.insert(
            lease_id,
            LeaseRecord {
                segment_id: id,
                expires,
            },
        );

        Ok(Lease {
            lease_id,
            segment_id: id,
            size: slot.size,
            expires_at: wall_clock_after(self.pending_timeout),
        })
    }

    /// Claim the oldest claimable segment, if any.
    pub fn claim_next(&self) -> Result<Option<Lease>, SegmentError> {
        for info in self.list_flushed()? {
            match self.claim(info.id) {
                Ok(lease) => return Ok(Some(lease)),
                Err(e) if e.is_client_error() => {
                    debug!("Segment {} no longer claimable: {e}", info.id);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    pub fn read(&self, lease_id: LeaseId) -> Result<Vec<u8>, SegmentError> {
        let (segment_id, slot) = self.leased_slot(lease_id)?;
        let mut slot = slot.lock();
        self.check_lease(lease_id, segment_id, &mut slot, Instant::now())?;
        Ok(FileIo::read_all(&self.path_for(segment_id, PENDING_EXT))?)
    }

    #[tracing::instrument(level = "debug", skip(self), fields(lease = %lease_id))]
    pub fn commit(&self, lease_id: LeaseId) -> Result<SegmentInfo, SegmentError> {
        let (segment_id, slot) = self.leased_slot(lease_id)?;
        let mut slot = slot.lock();
        self.check_lease(lease_id, segment_id, &mut slot, Instant::now())?;
        transition(segment_id, &mut slot, IngestState::Committed)?;

        if let Err(e) = FileIo::remove(&self.path_for(segment_id, PENDING_EXT)) {
            slot.state = IngestState::Pending;
            return Err(e.into());
        }
        slot.lease = None;
        self.segments.remove(&segment_id);
        self.leases.remove(&lease_id);

        Ok(SegmentInfo {
            id: segment_id,
            size: slot.size,
            created_at: segment_id.created_at(),
            state: IngestState::Committed,
        })
    }

    /// Give the segment back so another consumer can claim it.
    #[tracing::instrument(level = "debug", skip(self), fields(lease = %lease_id))]
    pub fn release(&self, lease_id: LeaseId) -> Result<(), SegmentError> {
        let (segment_id, slot) = self.leased_slot(lease_id)?;
        let mut slot = slot.lock();
        self.check_lease(lease_id, segment_id, &mut slot, Instant::now())?;
        self.fail_locked(segment_id, &mut slot)?;
        self.leases.remove(&lease_id);
        Ok(())
    }

    /// Fail every pending segment whose lease has lapsed and forget lease
    /// records old enough that nobody should still be holding them.
    pub fn fail_expired(&self) -> Result<Vec<SegmentId>, SegmentError> {
        let now = Instant::now();
        let mut failed = Vec::new();
        for (id, slot) in self.snapshot() {
            let mut slot = slot.lock();
            if self.fail_if_expired(id, &mut slot, now)? {
                failed.push(id);
            }
        }

        let grace = self.pending_timeout.max(LEASE_RECORD_RETENTION);
        self.leases.retain(|_, record| record.expires + grace > now);
        Ok(failed)
    }

    fn leased_slot(
        &self,
        lease_id: LeaseId,
    ) -> Result<(SegmentId, Arc<Mutex<SegmentSlot>>), SegmentError> {
        let record = self
            .leases
            .get(&lease_id)
            .map(|entry| *entry.value())
            .ok_or_else(|| SegmentError::LeaseNotFound {
                lease_id: lease_id.to_string(),
            })?;
        let expired = || SegmentError::LeaseExpired {
            lease_id: lease_id.to_string(),
            segment_id: record.segment_id.to_string(),
        };
        let slot = self.slot(&record.segment_id).ok_or_else(expired)?;
        Ok((record.segment_id, slot))
    }

    /// The lease must still be the one held on the segment and must not have
    /// lapsed. A lapsed lease fails the segment before returning.
    fn check_lease(
        &self,
        lease_id: LeaseId,
        segment_id: SegmentId,
        slot: &mut SegmentSlot,
        now: Instant,
    ) -> Result<(), SegmentError> {
        let expired = SegmentError::LeaseExpired {
            lease_id: lease_id.to_string(),
            segment_id: segment_id.to_string(),
        };
        match slot.lease {
            Some(held) if held.id == lease_id && slot.state == IngestState::Pending => {
                if now >= held.expires {
                    self.fail_locked(segment_id, slot)?;
                    return Err(expired);
                }
                Ok(())
            }
            _ => Err(expired),
        }
    }

    fn fail_if_expired(
        &self,
        id: SegmentId,
        slot: &mut SegmentSlot,
        now: Instant,
    ) -> Result<bool, SegmentError> {
        match slot.lease {
            Some(held) if slot.state == IngestState::Pending && now >= held.expires => {
                warn!("Lease {} on segment {id} expired", held.id);
                self.fail_locked(id, slot)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// `Pending -> Failed -> Flushed`.
    fn fail_locked(&self, id: SegmentId, slot: &mut SegmentSlot) -> Result<(), SegmentError> {
        transition(id, slot, IngestState::Failed)?;
        if let Err(e) = FileIo::rename_durably(
            &self.path_for(id, PENDING_EXT),
            &self.path_for(id, FLUSHED_EXT),
        ) {
            slot.state = IngestState::Pending;
            return Err(e.into());
        }
        slot.lease = None;
        transition(id, slot, IngestState::Flushed)?;
        self.stats.segments_failed(1);
        Ok(())
    }
}

fn transition(id: SegmentId, slot: &mut SegmentSlot, to: IngestState) -> Result<(), SegmentError> {
    if !slot.state.can_transition_to(to) {
        return Err(SegmentError::InvalidTransition {
            segment_id: id.to_string(),
            from: slot.state,
            to,
        });
    }
    slot.state = to;
    Ok(())
}

fn wall_clock_after(timeout: Duration) -> DateTime<Utc> {
    let now = Utc::now();
    TimeDelta::from_std(timeout)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(now)
}
