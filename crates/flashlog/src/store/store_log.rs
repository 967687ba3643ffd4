use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{SegmentError, StorageError};
use crate::file_io::FileIo;
use crate::merge::{merge_bodies, merge_by_key, union_bodies};
use crate::record::{RecordLine, parse_records};
use crate::store::{
    COMPACTING_EXT, QueryParams, RECEIVING_EXT, ReplicaAck, StoreSegmentId, StoreSegmentInfo,
    StoreState, TRASH_DIR, TRASHED_EXT, TrashedSegment,
};

/// File-backed segment store for a store node.
///
/// The directory listing is the source of truth. `gate` is held for writing
/// only around renames and deletes that change which segments are live, so a
/// query never observes both a merge output and its inputs.
pub struct StoreLog {
    root: PathBuf,
    trash: PathBuf,
    gate: RwLock<()>,
}

impl StoreLog {
    #[tracing::instrument(level = "info", skip_all, fields(root = %root.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        let trash = root.join(TRASH_DIR);
        FileIo::ensure_directory_exists(&root)?;
        FileIo::ensure_directory_exists(&trash)?;

        for ext in [RECEIVING_EXT, COMPACTING_EXT] {
            for (stem, path) in FileIo::list_with_extension(&root, ext)? {
                FileIo::remove(&path)?;
                info!("Removed interrupted temporary segment {stem}.{ext}");
            }
        }

        let log = StoreLog {
            root,
            trash,
            gate: RwLock::new(()),
        };
        info!(
            "Opened store with {} live segments in {}",
            log.list_segments()?.len(),
            log.root.display()
        );
        Ok(log)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn live_path(&self, id: StoreSegmentId, state: StoreState) -> PathBuf {
        self.root.join(format!("{id}.{}", state.extension()))
    }

    fn trash_path(&self, id: StoreSegmentId, trashed_at_ms: u64) -> PathBuf {
        self.trash.join(format!("{id}.{trashed_at_ms}.{TRASHED_EXT}"))
    }

    fn temp_path(&self, id: StoreSegmentId, ext: &str) -> PathBuf {
        self.root
            .join(format!("{id}.{}.{ext}", Uuid::new_v4().simple()))
    }

    fn find_live(&self, id: StoreSegmentId) -> Option<(StoreState, PathBuf)> {
        [StoreState::Fresh, StoreState::Compacted]
            .into_iter()
            .map(|state| (state, self.live_path(id, state)))
            .find(|(_, path)| path.is_file())
    }

    fn find_trashed(&self, id: StoreSegmentId) -> Result<Option<TrashedSegment>, StorageError> {
        Ok(self.list_trashed()?.into_iter().find(|t| t.id == id))
    }

    /// Live segments ordered by id.
    pub fn list_segments(&self) -> Result<Vec<StoreSegmentInfo>, StorageError> {
        let mut segments = Vec::new();
        for state in [StoreState::Fresh, StoreState::Compacted] {
            for (stem, path) in FileIo::list_with_extension(&self.root, state.extension())? {
                let Ok(id) = stem.parse::<StoreSegmentId>() else {
                    warn!("Skipping unrecognised file {}", path.display());
                    continue;
                };
                let size = match FileIo::file_size(&path) {
                    Ok(size) => size,
                    // Removed by a concurrent merge between listing and stat.
                    Err(e) if e.is_not_found() => continue,
                    Err(e) => return Err(e),
                };
                segments.push(StoreSegmentInfo { id, size, state });
            }
        }
        segments.sort_by_key(|s| s.id);
        Ok(segments)
    }

    pub fn list_trashed(&self) -> Result<Vec<TrashedSegment>, StorageError> {
        let mut trashed = Vec::new();
        for (stem, path) in FileIo::list_with_extension(&self.trash, TRASHED_EXT)? {
            let parsed = stem.split_once('.').and_then(|(id, ms)| {
                Some((id.parse::<StoreSegmentId>().ok()?, ms.parse::<u64>().ok()?))
            });
            let Some((id, trashed_at_ms)) = parsed else {
                warn!("Skipping unrecognised trash file {}", path.display());
                continue;
            };
            let size = match FileIo::file_size(&path) {
                Ok(size) => size,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            trashed.push(TrashedSegment {
                id,
                size,
                trashed_at_ms,
            });
        }
        trashed.sort_by_key(|t| (t.id, t.trashed_at_ms));
        Ok(trashed)
    }

    /// Durably store a segment received from a consumer.
    ///
    /// Re-delivery of a segment already held (live or trashed) with the same
    /// size is acknowledged as a duplicate without writing anything. A body of
    /// a different size under a held id is a retried read that saw more or
    /// fewer records; the held copy is replaced by the union of both.
    #[tracing::instrument(level = "debug", skip(self, body), fields(segment = %id, size = body.len()))]
    pub fn accept_replica(
        &self,
        id: StoreSegmentId,
        body: &[u8],
    ) -> Result<ReplicaAck, SegmentError> {
        validate_body(id, body)?;
        let size = body.len() as u64;

        if self.held_copy(id)?.is_some_and(|held| held.size == size) {
            return Ok(duplicate_ack(id, size));
        }

        let temp = self.temp_path(id, RECEIVING_EXT);
        FileIo::write_durably(&temp, body)?;

        let _gate = self.gate.write();
        // Another consumer may have delivered the same segment meanwhile.
        match self.held_copy(id)? {
            None => {
                FileIo::rename_durably(&temp, &self.live_path(id, StoreState::Fresh))?;
                debug!("Accepted replica {id} ({size} bytes)");
                Ok(ReplicaAck {
                    segment_id: id,
                    size,
                    duplicate: false,
                })
            }
            Some(held) if held.size == size => {
                FileIo::remove(&temp)?;
                Ok(duplicate_ack(id, size))
            }
            Some(held) => {
                FileIo::remove(&temp)?;
                self.absorb(id, held, body)
            }
        }
    }

    fn held_copy(&self, id: StoreSegmentId) -> Result<Option<HeldCopy>, StorageError> {
        if let Some((state, path)) = self.find_live(id) {
            let size = FileIo::file_size(&path)?;
            return Ok(Some(HeldCopy {
                path,
                size,
                state: Some(state),
            }));
        }
        Ok(self.find_trashed(id)?.map(|trashed| HeldCopy {
            path: self.trash_path(trashed.id, trashed.trashed_at_ms),
            size: trashed.size,
            state: None,
        }))
    }

    /// Replace the held copy of `id` with the union of its records and
    /// `incoming`. Caller holds the gate for writing.
    fn absorb(
        &self,
        id: StoreSegmentId,
        held: HeldCopy,
        incoming: &[u8],
    ) -> Result<ReplicaAck, SegmentError> {
        let held_body = FileIo::read_all(&held.path)?;
        let (union, added) = union_bodies(&held_body, incoming)
            .map_err(|reason| StorageError::corruption(format!("held segment {id}"), reason))?;
        if added == 0 {
            debug!("Replica {id} holds every incoming record, acknowledging duplicate");
            return Ok(duplicate_ack(id, held.size));
        }

        // A trashed copy comes back to life; incoming records were never
        // acknowledged as stored, so they must not be deleted with it.
        let target = self.live_path(id, held.state.unwrap_or(StoreState::Fresh));
        let temp = self.temp_path(id, RECEIVING_EXT);
        FileIo::write_durably(&temp, &union)?;
        FileIo::rename_durably(&temp, &target)?;
        if held.state.is_none() {
            FileIo::remove(&held.path)?;
        }
        info!(
            "Replica {id} re-delivered with {added} new records, held copy now {} bytes",
            union.len()
        );

        Ok(ReplicaAck {
            segment_id: id,
            size: union.len() as u64,
            duplicate: false,
        })
    }

    /// Segment body, looking in the trash when the segment is no longer live.
    pub fn read_segment(&self, id: StoreSegmentId) -> Result<Vec<u8>, SegmentError> {
        let _gate = self.gate.read();
        if let Some((_, path)) = self.find_live(id) {
            return Ok(FileIo::read_all(&path)?);
        }
        if let Some(trashed) = self.find_trashed(id)? {
            return Ok(FileIo::read_all(
                &self.trash_path(trashed.id, trashed.trashed_at_ms),
            )?);
        }
        Err(SegmentError::SegmentNotFound {
            segment_id: id.to_string(),
        })
    }

    /// Move a trashed segment back to the live set.
    #[tracing::instrument(level = "info", skip(self), fields(segment = %id))]
    pub fn restore(&self, id: StoreSegmentId) -> Result<StoreSegmentInfo, SegmentError> {
        let _gate = self.gate.write();
        let trashed = self
            .find_trashed(id)?
            .ok_or_else(|| SegmentError::SegmentNotFound {
                segment_id: id.to_string(),
            })?;
        let from = self.trash_path(trashed.id, trashed.trashed_at_ms);

        if let Some((state, _)) = self.find_live(id) {
            FileIo::remove(&from)?;
            return Ok(StoreSegmentInfo {
                id,
                size: trashed.size,
                state,
            });
        }

        FileIo::rename_durably(&from, &self.live_path(id, StoreState::Compacted))?;
        info!("Restored segment {id} from trash");
        Ok(StoreSegmentInfo {
            id,
            size: trashed.size,
            state: StoreState::Compacted,
        })
    }

    /// Matching record lines (without the trailing newline) from live
    /// segments, ordered by record id with repeated ids collapsed. Payload
    /// bytes are returned as stored.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn query_local(&self, params: &QueryParams) -> Result<Vec<Vec<u8>>, StorageError> {
        let (from_ms, to_ms) = (params.from_ms(), params.to_ms());
        let mut bodies = Vec::new();
        {
            let _gate = self.gate.read();
            for segment in self.list_segments()? {
                if !segment.id.overlaps(from_ms, to_ms) {
                    continue;
                }
                let path = self.live_path(segment.id, segment.state);
                match FileIo::read_all(&path) {
                    Ok(body) => bodies.push((segment.id, body)),
                    Err(e) => warn!("Skipping unreadable segment {}: {e}", segment.id),
                }
            }
        }

        let mut inputs: Vec<Vec<RecordLine<'_>>> = Vec::with_capacity(bodies.len());
        for (id, body) in &bodies {
            match parse_records(body) {
                Ok(records) => inputs.push(records.into_iter().filter(|r| params.matches(r)).collect()),
                Err(reason) => warn!("Skipping corrupt segment {id}: {reason}"),
            }
        }

        let limit = params.limit.unwrap_or(usize::MAX);
        let mut lines = Vec::new();
        let mut last = None;
        for record in merge_by_key(inputs, |r| r.id) {
            if lines.len() >= limit {
                break;
            }
            if last == Some(record.id) {
                continue;
            }
            last = Some(record.id);
            lines.push(record.line.to_vec());
        }
        Ok(lines)
    }

    /// Merge live segments into one compacted segment. Inputs are removed only
    /// after the output is durable. Returns `None` when there was nothing to do.
    #[tracing::instrument(level = "info", skip(self, ids), fields(inputs = ids.len()))]
    pub fn merge_segments(
        &self,
        ids: &[StoreSegmentId],
    ) -> Result<Option<StoreSegmentInfo>, SegmentError> {
        let mut inputs = Vec::with_capacity(ids.len());
        for id in ids {
            match self.find_live(*id) {
                Some((_, path)) => {
                    let body = FileIo::read_all(&path)?;
                    inputs.push((path, body));
                }
                None => {
                    debug!("Segment {id} vanished before merge, skipping group");
                    return Ok(None);
                }
            }
        }
        if inputs.len() < 2 {
            return Ok(None);
        }

        let bodies: Vec<&[u8]> = inputs.iter().map(|(_, body)| body.as_slice()).collect();
        let merged = merge_bodies(&bodies).map_err(|reason| {
            StorageError::corruption(format!("merge of {} segments", ids.len()), reason)
        })?;
        let records = parse_records(&merged)
            .map_err(|reason| StorageError::corruption("merge output", reason))?;
        let Some(output_id) = StoreSegmentId::from_records(&records) else {
            return Ok(None);
        };
        drop(records);

        let output = self.live_path(output_id, StoreState::Compacted);
        let input_paths: Vec<&PathBuf> = inputs.iter().map(|(path, _)| path).collect();
        let temp = self.temp_path(output_id, COMPACTING_EXT);
        FileIo::write_durably(&temp, &merged)?;

        let _gate = self.gate.write();
        // An input absorbed a re-delivery or was trashed since it was read.
        let inputs_changed = inputs.iter().any(|(path, body)| {
            FileIo::file_size(path).map_or(true, |size| size != body.len() as u64)
        });
        if inputs_changed {
            debug!("Merge inputs changed while merging, skipping group");
            FileIo::remove(&temp)?;
            return Ok(None);
        }
        let clobbers_other = self
            .find_live(output_id)
            .is_some_and(|(_, path)| !input_paths.contains(&&path));
        if clobbers_other {
            warn!("Merge output {output_id} collides with a live segment, skipping");
            FileIo::remove(&temp)?;
            return Ok(None);
        }

        FileIo::rename_durably(&temp, &output)?;
        for path in input_paths {
            if *path != output {
                FileIo::remove(path)?;
            }
        }
        FileIo::sync_directory(&self.root)?;

        Ok(Some(StoreSegmentInfo {
            id: output_id,
            size: merged.len() as u64,
            state: StoreState::Compacted,
        }))
    }

    /// First phase of deletion: move a live segment into the trash.
    #[tracing::instrument(level = "debug", skip(self), fields(segment = %id))]
    pub fn trash_segment(
        &self,
        id: StoreSegmentId,
        now_ms: u64,
    ) -> Result<TrashedSegment, SegmentError> {
        let _gate = self.gate.write();
        let (_, path) = self
            .find_live(id)
            .ok_or_else(|| SegmentError::SegmentNotFound {
                segment_id: id.to_string(),
            })?;
        let size = FileIo::file_size(&path)?;
        FileIo::rename_durably(&path, &self.trash_path(id, now_ms))?;
        Ok(TrashedSegment {
            id,
            size,
            trashed_at_ms: now_ms,
        })
    }

    /// Second phase of deletion.
    pub fn purge_segment(&self, trashed: &TrashedSegment) -> Result<(), SegmentError> {
        let _gate = self.gate.write();
        let path = self.trash_path(trashed.id, trashed.trashed_at_ms);
        match FileIo::remove(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

struct HeldCopy {
    path: PathBuf,
    size: u64,
    /// `None` when the copy is in the trash.
    state: Option<StoreState>,
}

fn duplicate_ack(id: StoreSegmentId, size: u64) -> ReplicaAck {
    debug!("Replica {id} already held, acknowledging duplicate");
    ReplicaAck {
        segment_id: id,
        size,
        duplicate: true,
    }
}

/// Every line must be a record, records must be in id order, and the id must
/// match the body.
fn validate_body(id: StoreSegmentId, body: &[u8]) -> Result<(), SegmentError> {
    let records =
        parse_records(body).map_err(|reason| SegmentError::invalid_segment(id, reason))?;
    if records.windows(2).any(|pair| pair[0].id > pair[1].id) {
        return Err(SegmentError::invalid_segment(
            id,
            "records are not ordered by id",
        ));
    }
    match StoreSegmentId::from_records(&records) {
        Some(actual) if actual == id => Ok(()),
        Some(actual) => Err(SegmentError::invalid_segment(
            id,
            format!("body spans {actual}"),
        )),
        None => Err(SegmentError::invalid_segment(id, "segment is empty")),
    }
}
