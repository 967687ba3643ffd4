use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::StorageError;
use crate::file_io::FileIo;
use crate::ingest::{SegmentId, SyncMode};
use crate::record::{RecordId, encode_record};

/// The segment currently accepting records for one producer connection.
///
/// Only complete records are ever written, so the file always ends on a record
/// boundary unless the process dies in the middle of a `write`.
pub struct ActiveSegment {
    id: SegmentId,
    path: PathBuf,
    file: File,
    size: u64,
    records: u64,
    opened_at: Instant,
    sync_mode: SyncMode,
    buf: Vec<u8>,
}

impl ActiveSegment {
    pub(crate) fn create(
        id: SegmentId,
        path: PathBuf,
        sync_mode: SyncMode,
    ) -> Result<Self, StorageError> {
        let file = FileIo::create_new_for_append(&path)?;
        Ok(Self {
            id,
            path,
            file,
            size: 0,
            records: 0,
            opened_at: Instant::now(),
            sync_mode,
            buf: Vec::with_capacity(4096),
        })
    }

    /// Append a single record with the given id and payload. The payload must
    /// not contain a newline.
    #[tracing::instrument(level = "trace", skip(self, payload), fields(segment = %self.id, len = payload.len()))]
    pub fn append(&mut self, id: RecordId, payload: &[u8]) -> Result<u64, StorageError> {
        self.buf.clear();
        encode_record(&mut self.buf, id, payload);
        FileIo::append(&mut self.file, &self.buf)?;
        if self.sync_mode == SyncMode::Immediate {
            FileIo::synchronize_to_disk(&self.file)?;
        }
        let written = self.buf.len() as u64;
        self.size += written;
        self.records += 1;
        Ok(written)
    }

    pub fn sync(&self) -> Result<(), StorageError> {
        FileIo::synchronize_to_disk(&self.file)
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn record_count(&self) -> u64 {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }
}
