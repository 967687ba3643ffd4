use std::sync::Arc;
use std::time::Duration;

use flashlog::record::encode_record;
use flashlog::{IngestLog, RecordId, StoreLog, StoreSegmentId, SyncMode};
use uuid::Uuid;

/// Generate a unique test ID for isolating test data
pub fn generate_test_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Create a temporary directory for testing using tempdir()
pub fn create_test_dir(prefix: &str) -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix(&format!("flashlog_{prefix}_"))
        .tempdir()
        .expect("Failed to create temporary directory")
}

pub fn open_ingest(dir: &tempfile::TempDir, pending_timeout: Duration) -> IngestLog {
    IngestLog::open(dir.path(), pending_timeout, SyncMode::Immediate)
        .expect("Failed to open ingest log")
}

pub fn open_store(dir: &tempfile::TempDir) -> Arc<StoreLog> {
    Arc::new(StoreLog::open(dir.path()).expect("Failed to open store log"))
}

/// Build a segment body from `(timestamp_ms, payload)` pairs, in the order given.
pub fn segment_body(records: &[(u64, &str)]) -> (StoreSegmentId, Vec<u8>) {
    let mut body = Vec::new();
    let mut ids = Vec::new();
    for (i, (ms, payload)) in records.iter().enumerate() {
        let id = RecordId::from_parts(*ms, i as u16);
        encode_record(&mut body, id, payload.as_bytes());
        ids.push(id);
    }
    let low = *ids.iter().min().expect("segment needs at least one record");
    let high = *ids.iter().max().expect("segment needs at least one record");
    (StoreSegmentId::new(low, high), body)
}

pub fn payloads(lines: &[Vec<u8>]) -> Vec<String> {
    lines
        .iter()
        .map(|line| String::from_utf8_lossy(&line[33..]).into_owned())
        .collect()
}

// TempDir automatically cleans up on drop, no manual cleanup needed
