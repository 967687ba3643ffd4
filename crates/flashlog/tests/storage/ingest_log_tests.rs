use super::test_utilities::*;
use test_log::test;
use flashlog::file_io::FileIo;
use flashlog::{IngestLog, IngestState, RecordIdGenerator, SegmentError, SegmentId, SyncMode};
use std::sync::Arc;
use std::time::Duration;

fn write_segment(log: &IngestLog, generator: &RecordIdGenerator, lines: &[&str]) -> SegmentId {
    let mut active = log.create_segment().unwrap();
    for line in lines {
        active.append(generator.next_id(), line.as_bytes()).unwrap();
    }
    log.flush_segment(active).unwrap().unwrap().id
}

#[test]
fn test_concurrent_claims_have_a_single_winner() {
    let dir = create_test_dir("ingest_race");
    let log = Arc::new(open_ingest(&dir, Duration::from_secs(60)));
    let generator = RecordIdGenerator::new();
    let id = write_segment(&log, &generator, &["a", "b"]);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let log = Arc::clone(&log);
            std::thread::spawn(move || log.claim(id))
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for result in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(result, Err(SegmentError::AlreadyClaimed { .. })));
    }
}

#[test]
fn test_claim_next_never_hands_out_a_segment_twice() {
    let dir = create_test_dir("ingest_next");
    let log = Arc::new(open_ingest(&dir, Duration::from_secs(60)));
    let generator = RecordIdGenerator::new();
    for i in 0..20 {
        write_segment(&log, &generator, &[&format!("record {i}")]);
    }

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let log = Arc::clone(&log);
            std::thread::spawn(move || {
                let mut claimed = Vec::new();
                while let Some(lease) = log.claim_next().unwrap() {
                    claimed.push(lease.segment_id);
                }
                claimed
            })
        })
        .collect();

    let mut all: Vec<SegmentId> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    let total = all.len();
    all.sort();
    all.dedup();
    assert_eq!(total, 20);
    assert_eq!(all.len(), 20);
}

#[test]
fn test_expired_lease_lets_another_consumer_claim() {
    let dir = create_test_dir("ingest_expiry");
    let log = open_ingest(&dir, Duration::from_millis(30));
    let generator = RecordIdGenerator::new();
    let id = write_segment(&log, &generator, &["late"]);

    let first = log.claim(id).unwrap();
    assert!(matches!(log.claim(id), Err(SegmentError::AlreadyClaimed { .. })));
    std::thread::sleep(Duration::from_millis(60));

    // claim applies expiry lazily, no sweeper needed
    let second = log.claim(id).unwrap();
    assert!(matches!(
        log.commit(first.lease_id),
        Err(SegmentError::LeaseExpired { .. })
    ));
    assert!(log.read(second.lease_id).unwrap().ends_with(b" late\n"));
    let committed = log.commit(second.lease_id).unwrap();
    assert_eq!(committed.state, IngestState::Committed);
    assert!(log.list_flushed().unwrap().is_empty());
}

#[test]
fn test_committed_segment_never_reappears_after_restart() {
    let dir = create_test_dir("ingest_restart");
    let generator = RecordIdGenerator::new();
    let kept;
    {
        let log = open_ingest(&dir, Duration::from_secs(60));
        let done = write_segment(&log, &generator, &["done"]);
        kept = write_segment(&log, &generator, &["kept"]);
        let lease = log.claim(done).unwrap();
        log.commit(lease.lease_id).unwrap();
        log.claim(kept).unwrap();
    }

    let log = IngestLog::open(dir.path(), Duration::from_secs(60), SyncMode::OnFlush).unwrap();
    let flushed = log.list_flushed().unwrap();
    assert_eq!(flushed.len(), 1);
    assert_eq!(flushed[0].id, kept);
    assert_eq!(
        FileIo::list_with_extension(dir.path(), "pending").unwrap().len(),
        0
    );
}

#[test]
fn test_counts_track_states() {
    let dir = create_test_dir("ingest_counts");
    let log = open_ingest(&dir, Duration::from_secs(60));
    let generator = RecordIdGenerator::new();
    let first = write_segment(&log, &generator, &["one"]);
    write_segment(&log, &generator, &["two"]);
    let _active = log.create_segment().unwrap();
    log.claim(first).unwrap();

    let counts = log.counts();
    assert_eq!(counts.writing, 1);
    assert_eq!(counts.flushed, 1);
    assert_eq!(counts.pending, 1);
}
