use super::test_utilities::*;
use test_log::test;
use flashlog::record::encode_record;
use flashlog::{QueryParams, RecordId, SegmentError, StoreSegmentId, StoreState};

#[test]
fn test_replica_survives_reopen() {
    let dir = create_test_dir("store_reopen");
    let (id, body) = segment_body(&[(100, "alpha"), (200, "beta")]);
    {
        let store = open_store(&dir);
        store.accept_replica(id, &body).unwrap();
    }

    let store = open_store(&dir);
    let segments = store.list_segments().unwrap();
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].id, id);
    assert_eq!(segments[0].state, StoreState::Fresh);
    assert_eq!(store.read_segment(id).unwrap(), body);
}

#[test]
fn test_replica_rejects_unordered_and_malformed_bodies() {
    let dir = create_test_dir("store_invalid");
    let store = open_store(&dir);

    let (id, body) = segment_body(&[(300, "late"), (100, "early")]);
    assert!(matches!(
        store.accept_replica(id, &body),
        Err(SegmentError::InvalidSegment { .. })
    ));

    let (id, mut body) = segment_body(&[(100, "x")]);
    body.pop();
    assert!(matches!(
        store.accept_replica(id, &body),
        Err(SegmentError::InvalidSegment { .. })
    ));
    assert!(store.list_segments().unwrap().is_empty());
}

#[test]
fn test_duplicate_of_trashed_segment_is_acknowledged() {
    let dir = create_test_dir("store_trash_dup");
    let store = open_store(&dir);
    let (id, body) = segment_body(&[(100, "alpha")]);
    store.accept_replica(id, &body).unwrap();
    store.trash_segment(id, 5_000).unwrap();

    let ack = store.accept_replica(id, &body).unwrap();
    assert!(ack.duplicate);
    assert!(store.list_segments().unwrap().is_empty());
}

#[test]
fn test_query_spans_fresh_and_compacted_segments() {
    let dir = create_test_dir("store_query");
    let store = open_store(&dir);
    let (a, a_body) = segment_body(&[(100, "a1"), (300, "a2")]);
    let (b, b_body) = segment_body(&[(200, "b1")]);
    let (c, c_body) = segment_body(&[(400, "c1")]);
    store.accept_replica(a, &a_body).unwrap();
    store.accept_replica(b, &b_body).unwrap();
    store.merge_segments(&[a, b]).unwrap().unwrap();
    store.accept_replica(c, &c_body).unwrap();

    let lines = store.query_local(&QueryParams::default()).unwrap();
    assert_eq!(payloads(&lines), vec!["a1", "b1", "a2", "c1"]);

    let params = QueryParams {
        from: chrono::DateTime::from_timestamp_millis(250),
        ..QueryParams::default()
    };
    assert_eq!(payloads(&store.query_local(&params).unwrap()), vec!["a2", "c1"]);
}

#[test]
fn test_restore_of_unknown_segment_is_not_found() {
    let dir = create_test_dir("store_restore");
    let store = open_store(&dir);
    let (id, _) = segment_body(&[(1, "x")]);
    let err = store.restore(id).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_retried_replica_with_more_records_survives_reopen() {
    let dir = create_test_dir("store_retry");
    let ids: Vec<RecordId> = [100, 200, 300]
        .iter()
        .map(|ms| RecordId::from_parts(*ms, 0))
        .collect();
    let body = |picked: &[usize]| {
        let mut body = Vec::new();
        for i in picked {
            encode_record(&mut body, ids[*i], format!("r{i}").as_bytes());
        }
        body
    };
    let id = StoreSegmentId::new(ids[0], ids[2]);
    {
        let store = open_store(&dir);
        store.accept_replica(id, &body(&[0, 2])).unwrap();
        let ack = store.accept_replica(id, &body(&[0, 1, 2])).unwrap();
        assert!(!ack.duplicate);
    }

    let store = open_store(&dir);
    assert_eq!(store.list_segments().unwrap().len(), 1);
    let lines = store.query_local(&QueryParams::default()).unwrap();
    assert_eq!(payloads(&lines), vec!["r0", "r1", "r2"]);
}
