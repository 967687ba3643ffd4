use super::test_utilities::*;
use flashlog::group::shutdown_channel;
use flashlog::{Compactor, CompactorConfig, NodeStats, StoreState};
use std::sync::Arc;
use std::time::Duration;
use test_log::test;

const HOUR_MS: u64 = 3_600_000;

fn config(target_size: u64) -> CompactorConfig {
    CompactorConfig {
        segment_target_size: target_size,
        segment_retain: Duration::from_secs(24 * 3600),
        segment_purge: Duration::from_secs(3600),
        compact_interval: Duration::from_millis(10),
    }
}

#[test]
fn test_merge_is_idempotent() {
    let dir = create_test_dir("compact_idem");
    let store = open_store(&dir);
    for (ms, payload) in [(1_000, "one"), (2_000, "two"), (3_000, "three")] {
        let (id, body) = segment_body(&[(ms, payload)]);
        store.accept_replica(id, &body).unwrap();
    }
    let stats = Arc::new(NodeStats::new());
    let compactor = Compactor::new(Arc::clone(&store), config(1024 * 1024), Arc::clone(&stats));

    let report = compactor.compact_at(10_000).unwrap();
    assert_eq!(report.merged_inputs, 3);
    assert_eq!(report.merged_outputs.len(), 1);
    let live = store.list_segments().unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].state, StoreState::Compacted);

    let again = compactor.compact_at(10_000).unwrap();
    assert!(again.is_empty());
    assert_eq!(store.list_segments().unwrap(), live);
    assert_eq!(stats.snapshot().compactions, 1);
}

#[test]
fn test_merge_respects_target_size() {
    let dir = create_test_dir("compact_target");
    let store = open_store(&dir);
    let mut size = 0;
    for ms in 1..=4u64 {
        let (id, body) = segment_body(&[(ms * 1_000, "0123456789")]);
        size = body.len() as u64;
        store.accept_replica(id, &body).unwrap();
    }
    let compactor = Compactor::new(Arc::clone(&store), config(size * 2), Arc::new(NodeStats::new()));

    let report = compactor.compact_at(10_000).unwrap();
    assert_eq!(report.merged_outputs.len(), 2);
    let live = store.list_segments().unwrap();
    assert_eq!(live.len(), 2);
    assert!(live.iter().all(|s| s.size == size * 2));

    let lines = store.query_local(&Default::default()).unwrap();
    assert_eq!(lines.len(), 4);
}

#[test]
fn test_retention_trashes_then_purges() {
    let dir = create_test_dir("compact_retain");
    let store = open_store(&dir);
    let (old, old_body) = segment_body(&[(HOUR_MS, "old")]);
    let (recent, recent_body) = segment_body(&[(30 * HOUR_MS, "recent")]);
    store.accept_replica(old, &old_body).unwrap();
    store.accept_replica(recent, &recent_body).unwrap();

    // both segments together exceed the target, so nothing merges
    let compactor = Compactor::new(Arc::clone(&store), config(1), Arc::new(NodeStats::new()));

    let now = 26 * HOUR_MS;
    let report = compactor.compact_at(now).unwrap();
    assert_eq!(report.trashed, vec![old]);
    assert_eq!(report.purged, 0);
    assert_eq!(store.list_segments().unwrap().len(), 1);
    assert_eq!(store.list_trashed().unwrap()[0].trashed_at_ms, now);

    // still inside the purge window: recoverable
    let report = compactor.compact_at(now + HOUR_MS / 2).unwrap();
    assert_eq!(report.purged, 0);
    assert!(store.read_segment(old).is_ok());

    let report = compactor.compact_at(now + 2 * HOUR_MS).unwrap();
    assert_eq!(report.purged, 1);
    assert!(store.list_trashed().unwrap().is_empty());
    assert!(store.read_segment(old).unwrap_err().is_not_found());
}

#[test]
fn test_merged_segments_are_trashed_as_one() {
    let dir = create_test_dir("compact_merge_retain");
    let store = open_store(&dir);
    for (ms, payload) in [(HOUR_MS, "first"), (2 * HOUR_MS, "second")] {
        let (id, body) = segment_body(&[(ms, payload)]);
        store.accept_replica(id, &body).unwrap();
    }
    let compactor = Compactor::new(Arc::clone(&store), config(1024 * 1024), Arc::new(NodeStats::new()));

    // merge happens first in a pass, so the aged inputs leave as one segment
    let report = compactor.compact_at(40 * HOUR_MS).unwrap();
    assert_eq!(report.merged_outputs.len(), 1);
    assert_eq!(report.trashed, report.merged_outputs);

    let trashed = store.list_trashed().unwrap();
    assert_eq!(trashed.len(), 1);
    let body = store.read_segment(trashed[0].id).unwrap();
    assert_eq!(body.iter().filter(|b| **b == b'\n').count(), 2);
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let dir = create_test_dir("compact_run");
    let store = open_store(&dir);
    for ms in [1_000u64, 2_000] {
        let (id, body) = segment_body(&[(ms, "x")]);
        store.accept_replica(id, &body).unwrap();
    }
    let mut cfg = config(1024 * 1024);
    cfg.segment_retain = Duration::from_secs(100 * 365 * 24 * 3600);
    let compactor = Arc::new(Compactor::new(Arc::clone(&store), cfg, Arc::new(NodeStats::new())));

    let (trigger, shutdown) = shutdown_channel();
    let handle = tokio::spawn(Arc::clone(&compactor).run(shutdown));

    tokio::time::timeout(Duration::from_secs(5), async {
        while store.list_segments().unwrap().len() != 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    trigger.trigger();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
