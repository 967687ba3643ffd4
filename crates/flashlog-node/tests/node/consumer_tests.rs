use std::sync::Arc;
use std::time::Duration;

use flashlog::{IngestState, NodeStats};
use flashlog_cluster::{Peer, Role};
use flashlog_node::store::{ConsumeOutcome, Consumer, ConsumerConfig};
use test_log::test;

use crate::test_utilities::{
    TestIngest, body_payloads, http_transport, peer, silent_peer, start_ingest, start_store,
    static_view, write_flushed,
};

fn config(replication_factor: usize) -> ConsumerConfig {
    ConsumerConfig {
        target_size: 1024 * 1024,
        target_age: Duration::from_secs(5),
        replication_factor,
        idle_backoff: Duration::from_millis(20),
    }
}

fn consumer(ingest: &TestIngest, stores: &[Peer], timeout: Duration, rf: usize) -> Consumer {
    let local = peer(Role::Store, "127.0.0.1:1");
    let mut others = vec![peer(Role::Ingest, &ingest.addr)];
    others.extend(stores.iter().cloned());
    Consumer::new(
        0,
        http_transport(timeout),
        static_view(&local, &others),
        Arc::new(NodeStats::new()),
        config(rf),
    )
}

#[test(tokio::test)]
async fn test_segments_are_merged_replicated_and_committed() {
    let ingest = start_ingest(Duration::from_secs(30)).await;
    write_flushed(&ingest.log, &["a1", "a2"]);
    write_flushed(&ingest.log, &["b1"]);

    let first = start_store(&[]).await;
    let second = start_store(&[]).await;
    let targets = [peer(Role::Store, &first.addr), peer(Role::Store, &second.addr)];
    let mut consumer = consumer(&ingest, &targets, Duration::from_secs(2), 2);

    let outcome = consumer.consume_once().await;
    let ConsumeOutcome::Replicated {
        segment_id,
        segments,
        ..
    } = outcome
    else {
        panic!("expected replication, got {outcome:?}");
    };
    assert_eq!(segments, 2);
    assert!(ingest.log.list_flushed().unwrap().is_empty());
    assert_eq!(ingest.log.counts().pending, 0);
    assert_eq!(ingest.stats.snapshot().committed_segments, 2);

    for store in [&first, &second] {
        let live = store.store.list_segments().unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, segment_id);
        let mut lines = body_payloads(&store.store.read_segment(segment_id).unwrap());
        lines.sort();
        assert_eq!(lines, vec!["a1", "a2", "b1"]);
    }

    assert_eq!(consumer.consume_once().await, ConsumeOutcome::Idle);
}

#[test(tokio::test)]
async fn test_unresponsive_target_abandons_without_commit() {
    let ingest = start_ingest(Duration::from_secs(30)).await;
    let written = write_flushed(&ingest.log, &["only"]);

    let healthy = start_store(&[]).await;
    let silent = silent_peer().await;
    let targets = [peer(Role::Store, &healthy.addr), peer(Role::Store, &silent)];
    let mut consumer = consumer(&ingest, &targets, Duration::from_millis(300), 2);

    let outcome = consumer.consume_once().await;
    assert!(
        matches!(outcome, ConsumeOutcome::Abandoned { .. }),
        "unexpected outcome {outcome:?}"
    );

    let segments = ingest.log.list_flushed().unwrap();
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].id, written.id);
    assert_eq!(segments[0].state, IngestState::Flushed);
    assert_eq!(ingest.stats.snapshot().committed_segments, 0);
}

#[test(tokio::test)]
async fn test_too_few_stores_releases_leases() {
    let ingest = start_ingest(Duration::from_secs(30)).await;
    write_flushed(&ingest.log, &["waiting"]);

    let only = start_store(&[]).await;
    let mut consumer = consumer(
        &ingest,
        &[peer(Role::Store, &only.addr)],
        Duration::from_secs(2),
        3,
    );

    let outcome = consumer.consume_once().await;
    assert!(matches!(outcome, ConsumeOutcome::Abandoned { .. }));
    assert!(only.store.list_segments().unwrap().is_empty());

    let segments = ingest.log.list_flushed().unwrap();
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].state, IngestState::Flushed);
}

#[test(tokio::test)]
async fn test_no_ingest_peers_is_idle() {
    let store = start_store(&[]).await;
    let local = peer(Role::Store, &store.addr);
    let mut consumer = Consumer::new(
        1,
        http_transport(Duration::from_secs(1)),
        static_view(&local, &[]),
        Arc::new(NodeStats::new()),
        config(1),
    );
    assert_eq!(consumer.consume_once().await, ConsumeOutcome::Idle);
}
