use std::time::Duration;

use flashlog::{Lease, SegmentInfo, StatsSnapshot};
use flashlog_node::http::{ErrorResponse, HealthResponse};
use test_log::test;

use crate::test_utilities::{body_payloads, start_ingest, write_flushed};

fn url(addr: &str, path: &str) -> String {
    format!("http://{addr}{path}")
}

#[test(tokio::test)]
async fn test_claim_read_commit_round_trip() {
    let ingest = start_ingest(Duration::from_secs(60)).await;
    let info = write_flushed(&ingest.log, &["alpha", "beta"]);
    let client = reqwest::Client::new();

    let listed: Vec<SegmentInfo> = client
        .get(url(&ingest.addr, "/ingest/segments"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, info.id);

    let response = client
        .post(url(&ingest.addr, "/ingest/next"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let lease: Lease = response.json().await.unwrap();
    assert_eq!(lease.segment_id, info.id);

    let body = client
        .get(url(&ingest.addr, &format!("/ingest/leases/{}/body", lease.lease_id)))
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(body_payloads(&body), vec!["alpha", "beta"]);

    let response = client
        .post(url(&ingest.addr, &format!("/ingest/leases/{}/commit", lease.lease_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let listed: Vec<SegmentInfo> = client
        .get(url(&ingest.addr, "/ingest/segments"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(listed.is_empty());

    let response = client
        .post(url(&ingest.addr, "/ingest/next"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
    assert_eq!(ingest.stats.snapshot().committed_segments, 1);
}

#[test(tokio::test)]
async fn test_second_claim_conflicts() {
    let ingest = start_ingest(Duration::from_secs(60)).await;
    let info = write_flushed(&ingest.log, &["only"]);
    let client = reqwest::Client::new();
    let claim_url = url(&ingest.addr, &format!("/ingest/segments/{}/claim", info.id));

    let first = client.post(&claim_url).send().await.unwrap();
    assert_eq!(first.status(), 200);

    let second = client.post(&claim_url).send().await.unwrap();
    assert_eq!(second.status(), 409);
    let error: ErrorResponse = second.json().await.unwrap();
    assert_eq!(error.error, "already_claimed");
}

#[test(tokio::test)]
async fn test_commit_after_expiry_is_gone_and_segment_returns() {
    let ingest = start_ingest(Duration::from_millis(100)).await;
    let info = write_flushed(&ingest.log, &["late"]);
    let client = reqwest::Client::new();

    let lease: Lease = client
        .post(url(&ingest.addr, "/ingest/next"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;

    let response = client
        .post(url(&ingest.addr, &format!("/ingest/leases/{}/commit", lease.lease_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 410);
    let error: ErrorResponse = response.json().await.unwrap();
    assert_eq!(error.error, "lease_expired");
    // the commit found the lease lapsed, with no sweeper running
    assert_eq!(ingest.stats.snapshot().failed_segments, 1);

    let listed = ingest.log.list_flushed().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, info.id);
}

#[test(tokio::test)]
async fn test_release_returns_segment_and_bad_ids_are_rejected() {
    let ingest = start_ingest(Duration::from_secs(60)).await;
    write_flushed(&ingest.log, &["again"]);
    let client = reqwest::Client::new();

    let lease: Lease = client
        .post(url(&ingest.addr, "/ingest/next"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(ingest.log.list_flushed().unwrap().is_empty());

    let response = client
        .post(url(&ingest.addr, &format!("/ingest/leases/{}/release", lease.lease_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
    assert_eq!(ingest.log.list_flushed().unwrap().len(), 1);
    assert_eq!(ingest.stats.snapshot().failed_segments, 1);

    let response = client
        .post(url(&ingest.addr, "/ingest/leases/not-a-lease/commit"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let response = client
        .post(url(
            &ingest.addr,
            "/ingest/leases/00000000000040008000000000000000/commit",
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[test(tokio::test)]
async fn test_health_stats_and_cluster_endpoints() {
    let ingest = start_ingest(Duration::from_secs(60)).await;
    let client = reqwest::Client::new();

    let health: HealthResponse = client
        .get(url(&ingest.addr, "/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health.status, "healthy");

    let stats: StatsSnapshot = client
        .get(url(&ingest.addr, "/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats, StatsSnapshot::default());

    let cluster: serde_json::Value = client
        .get(url(&ingest.addr, "/cluster"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cluster["members"].as_array().unwrap().len(), 1);
}
