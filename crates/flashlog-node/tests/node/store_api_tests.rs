use flashlog::{ReplicaAck, StoreSegmentInfo, TrashedSegment};
use flashlog_cluster::Role;
use flashlog_node::http::ErrorResponse;
use flashlog::record::{RecordId, encode_record};
use flashlog::StoreSegmentId;
use flashlog_node::store::{QueryResponse, UNREACHABLE_PEERS_HEADER, split_lines};
use test_log::test;

use crate::test_utilities::{payloads, peer, segment_body, silent_peer, start_store};

fn url(addr: &str, path: &str) -> String {
    format!("http://{addr}{path}")
}

async fn query(client: &reqwest::Client, addr: &str, params: &[(&str, &str)]) -> QueryResponse {
    let response = client
        .get(url(addr, "/store/query"))
        .query(params)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()[reqwest::header::CONTENT_TYPE],
        "application/octet-stream"
    );
    let unreachable_peers = response
        .headers()
        .get(UNREACHABLE_PEERS_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(',').map(str::to_string).collect())
        .unwrap_or_default();
    let body = response.bytes().await.unwrap();
    QueryResponse {
        records: split_lines(&body),
        unreachable_peers,
    }
}

async fn replicate(
    client: &reqwest::Client,
    addr: &str,
    segment_id: &str,
    body: Vec<u8>,
) -> reqwest::Response {
    client
        .post(url(addr, "/store/replicate"))
        .query(&[("segment_id", segment_id)])
        .body(body)
        .send()
        .await
        .unwrap()
}

#[test(tokio::test)]
async fn test_replicate_acknowledges_duplicates_and_rejects_mismatches() {
    let store = start_store(&[]).await;
    let client = reqwest::Client::new();
    let (id, body) = segment_body(&[(1_000, "a"), (2_000, "b")]);

    let response = replicate(&client, &store.addr, &id.to_string(), body.clone()).await;
    assert_eq!(response.status(), 200);
    let ack: ReplicaAck = response.json().await.unwrap();
    assert!(!ack.duplicate);
    assert_eq!(ack.size, body.len() as u64);

    let ack: ReplicaAck = replicate(&client, &store.addr, &id.to_string(), body.clone())
        .await
        .json()
        .await
        .unwrap();
    assert!(ack.duplicate);
    assert_eq!(store.stats.snapshot().replicated_segments_ingress, 1);

    let (other_id, _) = segment_body(&[(5_000, "x")]);
    let response = replicate(&client, &store.addr, &other_id.to_string(), body).await;
    assert_eq!(response.status(), 400);
    let error: ErrorResponse = response.json().await.unwrap();
    assert_eq!(error.error, "invalid_segment");

    let response = replicate(&client, &store.addr, "garbage", b"x\n".to_vec()).await;
    assert_eq!(response.status(), 400);
}

#[test(tokio::test)]
async fn test_query_gathers_from_every_store_once() {
    let remote = start_store(&[]).await;
    let local = start_store(&[peer(Role::Store, &remote.addr)]).await;

    let (shared, shared_body) = segment_body(&[(1_000, "a"), (3_000, "c")]);
    let (extra, extra_body) = segment_body(&[(2_000, "b"), (4_000, "d")]);
    local.store.accept_replica(shared, &shared_body).unwrap();
    remote.store.accept_replica(shared, &shared_body).unwrap();
    remote.store.accept_replica(extra, &extra_body).unwrap();

    let client = reqwest::Client::new();
    let response = query(&client, &local.addr, &[]).await;
    assert_eq!(payloads(&response.records), vec!["a", "b", "c", "d"]);
    assert!(response.unreachable_peers.is_empty());

    let response = query(
        &client,
        &local.addr,
        &[
            ("from", "1970-01-01T00:00:01.500Z"),
            ("to", "1970-01-01T00:00:03.500Z"),
        ],
    )
    .await;
    assert_eq!(payloads(&response.records), vec!["b", "c"]);

    let response = query(&client, &local.addr, &[("q", "d")]).await;
    assert_eq!(payloads(&response.records), vec!["d"]);
}

#[test(tokio::test)]
async fn test_query_returns_binary_payloads_unchanged() {
    let remote = start_store(&[]).await;
    let local = start_store(&[peer(Role::Store, &remote.addr)]).await;
    let raw: &[u8] = &[98, 105, 110, 255, 254];
    let id = RecordId::from_parts(1_000, 0);
    let mut body = Vec::new();
    encode_record(&mut body, id, raw);
    remote
        .store
        .accept_replica(StoreSegmentId::new(id, id), &body)
        .unwrap();

    let client = reqwest::Client::new();
    let response = query(&client, &local.addr, &[]).await;
    assert_eq!(response.records.len(), 1);
    assert_eq!(&response.records[0][33..], raw);

    let local_body = client
        .get(url(&remote.addr, "/store/local-query"))
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(local_body.as_ref(), body.as_slice());
}

#[test(tokio::test)]
async fn test_query_reports_unreachable_peers() {
    let dead = silent_peer().await;
    let local = start_store(&[peer(Role::Store, &dead)]).await;
    let (id, body) = segment_body(&[(1_000, "mine")]);
    local.store.accept_replica(id, &body).unwrap();

    let response = query(&reqwest::Client::new(), &local.addr, &[]).await;
    assert_eq!(payloads(&response.records), vec!["mine"]);
    assert_eq!(response.unreachable_peers, vec![dead]);
}

#[test(tokio::test)]
async fn test_trash_listing_and_restore() {
    let store = start_store(&[]).await;
    let (id, body) = segment_body(&[(1_000, "keep me")]);
    store.store.accept_replica(id, &body).unwrap();
    store.store.trash_segment(id, 10_000).unwrap();

    let client = reqwest::Client::new();
    let trash: Vec<TrashedSegment> = client
        .get(url(&store.addr, "/store/trash"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(trash.len(), 1);
    assert_eq!(trash[0].id, id);

    let response = client
        .post(url(&store.addr, &format!("/store/trash/{id}/restore")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let live: Vec<StoreSegmentInfo> = client
        .get(url(&store.addr, "/store/segments"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].id, id);

    let response = client
        .post(url(&store.addr, &format!("/store/trash/{id}/restore")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}
