//! Scatter-gather query across the store tier.
//!
//! Query answers are newline-delimited record lines sent as
//! `application/octet-stream`, so payload bytes travel exactly as stored.

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::{IntoResponse, Response};
use flashlog::merge::merge_by_key;
use flashlog::record::RECORD_ID_LEN;
use flashlog::{QueryParams, StoreLog};
use flashlog_cluster::{NodeId, Peer};
use futures_util::future::join_all;
use log::warn;

use crate::error::NodeError;
use crate::transport::PeerTransport;

/// Comma separated API addresses of store peers that could not answer.
pub const UNREACHABLE_PEERS_HEADER: &str = "x-flashlog-unreachable-peers";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResponse {
    /// Record lines without their trailing newline.
    pub records: Vec<Vec<u8>>,
    /// Store peers that could not answer; their records are missing.
    pub unreachable_peers: Vec<String>,
}

impl IntoResponse for QueryResponse {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
        if !self.unreachable_peers.is_empty() {
            match HeaderValue::from_str(&self.unreachable_peers.join(",")) {
                Ok(value) => {
                    headers.insert(UNREACHABLE_PEERS_HEADER, value);
                }
                Err(e) => warn!("Cannot report unreachable peers in a header: {e}"),
            }
        }
        (headers, encode_lines(&self.records)).into_response()
    }
}

/// Join record lines into a body, each terminated by a newline.
pub fn encode_lines(lines: &[Vec<u8>]) -> Vec<u8> {
    let mut body = Vec::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
    for line in lines {
        body.extend_from_slice(line);
        body.push(b'\n');
    }
    body
}

/// Split a newline-delimited body back into record lines.
pub fn split_lines(body: &[u8]) -> Vec<Vec<u8>> {
    body.split(|b| *b == b'\n')
        .filter(|line| !line.is_empty())
        .map(<[u8]>::to_vec)
        .collect()
}

fn record_key(line: &[u8]) -> Vec<u8> {
    line.get(..RECORD_ID_LEN).unwrap_or(line).to_vec()
}

/// Merge per-node results (each already ordered by record id) into one
/// ordered list. Records replicated to several nodes appear once.
pub fn gather(results: Vec<Vec<Vec<u8>>>, limit: Option<usize>) -> Vec<Vec<u8>> {
    let limit = limit.unwrap_or(usize::MAX);
    let mut records: Vec<Vec<u8>> = Vec::new();
    let mut last_key: Option<Vec<u8>> = None;
    for line in merge_by_key(results, |line| record_key(line)) {
        if records.len() >= limit {
            break;
        }
        let key = record_key(&line);
        if last_key.as_ref() == Some(&key) {
            continue;
        }
        last_key = Some(key);
        records.push(line);
    }
    records
}

/// Query every live store node, answering for the local node on the blocking
/// pool while remote peers are asked.
#[tracing::instrument(level = "debug", skip_all, fields(peers = peers.len()))]
pub async fn scatter_gather(
    transport: &dyn PeerTransport,
    store: Arc<StoreLog>,
    local_id: &NodeId,
    peers: &[Peer],
    params: &QueryParams,
) -> Result<QueryResponse, NodeError> {
    let remote: Vec<&Peer> = peers.iter().filter(|p| &p.node_id != local_id).collect();
    let requests = remote
        .iter()
        .map(|peer| transport.query_local(&peer.api_addr, params));
    let local_params = params.clone();
    let local = tokio::task::spawn_blocking(move || store.query_local(&local_params));
    let (local, answers) = tokio::join!(local, join_all(requests));

    let local = local.map_err(|e| NodeError::Io {
        context: "local query".to_string(),
        reason: e.to_string(),
    })??;
    let mut results = vec![local];
    let mut unreachable_peers = Vec::new();
    for (peer, answer) in remote.iter().zip(answers) {
        match answer {
            Ok(records) => results.push(records),
            Err(e) => {
                warn!("Query skipped store {} ({}): {e}", peer.node_id, peer.api_addr);
                unreachable_peers.push(peer.api_addr.clone());
            }
        }
    }

    Ok(QueryResponse {
        records: gather(results, params.limit),
        unreachable_peers,
    })
}
