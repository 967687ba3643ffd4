//! Peer-to-peer HTTP calls made by consumers and the query gather step.

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use flashlog::{Lease, LeaseId, QueryParams, ReplicaAck, SegmentInfo, StoreSegmentId};
use log::trace;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::error::NodeError;
use crate::http::ErrorResponse;
use crate::store::query::split_lines;

/// Calls a consumer or query router makes against other nodes. Addresses are
/// the `host:port` API addresses advertised through gossip.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Lease the oldest claimable segment on an ingest node, if any.
    async fn claim_next(&self, ingest: &str) -> Result<Option<Lease>, NodeError>;

    async fn read_lease(&self, ingest: &str, lease_id: LeaseId) -> Result<Bytes, NodeError>;

    async fn commit(&self, ingest: &str, lease_id: LeaseId) -> Result<SegmentInfo, NodeError>;

    async fn release(&self, ingest: &str, lease_id: LeaseId) -> Result<(), NodeError>;

    async fn replicate(
        &self,
        store: &str,
        segment_id: StoreSegmentId,
        body: Bytes,
    ) -> Result<ReplicaAck, NodeError>;

    /// Record lines a store node holds locally, without trailing newlines.
    async fn query_local(
        &self,
        store: &str,
        params: &QueryParams,
    ) -> Result<Vec<Vec<u8>>, NodeError>;
}

/// [`PeerTransport`] over the node HTTP APIs.
#[derive(Debug, Clone)]
pub struct HttpPeerTransport {
    client: reqwest::Client,
    request_timeout: Duration,
    query_timeout: Duration,
}

impl HttpPeerTransport {
    /// Lease and replication calls are bounded by `request_timeout`; a
    /// store's local query answer is bounded by `query_timeout`.
    pub fn new(request_timeout: Duration, query_timeout: Duration) -> Result<Self, NodeError> {
        let client = reqwest::Client::builder()
            .connect_timeout(request_timeout.min(query_timeout).min(Duration::from_secs(3)))
            .build()
            .map_err(|e| NodeError::from_reqwest_error(e, "client"))?;
        Ok(Self {
            client,
            request_timeout,
            query_timeout,
        })
    }

    fn post(&self, addr: &str, path: &str) -> reqwest::RequestBuilder {
        self.client.post(url(addr, path)).timeout(self.request_timeout)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        peer: &str,
    ) -> Result<reqwest::Response, NodeError> {
        let response = request
            .send()
            .await
            .map_err(|e| NodeError::from_reqwest_error(e, peer))?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(remote_error(response, peer).await)
        }
    }

    async fn json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        peer: &str,
    ) -> Result<T, NodeError> {
        self.send(request, peer)
            .await?
            .json::<T>()
            .await
            .map_err(|e| NodeError::from_reqwest_error(e, peer))
    }
}

fn url(addr: &str, path: &str) -> String {
    if addr.starts_with("http://") || addr.starts_with("https://") {
        format!("{addr}{path}")
    } else {
        format!("http://{addr}{path}")
    }
}

/// Turn a non-success response into a [`NodeError::Remote`], keeping the
/// structured error body when the peer sent one.
async fn remote_error(response: reqwest::Response, peer: &str) -> NodeError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(error_response) => NodeError::Remote {
            peer: peer.to_string(),
            status,
            error: error_response.error,
            message: error_response.message,
        },
        Err(_) => NodeError::Remote {
            peer: peer.to_string(),
            status,
            error: "unknown".to_string(),
            message: body.trim().to_string(),
        },
    }
}

#[async_trait]
impl PeerTransport for HttpPeerTransport {
    async fn claim_next(&self, ingest: &str) -> Result<Option<Lease>, NodeError> {
        let response = self
            .send(self.post(ingest, "/ingest/next"), ingest)
            .await?;
        if response.status() == StatusCode::NO_CONTENT {
            trace!("Nothing claimable on {ingest}");
            return Ok(None);
        }
        let lease = response
            .json::<Lease>()
            .await
            .map_err(|e| NodeError::from_reqwest_error(e, ingest))?;
        Ok(Some(lease))
    }

    async fn read_lease(&self, ingest: &str, lease_id: LeaseId) -> Result<Bytes, NodeError> {
        let path = format!("/ingest/leases/{lease_id}/body");
        let request = self
            .client
            .get(url(ingest, &path))
            .timeout(self.request_timeout);
        self.send(request, ingest)
            .await?
            .bytes()
            .await
            .map_err(|e| NodeError::from_reqwest_error(e, ingest))
    }

    async fn commit(&self, ingest: &str, lease_id: LeaseId) -> Result<SegmentInfo, NodeError> {
        let path = format!("/ingest/leases/{lease_id}/commit");
        self.json(self.post(ingest, &path), ingest).await
    }

    async fn release(&self, ingest: &str, lease_id: LeaseId) -> Result<(), NodeError> {
        let path = format!("/ingest/leases/{lease_id}/release");
        self.send(self.post(ingest, &path), ingest).await?;
        Ok(())
    }

    async fn replicate(
        &self,
        store: &str,
        segment_id: StoreSegmentId,
        body: Bytes,
    ) -> Result<ReplicaAck, NodeError> {
        let request = self
            .post(store, "/store/replicate")
            .query(&[("segment_id", segment_id.to_string())])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body);
        self.json(request, store).await
    }

    async fn query_local(
        &self,
        store: &str,
        params: &QueryParams,
    ) -> Result<Vec<Vec<u8>>, NodeError> {
        let request = self
            .client
            .get(url(store, "/store/local-query"))
            .query(params)
            .timeout(self.query_timeout);
        let body = self
            .send(request, store)
            .await?
            .bytes()
            .await
            .map_err(|e| NodeError::from_reqwest_error(e, store))?;
        Ok(split_lines(&body))
    }
}
