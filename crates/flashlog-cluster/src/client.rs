use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status};

use crate::error::ClusterError;
use crate::proto::{
    PingReqRequest, PingRequest, PingResponse, gossip_client::GossipClient as TonicGossipClient,
};

/// Client for the gossip service of one peer.
#[derive(Debug, Clone)]
pub struct GossipClient {
    addr: String,
    client: TonicGossipClient<Channel>,
}

impl GossipClient {
    /// Connect eagerly, failing if the peer cannot be reached within `timeout`.
    pub async fn connect_with_timeout(addr: &str, timeout: Duration) -> Result<Self, ClusterError> {
        let channel = endpoint(addr, timeout)?
            .connect()
            .await
            .map_err(|e| ClusterError::from_transport_error(e, &format!("connect to {addr}")))?;
        Ok(Self {
            addr: addr.to_string(),
            client: TonicGossipClient::new(channel),
        })
    }

    /// Build a client whose connection is established on first use. Every
    /// request is bounded by `timeout`.
    pub fn connect_lazy(addr: &str, timeout: Duration) -> Result<Self, ClusterError> {
        let channel = endpoint(addr, timeout)?.connect_lazy();
        Ok(Self {
            addr: addr.to_string(),
            client: TonicGossipClient::new(channel),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn ping(&mut self, request: PingRequest) -> Result<PingResponse, ClusterError> {
        let response = self
            .client
            .ping(Request::new(request))
            .await
            .map_err(|status| status_to_cluster_error(status, &self.addr))?;
        Ok(response.into_inner())
    }

    pub async fn ping_req(&mut self, request: PingReqRequest) -> Result<PingResponse, ClusterError> {
        let response = self
            .client
            .ping_req(Request::new(request))
            .await
            .map_err(|status| status_to_cluster_error(status, &self.addr))?;
        Ok(response.into_inner())
    }
}

fn endpoint(addr: &str, timeout: Duration) -> Result<Endpoint, ClusterError> {
    let uri = if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{addr}")
    };
    let endpoint = Endpoint::from_shared(uri)
        .map_err(|e| ClusterError::from_transport_error(e, &format!("invalid address {addr}")))?;
    Ok(endpoint.connect_timeout(timeout).timeout(timeout))
}

/// Convert a tonic Status to a ClusterError.
fn status_to_cluster_error(status: Status, addr: &str) -> ClusterError {
    match status.code() {
        tonic::Code::DeadlineExceeded | tonic::Code::Cancelled => ClusterError::Timeout {
            peer: addr.to_string(),
        },
        tonic::Code::InvalidArgument => {
            ClusterError::from_parse_error(status.message(), &format!("reply from {addr}"))
        }
        _ => ClusterError::from_transport_error(
            format!("{:?}: {}", status.code(), status.message()),
            &format!("rpc to {addr}"),
        ),
    }
}
