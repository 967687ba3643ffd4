use std::sync::Arc;
use tonic::{Request, Response, Status};

use crate::error::ClusterError;
use crate::proto::{PingReqRequest, PingRequest, PingResponse, gossip_server::Gossip};
use crate::traits::GossipService;

/// Server adapter that implements the Gossip service.
///
/// This adapter converts tonic requests into GossipService trait calls.
#[derive(Debug)]
pub struct GossipServer<T: GossipService> {
    gossip_service: Arc<T>,
}

impl<T: GossipService> GossipServer<T> {
    pub fn new(gossip_service: Arc<T>) -> Self {
        Self { gossip_service }
    }

    pub fn gossip_service(&self) -> &T {
        &self.gossip_service
    }
}

#[tonic::async_trait]
impl<T: GossipService + 'static> Gossip for GossipServer<T> {
    async fn ping(&self, request: Request<PingRequest>) -> Result<Response<PingResponse>, Status> {
        let response = self
            .gossip_service
            .handle_ping(request.into_inner())
            .await
            .map_err(cluster_error_to_status)?;

        Ok(Response::new(response))
    }

    async fn ping_req(
        &self,
        request: Request<PingReqRequest>,
    ) -> Result<Response<PingResponse>, Status> {
        let response = self
            .gossip_service
            .handle_ping_req(request.into_inner())
            .await
            .map_err(cluster_error_to_status)?;

        Ok(Response::new(response))
    }
}

/// Convert a ClusterError to a tonic Status for gRPC responses.
fn cluster_error_to_status(error: ClusterError) -> Status {
    match error {
        ClusterError::InvalidMember { .. } => Status::invalid_argument(error.to_string()),
        ClusterError::Io { .. } => Status::internal(error.to_string()),
        ClusterError::Transport { .. } => Status::unavailable(error.to_string()),
        ClusterError::Timeout { .. } => Status::deadline_exceeded(error.to_string()),
    }
}
