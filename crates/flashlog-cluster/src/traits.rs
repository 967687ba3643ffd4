//! Seams between the gossip transport, the membership state machine and the
//! components that route work by role.

use std::sync::Arc;

use async_trait::async_trait;

use crate::ClusterError;
use crate::proto::{PingReqRequest, PingRequest, PingResponse};
use crate::types::{ClusterView, Peer, Role};

/// Handles incoming gossip RPCs. Implemented by [`crate::Membership`]; the
/// gRPC adapter in [`crate::server`] only translates requests and errors.
#[async_trait]
pub trait GossipService: Send + Sync {
    /// Merge the caller's member table and answer with ours.
    async fn handle_ping(&self, request: PingRequest) -> Result<PingResponse, ClusterError>;

    /// Probe the target on behalf of the caller and relay the answer.
    async fn handle_ping_req(&self, request: PingReqRequest)
    -> Result<PingResponse, ClusterError>;
}

/// Read access to the current cluster membership.
pub trait MembershipView: Send + Sync {
    fn current_view(&self) -> Arc<ClusterView>;

    fn peers_by_role(&self, role: Role) -> Vec<Peer> {
        self.current_view()
            .peers_by_role(role)
            .into_iter()
            .cloned()
            .collect()
    }
}

/// A fixed view, for wiring components without running gossip.
pub struct StaticMembership {
    view: Arc<ClusterView>,
}

impl StaticMembership {
    pub fn new(view: ClusterView) -> Self {
        StaticMembership {
            view: Arc::new(view),
        }
    }
}

impl MembershipView for StaticMembership {
    fn current_view(&self) -> Arc<ClusterView> {
        Arc::clone(&self.view)
    }
}
