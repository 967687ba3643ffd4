//! Core membership types.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ClusterError;
use crate::proto;

/// Unique identifier of a node process. A restarted node gets a new id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn generate() -> Self {
        NodeId(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        NodeId(id.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Ingest,
    Store,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Ingest => f.write_str("ingest"),
            Role::Store => f.write_str("store"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerStatus {
    Alive,
    Suspect,
    Dead,
    Left,
}

impl PeerStatus {
    /// Ordering used to settle conflicting reports at the same incarnation.
    pub fn precedence(self) -> u8 {
        match self {
            PeerStatus::Alive => 0,
            PeerStatus::Suspect => 1,
            PeerStatus::Dead => 2,
            PeerStatus::Left => 3,
        }
    }

    /// Suspect members are still routed to until they are declared dead.
    pub fn is_live(self) -> bool {
        matches!(self, PeerStatus::Alive | PeerStatus::Suspect)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub node_id: NodeId,
    pub role: Role,
    pub api_addr: String,
    pub gossip_addr: String,
    pub incarnation: u64,
    pub status: PeerStatus,
}

impl Peer {
    /// Whether `other` should replace this entry in the member table.
    pub fn is_superseded_by(&self, other: &Peer) -> bool {
        other.incarnation > self.incarnation
            || (other.incarnation == self.incarnation
                && other.status.precedence() > self.status.precedence())
    }
}

/// Immutable snapshot of the member table, local node included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterView {
    pub local_id: NodeId,
    pub members: Vec<Peer>,
}

impl ClusterView {
    pub fn new(local_id: NodeId, mut members: Vec<Peer>) -> Self {
        members.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        ClusterView { local_id, members }
    }

    pub fn get(&self, node_id: &NodeId) -> Option<&Peer> {
        self.members.iter().find(|p| &p.node_id == node_id)
    }

    pub fn local(&self) -> Option<&Peer> {
        self.get(&self.local_id)
    }

    /// Live members with the given role, the local node included.
    pub fn peers_by_role(&self, role: Role) -> Vec<&Peer> {
        self.members
            .iter()
            .filter(|p| p.role == role && p.status.is_live())
            .collect()
    }

    /// Live members other than the local node.
    pub fn live_remote(&self) -> Vec<&Peer> {
        self.members
            .iter()
            .filter(|p| p.node_id != self.local_id && p.status.is_live())
            .collect()
    }
}

impl From<Role> for proto::PeerRole {
    fn from(role: Role) -> Self {
        match role {
            Role::Ingest => proto::PeerRole::Ingest,
            Role::Store => proto::PeerRole::Store,
        }
    }
}

impl From<PeerStatus> for proto::PeerStatus {
    fn from(status: PeerStatus) -> Self {
        match status {
            PeerStatus::Alive => proto::PeerStatus::Alive,
            PeerStatus::Suspect => proto::PeerStatus::Suspect,
            PeerStatus::Dead => proto::PeerStatus::Dead,
            PeerStatus::Left => proto::PeerStatus::Left,
        }
    }
}

impl From<&Peer> for proto::MemberState {
    fn from(peer: &Peer) -> Self {
        proto::MemberState {
            node_id: peer.node_id.0.clone(),
            role: proto::PeerRole::from(peer.role) as i32,
            api_addr: peer.api_addr.clone(),
            gossip_addr: peer.gossip_addr.clone(),
            incarnation: peer.incarnation,
            status: proto::PeerStatus::from(peer.status) as i32,
        }
    }
}

impl TryFrom<proto::MemberState> for Peer {
    type Error = ClusterError;

    fn try_from(state: proto::MemberState) -> Result<Self, Self::Error> {
        if state.node_id.is_empty() {
            return Err(ClusterError::from_parse_error("empty node id", "member state"));
        }
        let role = match proto::PeerRole::try_from(state.role) {
            Ok(proto::PeerRole::Ingest) => Role::Ingest,
            Ok(proto::PeerRole::Store) => Role::Store,
            _ => {
                return Err(ClusterError::from_parse_error(
                    format!("unknown role {} for {}", state.role, state.node_id),
                    "member state",
                ));
            }
        };
        let status = match proto::PeerStatus::try_from(state.status) {
            Ok(proto::PeerStatus::Alive) => PeerStatus::Alive,
            Ok(proto::PeerStatus::Suspect) => PeerStatus::Suspect,
            Ok(proto::PeerStatus::Dead) => PeerStatus::Dead,
            Ok(proto::PeerStatus::Left) => PeerStatus::Left,
            Err(_) => {
                return Err(ClusterError::from_parse_error(
                    format!("unknown status {} for {}", state.status, state.node_id),
                    "member state",
                ));
            }
        };
        Ok(Peer {
            node_id: NodeId(state.node_id),
            role,
            api_addr: state.api_addr,
            gossip_addr: state.gossip_addr,
            incarnation: state.incarnation,
            status,
        })
    }
}
