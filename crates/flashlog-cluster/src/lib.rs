//! Gossip-based cluster membership for flashlog nodes.
//!
//! Every node runs a [`Membership`] that probes its peers over gRPC, spreads
//! member state by push-pull, and exposes a [`ClusterView`] snapshot other
//! components use to find ingest and store nodes by role.

pub mod client;
pub mod error;
pub mod membership;
pub mod server;
pub mod traits;
pub mod types;

// Generated protobuf/gRPC modules
pub mod proto {
    tonic::include_proto!("flashlog.cluster");
}

pub use error::ClusterError;

pub use membership::Membership;
pub use traits::{GossipService, MembershipView, StaticMembership};
pub use types::{ClusterView, NodeId, Peer, PeerStatus, Role};

// Re-export gRPC server and client adapters
pub use client::GossipClient;
pub use server::GossipServer;

// Re-export logging macros for consistent usage across the crate
pub use log::{debug, error, info, trace, warn};
