use std::fmt;

use flashlog::{ConfigError, SegmentError, StorageError};
use flashlog_cluster::ClusterError;

/// Errors raised by node components talking to peers or running their units.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeError {
    /// The peer could not be reached or the connection broke.
    Unreachable { peer: String, reason: String },
    /// The peer did not answer within the request timeout.
    Timeout { peer: String },
    /// The peer answered with an error response.
    Remote {
        peer: String,
        status: u16,
        error: String,
        message: String,
    },
    /// The peer answered with something we could not understand.
    Protocol { peer: String, reason: String },
    Io { context: String, reason: String },
    Segment(SegmentError),
    Cluster(ClusterError),
    Config(ConfigError),
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::Unreachable { peer, reason } => {
                write!(f, "Peer {peer} unreachable: {reason}")
            }
            NodeError::Timeout { peer } => write!(f, "Request to {peer} timed out"),
            NodeError::Remote {
                peer,
                status,
                error,
                message,
            } => write!(f, "Peer {peer} answered {status} {error}: {message}"),
            NodeError::Protocol { peer, reason } => {
                write!(f, "Unexpected response from {peer}: {reason}")
            }
            NodeError::Io { context, reason } => write!(f, "I/O error in {context}: {reason}"),
            NodeError::Segment(e) => write!(f, "{e}"),
            NodeError::Cluster(e) => write!(f, "{e}"),
            NodeError::Config(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for NodeError {}

impl From<SegmentError> for NodeError {
    fn from(err: SegmentError) -> Self {
        NodeError::Segment(err)
    }
}

impl From<StorageError> for NodeError {
    fn from(err: StorageError) -> Self {
        NodeError::Segment(SegmentError::Storage(err))
    }
}

impl From<ClusterError> for NodeError {
    fn from(err: ClusterError) -> Self {
        NodeError::Cluster(err)
    }
}

impl From<ConfigError> for NodeError {
    fn from(err: ConfigError) -> Self {
        NodeError::Config(err)
    }
}

impl NodeError {
    pub fn from_reqwest_error(e: reqwest::Error, peer: &str) -> Self {
        if e.is_timeout() {
            NodeError::Timeout {
                peer: peer.to_string(),
            }
        } else if e.is_decode() {
            NodeError::Protocol {
                peer: peer.to_string(),
                reason: e.to_string(),
            }
        } else {
            NodeError::Unreachable {
                peer: peer.to_string(),
                reason: e.to_string(),
            }
        }
    }

    pub fn from_io_error(e: std::io::Error, context: &str) -> Self {
        NodeError::Io {
            context: context.to_string(),
            reason: e.to_string(),
        }
    }

    /// Transient failures: retried against another peer or on the next round.
    pub fn is_transient(&self) -> bool {
        match self {
            NodeError::Unreachable { .. } | NodeError::Timeout { .. } => true,
            NodeError::Remote { status, .. } => *status >= 500,
            NodeError::Cluster(e) => e.is_unreachable(),
            _ => false,
        }
    }

    /// Another consumer holds the lease, or ours ran out.
    pub fn is_lease_conflict(&self) -> bool {
        match self {
            NodeError::Remote { status, .. } => *status == 409 || *status == 410,
            NodeError::Segment(e) => e.is_lease_conflict(),
            _ => false,
        }
    }

    pub fn is_lease_expired(&self) -> bool {
        match self {
            NodeError::Remote { status, error, .. } => *status == 410 || error == "lease_expired",
            NodeError::Segment(SegmentError::LeaseExpired { .. }) => true,
            _ => false,
        }
    }
}
