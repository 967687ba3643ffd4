//! Error types for gossip membership.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ClusterError {
    /// A member state received from a peer could not be understood.
    InvalidMember {
        context: String,
        reason: String,
    },
    /// Binding or accepting on the gossip listener failed.
    Io {
        context: String,
        reason: String,
    },
    /// gRPC transport error.
    Transport {
        context: String,
        reason: String,
    },
    /// A probe did not complete within the ping timeout.
    Timeout {
        peer: String,
    },
}

impl fmt::Display for ClusterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterError::InvalidMember { context, reason } => {
                write!(f, "Invalid member state in {context}: {reason}")
            }
            ClusterError::Io { context, reason } => {
                write!(f, "I/O error in {context}: {reason}")
            }
            ClusterError::Transport { context, reason } => {
                write!(f, "Transport error in {context}: {reason}")
            }
            ClusterError::Timeout { peer } => write!(f, "Probe of {peer} timed out"),
        }
    }
}

impl std::error::Error for ClusterError {}

impl ClusterError {
    pub fn is_client_error(&self) -> bool {
        matches!(self, ClusterError::InvalidMember { .. })
    }

    /// Errors that mean the peer could not be reached, as opposed to a
    /// malformed exchange.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            ClusterError::Transport { .. } | ClusterError::Timeout { .. }
        )
    }

    pub fn from_io_error(e: std::io::Error, context: &str) -> Self {
        ClusterError::Io {
            context: context.to_string(),
            reason: e.to_string(),
        }
    }

    pub fn from_parse_error(e: impl fmt::Display, context: &str) -> Self {
        ClusterError::InvalidMember {
            context: context.to_string(),
            reason: e.to_string(),
        }
    }

    pub fn from_transport_error(e: impl fmt::Display, context: &str) -> Self {
        ClusterError::Transport {
            context: context.to_string(),
            reason: e.to_string(),
        }
    }
}
