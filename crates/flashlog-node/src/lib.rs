//! flashlog nodes: the ingest and store HTTP APIs, the fast-write listener,
//! store consumers, scatter-gather queries, and the wiring that runs them.

pub mod cli;
pub mod error;
pub mod http;
pub mod ingest;
pub mod node;
pub mod store;
pub mod transport;

pub use error::NodeError;
pub use node::{run_ingest, run_store};
pub use transport::{HttpPeerTransport, PeerTransport};

// Re-export logging macros for consistent usage across the crate
pub use log::{debug, error, info, trace, warn};
