pub mod api;
pub mod consumer;
pub mod query;

pub use api::{StoreNode, create_router};
pub use consumer::{ConsumeOutcome, Consumer, ConsumerConfig};
pub use query::{QueryResponse, UNREACHABLE_PEERS_HEADER, scatter_gather, split_lines};
