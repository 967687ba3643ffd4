pub mod api;
pub mod writer;

pub use api::{IngestNode, create_router};
pub use writer::{IngestWriter, WriterConfig};
