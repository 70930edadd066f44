//! In-process adapters, used for single-process runs and tests.

pub mod block_store;
pub mod stream_log;

pub use block_store::MemoryBlockStore;
pub use stream_log::{MemoryNodeConnector, MemoryStreamLog};
