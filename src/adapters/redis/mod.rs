//! Redis adapters for the stream log, node connections and block cache.

pub mod block_store;
pub mod scripts;
pub mod stream_log;

pub use block_store::RedisBlockStore;
pub use stream_log::{RedisNodeConnector, RedisStreamLog};
