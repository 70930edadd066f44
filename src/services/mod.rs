//! Pipeline workers and the pieces they share.

pub mod activator;
pub mod block_flusher;
pub mod block_ingester;
pub mod load_balancer;
pub mod node_pool;
pub mod retry;
pub mod webhook_consumer;

pub use activator::Activator;
pub use block_flusher::BlockFlusher;
pub use block_ingester::BlockIngester;
pub use load_balancer::{BalanceOutcome, LoadBalancer};
pub use node_pool::NodePool;
pub use retry::RetryPolicy;
pub use webhook_consumer::{DeliveryOutcome, WebhookConsumer};
