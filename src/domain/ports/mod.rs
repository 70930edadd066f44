//! Port trait definitions (Hexagonal Architecture)
//!
//! - `StreamLog`: consumer-group log plus the scheduler's atomic operations
//! - `NodeConnector`: opens the stream log hosted on a delivery node
//! - `WebhookRepository`: claims, assignments and activation in the relational store
//! - `BlockStore`: block ranges served to webhooks

pub mod block_store;
pub mod stream_log;
pub mod webhook_repository;

pub use block_store::BlockStore;
pub use stream_log::{
    NodeConnector, PendingEntry, RawEntry, ReadPosition, Rescheduled, SchedulerKeys,
    StreamError, StreamLog, STREAM_ORIGIN,
};
pub use webhook_repository::WebhookRepository;
