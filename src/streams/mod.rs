//! Typed streams built on the stream log port.

pub mod activation_stream;
pub mod keys;
pub mod reliable;
pub mod webhook_stream;

use std::sync::Arc;

pub use activation_stream::ActivationStream;
pub use keys::StreamKeys;
pub use reliable::{MessageHandler, ReliableStream, SubscribeContext, SubscribeOptions};
pub use webhook_stream::WebhookStream;

use crate::domain::errors::DomainResult;
use crate::domain::models::{BlockDocument, BlockFlushNotice, LoadBalancerRequest};
use crate::domain::ports::StreamLog;

/// Registration events waiting for a node assignment.
pub type LoadBalancerStream = ReliableStream<LoadBalancerRequest>;

/// Raw blocks waiting to be written to the block store.
pub type BlockStream = ReliableStream<BlockDocument>;

/// Heights that became available in the block store.
pub type BlockFlushStream = ReliableStream<BlockFlushNotice>;

pub fn load_balancer_stream(log: Arc<dyn StreamLog>, keys: &StreamKeys) -> LoadBalancerStream {
    ReliableStream::new(log, keys.load_balancer_stream(), keys.load_balancer_group())
}

pub fn block_stream(log: Arc<dyn StreamLog>, keys: &StreamKeys) -> BlockStream {
    ReliableStream::new(log, keys.block_stream(), keys.block_group())
}

pub fn block_flush_stream(log: Arc<dyn StreamLog>, keys: &StreamKeys) -> BlockFlushStream {
    ReliableStream::new(log, keys.block_flush_stream(), keys.block_flush_group())
}

/// Ask the load balancer to place and activate a webhook.
pub async fn request_activation(stream: &LoadBalancerStream, webhook_id: &str) -> DomainResult<String> {
    stream
        .append(&LoadBalancerRequest {
            webhook_id: webhook_id.to_string(),
        })
        .await
}
