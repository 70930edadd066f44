//! Activation stream hosted on a delivery node.

use std::sync::Arc;

use super::keys::StreamKeys;
use super::reliable::ReliableStream;
use crate::domain::errors::DomainResult;
use crate::domain::models::{ActivationRequest, ParsedMessage, StreamMessage, WebhookJob};
use crate::domain::ports::StreamLog;

/// Activation requests for one node, plus the pending set they seed.
#[derive(Clone)]
pub struct ActivationStream {
    stream: ReliableStream<ActivationRequest>,
    pending_set: String,
}

impl ActivationStream {
    pub fn new(log: Arc<dyn StreamLog>, keys: &StreamKeys) -> Self {
        Self {
            stream: ReliableStream::new(log, keys.activation_stream(), keys.activation_group()),
            pending_set: keys.pending_set(),
        }
    }

    pub fn stream(&self) -> &ReliableStream<ActivationRequest> {
        &self.stream
    }

    pub async fn request(&self, webhook_id: &str) -> DomainResult<String> {
        self.stream
            .append(&ActivationRequest {
                webhook_id: webhook_id.to_string(),
            })
            .await
    }

    /// Acknowledge the request and park the webhook's first job at score 0,
    /// both or neither.
    pub async fn acknowledge_and_seed(
        &self,
        message: &ParsedMessage<ActivationRequest>,
    ) -> DomainResult<()> {
        let payload = StreamMessage::new(WebhookJob::initial(&message.data.webhook_id)).encode()?;
        self.stream
            .log()
            .ack_and_seed(
                self.stream.name(),
                self.stream.group(),
                &message.id,
                &self.pending_set,
                &payload,
            )
            .await?;
        Ok(())
    }

    pub async fn acknowledge(&self, message: &ParsedMessage<ActivationRequest>) -> DomainResult<()> {
        self.stream.acknowledge(&[message.id.clone()]).await
    }
}
