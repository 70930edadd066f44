//! Delivery stream plus the pending scheduler that feeds it.

use std::sync::Arc;
use tracing::debug;

use super::keys::StreamKeys;
use super::reliable::ReliableStream;
use crate::domain::errors::DomainResult;
use crate::domain::models::{FlushOrder, ParsedMessage, StreamMessage, WebhookJob};
use crate::domain::ports::{Rescheduled, SchedulerKeys, StreamLog};

/// The webhook job stream of one node and its height-ordered pending set.
///
/// Jobs that have caught up with the chain wait in the pending set scored by
/// their cursor height. [`WebhookStream::flush`] moves every job behind a new
/// height back onto the stream in one atomic step.
#[derive(Clone)]
pub struct WebhookStream {
    stream: ReliableStream<WebhookJob>,
    keys: SchedulerKeys,
    flush_order: FlushOrder,
}

impl WebhookStream {
    pub fn new(log: Arc<dyn StreamLog>, keys: &StreamKeys) -> Self {
        Self {
            stream: ReliableStream::new(log, keys.webhook_stream(), keys.webhook_group()),
            keys: keys.scheduler(),
            flush_order: FlushOrder::default(),
        }
    }

    pub fn with_flush_order(mut self, flush_order: FlushOrder) -> Self {
        self.flush_order = flush_order;
        self
    }

    pub fn flush_order(&self) -> FlushOrder {
        self.flush_order
    }

    pub fn stream(&self) -> &ReliableStream<WebhookJob> {
        &self.stream
    }

    pub fn keys(&self) -> &SchedulerKeys {
        &self.keys
    }

    /// Record `height` as the latest block and release every job behind it.
    pub async fn flush(&self, height: u64) -> DomainResult<u64> {
        let moved = self
            .stream
            .log()
            .flush(&self.keys, height, self.flush_order)
            .await?;
        debug!(height, moved, "flushed pending jobs");
        Ok(moved)
    }

    /// Acknowledge `old` and schedule `next`: parked if caught up with the
    /// latest height, otherwise straight back onto the stream.
    pub async fn acknowledge_and_reschedule(
        &self,
        old: &ParsedMessage<WebhookJob>,
        next: &WebhookJob,
    ) -> DomainResult<Rescheduled> {
        let payload = StreamMessage::new(next).encode()?;
        Ok(self
            .stream
            .log()
            .ack_and_reschedule(&self.keys, &old.id, next.block_height, &payload)
            .await?)
    }

    /// Acknowledge and drop a job for good.
    pub async fn acknowledge(&self, old: &ParsedMessage<WebhookJob>) -> DomainResult<()> {
        self.stream.acknowledge(&[old.id.clone()]).await
    }

    pub async fn latest_height(&self) -> DomainResult<Option<u64>> {
        Ok(self.stream.log().latest_height(&self.keys.latest_height).await?)
    }

    /// Jobs parked in the pending set with their scores, lowest first.
    pub async fn pending_jobs(&self) -> DomainResult<Vec<(WebhookJob, u64)>> {
        let members = self.stream.log().pending_jobs(&self.keys.pending_set).await?;
        members
            .into_iter()
            .map(|(member, score)| {
                StreamMessage::<WebhookJob>::decode(&member).map(|message| (message.data, score))
            })
            .collect()
    }
}
