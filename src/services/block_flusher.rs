//! Wakes parked delivery jobs when new block heights arrive.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::errors::DomainResult;
use crate::domain::models::{BlockFlushNotice, ParsedMessage};
use crate::streams::{BlockFlushStream, MessageHandler, SubscribeContext, SubscribeOptions, WebhookStream};

/// Consumes flush notices and flushes the pending set of one partition.
///
/// Only the highest height of a batch is flushed, and only when it moves past
/// the last height this flusher saw.
pub struct BlockFlusher {
    webhooks: WebhookStream,
    notices: BlockFlushStream,
    last_flushed: Mutex<Option<u64>>,
}

impl BlockFlusher {
    /// Start from the latest height already recorded for the partition.
    pub async fn new(webhooks: WebhookStream, notices: BlockFlushStream) -> DomainResult<Self> {
        let last_flushed = webhooks.latest_height().await?;
        debug!(?last_flushed, "block flusher starting");
        Ok(Self {
            webhooks,
            notices,
            last_flushed: Mutex::new(last_flushed),
        })
    }

    pub async fn run(self: Arc<Self>, options: &SubscribeOptions, cancel: CancellationToken) -> DomainResult<()> {
        let notices = self.notices.clone();
        notices.subscribe(options, self, cancel).await
    }

    pub async fn last_flushed(&self) -> Option<u64> {
        *self.last_flushed.lock().await
    }

    /// Flush up to the highest height in `messages`, then acknowledge them.
    /// Returns the number of jobs moved.
    pub async fn process(&self, messages: &[ParsedMessage<BlockFlushNotice>]) -> DomainResult<u64> {
        let mut moved = 0;

        if let Some(height) = messages.iter().map(|m| m.data.height).max() {
            let mut last_flushed = self.last_flushed.lock().await;
            if last_flushed.map_or(true, |last| height > last) {
                moved = self.webhooks.flush(height).await?;
                *last_flushed = Some(height);
                info!(height, moved, "flushed pending jobs");
            }
        }

        let ids: Vec<String> = messages.iter().map(|m| m.id.clone()).collect();
        self.notices.acknowledge(&ids).await?;
        Ok(moved)
    }
}

#[async_trait]
impl MessageHandler<BlockFlushNotice> for BlockFlusher {
    async fn handle(&self, messages: Vec<ParsedMessage<BlockFlushNotice>>, _ctx: &SubscribeContext) -> DomainResult<()> {
        self.process(&messages).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryStreamLog;
    use crate::domain::models::WebhookJob;
    use crate::domain::ports::ReadPosition;
    use crate::streams::{block_flush_stream, StreamKeys};

    async fn setup() -> (WebhookStream, BlockFlushStream) {
        let log = Arc::new(MemoryStreamLog::new());
        let keys = StreamKeys::new("bf", "n1");
        let webhooks = WebhookStream::new(log.clone(), &keys);
        let notices = block_flush_stream(log, &keys);
        notices.ensure_group().await.unwrap();
        (webhooks, notices)
    }

    async fn park(webhooks: &WebhookStream, webhook_id: &str, height: u64) {
        let id = webhooks
            .stream()
            .append(&WebhookJob::at_height(webhook_id, height))
            .await
            .unwrap();
        webhooks.stream().ensure_group().await.unwrap();
        let message = webhooks
            .stream()
            .read("c-0", ReadPosition::New(None), 10)
            .await
            .unwrap()
            .into_iter()
            .find(|m| m.id == id)
            .unwrap();
        webhooks
            .acknowledge_and_reschedule(&message, &message.data)
            .await
            .unwrap();
    }

    async fn notify(notices: &BlockFlushStream, heights: &[u64]) -> Vec<ParsedMessage<BlockFlushNotice>> {
        for height in heights {
            notices.append(&BlockFlushNotice { height: *height }).await.unwrap();
        }
        notices.read("f-0", ReadPosition::New(None), 10).await.unwrap()
    }

    #[tokio::test]
    async fn test_flushes_highest_height_of_batch() {
        let (webhooks, notices) = setup().await;
        park(&webhooks, "w1", 2).await;
        park(&webhooks, "w2", 5).await;
        park(&webhooks, "w3", 9).await;

        let flusher = BlockFlusher::new(webhooks.clone(), notices.clone()).await.unwrap();
        assert_eq!(flusher.last_flushed().await, None);

        let batch = notify(&notices, &[6, 7, 3]).await;
        assert_eq!(flusher.process(&batch).await.unwrap(), 2);
        assert_eq!(flusher.last_flushed().await, Some(7));
        assert_eq!(webhooks.latest_height().await.unwrap(), Some(7));
        assert_eq!(notices.log().len(notices.name()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stale_notice_is_acknowledged_without_flush() {
        let (webhooks, notices) = setup().await;
        webhooks.flush(10).await.unwrap();
        park(&webhooks, "w1", 12).await;

        let flusher = BlockFlusher::new(webhooks.clone(), notices.clone()).await.unwrap();
        assert_eq!(flusher.last_flushed().await, Some(10));

        let batch = notify(&notices, &[8]).await;
        assert_eq!(flusher.process(&batch).await.unwrap(), 0);
        assert_eq!(webhooks.latest_height().await.unwrap(), Some(10));
        assert_eq!(webhooks.pending_jobs().await.unwrap().len(), 1);
        assert_eq!(notices.log().len(notices.name()).await.unwrap(), 0);
    }
}
