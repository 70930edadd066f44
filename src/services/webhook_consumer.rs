//! Delivery worker: sends block ranges to webhook URLs.
//!
//! Each job names a webhook and a cursor height. The worker posts up to
//! `max_blocks` blocks starting at the cursor, then acknowledges the job and
//! reschedules it at the next height. A failed POST leaves the job
//! unacknowledged so the backlog replays the same range; once the replays
//! reach the webhook's retry limit the range is skipped.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{BlockDocument, ParsedMessage, Webhook, WebhookJob};
use crate::domain::ports::{BlockStore, Rescheduled, WebhookRepository};
use crate::streams::{MessageHandler, SubscribeContext, SubscribeOptions, WebhookStream};

/// What the worker did with one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The webhook no longer exists; the job was dropped.
    WebhookMissing,
    /// The retry limit was reached; the job moved past its cursor.
    Skipped { next: WebhookJob, rescheduled: Rescheduled },
    /// Blocks were posted (or none were available) and the job rescheduled.
    Delivered {
        blocks: usize,
        next: WebhookJob,
        rescheduled: Rescheduled,
    },
}

pub struct WebhookConsumer {
    repository: Arc<dyn WebhookRepository>,
    blocks: Arc<dyn BlockStore>,
    stream: WebhookStream,
    client: reqwest::Client,
}

impl WebhookConsumer {
    pub fn new(
        repository: Arc<dyn WebhookRepository>,
        blocks: Arc<dyn BlockStore>,
        stream: WebhookStream,
    ) -> DomainResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("blockfeed/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DomainError::HttpClient(e.to_string()))?;

        Ok(Self {
            repository,
            blocks,
            stream,
            client,
        })
    }

    pub async fn run(self: Arc<Self>, options: &SubscribeOptions, cancel: CancellationToken) -> DomainResult<()> {
        let stream = self.stream.stream().clone();
        stream.subscribe(options, self, cancel).await
    }

    #[instrument(skip(self, message, ctx), fields(webhook_id = %message.data.webhook_id, height = message.data.block_height))]
    pub async fn process(
        &self,
        message: &ParsedMessage<WebhookJob>,
        ctx: &SubscribeContext,
    ) -> DomainResult<DeliveryOutcome> {
        let job = &message.data;

        let Some(webhook) = self.repository.get_webhook(&job.webhook_id).await? else {
            info!("webhook no longer exists, dropping job");
            self.stream.acknowledge(message).await?;
            return Ok(DeliveryOutcome::WebhookMissing);
        };

        if ctx.is_backlog {
            let pending = self.stream.stream().pending_entry(&ctx.consumer, &message.id).await?;
            if pending.retry_count() >= u64::from(webhook.max_retries) {
                let next = job.skip_one();
                warn!(
                    retries = pending.retry_count(),
                    next_height = next.block_height,
                    "retry limit reached, skipping block range"
                );
                let rescheduled = self.stream.acknowledge_and_reschedule(message, &next).await?;
                return Ok(DeliveryOutcome::Skipped { next, rescheduled });
            }
        }

        let blocks = self.fetch_blocks(&webhook, job).await?;
        let next = match blocks.last() {
            Some(last) => {
                self.post(&webhook, &blocks).await?;
                WebhookJob::at_height(job.webhook_id.clone(), last.height.saturating_add(1))
            }
            None => job.clone(),
        };

        let rescheduled = self.stream.acknowledge_and_reschedule(message, &next).await?;
        debug!(blocks = blocks.len(), next_height = next.block_height, ?rescheduled, "job finished");

        Ok(DeliveryOutcome::Delivered {
            blocks: blocks.len(),
            next,
            rescheduled,
        })
    }

    /// Blocks for one call, ascending by height.
    async fn fetch_blocks(&self, webhook: &Webhook, job: &WebhookJob) -> DomainResult<Vec<BlockDocument>> {
        let count = webhook.blocks_per_call();
        if job.is_new {
            let mut latest = self.blocks.get_latest_blocks(&webhook.blockchain_id, count).await?;
            latest.reverse();
            return Ok(latest);
        }

        let end = job.block_height.saturating_add(count - 1);
        self.blocks
            .get_blocks(&webhook.blockchain_id, job.block_height, end)
            .await
    }

    async fn post(&self, webhook: &Webhook, blocks: &[BlockDocument]) -> DomainResult<()> {
        let body: Vec<&str> = blocks.iter().map(|block| block.data.as_str()).collect();

        self.client
            .post(&webhook.url)
            .timeout(Duration::from_millis(webhook.timeout_ms))
            .json(&body)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|source| DomainError::DeliveryFailed {
                url: webhook.url.clone(),
                source,
            })?;

        debug!(url = %webhook.url, blocks = blocks.len(), "delivered blocks");
        Ok(())
    }
}

#[async_trait]
impl MessageHandler<WebhookJob> for WebhookConsumer {
    /// Every job in the batch is attempted. A failed job stays pending on its
    /// own, so its replays never count against the other jobs of the batch.
    async fn handle(&self, messages: Vec<ParsedMessage<WebhookJob>>, ctx: &SubscribeContext) -> DomainResult<()> {
        let mut first_error = None;
        for message in &messages {
            if let Err(err) = self.process(message, ctx).await {
                warn!(
                    webhook_id = %message.data.webhook_id,
                    height = message.data.block_height,
                    error = %err,
                    "delivery failed, job left for replay"
                );
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{MemoryBlockStore, MemoryStreamLog};
    use crate::adapters::sqlite::{all_embedded_migrations, create_test_pool, Migrator, SqliteWebhookRepository};
    use crate::domain::ports::stream_log::StreamLog;
    use crate::domain::ports::ReadPosition;
    use crate::streams::StreamKeys;
    use mockito::{Matcher, Server};

    const CONSUMER: &str = "c-0";

    struct Fixture {
        consumer: WebhookConsumer,
        repository: Arc<SqliteWebhookRepository>,
        log: Arc<MemoryStreamLog>,
        stream: WebhookStream,
    }

    async fn fixture(webhook: Webhook, heights: std::ops::RangeInclusive<u64>) -> Fixture {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone())
            .run_embedded_migrations(all_embedded_migrations())
            .await
            .unwrap();
        let repository = Arc::new(SqliteWebhookRepository::new(pool));
        repository.create_webhook(&webhook).await.unwrap();

        let blocks = Arc::new(MemoryBlockStore::new());
        let documents: Vec<_> = heights.map(|h| BlockDocument::new(h, format!("b{h}"))).collect();
        blocks.put_blocks(&webhook.blockchain_id, &documents).await.unwrap();

        let log = Arc::new(MemoryStreamLog::new());
        let stream = WebhookStream::new(log.clone(), &StreamKeys::new("bf", "n1"));
        stream.stream().ensure_group().await.unwrap();

        Fixture {
            consumer: WebhookConsumer::new(repository.clone(), blocks, stream.clone()).unwrap(),
            repository,
            log,
            stream,
        }
    }

    async fn enqueue(fx: &Fixture, job: WebhookJob) -> ParsedMessage<WebhookJob> {
        fx.stream.stream().append(&job).await.unwrap();
        fx.stream
            .stream()
            .read(CONSUMER, ReadPosition::New(None), 1)
            .await
            .unwrap()
            .remove(0)
    }

    async fn replay(fx: &Fixture) -> ParsedMessage<WebhookJob> {
        fx.stream
            .stream()
            .read(CONSUMER, ReadPosition::origin(), 1)
            .await
            .unwrap()
            .remove(0)
    }

    fn new_ctx() -> SubscribeContext {
        SubscribeContext::new("g", CONSUMER, false)
    }

    fn backlog_ctx() -> SubscribeContext {
        SubscribeContext::new("g", CONSUMER, true)
    }

    async fn pending_ids(fx: &Fixture) -> Vec<String> {
        fx.log
            .pending_ids(fx.stream.stream().name(), fx.stream.stream().group(), CONSUMER)
            .await
    }

    #[tokio::test]
    async fn test_new_job_posts_latest_block() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(serde_json::json!(["b5"])))
            .with_status(200)
            .create_async()
            .await;

        let webhook = Webhook::new("w1", format!("{}/hook", server.url()), "eth").with_max_blocks(1);
        let fx = fixture(webhook, 1..=5).await;
        fx.stream.flush(5).await.unwrap();

        let message = enqueue(&fx, WebhookJob::initial("w1")).await;
        let outcome = fx.consumer.process(&message, &new_ctx()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(
            outcome,
            DeliveryOutcome::Delivered {
                blocks: 1,
                next: WebhookJob::at_height("w1", 6),
                rescheduled: Rescheduled::Pending,
            }
        );
        assert_eq!(fx.stream.pending_jobs().await.unwrap(), vec![(WebhookJob::at_height("w1", 6), 6)]);
    }

    #[tokio::test]
    async fn test_range_is_posted_ascending_and_requeued_when_behind() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_body(Matcher::Json(serde_json::json!(["b2", "b3", "b4"])))
            .with_status(204)
            .create_async()
            .await;

        let webhook = Webhook::new("w1", format!("{}/hook", server.url()), "eth").with_max_blocks(3);
        let fx = fixture(webhook, 1..=9).await;
        fx.stream.flush(9).await.unwrap();

        let message = enqueue(&fx, WebhookJob::at_height("w1", 2)).await;
        let outcome = fx.consumer.process(&message, &new_ctx()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(
            outcome,
            DeliveryOutcome::Delivered {
                blocks: 3,
                next: WebhookJob::at_height("w1", 5),
                rescheduled: Rescheduled::Requeued,
            }
        );
        assert!(pending_ids(&fx).await.is_empty());
        assert_eq!(fx.log.len(fx.stream.stream().name()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_post_leaves_job_pending() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .with_status(500)
            .create_async()
            .await;

        let webhook = Webhook::new("w1", format!("{}/hook", server.url()), "eth");
        let fx = fixture(webhook, 1..=3).await;

        let message = enqueue(&fx, WebhookJob::at_height("w1", 1)).await;
        let err = fx.consumer.process(&message, &new_ctx()).await.unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, DomainError::DeliveryFailed { .. }));
        assert_eq!(pending_ids(&fx).await, vec![message.id]);
        assert!(fx.stream.pending_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retry_limit_skips_range() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .with_status(503)
            .expect(2)
            .create_async()
            .await;

        let webhook = Webhook::new("w1", format!("{}/hook", server.url()), "eth").with_max_retries(2);
        let fx = fixture(webhook, 1..=3).await;

        let message = enqueue(&fx, WebhookJob::at_height("w1", 2)).await;
        assert!(fx.consumer.process(&message, &new_ctx()).await.is_err());

        let retry = replay(&fx).await;
        assert!(fx.consumer.process(&retry, &backlog_ctx()).await.is_err());

        let last = replay(&fx).await;
        let outcome = fx.consumer.process(&last, &backlog_ctx()).await.unwrap();

        mock.assert_async().await;
        assert!(matches!(
            outcome,
            DeliveryOutcome::Skipped { ref next, .. } if *next == WebhookJob::at_height("w1", 3)
        ));
        assert!(pending_ids(&fx).await.is_empty());
    }

    #[tokio::test]
    async fn test_failing_job_does_not_hold_back_its_batch() {
        let mut server = Server::new_async().await;
        let bad = server.mock("POST", "/bad").with_status(500).expect(1).create_async().await;
        let good = server
            .mock("POST", "/good")
            .match_body(Matcher::Json(serde_json::json!(["b1"])))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let fx = fixture(
            Webhook::new("bad", format!("{}/bad", server.url()), "eth").with_max_blocks(1),
            1..=3,
        )
        .await;
        fx.repository
            .create_webhook(&Webhook::new("good", format!("{}/good", server.url()), "eth").with_max_blocks(1))
            .await
            .unwrap();
        fx.stream.flush(3).await.unwrap();

        fx.stream.stream().append(&WebhookJob::at_height("bad", 1)).await.unwrap();
        fx.stream.stream().append(&WebhookJob::at_height("good", 1)).await.unwrap();
        let batch = fx
            .stream
            .stream()
            .read(CONSUMER, ReadPosition::New(None), 10)
            .await
            .unwrap();
        assert_eq!(batch.len(), 2);
        let bad_id = batch[0].id.clone();

        let err = fx.consumer.handle(batch, &new_ctx()).await.unwrap_err();

        assert!(matches!(err, DomainError::DeliveryFailed { .. }));
        bad.assert_async().await;
        good.assert_async().await;
        assert_eq!(pending_ids(&fx).await, vec![bad_id]);
        assert_eq!(fx.log.len(fx.stream.stream().name()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_missing_webhook_drops_job() {
        let webhook = Webhook::new("w1", "http://127.0.0.1:9/hook", "eth");
        let fx = fixture(webhook, 1..=3).await;
        fx.repository.delete_webhook("w1").await.unwrap();

        let message = enqueue(&fx, WebhookJob::at_height("w1", 1)).await;
        let outcome = fx.consumer.process(&message, &new_ctx()).await.unwrap();

        assert_eq!(outcome, DeliveryOutcome::WebhookMissing);
        assert!(pending_ids(&fx).await.is_empty());
        assert!(fx.stream.pending_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_new_job_without_blocks_stays_new() {
        let webhook = Webhook::new("w1", "http://127.0.0.1:9/hook", "solana");
        let fx = fixture(webhook, 1..=0).await;

        let message = enqueue(&fx, WebhookJob::initial("w1")).await;
        let outcome = fx.consumer.process(&message, &new_ctx()).await.unwrap();

        assert_eq!(
            outcome,
            DeliveryOutcome::Delivered {
                blocks: 0,
                next: WebhookJob::initial("w1"),
                rescheduled: Rescheduled::Pending,
            }
        );
    }
}
