//! Delivery worker integration tests with a live subscription and mock
//! webhook endpoints.

mod common;

use std::sync::Arc;

use blockfeed::adapters::memory::{MemoryBlockStore, MemoryStreamLog};
use blockfeed::domain::models::{BlockDocument, Webhook, WebhookJob};
use blockfeed::domain::ports::{BlockStore, WebhookRepository};
use blockfeed::services::WebhookConsumer;
use blockfeed::streams::{StreamKeys, WebhookStream};
use blockfeed::DomainResult;
use mockito::{Matcher, Server};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use common::{fast_options, repository, seed_webhook, wait_until, NAMESPACE};

struct Node {
    repository: Arc<dyn WebhookRepository>,
    webhooks: WebhookStream,
    cancel: CancellationToken,
}

async fn node(webhook: Webhook, heights: std::ops::RangeInclusive<u64>) -> (Node, JoinHandle<DomainResult<()>>) {
    let repository = repository().await;
    let chain = webhook.blockchain_id.clone();
    seed_webhook(&repository, webhook).await;

    let blocks = Arc::new(MemoryBlockStore::new());
    let documents: Vec<_> = heights.map(|h| BlockDocument::new(h, format!("b{h}"))).collect();
    blocks.put_blocks(&chain, &documents).await.unwrap();

    let log = Arc::new(MemoryStreamLog::new());
    let webhooks = WebhookStream::new(log, &StreamKeys::new(NAMESPACE, "node-0"));
    let consumer = Arc::new(WebhookConsumer::new(repository.clone(), blocks, webhooks.clone()).unwrap());

    let cancel = CancellationToken::new();
    let options = fast_options("deliver", 1);
    let handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { consumer.run(&options, cancel).await })
    };

    (
        Node {
            repository,
            webhooks,
            cancel,
        },
        handle,
    )
}

async fn wait_for_pending(webhooks: &WebhookStream, expected: Vec<(WebhookJob, u64)>) -> bool {
    wait_until(|| async { webhooks.pending_jobs().await.unwrap() == expected }, 5_000).await
}

#[tokio::test]
async fn test_lagging_job_catches_up_in_batches() {
    let mut server = Server::new_async().await;
    let mut mocks = Vec::new();
    for body in [json!(["b1", "b2"]), json!(["b3", "b4"]), json!(["b5"])] {
        mocks.push(
            server
                .mock("POST", "/hook")
                .match_body(Matcher::Json(body))
                .with_status(200)
                .expect(1)
                .create_async()
                .await,
        );
    }

    let webhook = Webhook::new("w1", format!("{}/hook", server.url()), "eth").with_max_blocks(2);
    let (node, handle) = node(webhook, 1..=5).await;

    node.webhooks.flush(5).await.unwrap();
    node.webhooks
        .stream()
        .append(&WebhookJob::at_height("w1", 1))
        .await
        .unwrap();

    // Cursor 5 has caught up with latest height 5 and parks until a higher flush.
    assert!(wait_for_pending(&node.webhooks, vec![(WebhookJob::at_height("w1", 5), 5)]).await);

    assert_eq!(node.webhooks.flush(6).await.unwrap(), 1);
    assert!(wait_for_pending(&node.webhooks, vec![(WebhookJob::at_height("w1", 6), 6)]).await);

    node.cancel.cancel();
    handle.await.unwrap().unwrap();
    for mock in mocks {
        mock.assert_async().await;
    }
}

#[tokio::test]
async fn test_failing_endpoint_skips_after_retry_limit() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/hook")
        .with_status(500)
        .expect(4)
        .create_async()
        .await;

    let webhook = Webhook::new("w1", format!("{}/hook", server.url()), "eth")
        .with_max_blocks(1)
        .with_max_retries(2);
    let (node, handle) = node(webhook, 1..=3).await;

    node.webhooks.flush(3).await.unwrap();
    node.webhooks
        .stream()
        .append(&WebhookJob::at_height("w1", 1))
        .await
        .unwrap();

    // Heights 1 and 2 are each attempted twice, then skipped.
    assert!(wait_for_pending(&node.webhooks, vec![(WebhookJob::at_height("w1", 3), 3)]).await);

    node.cancel.cancel();
    handle.await.unwrap().unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_deleted_webhook_job_is_dropped() {
    let webhook = Webhook::new("w1", "http://127.0.0.1:9/hook", "eth");
    let (node, handle) = node(webhook, 1..=3).await;
    node.repository.delete_webhook("w1").await.unwrap();

    node.webhooks.flush(3).await.unwrap();
    node.webhooks
        .stream()
        .append(&WebhookJob::at_height("w1", 1))
        .await
        .unwrap();

    let stream = node.webhooks.stream().clone();
    let dropped = wait_until(
        || async { stream.log().len(stream.name()).await.unwrap() == 0 },
        5_000,
    )
    .await;

    node.cancel.cancel();
    handle.await.unwrap().unwrap();
    assert!(dropped);
    assert!(node.webhooks.pending_jobs().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failing_webhook_leaves_batch_neighbour_untouched() {
    let mut server = Server::new_async().await;
    let bad = server
        .mock("POST", "/bad")
        .with_status(500)
        .expect(2)
        .create_async()
        .await;
    let good = server
        .mock("POST", "/good")
        .match_body(Matcher::Json(json!(["b1"])))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let bad_webhook = Webhook::new("bad", format!("{}/bad", server.url()), "eth")
        .with_max_blocks(1)
        .with_max_retries(2);
    let (node, handle) = node(bad_webhook, 1..=2).await;
    seed_webhook(
        &node.repository,
        Webhook::new("good", format!("{}/good", server.url()), "eth")
            .with_max_blocks(1)
            .with_max_retries(2),
    )
    .await;

    node.webhooks.flush(2).await.unwrap();
    node.webhooks.stream().append(&WebhookJob::at_height("bad", 1)).await.unwrap();
    node.webhooks.stream().append(&WebhookJob::at_height("good", 1)).await.unwrap();

    // Only the failing job burns retries; its neighbour is delivered once.
    assert!(
        wait_for_pending(
            &node.webhooks,
            vec![(WebhookJob::at_height("bad", 2), 2), (WebhookJob::at_height("good", 2), 2)]
        )
        .await
    );

    node.cancel.cancel();
    handle.await.unwrap().unwrap();
    bad.assert_async().await;
    good.assert_async().await;
}
