//! Common test utilities for integration tests
//!
//! Provides shared fixtures, helpers, and test utilities used across
//! multiple integration test files.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use blockfeed::adapters::sqlite::{all_embedded_migrations, create_test_pool, Migrator, SqliteWebhookRepository};
use blockfeed::domain::models::{Webhook, WebhookNode};
use blockfeed::domain::ports::WebhookRepository;
use blockfeed::streams::SubscribeOptions;

/// Namespace used by every integration fixture.
#[allow(dead_code)]
pub const NAMESPACE: &str = "bf-test";

/// Migrated in-memory SQLite repository.
pub async fn repository() -> Arc<dyn WebhookRepository> {
    let pool = create_test_pool().await.expect("Failed to create test pool");
    Migrator::new(pool.clone())
        .run_embedded_migrations(all_embedded_migrations())
        .await
        .expect("Failed to run migrations");
    Arc::new(SqliteWebhookRepository::new(pool))
}

/// Register `count` nodes for `chain`, named `node-0..node-N` with
/// `memory://node-i` URLs.
#[allow(dead_code)]
pub async fn seed_nodes(repository: &Arc<dyn WebhookRepository>, chain: &str, count: usize) -> Vec<WebhookNode> {
    let mut nodes = Vec::with_capacity(count);
    for i in 0..count {
        let node = WebhookNode::new(format!("node-{i}"), format!("memory://node-{i}"), chain);
        repository.create_node(&node).await.expect("Failed to create node");
        nodes.push(node);
    }
    nodes
}

#[allow(dead_code)]
pub async fn seed_webhook(repository: &Arc<dyn WebhookRepository>, webhook: Webhook) -> Webhook {
    repository
        .create_webhook(&webhook)
        .await
        .expect("Failed to create webhook");
    webhook
}

/// Subscribe options with a short block timeout so cancelled tests exit quickly.
#[allow(dead_code)]
pub fn fast_options(name: &str, concurrency: usize) -> SubscribeOptions {
    SubscribeOptions::new(name)
        .with_concurrency(concurrency)
        .with_batch_size(5)
        .with_block_timeout(Duration::from_millis(50))
}

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
/// Call this at the beginning of tests that need logging.
#[allow(dead_code)]
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Poll an async condition every 20ms until it holds or `timeout_ms` elapses.
#[allow(dead_code)]
pub async fn wait_until<F, Fut>(mut check: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    let timeout = Duration::from_millis(timeout_ms);

    while start.elapsed() < timeout {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    check().await
}
