//! Implementation of the `blockfeed flusher` command.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::cli::bootstrap::Runtime;
use crate::services::BlockFlusher;
use crate::streams::{block_flush_stream, WebhookStream};

pub async fn execute(runtime: &Runtime) -> Result<()> {
    let log = runtime.stream_log().await?;
    let webhooks = WebhookStream::new(log.clone(), &runtime.keys)
        .with_flush_order(runtime.config.streams.flush_order);
    let flusher = Arc::new(BlockFlusher::new(webhooks, block_flush_stream(log, &runtime.keys)).await?);

    // Heights must be flushed in order, so the flusher never fans out.
    let options = runtime.subscribe_options().with_concurrency(1);

    runtime.cancel_on_ctrl_c();
    flusher.clone().run(&options, runtime.cancel.clone()).await?;

    info!(last_flushed = ?flusher.last_flushed().await, "flusher stopped");
    Ok(())
}
