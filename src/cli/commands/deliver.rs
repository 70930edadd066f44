//! Implementation of the `blockfeed deliver` command.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::cli::bootstrap::Runtime;
use crate::services::WebhookConsumer;
use crate::streams::WebhookStream;

pub async fn execute(runtime: &Runtime) -> Result<()> {
    let repository = runtime.repository().await?;
    let blocks = runtime.block_store().await?;
    let stream = WebhookStream::new(runtime.stream_log().await?, &runtime.keys);
    let consumer = Arc::new(WebhookConsumer::new(repository, blocks, stream)?);

    runtime.cancel_on_ctrl_c();
    consumer
        .run(&runtime.subscribe_options(), runtime.cancel.clone())
        .await?;

    info!("delivery worker stopped");
    Ok(())
}
