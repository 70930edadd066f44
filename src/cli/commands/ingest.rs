//! Implementation of the `blockfeed ingest` command.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::cli::bootstrap::Runtime;
use crate::services::BlockIngester;
use crate::streams::{block_flush_stream, block_stream};

pub async fn execute(runtime: &Runtime) -> Result<()> {
    let log = runtime.stream_log().await?;
    let ingester = Arc::new(BlockIngester::new(
        runtime.config.chain.chain_id.clone(),
        runtime.block_store().await?,
        block_stream(log.clone(), &runtime.keys),
        block_flush_stream(log, &runtime.keys),
    ));

    let options = runtime.subscribe_options().with_concurrency(1);

    runtime.cancel_on_ctrl_c();
    ingester.run(&options, runtime.cancel.clone()).await?;

    info!(chain_id = %runtime.config.chain.chain_id, "ingester stopped");
    Ok(())
}
