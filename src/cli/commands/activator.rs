//! Implementation of the `blockfeed activator` command.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::cli::bootstrap::Runtime;
use crate::services::Activator;
use crate::streams::ActivationStream;

pub async fn execute(runtime: &Runtime) -> Result<()> {
    let repository = runtime.repository().await?;
    let stream = ActivationStream::new(runtime.stream_log().await?, &runtime.keys);
    let activator = Arc::new(Activator::new(repository, stream));

    runtime.cancel_on_ctrl_c();
    activator
        .run(&runtime.subscribe_options(), runtime.cancel.clone())
        .await?;

    info!(partition = %runtime.config.streams.partition, "activator stopped");
    Ok(())
}
