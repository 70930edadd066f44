//! Implementation of the `blockfeed load-balancer` command.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::cli::bootstrap::Runtime;
use crate::services::{LoadBalancer, NodePool, RetryPolicy};
use crate::streams::load_balancer_stream;

pub async fn execute(runtime: &Runtime) -> Result<()> {
    let repository = runtime.repository().await?;
    let nodes = repository.list_nodes().await?;
    let connector = runtime.node_connector();
    let pool = Arc::new(
        NodePool::connect(
            connector.as_ref(),
            &nodes,
            runtime.keys.namespace(),
            runtime.config.load_balancer.max_nodes,
        )
        .await
        .context("Failed to connect to delivery nodes")?,
    );

    let stream = load_balancer_stream(runtime.stream_log().await?, &runtime.keys);
    let balancer = Arc::new(LoadBalancer::new(
        repository,
        pool.clone(),
        stream,
        RetryPolicy::from(&runtime.config.load_balancer),
        runtime.cancel.clone(),
    ));

    runtime.cancel_on_ctrl_c();
    let result = balancer.run(&runtime.subscribe_options()).await;
    pool.shutdown().await;
    result?;

    info!("load balancer stopped");
    Ok(())
}
