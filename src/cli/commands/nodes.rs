//! Implementation of the `blockfeed register-node` command.

use anyhow::{Context, Result};
use clap::Args;

use crate::cli::bootstrap::Runtime;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::WebhookNode;

#[derive(Args, Debug)]
pub struct RegisterNodeArgs {
    /// Node id; also the partition of the node's stream keys
    pub id: String,

    /// Stream store URL of the node
    pub url: String,

    /// Chain served by the node (defaults to the configured chain)
    #[arg(long)]
    pub chain: Option<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct RegisterNodeOutput {
    pub node: WebhookNode,
    pub total_nodes: u64,
}

impl CommandOutput for RegisterNodeOutput {
    fn to_human(&self) -> String {
        format!(
            "Registered node {} ({}) for chain {}; {} node(s) registered",
            self.node.id, self.node.url, self.node.blockchain_id, self.total_nodes
        )
    }
}

pub async fn execute(args: RegisterNodeArgs, runtime: &Runtime, json_mode: bool) -> Result<()> {
    let chain = args.chain.unwrap_or_else(|| runtime.config.chain.chain_id.clone());
    let node = WebhookNode::new(args.id, args.url, chain);

    let repository = runtime.repository().await?;
    repository
        .create_node(&node)
        .await
        .with_context(|| format!("Failed to register node {}", node.id))?;
    let total_nodes = repository.count_nodes().await?;

    output(&RegisterNodeOutput { node, total_nodes }, json_mode);
    Ok(())
}
