//! Implementation of the `blockfeed request-activation` command.

use anyhow::Result;

use crate::cli::bootstrap::Runtime;
use crate::cli::output::{output, CommandOutput};
use crate::streams::{load_balancer_stream, request_activation};

#[derive(Debug, serde::Serialize)]
pub struct RequestActivationOutput {
    pub webhook_id: String,
    pub entry_id: String,
}

impl CommandOutput for RequestActivationOutput {
    fn to_human(&self) -> String {
        format!("Requested activation of {} (entry {})", self.webhook_id, self.entry_id)
    }
}

pub async fn execute(webhook_id: String, runtime: &Runtime, json_mode: bool) -> Result<()> {
    let stream = load_balancer_stream(runtime.stream_log().await?, &runtime.keys);
    let entry_id = request_activation(&stream, &webhook_id).await?;

    output(&RequestActivationOutput { webhook_id, entry_id }, json_mode);
    Ok(())
}
