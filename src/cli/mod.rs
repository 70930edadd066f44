//! Command-line interface.
//!
//! Every pipeline stage runs as its own `blockfeed <command>` process so
//! stages scale independently. Worker commands run until Ctrl-C.

pub mod bootstrap;
pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::nodes::RegisterNodeArgs;

#[derive(Parser, Debug)]
#[command(name = "blockfeed")]
#[command(about = "Blockfeed - block-to-webhook delivery pipeline", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file replacing .blockfeed/config.yaml and .blockfeed/local.yaml
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply pending database migrations
    Migrate,

    /// Register a delivery node
    RegisterNode(RegisterNodeArgs),

    /// Claim registration events and forward them to delivery nodes
    LoadBalancer,

    /// Activate webhooks assigned to this node
    Activator,

    /// Deliver due block ranges to webhook URLs
    Deliver,

    /// Promote pending jobs when new block heights arrive
    Flusher,

    /// Store incoming blocks and announce their heights
    Ingest,

    /// Ask the load balancer to place and activate a webhook
    RequestActivation {
        /// Webhook id
        webhook_id: String,
    },
}

/// Print a failed command's error and exit with status 1.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let body = serde_json::json!({
            "success": false,
            "error": format!("{err:#}"),
        });
        eprintln!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_request_activation() {
        let cli = Cli::parse_from(["blockfeed", "--json", "request-activation", "w1"]);
        assert!(cli.json);
        match cli.command {
            Commands::RequestActivation { webhook_id } => assert_eq!(webhook_id, "w1"),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_global_config_after_subcommand() {
        let cli = Cli::parse_from(["blockfeed", "deliver", "--config", "node.yaml"]);
        assert!(matches!(cli.command, Commands::Deliver));
        assert_eq!(cli.config, Some(PathBuf::from("node.yaml")));
    }
}
