//! Blockfeed CLI entry point.

use clap::Parser;

use blockfeed::cli::bootstrap::{load_config, Runtime};
use blockfeed::cli::{commands, Cli, Commands};
use blockfeed::infrastructure::logging::LoggerImpl;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli.command, cli.config.as_deref(), cli.json).await {
        blockfeed::cli::handle_error(err, cli.json);
    }
}

async fn run(command: Commands, config_path: Option<&std::path::Path>, json_mode: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let _logger = LoggerImpl::init(&config.logging)?;

    match command {
        Commands::Migrate => commands::migrate::execute(&config, json_mode).await,
        Commands::RegisterNode(args) => commands::nodes::execute(args, &Runtime::new(config), json_mode).await,
        Commands::RequestActivation { webhook_id } => {
            commands::request_activation::execute(webhook_id, &Runtime::new(config), json_mode).await
        }
        Commands::LoadBalancer => commands::load_balancer::execute(&Runtime::new(config)).await,
        Commands::Activator => commands::activator::execute(&Runtime::new(config)).await,
        Commands::Deliver => commands::deliver::execute(&Runtime::new(config)).await,
        Commands::Flusher => commands::flusher::execute(&Runtime::new(config)).await,
        Commands::Ingest => commands::ingest::execute(&Runtime::new(config)).await,
    }
}
