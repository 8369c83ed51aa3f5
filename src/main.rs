use clap::Parser;
use std::process;
use tokio_util::sync::CancellationToken;
use tracing::info;

use nexa_rendezvous::cli::{Cli, Commands, StartArgs};
use nexa_rendezvous::{logging, NexaError, NodeBootstrap, NodeConfig};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Start(args) => start(args).await,
    };

    if let Err(e) = result {
        eprintln!("nexa-node: {}", e);
        process::exit(1);
    }
}

async fn start(args: StartArgs) -> Result<(), NexaError> {
    let config = args.into_config()?;
    let _log_guard = logging::init(&config.logging, &config.work_dir)?;
    info!("NEXA node {}", env!("CARGO_PKG_VERSION"));

    run(config).await
}

async fn run(config: NodeConfig) -> Result<(), NexaError> {
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    ctrlc::set_handler(move || signal.cancel())?;

    let node = NodeBootstrap::new(config).start().await?;
    node.run_until(shutdown).await
}
