use clap::Parser;
use flashlog_node::cli::{Cli, Commands};
use flashlog_node::{run_ingest, run_store};
use log::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    flashlog::telemetry::init(cli.debug);

    let result = match cli.command {
        Commands::Ingest(args) => match args.into_config() {
            Ok(config) => run_ingest(config).await,
            Err(e) => Err(e.into()),
        },
        Commands::Store(args) => match args.into_config() {
            Ok(config) => run_store(config).await,
            Err(e) => Err(e.into()),
        },
    };

    if let Err(e) = result {
        error!("flashlog stopped: {e}");
        std::process::exit(1);
    }
}
