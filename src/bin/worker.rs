use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use orc::{
    shutdown,
    worker::{self, Worker},
    worker_api,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start a worker and configure it using a config file.
    Config {
        /// Path to the config file.
        #[arg(short)]
        file: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { file } => {
            let worker_config = worker::Config::from_file(file).await?;
            let shutdown = shutdown::install_shutdown_handler();

            info!(name = %worker_config.name, addr = %worker_config.listen_addr, "starting worker");

            let worker = Worker::start(&worker_config, shutdown.clone())?;

            worker_api::serve(worker_config.listen_addr, worker, shutdown)
                .await
                .context("serving worker api")?;
        }
    }

    Ok(())
}
