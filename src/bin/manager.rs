use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use orc::{
    manager::{Config, Manager},
    manager_api, shutdown,
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
    /// Start the manager and configure it using a config file.
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
            let config = Config::from_file(&file).await?;
            let shutdown = shutdown::install_shutdown_handler();

            info!(addr = %config.listen_addr, workers = ?config.workers, "starting manager");

            let manager = Manager::start(&config, shutdown.clone())?;

            manager_api::serve(config.listen_addr, manager, shutdown)
                .await
                .context("serving manager api")?;
        }
    }

    Ok(())
}
