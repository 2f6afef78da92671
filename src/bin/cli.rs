use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use orc::{client::WorkerClient, definition::Definition};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Address of the manager api, `host:port`.
    #[arg(long, default_value = "127.0.0.1:5555", global = true)]
    manager: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Apply a file containing a task definition to schedule the task.
    Apply {
        /// Path to file containing the task definition.
        #[arg(short)]
        file: String,
    },
    /// List the tasks known to the manager.
    Status,
    /// Stop a task.
    Stop {
        task_id: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The manager api exposes the same task routes as the workers.
    let client = WorkerClient::new(Duration::from_secs(5))?;

    match cli.command {
        Commands::Apply { file } => {
            let definition = Definition::from_file(&file)
                .await
                .with_context(|| format!("reading task definition {file}"))?;

            let event = client.send_task(&cli.manager, &definition.into_event()).await?;

            println!("task {} ({}) submitted", event.task.id, event.task.name);
        }
        Commands::Status => {
            let tasks = client.get_tasks(&cli.manager).await?;

            println!(
                "{:<36}  {:<20}  {:<10}  {:>8}  CONTAINER",
                "ID", "NAME", "STATE", "RESTARTS"
            );
            for task in tasks {
                println!(
                    "{:<36}  {:<20}  {:<10}  {:>8}  {}",
                    task.id,
                    task.name,
                    task.state.to_string(),
                    task.restart_count,
                    task.container_id.as_deref().unwrap_or("-")
                );
            }
        }
        Commands::Stop { task_id } => {
            client.stop_task(&cli.manager, task_id).await?;

            println!("task {task_id} is being stopped");
        }
    }

    Ok(())
}
