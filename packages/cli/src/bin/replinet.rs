use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use replinet_cli::{logging, Orchestrator};
use replinet_config::Settings;
use std::process;
use tracing::info;

mod cli;

use cli::queue::QueueCommands;
use cli::state::StateCommands;

#[derive(Parser)]
#[command(name = "replinet")]
#[command(about = "Replinet - sandbox orchestration for browser agents")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestrator until interrupted (Ctrl-C)
    Serve,
    /// Manage task queues
    #[command(subcommand)]
    Queue(QueueCommands),
    /// Inspect the shared state store
    #[command(subcommand)]
    State(StateCommands),
}

#[tokio::main]
async fn main() {
    logging::init();
    let cli = Cli::parse();

    if let Err(e) = handle_command(cli.command).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

async fn handle_command(command: Commands) -> Result<()> {
    let settings = Settings::load().context("Failed to load settings")?;

    match command {
        Commands::Serve => serve(settings).await,
        Commands::Queue(queue_cmd) => queue_cmd.execute(&settings).await,
        Commands::State(state_cmd) => state_cmd.execute(&settings).await,
    }
}

async fn serve(settings: Settings) -> Result<()> {
    let orchestrator = Orchestrator::connect(settings)
        .await
        .context("Failed to start orchestrator")?;

    println!(
        "{} (max {} sandboxes, {}s timeout)",
        "Replinet orchestrator running".green().bold(),
        orchestrator.settings().max_browser_instances,
        orchestrator.settings().browser_timeout_secs
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    let stopped = orchestrator.shutdown().await;
    println!("{} ({} sandboxes stopped)", "Stopped".yellow().bold(), stopped);
    Ok(())
}
