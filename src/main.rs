use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;

use commands::{
    open_engine, rollback_warning, ConfigCommand, ExpenseCommand, GroupCommand, QueueCommand,
    SyncCommand, WatchCommand,
};
use config::Config;
use splitsync_core::{FlushOutcome, SyncEngine};

#[derive(Parser)]
#[command(name = "splitsync")]
#[command(version)]
#[command(about = "Offline-first shared expense tracking", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage groups
    Group(GroupCommand),

    /// Record and inspect expenses
    Expense(ExpenseCommand),

    /// Show local changes waiting to be pushed
    Queue(QueueCommand),

    /// Sync with the hosted backend
    Sync(SyncCommand),

    /// Stay connected and sync continuously until Ctrl-C
    Watch(WatchCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "splitsync=info,splitsync_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = Config::load(cli.config)?;

    match &cli.command {
        Some(Commands::Config(cmd)) => {
            cmd.run(&config)?;
        }
        Some(command) => {
            let engine = open_engine(&config).await?;
            execute_command(command, &engine, &config).await?;

            // Push right away after a write; anything left stays queued.
            if is_write_command(command) {
                try_push(&engine).await;
            }
            engine.dispose();
        }
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}

async fn execute_command(
    command: &Commands,
    engine: &std::sync::Arc<SyncEngine>,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Group(cmd) => cmd.run(engine).await,
        Commands::Expense(cmd) => cmd.run(engine).await,
        Commands::Queue(cmd) => cmd.run(engine).await,
        Commands::Sync(cmd) => cmd.run(engine, config).await,
        Commands::Watch(cmd) => cmd.run(engine, config).await,
        Commands::Config(cmd) => cmd.run(config),
    }
}

/// Returns true if the command writes to the local store.
fn is_write_command(command: &Commands) -> bool {
    match command {
        Commands::Group(g) => g.command.is_write(),
        Commands::Expense(e) => e.command.is_write(),
        _ => false,
    }
}

async fn try_push(engine: &SyncEngine) {
    let outcome = match engine.process_local_operations().await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::warn!("Push after write failed: {}", e);
            return;
        }
    };

    if let Some(warning) = rollback_warning(&outcome) {
        eprintln!("Warning: {}", warning);
    }
    if let FlushOutcome::Interrupted { error, .. } = &outcome {
        tracing::info!("Changes queued, push deferred: {}", error);
    }
}
