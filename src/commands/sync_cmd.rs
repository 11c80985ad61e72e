//! One-shot synchronization with the hosted backend.

use clap::{Args, Subcommand};

use splitsync_core::{Connectivity, FlushOutcome, HttpProbe, SkipReason, SyncEngine, SyncTable};

use crate::config::Config;

/// Sync with the hosted backend
#[derive(Debug, Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    command: Option<SyncSubcommand>,
}

#[derive(Debug, Subcommand)]
enum SyncSubcommand {
    /// Show remote configuration, reachability and queue size
    Status,
}

impl SyncCommand {
    pub async fn run(
        &self,
        engine: &SyncEngine,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            None => {
                super::require_remote(config)?;
                self.sync(engine).await
            }
            Some(SyncSubcommand::Status) => self.status(engine, config).await,
        }
    }

    async fn sync(&self, engine: &SyncEngine) -> Result<(), Box<dyn std::error::Error>> {
        println!("Syncing with backend...");
        println!();

        for table in SyncTable::ALL {
            match engine.sync_table_from_remote(table).await {
                Ok(stats) => println!(
                    "  ✓ {} ({} remote, {} updated, {} removed)",
                    table, stats.remote_rows, stats.upserted, stats.deleted
                ),
                Err(e) => println!("  ✗ {} - {}", table, e),
            }
        }
        println!();

        let outcome = engine.process_local_operations().await?;
        match &outcome {
            FlushOutcome::Drained { applied, .. } => {
                println!("Pushed {} local change(s).", applied);
            }
            FlushOutcome::Interrupted { applied, error, .. } => {
                println!("Pushed {} local change(s), then stopped: {}", applied, error);
                println!("Remaining changes stay queued; run 'splitsync sync' again later.");
            }
            FlushOutcome::Skipped(SkipReason::Offline) => {
                println!("Backend unreachable; local changes stay queued.");
            }
            FlushOutcome::Skipped(SkipReason::AlreadyRunning) => {
                println!("Another push is in progress.");
            }
        }
        if let Some(warning) = super::rollback_warning(&outcome) {
            println!("{}.", warning);
        }

        Ok(())
    }

    async fn status(
        &self,
        engine: &SyncEngine,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        println!("Sync Status");
        println!("===========");
        println!();

        let pending = engine.pending_operations().await?.len();

        let Some(remote) = config.remote_config() else {
            println!("Remote: not configured (local-only)");
            println!("Pending changes: {}", pending);
            println!();
            println!("Set remote.url and remote.api_key in the config file to enable sync.");
            return Ok(());
        };

        let reachable = HttpProbe::new(&remote).is_reachable().await;
        println!("Remote: {}", remote.url);
        println!("Reachable: {}", if reachable { "yes" } else { "no" });
        println!("Pending changes: {}", pending);
        Ok(())
    }
}
