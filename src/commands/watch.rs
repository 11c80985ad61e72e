//! Long-running mode: keeps the engine alive until interrupted.

use chrono::Local;
use clap::Args;
use std::sync::Arc;

use splitsync_core::{SyncEngine, SyncTable};

use crate::config::Config;

/// Stay connected, pushing local changes and applying remote ones until Ctrl-C
#[derive(Args)]
pub struct WatchCommand {
    /// Do not print change notifications
    #[arg(long, short)]
    quiet: bool,
}

impl WatchCommand {
    pub async fn run(
        &self,
        engine: &Arc<SyncEngine>,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        super::require_remote(config)?;

        let listeners: Vec<_> = if self.quiet {
            Vec::new()
        } else {
            SyncTable::ALL
                .into_iter()
                .map(|table| {
                    engine.notifier().watch(table, |table| {
                        println!("[{}] {} changed", Local::now().format("%H:%M:%S"), table);
                    })
                })
                .collect()
        };

        engine.init().await?;
        println!("Watching for changes. Press Ctrl-C to stop.");

        tokio::signal::ctrl_c().await?;
        println!();

        for id in listeners {
            engine.notifier().unwatch(id);
        }
        engine.dispose();

        let pending = engine.pending_operations().await?.len();
        if pending > 0 {
            println!("Stopped with {} change(s) still queued.", pending);
        } else {
            println!("Stopped.");
        }
        Ok(())
    }
}
