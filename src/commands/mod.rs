mod config_cmd;
mod expense;
mod group;
mod queue;
mod sync_cmd;
mod watch;

pub use config_cmd::ConfigCommand;
pub use expense::{ExpenseCommand, ExpenseSubcommand};
pub use group::{GroupCommand, GroupSubcommand};
pub use queue::QueueCommand;
pub use sync_cmd::SyncCommand;
pub use watch::WatchCommand;

use clap::ValueEnum;
use std::sync::Arc;

use splitsync_core::{
    Connectivity, FlushOutcome, HttpProbe, LocalStore, MemoryRemote, RemoteStore, RestRemote,
    StaticConnectivity, SyncEngine,
};

use crate::config::Config;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Opens the local store and builds an engine around it.
///
/// Without a configured backend the engine runs local-only: writes are
/// queued and every flush is skipped as offline.
pub async fn open_engine(config: &Config) -> Result<Arc<SyncEngine>, Box<dyn std::error::Error>> {
    let store = LocalStore::open(&config.database_path.value).await?;

    let (remote, connectivity): (Arc<dyn RemoteStore>, Arc<dyn Connectivity>) =
        match config.remote_config() {
            Some(remote_config) => {
                let probe = HttpProbe::new(&remote_config);
                (Arc::new(RestRemote::new(remote_config)), Arc::new(probe))
            }
            None => {
                tracing::debug!("No remote configured, running local-only");
                (
                    Arc::new(MemoryRemote::new()),
                    Arc::new(StaticConnectivity::new(false)),
                )
            }
        };

    Ok(SyncEngine::new(
        store,
        remote,
        connectivity,
        config.engine_config(),
    ))
}

pub(crate) fn require_remote(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    if config.remote.is_configured() {
        Ok(())
    } else {
        Err("No remote configured. Set remote.url and remote.api_key in the config file \
             (or SPLITSYNC_REMOTE_URL and SPLITSYNC_API_KEY)"
            .into())
    }
}

/// Message for changes the backend rejected during `outcome`, if any.
pub(crate) fn rollback_warning(outcome: &FlushOutcome) -> Option<String> {
    match outcome.rolled_back() {
        0 => None,
        n => Some(format!("{} change(s) were rejected by the backend and rolled back", n)),
    }
}

/// Shortens `s` to `width` characters for table output.
pub(crate) fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let kept: String = s.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", kept)
    } else {
        s.to_string()
    }
}
