//! The sync engine.
//!
//! [`SyncEngine`] owns the local store, the remote store client and the
//! change notifier. Local writes are committed together with a queued
//! [`Operation`](crate::operation::Operation); the scheduler drains the queue
//! against the remote store ([`flush`]), full-table refreshes merge remote
//! snapshots with pending operations ([`reconcile`]), and realtime events are
//! applied directly.

mod engine;
pub mod flush;
mod notifier;
pub mod reconcile;
mod scheduler;

pub use engine::{EngineConfig, EngineState, SyncEngine};
pub use flush::{FlushOutcome, SkipReason};
pub use notifier::{ChangeNotifier, ListenerId};
pub use reconcile::{plan_reconciliation, ReconcilePlan, ReconcileStats};

#[cfg(test)]
pub(crate) mod test_support {
    use std::future::Future;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use tempfile::TempDir;

    use super::{EngineConfig, SyncEngine};
    use crate::db::LocalStore;
    use crate::remote::{MemoryRemote, StaticConnectivity};
    use crate::table::Row;

    pub struct TestEngine {
        pub engine: Arc<SyncEngine>,
        pub remote: Arc<MemoryRemote>,
        pub connectivity: Arc<StaticConnectivity>,
        _temp_dir: TempDir,
    }

    impl TestEngine {
        pub async fn new() -> Self {
            Self::with_config(EngineConfig::default()).await
        }

        pub async fn with_config(config: EngineConfig) -> Self {
            let temp_dir = TempDir::new().unwrap();
            let store = LocalStore::open(&temp_dir.path().join("test.db"))
                .await
                .unwrap();
            let remote = Arc::new(MemoryRemote::new());
            let connectivity = Arc::new(StaticConnectivity::new(true));
            let engine = SyncEngine::new(store, remote.clone(), connectivity.clone(), config);
            Self {
                engine,
                remote,
                connectivity,
                _temp_dir: temp_dir,
            }
        }
    }

    pub fn group_row(id: &str, name: &str) -> Row {
        json!({
            "id": id,
            "name": name,
            "currency": "EUR",
            "members": "[\"Ana\",\"Ben\"]",
            "createdAt": "2024-01-01T00:00:00.000Z",
            "updatedAt": "2024-01-01T00:00:00.000Z",
            "deletedAt": null
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    pub fn expense_row(id: &str, group_id: &str) -> Row {
        json!({
            "id": id,
            "groupId": group_id,
            "title": "Lunch",
            "payerName": "Ana",
            "splitExpense": "{\"Ana\":10,\"Ben\":10}",
            "createdAt": "2024-01-01T00:00:00.000Z",
            "updatedAt": "2024-01-01T00:00:00.000Z",
            "deletedAt": null,
            "receipt": null
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    /// Polls `check` until it holds, failing the test after five seconds.
    pub async fn wait_until<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for _ in 0..250 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not met within 5s");
    }
}
