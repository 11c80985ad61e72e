//! Queue drain against the remote store.

use std::sync::atomic::Ordering;

use super::SyncEngine;
use crate::db::{queue, rows};
use crate::error::{SyncError, SyncResult};
use crate::operation::{Operation, OperationType};
use crate::remote::RemoteError;

/// Why a flush did not touch the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyRunning,
    Offline,
}

/// What a call to [`SyncEngine::process_local_operations`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum FlushOutcome {
    Skipped(SkipReason),
    /// The queue is empty, or the engine was disposed mid-drain.
    Drained { applied: usize, rolled_back: usize },
    /// Stopped at a transient failure; the failed operation is still queued.
    Interrupted {
        applied: usize,
        rolled_back: usize,
        error: RemoteError,
    },
}

impl FlushOutcome {
    /// Operations the remote store rejected and that were reverted locally.
    pub fn rolled_back(&self) -> usize {
        match self {
            FlushOutcome::Skipped(_) => 0,
            FlushOutcome::Drained { rolled_back, .. }
            | FlushOutcome::Interrupted { rolled_back, .. } => *rolled_back,
        }
    }
}

/// Clears the flushing flag when the drain ends, however it ends.
struct FlushGuard<'a> {
    engine: &'a SyncEngine,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.engine.flushing.store(false, Ordering::SeqCst);
    }
}

impl SyncEngine {
    fn try_start_flush(&self) -> Option<FlushGuard<'_>> {
        self.flushing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| FlushGuard { engine: self })
    }

    /// Drains the operation queue in creation order.
    ///
    /// Returns immediately if another drain is running or the remote store is
    /// unreachable. A fatally rejected operation is rolled back and the drain
    /// continues; a transient failure stops it with the operation still queued.
    pub async fn process_local_operations(&self) -> SyncResult<FlushOutcome> {
        self.ensure_not_disposed()?;

        let Some(_guard) = self.try_start_flush() else {
            tracing::debug!("Flush already running, skipping");
            return Ok(FlushOutcome::Skipped(SkipReason::AlreadyRunning));
        };

        if !self.connectivity.is_reachable().await {
            tracing::debug!("Remote store unreachable, deferring flush");
            return Ok(FlushOutcome::Skipped(SkipReason::Offline));
        }

        let mut applied = 0;
        let mut rolled_back = 0;

        loop {
            if self.is_disposed() {
                tracing::debug!("Engine disposed, abandoning flush");
                break;
            }

            let next = {
                let mut conn = self.store.pool().acquire().await?;
                queue::next(&mut conn).await?
            };
            let Some(op) = next else {
                break;
            };

            match self.push(&op).await {
                Ok(()) => {
                    let mut conn = self.store.pool().acquire().await?;
                    queue::remove(&mut conn, &op.id).await?;
                    applied += 1;
                    tracing::debug!(
                        "Pushed {} {}/{} ({})",
                        op.operation_type,
                        op.entity_table,
                        op.entity_id,
                        op.id
                    );
                }
                Err(e) if e.is_fatal() => {
                    tracing::warn!(
                        "Remote rejected {} {}/{}: {}; rolling back",
                        op.operation_type,
                        op.entity_table,
                        op.entity_id,
                        e
                    );
                    match self.rollback(&op).await {
                        Ok(()) => rolled_back += 1,
                        Err(SyncError::Remote(error)) => {
                            tracing::warn!("Rollback of {} deferred: {}", op.id, error);
                            return Ok(FlushOutcome::Interrupted {
                                applied,
                                rolled_back,
                                error,
                            });
                        }
                        Err(other) => return Err(other),
                    }
                }
                Err(error) => {
                    tracing::warn!(
                        "Flush stopped at {} {}/{}: {}",
                        op.operation_type,
                        op.entity_table,
                        op.entity_id,
                        error
                    );
                    return Ok(FlushOutcome::Interrupted {
                        applied,
                        rolled_back,
                        error,
                    });
                }
            }
        }

        if applied > 0 || rolled_back > 0 {
            tracing::info!(
                "Flushed queue: {} applied, {} rolled back",
                applied,
                rolled_back
            );
        }
        Ok(FlushOutcome::Drained {
            applied,
            rolled_back,
        })
    }

    async fn push(&self, op: &Operation) -> Result<(), RemoteError> {
        let table = op.entity_table;
        match op.operation_type {
            OperationType::Insert => {
                let row = op.payload();
                self.remote_call(self.remote.insert(table, &row)).await
            }
            OperationType::Update => {
                let fields = op.changes.clone().unwrap_or_default();
                self.remote_call(self.remote.update(table, &op.entity_id, &fields))
                    .await
            }
            OperationType::Delete => {
                self.remote_call(self.remote.delete(table, &op.entity_id))
                    .await
            }
        }
    }

    /// Undoes the local effect of a rejected operation.
    ///
    /// The local row is replaced by the current remote row, or removed when
    /// the remote store has none, and the operation leaves the queue, all in
    /// one transaction.
    pub async fn rollback(&self, op: &Operation) -> SyncResult<()> {
        let table = op.entity_table;
        let remote_row = self
            .remote_call(self.remote.select_one(table, &op.entity_id))
            .await?;

        let mut tx = self.store.begin().await?;
        match &remote_row {
            Some(row) => rows::upsert_row(&mut tx, table, row).await?,
            None => {
                rows::delete_row(&mut tx, table, &op.entity_id).await?;
            }
        }
        queue::remove(&mut tx, &op.id).await?;
        tx.commit().await?;

        tracing::info!(
            "Rolled back {} {}/{} to {}",
            op.operation_type,
            table,
            op.entity_id,
            if remote_row.is_some() { "remote row" } else { "absent" }
        );
        self.notifier.notify(table);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteCall;
    use crate::sync::test_support::{group_row, TestEngine};
    use crate::table::SyncTable;
    use serde_json::json;

    #[tokio::test]
    async fn test_empty_queue_drains_to_nothing() {
        let t = TestEngine::new().await;
        let outcome = t.engine.process_local_operations().await.unwrap();
        assert_eq!(
            outcome,
            FlushOutcome::Drained {
                applied: 0,
                rolled_back: 0
            }
        );
        assert!(t.remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_offline_skips_without_remote_calls() {
        let t = TestEngine::new().await;
        t.engine
            .insert(SyncTable::Groups, "g1", group_row("g1", "Trip"))
            .await
            .unwrap();
        t.connectivity.set_online(false);

        let outcome = t.engine.process_local_operations().await.unwrap();
        assert_eq!(outcome, FlushOutcome::Skipped(SkipReason::Offline));
        assert!(t.remote.calls().is_empty());
        assert_eq!(t.engine.pending_operations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_flush_is_noop() {
        let t = TestEngine::new().await;
        let _running = t.engine.try_start_flush().unwrap();

        let outcome = t.engine.process_local_operations().await.unwrap();
        assert_eq!(outcome, FlushOutcome::Skipped(SkipReason::AlreadyRunning));
    }

    #[tokio::test]
    async fn test_guard_released_after_flush() {
        let t = TestEngine::new().await;
        t.engine.process_local_operations().await.unwrap();
        assert!(t.engine.try_start_flush().is_some());
    }

    #[tokio::test]
    async fn test_update_pushes_changes_only() {
        let t = TestEngine::new().await;
        t.remote.seed(SyncTable::Groups, group_row("g1", "Trip"));
        t.engine.sync_table_from_remote(SyncTable::Groups).await.unwrap();
        t.remote.clear_calls();

        let fields = json!({ "name": "Renamed" }).as_object().cloned().unwrap();
        t.engine.update(SyncTable::Groups, "g1", fields).await.unwrap();
        t.engine.process_local_operations().await.unwrap();

        assert_eq!(
            t.remote.calls(),
            vec![RemoteCall::Update(SyncTable::Groups, "g1".into())]
        );
        let remote = t.remote.row(SyncTable::Groups, "g1").unwrap();
        assert_eq!(remote["name"], json!("Renamed"));
        assert_eq!(remote["currency"], json!("EUR"));
    }

    #[tokio::test]
    async fn test_rollback_of_rejected_insert_removes_local_row() {
        let t = TestEngine::new().await;
        t.engine
            .insert(SyncTable::Groups, "g1", group_row("g1", "Trip"))
            .await
            .unwrap();
        t.remote
            .fail_next(RemoteError::with_code("42501", "row-level security"));

        let outcome = t.engine.process_local_operations().await.unwrap();
        assert_eq!(
            outcome,
            FlushOutcome::Drained {
                applied: 0,
                rolled_back: 1
            }
        );
        assert!(t.engine.get_row(SyncTable::Groups, "g1").await.unwrap().is_none());
        assert!(t.engine.pending_operations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_restores_rejected_delete() {
        let t = TestEngine::new().await;
        t.remote.seed(SyncTable::Groups, group_row("g1", "Trip"));
        t.engine.sync_table_from_remote(SyncTable::Groups).await.unwrap();

        t.engine.delete(SyncTable::Groups, "g1").await.unwrap();
        t.remote
            .fail_next(RemoteError::with_code("23503", "still referenced"));
        t.engine.process_local_operations().await.unwrap();

        let restored = t.engine.get_row(SyncTable::Groups, "g1").await.unwrap();
        assert_eq!(restored.unwrap()["name"], json!("Trip"));
    }

    #[tokio::test]
    async fn test_failed_rollback_fetch_keeps_operation() {
        let t = TestEngine::new().await;
        t.engine
            .insert(SyncTable::Groups, "g1", group_row("g1", "Trip"))
            .await
            .unwrap();
        t.remote.fail_next(RemoteError::with_code("23505", "duplicate"));
        t.remote.fail_next(RemoteError::network("connection reset"));

        let outcome = t.engine.process_local_operations().await.unwrap();
        assert!(matches!(
            outcome,
            FlushOutcome::Interrupted { applied: 0, rolled_back: 0, .. }
        ));
        assert_eq!(t.engine.pending_operations().await.unwrap().len(), 1);
        assert!(t.engine.get_row(SyncTable::Groups, "g1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rollback_counted_when_later_operation_interrupts() {
        let t = TestEngine::new().await;
        t.engine
            .insert(SyncTable::Groups, "g1", group_row("g1", "Rejected"))
            .await
            .unwrap();
        t.engine
            .insert(SyncTable::Groups, "g2", group_row("g2", "Deferred"))
            .await
            .unwrap();
        t.remote.fail_next(RemoteError::with_code("42501", "permission denied"));
        t.remote.fail_call(
            RemoteCall::Insert(SyncTable::Groups, "g2".into()),
            RemoteError::network("connection reset"),
        );

        let outcome = t.engine.process_local_operations().await.unwrap();
        assert!(matches!(
            outcome,
            FlushOutcome::Interrupted { applied: 0, rolled_back: 1, .. }
        ));
        assert_eq!(outcome.rolled_back(), 1);
        assert_eq!(FlushOutcome::Skipped(SkipReason::Offline).rolled_back(), 0);
    }

    #[tokio::test]
    async fn test_flush_after_dispose_is_rejected() {
        let t = TestEngine::new().await;
        t.engine.dispose();
        assert!(matches!(
            t.engine.process_local_operations().await,
            Err(SyncError::Disposed)
        ));
    }
}
