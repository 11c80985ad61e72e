//! Full-table refresh: merge a remote snapshot with pending local operations.
//!
//! The merge is remote-wins with pending operations as overrides:
//!
//! - a pending `update` overlays its changes on the remote row (local fields win);
//! - a pending `delete` keeps the remote row out of the local store;
//! - a local row missing remotely is deleted unless a pending `insert` for it
//!   has not been pushed yet.
//!
//! Overlays are a one-level field merge, so a concurrent remote edit to a
//! field this device also edited is lost (last writer wins per field).

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use super::SyncEngine;
use crate::db::{queue, rows};
use crate::error::SyncResult;
use crate::operation::{Operation, OperationType};
use crate::table::{row_id, Row, SyncTable};

/// Local writes needed to bring a table in line with a remote snapshot.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReconcilePlan {
    /// Rows to insert or replace, pending overlays applied.
    pub upserts: Vec<Row>,
    /// Ids of local rows to remove.
    pub deletes: Vec<String>,
}

/// Result of one table refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileStats {
    pub table: SyncTable,
    pub remote_rows: usize,
    pub upserted: usize,
    pub deleted: usize,
    pub elapsed: Duration,
}

fn overlay(row: &mut Row, changes: &Option<Row>) {
    if let Some(changes) = changes {
        for (key, value) in changes {
            row.insert(key.clone(), value.clone());
        }
    }
}

/// Plans the merge of `remote_rows` with the table's `pending` operations
/// (oldest first) and the ids currently stored locally.
pub fn plan_reconciliation(
    remote_rows: Vec<Row>,
    pending: &[Operation],
    local_ids: &[String],
) -> ReconcilePlan {
    let mut by_entity: HashMap<&str, Vec<&Operation>> = HashMap::new();
    for op in pending {
        by_entity.entry(op.entity_id.as_str()).or_default().push(op);
    }

    let mut plan = ReconcilePlan::default();
    let mut remote_ids = HashSet::new();

    for remote in remote_rows {
        let Some(id) = row_id(&remote).map(str::to_string) else {
            tracing::warn!("Skipping remote row without a string id");
            continue;
        };

        let mut merged = remote;
        let mut absent = false;
        for op in by_entity.get(id.as_str()).into_iter().flatten() {
            match op.operation_type {
                OperationType::Update if !absent => overlay(&mut merged, &op.changes),
                OperationType::Update => {}
                OperationType::Delete => absent = true,
                // Re-created after a pending delete.
                OperationType::Insert if absent => {
                    overlay(&mut merged, &op.changes);
                    absent = false;
                }
                // Already known remotely; the remote row is authoritative.
                OperationType::Insert => {}
            }
        }

        remote_ids.insert(id);
        if !absent {
            plan.upserts.push(merged);
        }
    }

    for local_id in local_ids {
        if remote_ids.contains(local_id) {
            continue;
        }
        let pending_insert = by_entity
            .get(local_id.as_str())
            .is_some_and(|ops| ops.iter().any(|op| op.operation_type == OperationType::Insert));
        if !pending_insert {
            plan.deletes.push(local_id.clone());
        }
    }

    plan
}

impl SyncEngine {
    /// Replaces the local contents of `table` with the remote snapshot,
    /// keeping pending local intent (see the module docs).
    ///
    /// The remote fetch happens before any local write, and all local writes
    /// share one transaction: on failure the table is left untouched.
    pub async fn sync_table_from_remote(&self, table: SyncTable) -> SyncResult<ReconcileStats> {
        self.ensure_not_disposed()?;
        let started = Instant::now();

        let remote_rows = match self.remote_call(self.remote.select(table)).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!("Failed to fetch {} from remote: {}", table, e);
                return Err(e.into());
            }
        };
        let remote_count = remote_rows.len();

        let mut tx = self.store.begin().await?;
        let pending = queue::for_table(&mut tx, table).await?;
        let local_ids = rows::list_ids(&mut tx, table).await?;
        let plan = plan_reconciliation(remote_rows, &pending, &local_ids);

        for row in &plan.upserts {
            rows::upsert_row(&mut tx, table, row).await?;
        }
        for id in &plan.deletes {
            rows::delete_row(&mut tx, table, id).await?;
        }
        tx.commit().await?;

        self.notifier.notify(table);

        let stats = ReconcileStats {
            table,
            remote_rows: remote_count,
            upserted: plan.upserts.len(),
            deleted: plan.deletes.len(),
            elapsed: started.elapsed(),
        };
        tracing::info!(
            "Synced {} from remote: {} remote row(s), {} upserted, {} deleted, {} pending op(s) in {:?}",
            table,
            stats.remote_rows,
            stats.upserted,
            stats.deleted,
            pending.len(),
            stats.elapsed
        );
        Ok(stats)
    }

    /// Refreshes every syncable table, groups before expenses.
    pub async fn sync_all_tables_from_remote(&self) -> SyncResult<Vec<ReconcileStats>> {
        let mut all = Vec::with_capacity(SyncTable::ALL.len());
        for table in SyncTable::ALL {
            all.push(self.sync_table_from_remote(table).await?);
        }
        Ok(all)
    }
}
