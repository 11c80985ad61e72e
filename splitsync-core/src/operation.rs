//! Pending local mutations recorded in the operation queue.

use std::fmt;
use std::str::FromStr;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SyncError;
use crate::table::{Row, SyncTable};

/// Kind of mutation an operation represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Insert,
    Update,
    Delete,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Insert => "insert",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(OperationType::Insert),
            "update" => Ok(OperationType::Update),
            "delete" => Ok(OperationType::Delete),
            other => Err(SyncError::InvalidRow(format!(
                "unknown operation type '{}'",
                other
            ))),
        }
    }
}

/// One queued local mutation awaiting remote confirmation.
///
/// Operations are immutable: they are created by a local write and removed
/// either after a successful push or by a rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: String,
    pub operation_type: OperationType,
    pub entity_table: SyncTable,
    pub entity_id: String,
    /// Snapshot of the written fields, `id` included. Absent for deletes.
    pub changes: Option<Row>,
    /// ISO-8601 timestamp with microsecond precision; fixed width so that
    /// lexical order matches chronological order.
    pub created_at: String,
}

impl Operation {
    pub fn new(
        operation_type: OperationType,
        entity_table: SyncTable,
        entity_id: impl Into<String>,
        changes: Option<Row>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            operation_type,
            entity_table,
            entity_id: entity_id.into(),
            changes,
            created_at: now_timestamp(),
        }
    }

    pub fn insert(table: SyncTable, id: impl Into<String>, changes: Row) -> Self {
        Self::new(OperationType::Insert, table, id, Some(changes))
    }

    pub fn update(table: SyncTable, id: impl Into<String>, changes: Row) -> Self {
        Self::new(OperationType::Update, table, id, Some(changes))
    }

    pub fn delete(table: SyncTable, id: impl Into<String>) -> Self {
        Self::new(OperationType::Delete, table, id, None)
    }

    /// The changes with the entity id injected, as sent to the remote store.
    pub fn payload(&self) -> Row {
        let mut payload = self.changes.clone().unwrap_or_default();
        payload.insert(
            "id".to_string(),
            serde_json::Value::String(self.entity_id.clone()),
        );
        payload
    }
}

/// Current time as a fixed-width UTC ISO-8601 string.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
