//! Syncable tables and the row representation shared by the local and remote stores.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// A table row keyed by column name.
///
/// Rows travel between the local store, the operation queue and the remote
/// store as JSON objects, so the engine never needs to know a table's field
/// types. Typed access lives in [`crate::models`].
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Tables mirrored against the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncTable {
    Groups,
    Expenses,
}

const GROUP_COLUMNS: &[&str] = &[
    "id",
    "name",
    "currency",
    "members",
    "createdAt",
    "updatedAt",
    "deletedAt",
];

const EXPENSE_COLUMNS: &[&str] = &[
    "id",
    "groupId",
    "title",
    "payerName",
    "splitExpense",
    "createdAt",
    "updatedAt",
    "deletedAt",
    "receipt",
];

impl SyncTable {
    /// Every syncable table, in refresh order.
    pub const ALL: [SyncTable; 2] = [SyncTable::Groups, SyncTable::Expenses];

    /// Table name, identical locally and remotely.
    pub fn name(&self) -> &'static str {
        match self {
            SyncTable::Groups => "groups",
            SyncTable::Expenses => "expenses",
        }
    }

    /// Columns of the local table. `id` is always first.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            SyncTable::Groups => GROUP_COLUMNS,
            SyncTable::Expenses => EXPENSE_COLUMNS,
        }
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns().contains(&column)
    }

    /// Rejects any field that is not a column of this table.
    pub fn check_columns(&self, fields: &Row) -> Result<(), SyncError> {
        match fields.keys().find(|key| !self.has_column(key)) {
            Some(column) => Err(SyncError::UnknownColumn {
                table: *self,
                column: column.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Keeps only the fields that are columns of this table.
    ///
    /// Remote rows may carry server-side columns the local schema does not
    /// mirror; those are dropped before touching the local store.
    pub fn project(&self, row: &Row) -> Row {
        row.iter()
            .filter(|(key, _)| self.has_column(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

impl fmt::Display for SyncTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for SyncTable {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "groups" => Ok(SyncTable::Groups),
            "expenses" => Ok(SyncTable::Expenses),
            other => Err(SyncError::UnknownTable(other.to_string())),
        }
    }
}

/// Returns the `id` of a row when it is a string.
pub fn row_id(row: &Row) -> Option<&str> {
    row.get("id").and_then(|value| value.as_str())
}
