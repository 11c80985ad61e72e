//! Error types for the sync engine.

use thiserror::Error;

use crate::remote::RemoteError;
use crate::table::SyncTable;

/// Errors surfaced by the local store and the sync engine.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Unknown column '{column}' for table {table}")]
    UnknownColumn { table: SyncTable, column: String },

    #[error("Row not found: {table}/{id}")]
    NotFound { table: SyncTable, id: String },

    #[error("Invalid row: {0}")]
    InvalidRow(String),

    #[error("Engine is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Sync engine has been disposed")]
    Disposed,
}

pub type SyncResult<T> = Result<T, SyncError>;
