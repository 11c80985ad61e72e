//! Remote store client.
//!
//! The engine talks to the backend through the [`RemoteStore`] trait:
//! per-table select/insert/update/delete plus a realtime change feed.
//! [`RestRemote`] speaks the PostgREST + realtime-websocket dialect of the
//! hosted backend; [`MemoryRemote`] keeps everything in process.

mod connectivity;
mod memory;
pub mod realtime;
mod rest;

pub use connectivity::{Connectivity, HttpProbe, StaticConnectivity};
pub use memory::{MemoryRemote, RemoteCall};
pub use rest::{RemoteConfig, RestRemote};

use std::fmt;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::table::{Row, SyncTable};

/// How a remote call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// The request never got a response (DNS, connection refused, reset).
    Network,
    /// The request exceeded the configured timeout.
    Timeout,
    /// The server answered with a non-success status.
    Http,
    /// The response body could not be decoded.
    Decode,
}

/// A failed remote call, carrying the backend's error code when it sent one.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    /// Postgres SQLSTATE-style code (`23505`, `42501`, …).
    pub code: Option<String>,
    pub status: Option<u16>,
    pub message: String,
}

impl RemoteError {
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Network,
            code: None,
            status: None,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Timeout,
            code: None,
            status: None,
            message: message.into(),
        }
    }

    pub fn http(status: u16, code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Http,
            code,
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Decode,
            code: None,
            status: None,
            message: message.into(),
        }
    }

    /// Builds an error carrying a backend code, as a rejected write would.
    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::http(400, Some(code.into()), message)
    }

    /// True when retrying cannot succeed: data exceptions (class 22),
    /// integrity constraint violations (class 23) and insufficient privilege
    /// (42501, row-level security). Everything else is transient.
    pub fn is_fatal(&self) -> bool {
        self.code.as_deref().is_some_and(is_fatal_code)
    }
}

fn is_fatal_code(code: &str) -> bool {
    if code == "42501" {
        return true;
    }
    code.len() == 5 && (code.starts_with("22") || code.starts_with("23"))
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.code, self.status) {
            (Some(code), Some(status)) => {
                write!(f, "{} (code {}, status {})", self.message, code, status)
            }
            (Some(code), None) => write!(f, "{} (code {})", self.message, code),
            (None, Some(status)) => write!(f, "{} (status {})", self.message, status),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for RemoteError {}

/// Kind of change carried by a realtime event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Insert,
    Update,
    Delete,
}

/// A change made by any writer, pushed by the remote store.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEvent {
    pub table: SyncTable,
    pub event_type: EventType,
    pub new_row: Option<Row>,
    pub old_row: Option<Row>,
}

impl RemoteEvent {
    pub fn insert(table: SyncTable, row: Row) -> Self {
        Self {
            table,
            event_type: EventType::Insert,
            new_row: Some(row),
            old_row: None,
        }
    }

    pub fn update(table: SyncTable, row: Row) -> Self {
        Self {
            table,
            event_type: EventType::Update,
            new_row: Some(row),
            old_row: None,
        }
    }

    pub fn delete(table: SyncTable, old_row: Row) -> Self {
        Self {
            table,
            event_type: EventType::Delete,
            new_row: None,
            old_row: Some(old_row),
        }
    }
}

/// What a realtime subscription delivers to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeMessage {
    /// The feed is (re)connected. `reconnect` is false for the first connection.
    Connected { reconnect: bool },
    Change(RemoteEvent),
}

/// A live realtime subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    /// A subscription with no background task (the feed is driven elsewhere).
    pub fn detached() -> Self {
        Self { task: None }
    }

    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Table-oriented remote API used by the sync engine.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Full snapshot of a table.
    async fn select(&self, table: SyncTable) -> Result<Vec<Row>, RemoteError>;

    /// The current row with `id`, if any.
    async fn select_one(&self, table: SyncTable, id: &str) -> Result<Option<Row>, RemoteError>;

    async fn insert(&self, table: SyncTable, row: &Row) -> Result<(), RemoteError>;

    async fn update(&self, table: SyncTable, id: &str, fields: &Row) -> Result<(), RemoteError>;

    async fn delete(&self, table: SyncTable, id: &str) -> Result<(), RemoteError>;

    /// Starts delivering change events for `tables` to `sink` until the
    /// returned subscription is dropped.
    async fn subscribe(
        &self,
        tables: &[SyncTable],
        sink: mpsc::UnboundedSender<RealtimeMessage>,
    ) -> Result<Subscription, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_codes() {
        for code in ["22001", "22P02", "23502", "23503", "23505", "42501"] {
            assert!(RemoteError::with_code(code, "rejected").is_fatal(), "{}", code);
        }
    }

    #[test]
    fn test_transient_codes() {
        for code in ["08006", "42P01", "57014", "PGRST301", "2350", "230001", "42502"] {
            assert!(!RemoteError::with_code(code, "failed").is_fatal(), "{}", code);
        }
    }

    #[test]
    fn test_errors_without_code_are_transient() {
        assert!(!RemoteError::network("connection refused").is_fatal());
        assert!(!RemoteError::timeout("timed out").is_fatal());
        assert!(!RemoteError::http(503, None, "unavailable").is_fatal());
    }

    #[test]
    fn test_display_includes_code_and_status() {
        let err = RemoteError::http(409, Some("23505".into()), "duplicate key");
        assert_eq!(err.to_string(), "duplicate key (code 23505, status 409)");
        assert_eq!(RemoteError::network("offline").to_string(), "offline");
    }

    #[tokio::test]
    async fn test_dropping_subscription_aborts_task() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _tx = tx;
            std::future::pending::<()>().await;
        });
        drop(Subscription::new(task));
        // The sender is dropped with the aborted task.
        assert!(rx.await.is_err());
    }
}
