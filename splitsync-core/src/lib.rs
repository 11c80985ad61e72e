//! Splitsync Core Library
//!
//! Offline-first sync engine for Splitsync: an embedded SQLite store for
//! groups and expenses, a durable queue of local operations, and the logic
//! that pushes that queue to the hosted backend and merges remote state back.

pub mod db;
pub mod error;
pub mod models;
pub mod operation;
pub mod remote;
pub mod sync;
pub mod table;

pub use db::{init_db, ExpenseRepository, GroupRepository, LocalStore};
pub use error::{SyncError, SyncResult};
pub use models::{Entity, Expense, Group};
pub use operation::{Operation, OperationType};
pub use remote::{
    Connectivity, EventType, HttpProbe, MemoryRemote, RealtimeMessage, RemoteConfig, RemoteError,
    RemoteErrorKind, RemoteEvent, RemoteStore, RestRemote, StaticConnectivity, Subscription,
};
pub use sync::{
    ChangeNotifier, EngineConfig, EngineState, FlushOutcome, ListenerId, ReconcileStats,
    SkipReason, SyncEngine,
};
pub use table::{Row, SyncTable};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
