//! In-process remote store.
//!
//! Used by tests and offline demos. Records every call so that callers can
//! assert on ordering, and can be told to fail the next calls.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{RealtimeMessage, RemoteError, RemoteEvent, RemoteStore, Subscription};
use crate::table::{row_id, Row, SyncTable};

/// A call received by [`MemoryRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Select(SyncTable),
    SelectOne(SyncTable, String),
    Insert(SyncTable, String),
    Update(SyncTable, String),
    Delete(SyncTable, String),
}

#[derive(Default)]
struct State {
    tables: BTreeMap<SyncTable, BTreeMap<String, Row>>,
    calls: Vec<RemoteCall>,
    failures: VecDeque<RemoteError>,
    targeted: Vec<(RemoteCall, RemoteError)>,
    subscribers: Vec<mpsc::UnboundedSender<RealtimeMessage>>,
}

#[derive(Default)]
pub struct MemoryRemote {
    state: Mutex<State>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stores a row directly, bypassing the call log.
    pub fn seed(&self, table: SyncTable, row: Row) {
        if let Some(id) = row_id(&row).map(str::to_string) {
            self.lock().tables.entry(table).or_default().insert(id, row);
        }
    }

    pub fn remove(&self, table: SyncTable, id: &str) -> Option<Row> {
        self.lock().tables.get_mut(&table)?.remove(id)
    }

    pub fn row(&self, table: SyncTable, id: &str) -> Option<Row> {
        self.lock().tables.get(&table)?.get(id).cloned()
    }

    pub fn rows(&self, table: SyncTable) -> Vec<Row> {
        self.lock()
            .tables
            .get(&table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    /// Calls that changed data, in the order they were received.
    pub fn writes(&self) -> Vec<RemoteCall> {
        self.calls()
            .into_iter()
            .filter(|call| {
                matches!(
                    call,
                    RemoteCall::Insert(..) | RemoteCall::Update(..) | RemoteCall::Delete(..)
                )
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Makes the next call fail with `error`. Queued failures are consumed
    /// one per call, in order.
    pub fn fail_next(&self, error: RemoteError) {
        self.lock().failures.push_back(error);
    }

    /// Makes the first call equal to `call` fail with `error`.
    pub fn fail_call(&self, call: RemoteCall, error: RemoteError) {
        self.lock().targeted.push((call, error));
    }

    pub fn subscriber_count(&self) -> usize {
        let mut state = self.lock();
        state.subscribers.retain(|tx| !tx.is_closed());
        state.subscribers.len()
    }

    /// Pushes a change event to every live subscriber.
    pub fn emit(&self, event: RemoteEvent) {
        self.broadcast(RealtimeMessage::Change(event));
    }

    /// Signals subscribers that the feed reconnected.
    pub fn emit_reconnect(&self) {
        self.broadcast(RealtimeMessage::Connected { reconnect: true });
    }

    fn broadcast(&self, message: RealtimeMessage) {
        let mut state = self.lock();
        state
            .subscribers
            .retain(|tx| tx.send(message.clone()).is_ok());
    }

    fn record(&self, call: RemoteCall) -> Result<std::sync::MutexGuard<'_, State>, RemoteError> {
        let mut state = self.lock();
        if let Some(index) = state.targeted.iter().position(|(target, _)| *target == call) {
            let (_, error) = state.targeted.remove(index);
            state.calls.push(call);
            return Err(error);
        }
        state.calls.push(call);
        match state.failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(state),
        }
    }
}

fn conflict(table: SyncTable, id: &str) -> RemoteError {
    RemoteError::http(
        409,
        Some("23505".to_string()),
        format!("duplicate key value violates unique constraint \"{}_pkey\" ({})", table, id),
    )
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn select(&self, table: SyncTable) -> Result<Vec<Row>, RemoteError> {
        let state = self.record(RemoteCall::Select(table))?;
        Ok(state
            .tables
            .get(&table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn select_one(&self, table: SyncTable, id: &str) -> Result<Option<Row>, RemoteError> {
        let state = self.record(RemoteCall::SelectOne(table, id.to_string()))?;
        Ok(state.tables.get(&table).and_then(|rows| rows.get(id)).cloned())
    }

    async fn insert(&self, table: SyncTable, row: &Row) -> Result<(), RemoteError> {
        let id = row_id(row).unwrap_or_default().to_string();
        let mut state = self.record(RemoteCall::Insert(table, id.clone()))?;
        let rows = state.tables.entry(table).or_default();
        if rows.contains_key(&id) {
            return Err(conflict(table, &id));
        }
        rows.insert(id, row.clone());
        Ok(())
    }

    async fn update(&self, table: SyncTable, id: &str, fields: &Row) -> Result<(), RemoteError> {
        let mut state = self.record(RemoteCall::Update(table, id.to_string()))?;
        // Like a filtered PATCH, updating a missing row is not an error.
        if let Some(row) = state.tables.get_mut(&table).and_then(|rows| rows.get_mut(id)) {
            for (key, value) in fields {
                row.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }

    async fn delete(&self, table: SyncTable, id: &str) -> Result<(), RemoteError> {
        let mut state = self.record(RemoteCall::Delete(table, id.to_string()))?;
        if let Some(rows) = state.tables.get_mut(&table) {
            rows.remove(id);
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        _tables: &[SyncTable],
        sink: mpsc::UnboundedSender<RealtimeMessage>,
    ) -> Result<Subscription, RemoteError> {
        // Tables are not filtered; callers emit only what they subscribed to.
        let _ = sink.send(RealtimeMessage::Connected { reconnect: false });
        self.lock().subscribers.push(sink);
        Ok(Subscription::detached())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(id: &str, name: &str) -> Row {
        json!({ "id": id, "name": name }).as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_insert_then_select() {
        let remote = MemoryRemote::new();
        remote.insert(SyncTable::Groups, &row("g1", "Trip")).await.unwrap();

        let rows = remote.select(SyncTable::Groups).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            remote.calls(),
            vec![
                RemoteCall::Insert(SyncTable::Groups, "g1".into()),
                RemoteCall::Select(SyncTable::Groups),
            ]
        );
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_fatal() {
        let remote = MemoryRemote::new();
        remote.seed(SyncTable::Groups, row("g1", "Trip"));

        let err = remote
            .insert(SyncTable::Groups, &row("g1", "Again"))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let remote = MemoryRemote::new();
        remote.seed(SyncTable::Groups, row("g1", "Trip"));

        let fields = json!({ "currency": "EUR" }).as_object().cloned().unwrap();
        remote.update(SyncTable::Groups, "g1", &fields).await.unwrap();

        let stored = remote.row(SyncTable::Groups, "g1").unwrap();
        assert_eq!(stored["name"], json!("Trip"));
        assert_eq!(stored["currency"], json!("EUR"));
    }

    #[tokio::test]
    async fn test_fail_next_is_consumed_once() {
        let remote = MemoryRemote::new();
        remote.fail_next(RemoteError::network("offline"));

        assert!(remote.select(SyncTable::Groups).await.is_err());
        assert!(remote.select(SyncTable::Groups).await.is_ok());
        assert_eq!(remote.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_fail_call_targets_matching_call() {
        let remote = MemoryRemote::new();
        remote.fail_call(
            RemoteCall::Delete(SyncTable::Expenses, "e2".into()),
            RemoteError::http(503, None, "unavailable"),
        );

        assert!(remote.delete(SyncTable::Expenses, "e1").await.is_ok());
        assert!(remote.delete(SyncTable::Expenses, "e2").await.is_err());
        assert!(remote.delete(SyncTable::Expenses, "e2").await.is_ok());
    }

    #[tokio::test]
    async fn test_emit_reaches_subscribers() {
        let remote = MemoryRemote::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _subscription = remote.subscribe(&SyncTable::ALL, tx).await.unwrap();

        remote.emit(RemoteEvent::insert(SyncTable::Groups, row("g1", "Trip")));

        assert_eq!(
            rx.recv().await,
            Some(RealtimeMessage::Connected { reconnect: false })
        );
        assert!(matches!(rx.recv().await, Some(RealtimeMessage::Change(_))));
        assert_eq!(remote.subscriber_count(), 1);

        drop(rx);
        assert_eq!(remote.subscriber_count(), 0);
    }
}
