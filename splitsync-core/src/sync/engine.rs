use std::fmt;
use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;

use super::notifier::ChangeNotifier;
use super::scheduler;
use crate::db::{queue, rows, ExpenseRepository, GroupRepository, LocalStore};
use crate::error::{SyncError, SyncResult};
use crate::models::Entity;
use crate::operation::Operation;
use crate::remote::{
    Connectivity, EventType, RealtimeMessage, RemoteError, RemoteEvent, RemoteStore, Subscription,
};
use crate::table::{row_id, Row, SyncTable};

/// Tuning knobs for a [`SyncEngine`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// How often the scheduler drains the queue without being woken.
    pub flush_interval: Duration,
    /// How often to run a full refresh of every table, if at all.
    pub reconcile_interval: Option<Duration>,
    /// Upper bound on any single remote call made by the engine.
    pub request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(5),
            reconcile_interval: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Lifecycle of an engine. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Initializing,
    Running,
    Disposed,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::Initializing => "initializing",
            EngineState::Running => "running",
            EngineState::Disposed => "disposed",
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Default)]
struct Background {
    scheduler: Option<JoinHandle<()>>,
    realtime: Option<JoinHandle<()>>,
    subscription: Option<Subscription>,
}

impl Background {
    /// The scheduler is left to finish its current drain and exit on the
    /// shutdown signal; only the realtime side is aborted.
    fn stop(&mut self) {
        self.scheduler.take();
        if let Some(task) = self.realtime.take() {
            task.abort();
        }
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

/// The offline-first sync engine.
///
/// One instance per session, shared as `Arc<SyncEngine>`. Application writes
/// go through [`insert`](Self::insert), [`update`](Self::update) and
/// [`delete`](Self::delete): each commits the row change and its queued
/// [`Operation`] in one local transaction, notifies listeners, and wakes the
/// flush scheduler.
pub struct SyncEngine {
    pub(super) store: LocalStore,
    pub(super) remote: Arc<dyn RemoteStore>,
    pub(super) connectivity: Arc<dyn Connectivity>,
    pub(super) notifier: ChangeNotifier,
    pub(super) config: EngineConfig,
    pub(super) flushing: AtomicBool,
    pub(super) wake: Arc<Notify>,
    pub(super) shutdown: watch::Sender<bool>,
    state: Mutex<EngineState>,
    background: Mutex<Background>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl SyncEngine {
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteStore>,
        connectivity: Arc<dyn Connectivity>,
        config: EngineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            remote,
            connectivity,
            notifier: ChangeNotifier::new(),
            config,
            flushing: AtomicBool::new(false),
            wake: Arc::new(Notify::new()),
            shutdown: watch::Sender::new(false),
            state: Mutex::new(EngineState::Uninitialized),
            background: Mutex::new(Background::default()),
        })
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn groups(&self) -> GroupRepository {
        GroupRepository::new(self.store.pool().clone())
    }

    pub fn expenses(&self) -> ExpenseRepository {
        ExpenseRepository::new(self.store.pool().clone())
    }

    pub fn state(&self) -> EngineState {
        *lock(&self.state)
    }

    pub fn is_disposed(&self) -> bool {
        self.state() == EngineState::Disposed
    }

    pub(super) fn ensure_not_disposed(&self) -> SyncResult<()> {
        if self.is_disposed() {
            return Err(SyncError::Disposed);
        }
        Ok(())
    }

    /// Runs a remote call under the configured request timeout.
    pub(super) async fn remote_call<T, F>(&self, call: F) -> Result<T, RemoteError>
    where
        F: Future<Output = Result<T, RemoteError>>,
    {
        match tokio::time::timeout(self.config.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::timeout(format!(
                "remote call exceeded {:?}",
                self.config.request_timeout
            ))),
        }
    }

    /// Asks the scheduler to drain the queue now. Never blocks.
    pub fn request_flush(&self) {
        self.wake.notify_one();
    }

    fn after_local_write(&self, table: SyncTable) {
        self.notifier.notify(table);
        self.request_flush();
    }

    // -- write path -------------------------------------------------------

    /// Creates a row locally and queues its insert.
    ///
    /// `fields` may omit `id`; it is set to `id` either way.
    pub async fn insert(&self, table: SyncTable, id: &str, fields: Row) -> SyncResult<()> {
        self.ensure_not_disposed()?;
        let mut row = fields;
        check_id(table, id, &row)?;
        row.insert("id".to_string(), serde_json::Value::String(id.to_string()));

        let op = Operation::insert(table, id, row.clone());
        let mut tx = self.store.begin().await?;
        rows::insert_row(&mut tx, table, &row).await?;
        queue::enqueue(&mut tx, &op).await?;
        tx.commit().await?;

        tracing::debug!("Queued insert {}/{}", table, id);
        self.after_local_write(table);
        Ok(())
    }

    /// Sets `fields` on an existing row and queues the update.
    pub async fn update(&self, table: SyncTable, id: &str, fields: Row) -> SyncResult<()> {
        self.ensure_not_disposed()?;
        check_id(table, id, &fields)?;

        let op = Operation::update(table, id, fields.clone());
        let mut tx = self.store.begin().await?;
        if rows::update_row(&mut tx, table, id, &fields).await? == 0 {
            return Err(SyncError::NotFound {
                table,
                id: id.to_string(),
            });
        }
        queue::enqueue(&mut tx, &op).await?;
        tx.commit().await?;

        tracing::debug!("Queued update {}/{} ({} field(s))", table, id, fields.len());
        self.after_local_write(table);
        Ok(())
    }

    /// Removes a row locally and queues its delete.
    pub async fn delete(&self, table: SyncTable, id: &str) -> SyncResult<()> {
        self.ensure_not_disposed()?;

        let op = Operation::delete(table, id);
        let mut tx = self.store.begin().await?;
        if rows::delete_row(&mut tx, table, id).await? == 0 {
            return Err(SyncError::NotFound {
                table,
                id: id.to_string(),
            });
        }
        queue::enqueue(&mut tx, &op).await?;
        tx.commit().await?;

        tracing::debug!("Queued delete {}/{}", table, id);
        self.after_local_write(table);
        Ok(())
    }

    pub async fn insert_entity<E: Entity>(&self, entity: &E) -> SyncResult<()> {
        self.insert(E::TABLE, entity.id(), entity.to_row()).await
    }

    /// Queues every column of `entity` as an update.
    pub async fn update_entity<E: Entity>(&self, entity: &E) -> SyncResult<()> {
        let mut fields = entity.to_row();
        fields.remove("id");
        self.update(E::TABLE, entity.id(), fields).await
    }

    pub async fn delete_entity<E: Entity>(&self, id: &str) -> SyncResult<()> {
        self.delete(E::TABLE, id).await
    }

    // -- reads ------------------------------------------------------------

    pub async fn get_row(&self, table: SyncTable, id: &str) -> SyncResult<Option<Row>> {
        self.store.get_row(table, id).await
    }

    pub async fn list_rows(&self, table: SyncTable) -> SyncResult<Vec<Row>> {
        self.store.list_rows(table).await
    }

    /// Queued operations in drain order.
    pub async fn pending_operations(&self) -> SyncResult<Vec<Operation>> {
        self.store.pending_operations().await
    }

    // -- remote push ------------------------------------------------------

    /// Applies a change made by another writer, bypassing the queue.
    pub async fn apply_remote_event(&self, event: RemoteEvent) -> SyncResult<()> {
        self.ensure_not_disposed()?;
        let table = event.table;

        let mut tx = self.store.begin().await?;
        match event.event_type {
            EventType::Insert | EventType::Update => {
                let row = event.new_row.ok_or_else(|| {
                    SyncError::InvalidRow(format!(
                        "{:?} event on {} without a row",
                        event.event_type, table
                    ))
                })?;
                rows::upsert_row(&mut tx, table, &row).await?;
                tracing::debug!(
                    "Applied remote {:?} {}/{}",
                    event.event_type,
                    table,
                    row_id(&row).unwrap_or("?")
                );
            }
            EventType::Delete => {
                let id = event
                    .old_row
                    .as_ref()
                    .and_then(row_id)
                    .ok_or_else(|| {
                        SyncError::InvalidRow(format!("delete event on {} without an id", table))
                    })?
                    .to_string();
                rows::delete_row(&mut tx, table, &id).await?;
                tracing::debug!("Applied remote delete {}/{}", table, id);
            }
        }
        tx.commit().await?;

        self.notifier.notify(table);
        Ok(())
    }

    // -- lifecycle --------------------------------------------------------

    fn transition(&self, from: EngineState, to: EngineState) -> SyncResult<()> {
        let mut state = lock(&self.state);
        if *state == EngineState::Disposed {
            return Err(SyncError::Disposed);
        }
        if *state != from {
            return Err(SyncError::InvalidState {
                expected: from.as_str(),
                actual: state.as_str(),
            });
        }
        *state = to;
        Ok(())
    }

    /// Refreshes every table (when reachable), subscribes to realtime changes
    /// and starts the flush scheduler.
    ///
    /// A failed initial refresh is logged and does not prevent start-up; the
    /// queue keeps local writes until the remote store is back.
    pub async fn init(self: &Arc<Self>) -> SyncResult<()> {
        self.transition(EngineState::Uninitialized, EngineState::Initializing)?;
        tracing::info!("Initializing sync engine");

        if self.connectivity.is_reachable().await {
            if let Err(e) = self.sync_all_tables_from_remote().await {
                tracing::error!("Initial refresh failed: {}", e);
            }
        } else {
            tracing::info!("Remote store unreachable, skipping initial refresh");
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = match self.remote.subscribe(&SyncTable::ALL, tx).await {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                tracing::warn!("Realtime subscription failed: {}", e);
                None
            }
        };

        {
            let mut background = lock(&self.background);
            background.subscription = subscription;
            background.realtime = Some(spawn_realtime_listener(Arc::downgrade(self), rx));
            background.scheduler = Some(scheduler::spawn(self));
        }

        if let Err(e) = self.transition(EngineState::Initializing, EngineState::Running) {
            // Disposed while initializing.
            lock(&self.background).stop();
            return Err(e);
        }

        // Drain whatever an earlier session left queued.
        self.request_flush();
        tracing::info!("Sync engine running");
        Ok(())
    }

    /// Stops the scheduler and the realtime subscription. Idempotent.
    ///
    /// A drain already talking to the remote store finishes its current
    /// operation and then stops; writes after this return [`SyncError::Disposed`].
    pub fn dispose(&self) {
        let previous = std::mem::replace(&mut *lock(&self.state), EngineState::Disposed);
        self.shutdown.send_replace(true);
        lock(&self.background).stop();
        if previous != EngineState::Disposed {
            tracing::info!("Sync engine disposed");
        }
    }
}

impl fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("state", &self.state())
            .field("config", &self.config)
            .field("notifier", &self.notifier)
            .finish_non_exhaustive()
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        lock(&self.background).stop();
    }
}

fn check_id(table: SyncTable, id: &str, fields: &Row) -> SyncResult<()> {
    if id.is_empty() {
        return Err(SyncError::InvalidRow(format!("{} row with an empty id", table)));
    }
    match fields.get("id") {
        None => Ok(()),
        Some(value) if value.as_str() == Some(id) => Ok(()),
        Some(value) => Err(SyncError::InvalidRow(format!(
            "id field {} does not match {}",
            value, id
        ))),
    }
}

/// Applies realtime messages until the feed ends or the engine is gone.
fn spawn_realtime_listener(
    engine: Weak<SyncEngine>,
    mut rx: mpsc::UnboundedReceiver<RealtimeMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let Some(engine) = engine.upgrade() else {
                break;
            };
            if engine.is_disposed() {
                break;
            }

            match message {
                RealtimeMessage::Change(event) => {
                    let table = event.table;
                    if let Err(e) = engine.apply_remote_event(event).await {
                        tracing::warn!("Failed to apply remote change to {}: {}", table, e);
                    }
                }
                RealtimeMessage::Connected { reconnect: true } => {
                    tracing::warn!("Realtime reconnected, refreshing all tables");
                    if let Err(e) = engine.sync_all_tables_from_remote().await {
                        tracing::error!("Refresh after reconnect failed: {}", e);
                    }
                }
                RealtimeMessage::Connected { reconnect: false } => {}
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Expense, Group};
    use crate::sync::test_support::{group_row, wait_until, TestEngine};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_insert_writes_row_and_queue() {
        let t = TestEngine::new().await;
        t.engine
            .insert(SyncTable::Groups, "g1", group_row("g1", "Trip"))
            .await
            .unwrap();

        assert!(t.engine.get_row(SyncTable::Groups, "g1").await.unwrap().is_some());
        let pending = t.engine.pending_operations().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].entity_id, "g1");
        assert_eq!(pending[0].changes.as_ref().unwrap()["name"], json!("Trip"));
    }

    #[tokio::test]
    async fn test_insert_sets_id_from_argument() {
        let t = TestEngine::new().await;
        let mut fields = group_row("g1", "Trip");
        fields.remove("id");
        t.engine.insert(SyncTable::Groups, "g1", fields).await.unwrap();

        assert!(t.engine.get_row(SyncTable::Groups, "g1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_insert_with_mismatched_id_is_rejected() {
        let t = TestEngine::new().await;
        let err = t
            .engine
            .insert(SyncTable::Groups, "g2", group_row("g1", "Trip"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidRow(_)));
    }

    #[tokio::test]
    async fn test_failed_insert_queues_nothing() {
        let t = TestEngine::new().await;
        t.engine
            .insert(SyncTable::Groups, "g1", group_row("g1", "Trip"))
            .await
            .unwrap();

        let err = t
            .engine
            .insert(SyncTable::Groups, "g1", group_row("g1", "Duplicate"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Database(_)));
        assert_eq!(t.engine.pending_operations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_missing_row_is_not_found() {
        let t = TestEngine::new().await;
        let fields = json!({ "name": "Nobody" }).as_object().cloned().unwrap();
        let err = t
            .engine
            .update(SyncTable::Groups, "missing", fields)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound { .. }));
        assert!(t.engine.pending_operations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_unknown_column_is_rejected() {
        let t = TestEngine::new().await;
        t.engine
            .insert(SyncTable::Groups, "g1", group_row("g1", "Trip"))
            .await
            .unwrap();

        let fields = json!({ "colour": "red" }).as_object().cloned().unwrap();
        let err = t.engine.update(SyncTable::Groups, "g1", fields).await.unwrap_err();
        assert!(matches!(err, SyncError::UnknownColumn { .. }));
        assert_eq!(t.engine.pending_operations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_missing_row_is_not_found() {
        let t = TestEngine::new().await;
        let err = t.engine.delete(SyncTable::Expenses, "e1").await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_writes_notify_table_listeners() {
        let t = TestEngine::new().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        t.engine.notifier().watch(SyncTable::Groups, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        t.engine
            .insert(SyncTable::Groups, "g1", group_row("g1", "Trip"))
            .await
            .unwrap();
        let fields = json!({ "name": "Renamed" }).as_object().cloned().unwrap();
        t.engine.update(SyncTable::Groups, "g1", fields).await.unwrap();
        t.engine.delete(SyncTable::Groups, "g1").await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_typed_entity_helpers() {
        let t = TestEngine::new().await;
        let group = Group::new("Trip", "EUR").with_members(vec!["Ana".into()]);
        t.engine.insert_entity(&group).await.unwrap();

        let expense = Expense::new(&group.id, "Lunch", "Ana").with_split(json!({ "Ana": 12.5 }));
        t.engine.insert_entity(&expense).await.unwrap();

        let mut renamed = group.clone();
        renamed.name = "Ski trip".into();
        t.engine.update_entity(&renamed).await.unwrap();
        t.engine.delete_entity::<Expense>(&expense.id).await.unwrap();

        let stored = t.engine.groups().get_by_id(&group.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "Ski trip");
        assert!(t.engine.expenses().get_by_id(&expense.id).await.unwrap().is_none());
        assert_eq!(t.engine.pending_operations().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_apply_remote_delete_uses_old_row_id() {
        let t = TestEngine::new().await;
        t.engine
            .apply_remote_event(RemoteEvent::insert(SyncTable::Groups, group_row("g1", "Trip")))
            .await
            .unwrap();

        let old = json!({ "id": "g1" }).as_object().cloned().unwrap();
        t.engine
            .apply_remote_event(RemoteEvent::delete(SyncTable::Groups, old))
            .await
            .unwrap();

        assert!(t.engine.get_row(SyncTable::Groups, "g1").await.unwrap().is_none());
        assert!(t.engine.pending_operations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_apply_remote_update_without_row_is_invalid() {
        let t = TestEngine::new().await;
        let event = RemoteEvent {
            table: SyncTable::Groups,
            event_type: EventType::Update,
            new_row: None,
            old_row: None,
        };
        assert!(matches!(
            t.engine.apply_remote_event(event).await,
            Err(SyncError::InvalidRow(_))
        ));
    }

    #[tokio::test]
    async fn test_init_runs_and_dispose_stops() {
        let t = TestEngine::new().await;
        assert_eq!(t.engine.state(), EngineState::Uninitialized);

        t.engine.init().await.unwrap();
        assert_eq!(t.engine.state(), EngineState::Running);
        assert_eq!(t.remote.subscriber_count(), 1);

        t.engine.dispose();
        t.engine.dispose();
        assert_eq!(t.engine.state(), EngineState::Disposed);
    }

    #[tokio::test]
    async fn test_init_twice_is_invalid() {
        let t = TestEngine::new().await;
        t.engine.init().await.unwrap();

        let err = t.engine.init().await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::InvalidState { expected: "uninitialized", actual: "running" }
        ));
        t.engine.dispose();
    }

    #[tokio::test]
    async fn test_init_after_dispose_is_rejected() {
        let t = TestEngine::new().await;
        t.engine.dispose();
        assert!(matches!(t.engine.init().await, Err(SyncError::Disposed)));
    }

    #[tokio::test]
    async fn test_writes_after_dispose_are_rejected() {
        let t = TestEngine::new().await;
        t.engine.dispose();
        let err = t
            .engine
            .insert(SyncTable::Groups, "g1", group_row("g1", "Trip"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Disposed));
    }

    #[tokio::test]
    async fn test_init_offline_skips_refresh() {
        let t = TestEngine::new().await;
        t.connectivity.set_online(false);
        t.remote.seed(SyncTable::Groups, group_row("g1", "Remote"));

        t.engine.init().await.unwrap();
        assert!(t.engine.get_row(SyncTable::Groups, "g1").await.unwrap().is_none());
        assert!(t.remote.calls().is_empty());
        t.engine.dispose();
    }

    #[tokio::test]
    async fn test_realtime_events_applied_after_init() {
        let t = TestEngine::new().await;
        t.engine.init().await.unwrap();

        t.remote
            .emit(RemoteEvent::insert(SyncTable::Groups, group_row("g9", "Pushed")));

        let engine = Arc::clone(&t.engine);
        wait_until(|| {
            let engine = Arc::clone(&engine);
            async move { engine.get_row(SyncTable::Groups, "g9").await.unwrap().is_some() }
        })
        .await;
        t.engine.dispose();
    }

    #[tokio::test]
    async fn test_reconnect_triggers_full_refresh() {
        let t = TestEngine::new().await;
        t.engine.init().await.unwrap();
        t.remote.seed(SyncTable::Expenses, crate::sync::test_support::expense_row("e1", "g1"));

        t.remote.emit_reconnect();

        let engine = Arc::clone(&t.engine);
        wait_until(|| {
            let engine = Arc::clone(&engine);
            async move { engine.get_row(SyncTable::Expenses, "e1").await.unwrap().is_some() }
        })
        .await;
        t.engine.dispose();
    }

    #[tokio::test]
    async fn test_write_wakes_scheduler() {
        let t = TestEngine::with_config(EngineConfig {
            flush_interval: Duration::from_secs(3600),
            ..EngineConfig::default()
        })
        .await;
        t.engine.init().await.unwrap();

        t.engine
            .insert(SyncTable::Groups, "g1", group_row("g1", "Trip"))
            .await
            .unwrap();

        let remote = Arc::clone(&t.remote);
        wait_until(|| {
            let remote = Arc::clone(&remote);
            async move { remote.row(SyncTable::Groups, "g1").is_some() }
        })
        .await;
        t.engine.dispose();
    }
}
