use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::table::SyncTable;

type Listener = Arc<dyn Fn(SyncTable) + Send + Sync>;

/// Handle returned by [`ChangeNotifier::watch`], used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: BTreeMap<SyncTable, Vec<(ListenerId, Listener)>>,
}

/// Per-table observer registry.
///
/// Listeners are called in registration order, synchronously, after every
/// committed change to their table (local write, reconciliation, rollback or
/// realtime event). A listener may watch or unwatch from inside its callback.
#[derive(Default)]
pub struct ChangeNotifier {
    registry: Mutex<Registry>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn watch<F>(&self, table: SyncTable, listener: F) -> ListenerId
    where
        F: Fn(SyncTable) + Send + Sync + 'static,
    {
        let mut registry = self.registry();
        registry.next_id += 1;
        let id = ListenerId(registry.next_id);
        registry
            .listeners
            .entry(table)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Removes a listener. Returns false if it was not registered.
    pub fn unwatch(&self, id: ListenerId) -> bool {
        let mut registry = self.registry();
        for listeners in registry.listeners.values_mut() {
            if let Some(index) = listeners.iter().position(|(lid, _)| *lid == id) {
                listeners.remove(index);
                return true;
            }
        }
        false
    }

    pub fn notify(&self, table: SyncTable) {
        // Call outside the lock so listeners can re-enter the registry.
        let listeners: Vec<Listener> = self
            .registry()
            .listeners
            .get(&table)
            .map(|entries| entries.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        for listener in listeners {
            listener(table);
        }
    }

    pub fn listener_count(&self, table: SyncTable) -> usize {
        self.registry()
            .listeners
            .get(&table)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry();
        let counts: BTreeMap<SyncTable, usize> = registry
            .listeners
            .iter()
            .map(|(table, listeners)| (*table, listeners.len()))
            .collect();
        f.debug_struct("ChangeNotifier")
            .field("listeners", &counts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn(SyncTable) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&count);
        (count, move |_| {
            handle.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_notify_only_reaches_table_listeners() {
        let notifier = ChangeNotifier::new();
        let (groups, on_groups) = counter();
        let (expenses, on_expenses) = counter();
        notifier.watch(SyncTable::Groups, on_groups);
        notifier.watch(SyncTable::Expenses, on_expenses);

        notifier.notify(SyncTable::Groups);
        notifier.notify(SyncTable::Groups);

        assert_eq!(groups.load(Ordering::SeqCst), 2);
        assert_eq!(expenses.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_listeners_called_in_registration_order() {
        let notifier = ChangeNotifier::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            notifier.watch(SyncTable::Expenses, move |_| order.lock().unwrap().push(label));
        }

        notifier.notify(SyncTable::Expenses);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_unwatch() {
        let notifier = ChangeNotifier::new();
        let (count, listener) = counter();
        let id = notifier.watch(SyncTable::Groups, listener);

        assert!(notifier.unwatch(id));
        assert!(!notifier.unwatch(id));
        notifier.notify(SyncTable::Groups);

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(notifier.listener_count(SyncTable::Groups), 0);
    }

    #[test]
    fn test_listener_can_unwatch_itself() {
        let notifier = Arc::new(ChangeNotifier::new());
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));

        let inner = Arc::clone(&notifier);
        let own_id = Arc::clone(&slot);
        let id = notifier.watch(SyncTable::Groups, move |_| {
            if let Some(id) = own_id.lock().unwrap().take() {
                inner.unwatch(id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        notifier.notify(SyncTable::Groups);
        assert_eq!(notifier.listener_count(SyncTable::Groups), 0);
    }
}
