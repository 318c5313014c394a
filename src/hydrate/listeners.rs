//! Observer registration for "set data refetched" notifications

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use super::SetData;

type Listener = Arc<dyn Fn(&SetData) + Send + Sync>;

#[derive(Default)]
struct ListenerTable {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

/// Listeners registered on one hydrator
#[derive(Clone, Default)]
pub struct Listeners {
    table: Arc<Mutex<ListenerTable>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, ListenerTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a listener; it stays registered until the returned
    /// `Subscription` is dropped or cancelled
    pub fn register<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SetData) + Send + Sync + 'static,
    {
        let mut table = self.table();
        let id = table.next_id;
        table.next_id += 1;
        table.entries.push((id, Arc::new(listener)));

        Subscription {
            id,
            table: Arc::downgrade(&self.table),
        }
    }

    /// Call every registered listener with the freshly hydrated data
    pub fn emit(&self, data: &SetData) {
        // Listeners may subscribe or unsubscribe while being called
        let listeners: Vec<Listener> = self
            .table()
            .entries
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in listeners {
            listener(data);
        }
    }

    pub fn clear(&self) {
        self.table().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.table().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registration handle; deregisters its listener on drop
#[must_use = "dropping a Subscription deregisters the listener"]
pub struct Subscription {
    id: u64,
    table: Weak<Mutex<ListenerTable>>,
}

impl Subscription {
    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            let mut table = table.lock().unwrap_or_else(PoisonError::into_inner);
            table.entries.retain(|(id, _)| *id != self.id);
        }
    }
}
