//! Ordered subscriber lists.
//!
//! Notification iterates over a snapshot of the list. Callbacks only get
//! shared access to the graph or field, so registration changes happen
//! between notifications, and the snapshot lets delivery run without
//! holding a borrow of the list.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

/// Handle returned by [`ObserverList::register`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

impl ObserverId {
    fn next() -> Self {
        ObserverId(NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

pub struct ObserverList<T: ?Sized> {
    entries: Vec<(ObserverId, Arc<T>)>,
}

impl<T: ?Sized> ObserverList<T> {
    pub fn new() -> Self {
        ObserverList { entries: Vec::new() }
    }

    /// Appends an observer. Registering the same `Arc` twice is a no-op and
    /// returns the id of the existing registration.
    pub fn register(&mut self, observer: Arc<T>) -> ObserverId {
        if let Some((id, _)) = self.entries.iter().find(|(_, o)| Arc::ptr_eq(o, &observer)) {
            return *id;
        }
        let id = ObserverId::next();
        self.entries.push((id, observer));
        id
    }

    /// Returns true if the observer was registered.
    pub fn unregister(&mut self, id: ObserverId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        before != self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of the current subscribers, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.entries.iter().map(|(_, o)| Arc::clone(o)).collect()
    }
}

impl<T: ?Sized> Default for ObserverList<T> {
    fn default() -> Self {
        Self::new()
    }
}

// Observers belong to the live object, never to its copies.
impl<T: ?Sized> Clone for ObserverList<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for ObserverList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverList").field("len", &self.entries.len()).finish()
    }
}
