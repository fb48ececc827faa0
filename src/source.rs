use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::error;
use parking_lot::{Mutex, RwLock};

use crate::map::Snapshot;

pub type Observer = Box<dyn Fn(Snapshot) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Registration(u64);

/// A provider of map snapshots that notifies observers whenever the whole list is replaced.
///
/// Observers may be called from any thread, once per replacement, with the new snapshot.
pub trait MapSource: Send + Sync {
    fn current_snapshot(&self) -> Snapshot;
    fn observe(&self, observer: Observer) -> Registration;
    fn unobserve(&self, registration: Registration);
}

/// In-memory map source. `replace` swaps the snapshot and notifies every observer.
#[derive(Default)]
pub struct ChangingList {
    current: RwLock<Snapshot>,
    observers: Mutex<Vec<(Registration, Arc<dyn Fn(Snapshot) + Send + Sync>)>>,
    replacing: Mutex<()>,
    next_registration: AtomicU64,
}

impl ChangingList {
    pub fn new<S: Into<Snapshot>>(initial: S) -> Self {
        Self {
            current: RwLock::new(initial.into()),
            ..Self::default()
        }
    }

    pub fn replace<S: Into<Snapshot>>(&self, next: S) {
        let next = next.into();
        let _guard = self.replacing.lock();
        *self.current.write() = next.clone();

        // Notify outside the observer lock so callbacks can unobserve.
        let observers: Vec<_> = self
            .observers
            .lock()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();
        for observer in observers {
            let snapshot = next.clone();
            if panic::catch_unwind(AssertUnwindSafe(|| observer(snapshot))).is_err() {
                error!("source: observer panicked while handling a snapshot replacement");
            }
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }
}

impl MapSource for ChangingList {
    fn current_snapshot(&self) -> Snapshot {
        self.current.read().clone()
    }

    fn observe(&self, observer: Observer) -> Registration {
        let registration = Registration(self.next_registration.fetch_add(1, Ordering::Relaxed));
        self.observers
            .lock()
            .push((registration, Arc::from(observer)));
        registration
    }

    fn unobserve(&self, registration: Registration) {
        self.observers
            .lock()
            .retain(|(existing, _)| *existing != registration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{MapDefinition, MapId, MapInfo, Preview};
    use chrono::Utc;

    fn map(id: &str) -> MapDefinition {
        MapDefinition::new(MapInfo {
            id: MapId::new(id),
            name: id.to_string(),
            min_players: 1,
            max_players: 2,
            created_at: Utc::now(),
            path: None,
            preview: Preview::Missing,
        })
    }

    #[test]
    fn notifies_each_replacement_once() {
        let list = ChangingList::new(vec![map("a")]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        list.observe(Box::new(move |snapshot: Snapshot| {
            sink.lock().push(snapshot.len());
        }));

        list.replace(vec![map("a"), map("b")]);
        list.replace(Vec::new());

        assert_eq!(*seen.lock(), vec![2, 0]);
        assert!(list.current_snapshot().is_empty());
    }

    #[test]
    fn unobserve_stops_notifications() {
        let list = ChangingList::default();
        let seen = Arc::new(AtomicU64::new(0));
        let counter = seen.clone();
        let registration = list.observe(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        list.replace(vec![map("a")]);
        list.unobserve(registration);
        list.replace(vec![map("b")]);

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(list.observer_count(), 0);
    }

    #[test]
    fn panicking_observer_does_not_escape() {
        let list = ChangingList::default();
        let seen = Arc::new(AtomicU64::new(0));
        let counter = seen.clone();
        list.observe(Box::new(|_| panic!("observer failure")));
        list.observe(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        list.replace(vec![map("a")]);

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(list.current_snapshot().len(), 1);
    }
}
