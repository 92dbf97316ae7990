//! Keyed query cache shared by every consumer of one session.
//!
//! Entries are keyed by `(resource, subject)` and carry a revision that bumps
//! on every write or invalidation. Writers that raced a newer write can use
//! [`QueryCache::set_if_revision`] to avoid clobbering it.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    /// Conversation list shown in the inbox.
    Conversations,
    /// Per-category unread counters.
    BadgeCounts,
    /// Single unread total derived from the badge counts snapshot.
    UnreadTotal,
    /// Notifications, most recent first.
    Notifications,
    /// Document analysis job snapshot.
    AnalysisJob,
    /// The subject's own profile.
    Profile,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub resource: Resource,
    pub subject: String,
}

impl CacheKey {
    pub fn new(resource: Resource, subject: impl Into<String>) -> Self {
        Self {
            resource,
            subject: subject.into(),
        }
    }
}

/// Change notifications for active viewers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheChange {
    Updated(CacheKey),
    /// The entry should be refetched by whoever is showing it.
    Invalidated(CacheKey),
    Removed(CacheKey),
}

type Value = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
struct Entry {
    value: Option<Value>,
    revision: u64,
    stale: bool,
}

#[derive(Default)]
struct State {
    entries: HashMap<CacheKey, Entry>,
    next_revision: u64,
}

impl State {
    fn bump(&mut self) -> u64 {
        self.next_revision += 1;
        self.next_revision
    }
}

#[derive(Clone)]
pub struct QueryCache {
    state: Arc<Mutex<State>>,
    changes: broadcast::Sender<CacheChange>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCache {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            state: Arc::new(Mutex::new(State::default())),
            changes,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheChange> {
        self.changes.subscribe()
    }

    fn notify(&self, change: CacheChange) {
        // No receivers is fine.
        let _ = self.changes.send(change);
    }

    /// Typed read. `None` if absent or stored under a different type.
    pub fn get<T: Clone + 'static>(&self, key: &CacheKey) -> Option<T> {
        let state = self.state.lock();
        state
            .entries
            .get(key)
            .and_then(|entry| entry.value.as_ref())
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.state
            .lock()
            .entries
            .get(key)
            .is_some_and(|entry| entry.value.is_some())
    }

    /// Revision of the entry, `0` if it was never written.
    pub fn revision(&self, key: &CacheKey) -> u64 {
        self.state
            .lock()
            .entries
            .get(key)
            .map_or(0, |entry| entry.revision)
    }

    pub fn is_stale(&self, key: &CacheKey) -> bool {
        self.state
            .lock()
            .entries
            .get(key)
            .is_some_and(|entry| entry.stale)
    }

    /// Replace the entry wholesale. Returns the new revision.
    pub fn set<T: Send + Sync + 'static>(&self, key: &CacheKey, value: T) -> u64 {
        let revision = {
            let mut state = self.state.lock();
            let revision = state.bump();
            let entry = state.entries.entry(key.clone()).or_default();
            entry.value = Some(Arc::new(value));
            entry.revision = revision;
            entry.stale = false;
            revision
        };
        self.notify(CacheChange::Updated(key.clone()));
        revision
    }

    /// Replace the entry only if nobody wrote it since `expected` was read.
    pub fn set_if_revision<T: Send + Sync + 'static>(
        &self,
        key: &CacheKey,
        value: T,
        expected: u64,
    ) -> bool {
        {
            let mut state = self.state.lock();
            let current = state.entries.get(key).map_or(0, |entry| entry.revision);
            if current != expected {
                return false;
            }
            let revision = state.bump();
            let entry = state.entries.entry(key.clone()).or_default();
            entry.value = Some(Arc::new(value));
            entry.revision = revision;
            entry.stale = false;
        }
        self.notify(CacheChange::Updated(key.clone()));
        true
    }

    /// Atomically derive a new value from the current one. Returning `None`
    /// from `f` leaves the entry untouched. Returns whether a write happened.
    pub fn update<T, F>(&self, key: &CacheKey, f: F) -> bool
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(Option<&T>) -> Option<T>,
    {
        {
            let mut state = self.state.lock();
            let current = state
                .entries
                .get(key)
                .and_then(|entry| entry.value.as_ref())
                .and_then(|value| value.downcast_ref::<T>());
            let Some(next) = f(current) else {
                return false;
            };
            let revision = state.bump();
            let entry = state.entries.entry(key.clone()).or_default();
            entry.value = Some(Arc::new(next));
            entry.revision = revision;
            entry.stale = false;
        }
        self.notify(CacheChange::Updated(key.clone()));
        true
    }

    /// Mark the entry stale so an active viewer refetches it. The cached value
    /// is kept for display in the meantime.
    pub fn invalidate(&self, key: &CacheKey) {
        {
            let mut state = self.state.lock();
            let revision = state.bump();
            let entry = state.entries.entry(key.clone()).or_default();
            entry.revision = revision;
            entry.stale = true;
        }
        self.notify(CacheChange::Invalidated(key.clone()));
    }

    /// Drop every entry scoped to `subject`.
    pub fn remove_subject(&self, subject: &str) {
        let removed: Vec<CacheKey> = {
            let mut state = self.state.lock();
            let keys: Vec<CacheKey> = state
                .entries
                .keys()
                .filter(|key| key.subject == subject)
                .cloned()
                .collect();
            for key in &keys {
                state.entries.remove(key);
            }
            keys
        };
        for key in removed {
            self.notify(CacheChange::Removed(key));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(resource: Resource) -> CacheKey {
        CacheKey::new(resource, "u-1")
    }

    #[test]
    fn typed_get_and_set() {
        let cache = QueryCache::new();
        let k = key(Resource::UnreadTotal);
        assert_eq!(cache.get::<u64>(&k), None);
        cache.set(&k, 6u64);
        assert_eq!(cache.get::<u64>(&k), Some(6));
        assert_eq!(cache.get::<String>(&k), None);
    }

    #[test]
    fn compare_and_set_rejects_interleaved_write() {
        let cache = QueryCache::new();
        let k = key(Resource::AnalysisJob);
        let seen = cache.revision(&k);
        cache.set(&k, "completed".to_string());
        assert!(!cache.set_if_revision(&k, "pending".to_string(), seen));
        assert_eq!(cache.get::<String>(&k).as_deref(), Some("completed"));

        let seen = cache.revision(&k);
        assert!(cache.set_if_revision(&k, "confirmed".to_string(), seen));
    }

    #[test]
    fn update_returning_none_does_not_write() {
        let cache = QueryCache::new();
        let k = key(Resource::Notifications);
        cache.set(&k, vec![1u32]);
        let rev = cache.revision(&k);
        assert!(!cache.update::<Vec<u32>, _>(&k, |_| None));
        assert_eq!(cache.revision(&k), rev);
        assert!(cache.update::<Vec<u32>, _>(&k, |cur| {
            let mut next = cur.cloned().unwrap_or_default();
            next.push(2);
            Some(next)
        }));
        assert_eq!(cache.get::<Vec<u32>>(&k), Some(vec![1, 2]));
    }

    #[test]
    fn invalidate_keeps_value_and_notifies() {
        let cache = QueryCache::new();
        let mut changes = cache.subscribe();
        let k = key(Resource::Conversations);
        cache.set(&k, vec!["c1".to_string()]);
        cache.invalidate(&k);
        assert!(cache.is_stale(&k));
        assert!(cache.contains(&k));
        assert_eq!(changes.try_recv().unwrap(), CacheChange::Updated(k.clone()));
        assert_eq!(changes.try_recv().unwrap(), CacheChange::Invalidated(k.clone()));

        cache.set(&k, Vec::<String>::new());
        assert!(!cache.is_stale(&k));
    }

    #[test]
    fn remove_subject_only_touches_that_subject() {
        let cache = QueryCache::new();
        cache.set(&key(Resource::UnreadTotal), 1u64);
        cache.set(&CacheKey::new(Resource::UnreadTotal, "u-2"), 2u64);
        cache.remove_subject("u-1");
        assert!(!cache.contains(&key(Resource::UnreadTotal)));
        assert_eq!(
            cache.get::<u64>(&CacheKey::new(Resource::UnreadTotal, "u-2")),
            Some(2)
        );
    }
}
