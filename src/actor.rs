//! Actor identities and the keyed-lock map that holds per-actor state.
//!
//! The map itself sits behind an `RwLock` that is only taken for writing when a
//! new actor shows up or an actor is reset. Each entry carries its own `Mutex`,
//! so unrelated actors never serialize on each other once they are registered.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

/// Opaque identity on whose behalf requests arrive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(String);

impl ActorId {
    /// Wrap any string-like identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActorId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for ActorId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&ActorId> for ActorId {
    fn from(id: &ActorId) -> Self {
        id.clone()
    }
}

impl From<u64> for ActorId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<i64> for ActorId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

/// Handle to one actor's state. Cloning shares the same lock.
pub(crate) type Entry<V> = Arc<Mutex<V>>;

/// Lock an entry, recovering the data if a previous holder panicked.
pub(crate) fn lock<V>(entry: &Mutex<V>) -> MutexGuard<'_, V> {
    entry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Concurrent actor → state map with per-entry locking.
#[derive(Debug)]
pub(crate) struct ActorMap<V> {
    inner: RwLock<HashMap<ActorId, Entry<V>>>,
}

impl<V> Default for ActorMap<V> {
    fn default() -> Self {
        Self { inner: RwLock::new(HashMap::new()) }
    }
}

impl<V: Default> ActorMap<V> {
    /// Fetch the actor's entry, creating a default one on first sight.
    pub(crate) fn get_or_create(&self, actor: &ActorId) -> Entry<V> {
        {
            let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = map.get(actor) {
                return entry.clone();
            }
        }
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.entry(actor.clone()).or_default().clone()
    }
}

impl<V> ActorMap<V> {
    /// Fetch the actor's entry without creating it.
    pub(crate) fn get(&self, actor: &ActorId) -> Option<Entry<V>> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.get(actor).cloned()
    }

    /// Drop the actor's entry. In-flight holders keep their handle until they finish.
    pub(crate) fn remove(&self, actor: &ActorId) -> bool {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.remove(actor).is_some()
    }

    /// Clone every entry handle out of the map. The map lock is released on return.
    pub(crate) fn entries(&self) -> Vec<(ActorId, Entry<V>)> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}
