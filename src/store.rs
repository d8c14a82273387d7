use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::key::Key;

/// A point-in-time mapping of keys to snippet text.
pub type Snippets = HashMap<Key, String>;

/// In-memory snippet storage backed by a `RwLock<HashMap>`.
///
/// Every read and write of the mapping goes through the lock; callers only
/// ever see copies. Operations are synchronous and never fail, so they are
/// safe to call from the event delivery path.
#[derive(Debug, Default)]
pub struct SnippetStore {
    snippets: RwLock<Snippets>,
}

impl SnippetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snippets(snippets: Snippets) -> Self {
        Self {
            snippets: RwLock::new(snippets),
        }
    }

    /// Inserts or replaces the snippet for `key`, returning the previous text.
    pub fn add(&self, key: Key, snippet: impl Into<String>) -> Option<String> {
        self.write().insert(key, snippet.into())
    }

    /// Removes the snippet for `key`. Removing a missing key is a no-op.
    pub fn remove(&self, key: &Key) -> Option<String> {
        self.write().remove(key)
    }

    pub fn get(&self, key: &Key) -> Option<String> {
        self.read().get(key).cloned()
    }

    /// Copies the whole mapping under a single read lock.
    pub fn snapshot(&self) -> Snippets {
        self.read().clone()
    }

    /// Swaps in a complete mapping, e.g. the one loaded from the persisted
    /// document.
    pub fn replace(&self, snippets: Snippets) {
        *self.write() = snippets;
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // Writers never leave the map half-updated, so a poisoned lock still
    // guards a consistent value.
    fn read(&self) -> RwLockReadGuard<'_, Snippets> {
        self.snippets.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Snippets> {
        self.snippets.write().unwrap_or_else(PoisonError::into_inner)
    }
}
