use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReadModelError {
    #[error("read model lock poisoned")]
    LockPoisoned,
}

/// Key/value store for read models that can be rebuilt from events.
///
/// Reads are best effort; writes report failures so a projection does not
/// advance past a record it could not store.
pub trait KeyValueStore<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<V>;
    fn upsert(&self, key: K, value: V) -> Result<(), ReadModelError>;
    fn remove(&self, key: &K) -> Result<(), ReadModelError>;
    fn list(&self) -> Vec<V>;
    /// Drop every record (rebuild support).
    fn clear(&self) -> Result<(), ReadModelError>;
}

impl<K, V, S> KeyValueStore<K, V> for Arc<S>
where
    S: KeyValueStore<K, V> + ?Sized,
{
    fn get(&self, key: &K) -> Option<V> {
        (**self).get(key)
    }

    fn upsert(&self, key: K, value: V) -> Result<(), ReadModelError> {
        (**self).upsert(key, value)
    }

    fn remove(&self, key: &K) -> Result<(), ReadModelError> {
        (**self).remove(key)
    }

    fn list(&self) -> Vec<V> {
        (**self).list()
    }

    fn clear(&self) -> Result<(), ReadModelError> {
        (**self).clear()
    }
}

#[derive(Debug)]
pub struct InMemoryStore<K, V> {
    inner: RwLock<HashMap<K, V>>,
}

impl<K, V> InMemoryStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> KeyValueStore<K, V> for InMemoryStore<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Option<V> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.get(key).cloned()
    }

    fn upsert(&self, key: K, value: V) -> Result<(), ReadModelError> {
        let mut map = self.inner.write().map_err(|_| ReadModelError::LockPoisoned)?;
        map.insert(key, value);
        Ok(())
    }

    fn remove(&self, key: &K) -> Result<(), ReadModelError> {
        let mut map = self.inner.write().map_err(|_| ReadModelError::LockPoisoned)?;
        map.remove(key);
        Ok(())
    }

    fn list(&self) -> Vec<V> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.values().cloned().collect()
    }

    fn clear(&self) -> Result<(), ReadModelError> {
        let mut map = self.inner.write().map_err(|_| ReadModelError::LockPoisoned)?;
        map.clear();
        Ok(())
    }
}
