//! Per-key exclusive locks for single-writer sections.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("row lock poisoned: {0}")]
pub struct LockPoisoned(pub String);

/// One mutex per key, created on first use and dropped once no caller holds
/// or waits on it.
///
/// Callers for the same key run one at a time and block while waiting; callers
/// for different keys never contend beyond the short registry lookup. A row
/// poisoned by a panicking caller stays registered so later callers see it.
#[derive(Debug)]
pub struct RowLocks<K> {
    rows: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for RowLocks<K> {
    fn default() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> RowLocks<K>
where
    K: Clone + Eq + Hash + core::fmt::Debug,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `key`.
    pub fn with_lock<T>(&self, key: &K, f: impl FnOnce() -> T) -> Result<T, LockPoisoned> {
        let row = {
            let mut rows = self.registry()?;
            rows.entry(key.clone()).or_default().clone()
        };
        let out = {
            let _guard = row.lock().map_err(|_| LockPoisoned(format!("{key:?}")))?;
            f()
        };
        self.release(key, row)?;
        Ok(out)
    }

    fn registry(&self) -> Result<MutexGuard<'_, HashMap<K, Arc<Mutex<()>>>>, LockPoisoned> {
        self.rows
            .lock()
            .map_err(|_| LockPoisoned("lock registry".to_string()))
    }

    fn release(&self, key: &K, row: Arc<Mutex<()>>) -> Result<(), LockPoisoned> {
        let mut rows = self.registry()?;
        // Clones are only handed out under the registry lock: two references
        // are ours and the map's, so nobody is holding or waiting.
        if Arc::strong_count(&row) == 2 {
            rows.remove(key);
        }
        Ok(())
    }

    /// Number of keys currently held or waited on.
    pub fn len(&self) -> usize {
        self.rows.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn same_key_sections_do_not_interleave() {
        let locks = Arc::new(RowLocks::<u32>::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let locks = locks.clone();
                let log = log.clone();
                thread::spawn(move || {
                    locks
                        .with_lock(&1, || {
                            log.lock().unwrap().push((i, "enter"));
                            thread::yield_now();
                            log.lock().unwrap().push((i, "exit"));
                        })
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let log = log.lock().unwrap();
        for pair in log.chunks(2) {
            assert_eq!(pair[0].0, pair[1].0);
            assert_eq!((pair[0].1, pair[1].1), ("enter", "exit"));
        }
        assert!(locks.is_empty());
    }

    #[test]
    fn returns_the_section_result() {
        let locks = RowLocks::<&str>::new();
        assert_eq!(locks.with_lock(&"a", || 7).unwrap(), 7);
        assert_eq!(locks.with_lock(&"b", || 8).unwrap(), 8);
    }

    #[test]
    fn rows_are_dropped_once_released() {
        let locks = RowLocks::<u32>::new();
        for key in 0..1000 {
            locks.with_lock(&key, || ()).unwrap();
        }
        assert!(locks.is_empty());

        let seen_inside = locks.with_lock(&7, || locks.len()).unwrap();
        assert_eq!(seen_inside, 1);
        assert!(locks.is_empty());
    }

    #[test]
    fn poisoned_rows_stay_visible() {
        let locks = Arc::new(RowLocks::<u32>::new());
        let panicking = locks.clone();
        let _ = thread::spawn(move || panicking.with_lock(&3, || -> u32 { panic!("boom") })).join();

        assert_eq!(locks.with_lock(&3, || ()), Err(LockPoisoned("3".to_string())));
        assert_eq!(locks.len(), 1);
        assert!(locks.with_lock(&4, || ()).is_ok());
    }
}
