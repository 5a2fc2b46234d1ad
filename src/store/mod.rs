//! Object store abstraction.
//!
//! Stages exchange data only through keys in a shared store. The
//! [`ObjectStore`] trait is the whole contract: byte blobs under string keys,
//! prefix listing, and a compare-and-swap primitive for the one piece of
//! contended state (the transaction counter).
//!
//! Implementations:
//! - [`MemoryStore`]: `BTreeMap` behind a mutex, for tests and single-process runs
//! - [`LocalStore`]: directory tree on the local filesystem

pub mod local;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::error::{Result, TileGridError};

pub use local::LocalStore;

/// Key-value blob store shared by all stages
pub trait ObjectStore: Send + Sync {
    /// Write `bytes` under `key`, replacing any existing object.
    ///
    /// # Errors
    /// Returns `Storage` or `Io` on backend failure.
    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    /// # Errors
    /// Returns `ObjectNotFound` if `key` does not exist.
    fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Keys starting with `prefix`, sorted lexically.
    ///
    /// # Errors
    /// Returns `Storage` or `Io` on backend failure.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Replace the object under `key` with `new` only if its current content
    /// equals `expected` (`None` = key absent). Returns whether the swap
    /// happened.
    ///
    /// # Errors
    /// Returns `Storage` or `Io` on backend failure.
    fn compare_and_swap(&self, key: &str, expected: Option<&[u8]>, new: Vec<u8>) -> Result<bool>;

    /// `get` that maps a missing key to `None`
    ///
    /// # Errors
    /// Propagates any error other than `ObjectNotFound`.
    fn get_opt(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.get(key) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(TileGridError::ObjectNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl<T: ObjectStore + ?Sized> ObjectStore for Arc<T> {
    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        (**self).put(key, bytes)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        (**self).get(key)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        (**self).list(prefix)
    }

    fn compare_and_swap(&self, key: &str, expected: Option<&[u8]>, new: Vec<u8>) -> Result<bool> {
        (**self).compare_and_swap(key, expected, new)
    }
}

/// Source of strictly increasing sequence values, one sequence per name
pub trait SequenceSource: Send + Sync {
    /// Allocate the next value of the named sequence (first value is 1).
    ///
    /// # Errors
    /// Returns `Storage` if the value cannot be allocated.
    fn next(&self, name: &str) -> Result<u64>;
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> Result<MutexGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.objects
            .lock()
            .map_err(|_| TileGridError::Storage("memory store lock poisoned".to_string()))
    }

    /// Number of stored objects
    ///
    /// # Errors
    /// Returns `Storage` if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.objects()?.len())
    }

    /// # Errors
    /// Returns `Storage` if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.objects()?.is_empty())
    }

    /// Remove an object; returns whether it existed
    ///
    /// # Errors
    /// Returns `Storage` if the lock is poisoned.
    pub fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.objects()?.remove(key).is_some())
    }
}

impl ObjectStore for MemoryStore {
    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.objects()?.insert(key.to_string(), bytes);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.objects()?
            .get(key)
            .cloned()
            .ok_or_else(|| TileGridError::ObjectNotFound(key.to_string()))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects()?
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn compare_and_swap(&self, key: &str, expected: Option<&[u8]>, new: Vec<u8>) -> Result<bool> {
        let mut objects = self.objects()?;
        if objects.get(key).map(Vec::as_slice) != expected {
            return Ok(false);
        }
        objects.insert(key.to_string(), new);
        Ok(true)
    }
}

/// Increments under the store's own lock, so allocation is atomic.
impl SequenceSource for MemoryStore {
    fn next(&self, name: &str) -> Result<u64> {
        let mut objects = self.objects()?;
        let current = objects.get(name).map_or(0, |bytes| parse_counter(bytes));
        let next = current + 1;
        objects.insert(name.to_string(), next.to_string().into_bytes());
        Ok(next)
    }
}

/// Counter kept as decimal text under a store key, advanced with a
/// compare-and-swap loop.
pub struct StoreSequence<S: ObjectStore> {
    store: S,
    max_attempts: usize,
}

impl<S: ObjectStore> StoreSequence<S> {
    pub const DEFAULT_MAX_ATTEMPTS: usize = 64;

    pub fn new(store: S) -> Self {
        Self {
            store,
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

impl<S: ObjectStore> SequenceSource for StoreSequence<S> {
    fn next(&self, name: &str) -> Result<u64> {
        for attempt in 1..=self.max_attempts {
            let current = self.store.get_opt(name)?;
            let value = current.as_deref().map_or(0, parse_counter);
            let next = value + 1;
            if self
                .store
                .compare_and_swap(name, current.as_deref(), next.to_string().into_bytes())?
            {
                return Ok(next);
            }
            debug!(key = name, attempt, "Counter changed concurrently, retrying");
        }
        Err(TileGridError::Storage(format!(
            "could not advance counter {name} after {} attempts",
            self.max_attempts
        )))
    }
}

/// Missing, empty or non-numeric counters start from zero
fn parse_counter(bytes: &[u8]) -> u64 {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip_and_list() {
        let store = MemoryStore::new();
        store.put("acquisition/a/1.tif", vec![1]).unwrap();
        store.put("acquisition/a/2.tif", vec![2]).unwrap();
        store.put("acquisition/b/1.tif", vec![3]).unwrap();
        store.put("predictions/a/1.tif", vec![4]).unwrap();

        assert_eq!(store.get("acquisition/a/2.tif").unwrap(), vec![2]);
        assert_eq!(
            store.list("acquisition/a/").unwrap(),
            vec!["acquisition/a/1.tif", "acquisition/a/2.tif"]
        );
        assert_eq!(store.len().unwrap(), 4);
    }

    #[test]
    fn test_missing_key() {
        let store = MemoryStore::new();
        let err = store.get("nope").unwrap_err();
        assert_eq!(err.kind().as_str(), "object_not_found");
        assert_eq!(store.get_opt("nope").unwrap(), None);
    }

    #[test]
    fn test_compare_and_swap() {
        let store = MemoryStore::new();
        assert!(store.compare_and_swap("k", None, b"1".to_vec()).unwrap());
        assert!(!store.compare_and_swap("k", None, b"2".to_vec()).unwrap());
        assert!(!store.compare_and_swap("k", Some(b"0"), b"2".to_vec()).unwrap());
        assert!(store.compare_and_swap("k", Some(b"1"), b"2".to_vec()).unwrap());
        assert_eq!(store.get("k").unwrap(), b"2".to_vec());
    }

    #[test]
    fn test_counter_parsing() {
        assert_eq!(parse_counter(b"41\n"), 41);
        assert_eq!(parse_counter(b""), 0);
        assert_eq!(parse_counter(b"garbage"), 0);
    }

    #[test]
    fn test_store_sequence_starts_at_one_and_resumes() {
        let store = Arc::new(MemoryStore::new());
        let seq = StoreSequence::new(Arc::clone(&store));
        assert_eq!(seq.next("etc/counter").unwrap(), 1);
        assert_eq!(seq.next("etc/counter").unwrap(), 2);

        store.put("etc/counter", b"41".to_vec()).unwrap();
        assert_eq!(seq.next("etc/counter").unwrap(), 42);
        assert_eq!(store.get("etc/counter").unwrap(), b"42".to_vec());
    }

    #[test]
    fn test_concurrent_allocation_is_unique() {
        let store = Arc::new(MemoryStore::new());
        let seq = Arc::new(StoreSequence::new(Arc::clone(&store)).with_max_attempts(10_000));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let seq = Arc::clone(&seq);
                std::thread::spawn(move || (0..50).map(|_| seq.next("c").unwrap()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        assert_eq!(all, (1..=400).collect::<Vec<_>>());
    }

    #[test]
    fn test_memory_sequence_atomic() {
        let store = Arc::new(MemoryStore::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || (0..25).map(|_| store.next("c").unwrap()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        assert_eq!(all, (1..=100).collect::<Vec<_>>());
    }
}
