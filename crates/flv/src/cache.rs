//! Byte caches for whole files.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::RwLock;

/// A store that [`FlvFile`](crate::file::FlvFile) consults before reading a
/// file from disk.
pub trait CacheStore: Send + Sync {
    /// Returns the cached bytes for `name`.
    fn get(&self, name: &str) -> Option<Bytes>;

    /// Offers bytes to the cache. Returns whether they were accepted.
    fn offer(&self, name: &str, data: Bytes) -> bool;

    /// Removes an entry. Returns whether there was one.
    fn remove(&self, name: &str) -> bool;
}

/// A [`CacheStore`] that never stores anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl CacheStore for NoCache {
    fn get(&self, _: &str) -> Option<Bytes> {
        None
    }

    fn offer(&self, _: &str, _: Bytes) -> bool {
        false
    }

    fn remove(&self, _: &str) -> bool {
        false
    }
}

/// An in-memory [`CacheStore`].
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    max_entry_size: Option<usize>,
    entries: RwLock<HashMap<String, Bytes>>,
}

impl MemoryCacheStore {
    /// Create an empty store without a size limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject entries larger than `size` bytes.
    pub fn with_max_entry_size(mut self, size: usize) -> Self {
        self.max_entry_size = Some(size);
        self
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, name: &str) -> Option<Bytes> {
        self.entries.read().get(name).cloned()
    }

    fn offer(&self, name: &str, data: Bytes) -> bool {
        if self.max_entry_size.is_some_and(|max| data.len() > max) {
            tracing::debug!(name, size = data.len(), "entry too large for the cache");
            return false;
        }

        let mut entries = self.entries.write();
        if entries.contains_key(name) {
            return false;
        }

        entries.insert(name.to_owned(), data);
        true
    }

    fn remove(&self, name: &str) -> bool {
        self.entries.write().remove(name).is_some()
    }
}

#[cfg(test)]
#[cfg_attr(all(test, coverage_nightly), coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn no_cache() {
        assert!(!NoCache.offer("a.flv", Bytes::from_static(b"x")));
        assert_eq!(NoCache.get("a.flv"), None);
        assert!(!NoCache.remove("a.flv"));
    }

    #[test]
    fn memory_store() {
        let store = MemoryCacheStore::new().with_max_entry_size(4);

        assert!(store.offer("a.flv", Bytes::from_static(b"abcd")));
        assert!(!store.offer("a.flv", Bytes::from_static(b"efgh")));
        assert!(!store.offer("b.flv", Bytes::from_static(b"too long")));

        assert_eq!(store.get("a.flv"), Some(Bytes::from_static(b"abcd")));
        assert_eq!(store.len(), 1);

        assert!(store.remove("a.flv"));
        assert!(!store.remove("a.flv"));
        assert!(store.is_empty());
    }
}
