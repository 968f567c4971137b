//! Encode-side cache that can be shared between encoders and threads.

use std::any::TypeId;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::class::AmfClass;
use crate::value::TraitDescriptor;

/// Maximum number of encoded strings kept in the cache.
pub const STRING_CACHE_CAPACITY: usize = 255;

/// Strings longer than this are never cached.
pub const MAX_CACHED_STRING_LEN: usize = 256;

#[derive(Debug, Default)]
struct CacheInner {
    strings: HashMap<String, Bytes>,
    order: VecDeque<String>,
    traits: HashMap<TypeId, Arc<TraitDescriptor>>,
}

/// Shared cache of encoded AMF0 strings and per-type trait descriptors.
///
/// Cloning is cheap and yields a handle to the same cache. Caching never
/// changes the encoded bytes.
#[derive(Debug, Clone, Default)]
pub struct AmfCache {
    inner: Arc<Mutex<CacheInner>>,
}

impl AmfCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached strings.
    pub fn cached_strings(&self) -> usize {
        self.inner.lock().strings.len()
    }

    /// Drops every cached entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.strings.clear();
        inner.order.clear();
        inner.traits.clear();
    }

    pub(crate) fn string(&self, value: &str) -> Option<Bytes> {
        self.inner.lock().strings.get(value).cloned()
    }

    pub(crate) fn insert_string(&self, value: &str, encoded: Bytes) {
        if value.len() > MAX_CACHED_STRING_LEN {
            return;
        }

        let mut inner = self.inner.lock();
        if inner.strings.contains_key(value) {
            return;
        }

        if inner.order.len() >= STRING_CACHE_CAPACITY {
            if let Some(oldest) = inner.order.pop_front() {
                inner.strings.remove(&oldest);
            }
        }

        inner.order.push_back(value.to_owned());
        inner.strings.insert(value.to_owned(), encoded);
    }

    pub(crate) fn traits_for(&self, instance: &dyn AmfClass) -> Arc<TraitDescriptor> {
        let type_id = instance.as_any().type_id();
        self.inner
            .lock()
            .traits
            .entry(type_id)
            .or_insert_with(|| Arc::new(instance.traits()))
            .clone()
    }
}

#[cfg(test)]
#[cfg_attr(all(test, coverage_nightly), coverage(off))]
mod tests {
    use super::*;
    use crate::class::tests::Person;

    #[test]
    fn strings_are_evicted_in_insertion_order() {
        let cache = AmfCache::new();
        for i in 0..=STRING_CACHE_CAPACITY {
            cache.insert_string(&format!("key{i}"), Bytes::from(format!("value{i}")));
        }

        assert_eq!(cache.cached_strings(), STRING_CACHE_CAPACITY);
        assert!(cache.string("key0").is_none());
        assert_eq!(cache.string("key1"), Some(Bytes::from_static(b"value1")));

        let shared = cache.clone();
        shared.clear();
        assert_eq!(cache.cached_strings(), 0);
    }

    #[test]
    fn long_strings_are_skipped() {
        let cache = AmfCache::new();
        let long = "x".repeat(MAX_CACHED_STRING_LEN + 1);
        cache.insert_string(&long, Bytes::new());
        assert!(cache.string(&long).is_none());
    }

    #[test]
    fn traits_are_shared_per_type() {
        let cache = AmfCache::new();
        let first = cache.traits_for(&Person::default());
        let second = cache.traits_for(&Person {
            name: "other".into(),
            ..Default::default()
        });

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.class_name, "com.example.Person");
    }
}
