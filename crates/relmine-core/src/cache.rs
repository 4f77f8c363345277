//! Injectable analysis caches
//!
//! Every analysis component owns one or more caches (resolution results,
//! discovered paths, recognised patterns, pairwise correlations). The cache
//! is handed in at construction time so the caller decides its lifetime;
//! [`NoopCache`] disables caching.
//!
//! Two in-flight calls writing the same key on one instance are not
//! serialised against each other; callers that need that must serialise
//! calls per instance.

use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::RwLock;
use sha2::{Digest, Sha256};

/// A get/put/clear cache used by analysis components
pub trait AnalysisCache<K, V>: Send + Sync {
    /// Look up a cached value
    fn get(&self, key: &K) -> Option<V>;

    /// Store a value, replacing any previous one
    fn put(&self, key: K, value: V);

    /// Drop every cached value
    fn clear(&self);

    /// Number of cached values
    fn len(&self) -> usize;

    /// Whether the cache is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Unbounded in-memory cache
#[derive(Debug)]
pub struct InMemoryCache<K, V> {
    entries: RwLock<HashMap<K, V>>,
}

impl<K, V> InMemoryCache<K, V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> AnalysisCache<K, V> for InMemoryCache<K, V>
where
    K: Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Option<V> {
        self.entries.read().get(key).cloned()
    }

    fn put(&self, key: K, value: V) {
        self.entries.write().insert(key, value);
    }

    fn clear(&self) {
        self.entries.write().clear();
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

/// Cache that never stores anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

impl<K, V> AnalysisCache<K, V> for NoopCache {
    fn get(&self, _key: &K) -> Option<V> {
        None
    }

    fn put(&self, _key: K, _value: V) {}

    fn clear(&self) {}

    fn len(&self) -> usize {
        0
    }
}

/// SHA-256 fingerprint over a sequence of string parts
///
/// Parts are length-prefixed so `["ab", "c"]` and `["a", "bc"]` differ.
pub fn fingerprint<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        let part = part.as_ref();
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}
