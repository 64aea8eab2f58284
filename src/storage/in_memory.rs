//! In-memory implementation of CacheInvalidator for testing and development

use crate::core::cache::{CacheInvalidator, QueryKey};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

/// In-memory query cache that records invalidations
///
/// Keeps the ordered log of every invalidation plus the set of keys that are
/// currently stale. Uses RwLock for thread-safe access.
#[derive(Clone, Default)]
pub struct InMemoryQueryCache {
    log: Arc<RwLock<Vec<QueryKey>>>,
    stale: Arc<RwLock<HashSet<QueryKey>>>,
}

impl InMemoryQueryCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Every invalidation received, in order
    pub fn invalidated(&self) -> Vec<QueryKey> {
        self.log.read().map(|log| log.clone()).unwrap_or_default()
    }

    /// Whether a key has been invalidated and not refetched yet
    pub fn is_stale(&self, key: &QueryKey) -> bool {
        self.stale
            .read()
            .map(|stale| stale.contains(key))
            .unwrap_or(false)
    }

    /// Mark a key as fresh again (the host refetched it)
    pub fn mark_fresh(&self, key: &QueryKey) -> bool {
        self.stale
            .write()
            .map(|mut stale| stale.remove(key))
            .unwrap_or(false)
    }

    /// Forget all recorded invalidations
    pub fn clear(&self) {
        if let Ok(mut log) = self.log.write() {
            log.clear();
        }
        if let Ok(mut stale) = self.stale.write() {
            stale.clear();
        }
    }
}

impl CacheInvalidator for InMemoryQueryCache {
    fn invalidate(&self, key: &QueryKey) {
        if let Ok(mut log) = self.log.write() {
            log.push(key.clone());
        }
        if let Ok(mut stale) = self.stale.write() {
            stale.insert(key.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalidate_records_key() {
        let cache = InMemoryQueryCache::new();
        let key = QueryKey::new(["cases"]);

        cache.invalidate(&key);
        cache.invalidate(&key);

        assert_eq!(cache.invalidated().len(), 2);
        assert!(cache.is_stale(&key));
    }

    #[test]
    fn test_mark_fresh() {
        let cache = InMemoryQueryCache::new();
        let key = QueryKey::new(["case", "case-1"]);
        cache.invalidate(&key);

        assert!(cache.mark_fresh(&key));
        assert!(!cache.is_stale(&key));
        assert!(!cache.mark_fresh(&key));
    }

    #[test]
    fn test_clones_share_state() {
        let cache = InMemoryQueryCache::new();
        let clone = cache.clone();
        clone.invalidate(&QueryKey::new(["users"]));
        assert_eq!(cache.invalidated(), vec![QueryKey::new(["users"])]);

        cache.clear();
        assert!(clone.invalidated().is_empty());
    }
}
