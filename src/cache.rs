//! Bounded node cache.
//!
//! Caches decoded node images keyed by their node-log offset. Offsets are
//! monotonic across appends and an image at a given offset never changes,
//! so a cached entry can never be stale; commit evicts the offsets its
//! dirty nodes supersede purely to keep the cache from holding dead images.
//!
//! Tracks hit/miss counters for observability.

use std::{
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use lru::LruCache;
use parking_lot::Mutex;

use crate::node::Node;

/// Default number of cached nodes.
pub const DEFAULT_CACHE_CAPACITY: usize = 32;

/// Bounded LRU of node-log offset → decoded node.
pub struct NodeCache {
    entries: Mutex<LruCache<u64, Arc<Node>>>,
    capacity: usize,
    /// Total cache hits since creation.
    hits: AtomicU64,
    /// Total cache misses since creation.
    misses: AtomicU64,
}

impl NodeCache {
    /// Creates a cache bounded to `capacity` nodes (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let bound = NonZeroUsize::new(capacity.max(1)).expect("max(1) is nonzero");
        Self {
            entries: Mutex::new(LruCache::new(bound)),
            capacity: bound.get(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns the cached node at `offset`, updating recency.
    pub fn get(&self, offset: u64) -> Option<Arc<Node>> {
        let mut entries = self.entries.lock();
        match entries.get(&offset) {
            Some(node) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(node))
            },
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            },
        }
    }

    /// Inserts a node at `offset`, evicting the least-recently-used entry
    /// if the cache is full.
    pub fn insert(&self, offset: u64, node: Arc<Node>) {
        self.entries.lock().put(offset, node);
    }

    /// Drops the entry at `offset`, if cached.
    pub fn evict(&self, offset: u64) {
        self.entries.lock().pop(&offset);
    }

    /// Checks whether `offset` is cached (without updating recency).
    pub fn contains(&self, offset: u64) -> bool {
        self.entries.lock().contains(&offset)
    }

    /// Returns the number of cached nodes.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Checks whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Returns cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            len: self.len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Current number of cached nodes.
    pub len: usize,
    /// Maximum capacity.
    pub capacity: usize,
    /// Total cache hits since creation.
    pub hits: u64,
    /// Total cache misses since creation.
    pub misses: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::LeafNode;

    fn leaf(id: u64) -> Arc<Node> {
        Arc::new(Node::Leaf(LeafNode::empty(id)))
    }

    #[test]
    fn test_cache_basic() {
        let cache = NodeCache::new(10);

        cache.insert(0, leaf(1));
        assert!(cache.contains(0));
        assert_eq!(cache.get(0).unwrap().id(), 1);

        cache.evict(0);
        assert!(!cache.contains(0));
        assert!(cache.get(0).is_none());
    }

    #[test]
    fn test_cache_eviction_at_capacity() {
        let cache = NodeCache::new(2);

        cache.insert(0, leaf(1));
        cache.insert(8, leaf(2));
        cache.insert(16, leaf(3));

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(0), "oldest entry should be evicted");
        assert!(cache.contains(8));
        assert!(cache.contains(16));
    }

    #[test]
    fn test_cache_recency() {
        let cache = NodeCache::new(2);

        cache.insert(0, leaf(1));
        cache.insert(8, leaf(2));

        // Touch offset 0 so offset 8 becomes the LRU victim
        cache.get(0);
        cache.insert(16, leaf(3));

        assert!(cache.contains(0));
        assert!(!cache.contains(8));
    }

    #[test]
    fn test_cache_stats() {
        let cache = NodeCache::new(4);
        cache.insert(0, leaf(1));

        cache.get(0);
        cache.get(0);
        cache.get(99);

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.len, 1);
        assert_eq!(stats.capacity, 4);
    }

    #[test]
    fn test_zero_capacity_clamps_to_one() {
        let cache = NodeCache::new(0);
        cache.insert(0, leaf(1));
        assert_eq!(cache.len(), 1);
    }
}
