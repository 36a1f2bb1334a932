//! Bounded LRU caches with hit/miss statistics.
//!
//! `LruCache` is the single-owner cache: a hash map into a slab of entries
//! threaded onto an intrusive doubly-linked recency list, so `get`, `put`
//! and `remove` are all O(1). `SharedLruCache` wraps it in a
//! `parking_lot::Mutex` for use from multiple threads; critical sections
//! only touch map and list pointers.

use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::Mutex;

/// Sentinel index meaning "no entry".
const NIL: usize = usize::MAX;

/// Snapshot of a cache's counters.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub size: usize,
    pub capacity: usize,
}

struct Entry<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

/// A bounded least-recently-used cache.
///
/// Capacity is fixed at construction. Inserting into a full cache evicts
/// the least recently used entry.
pub struct LruCache<K, V> {
    capacity: usize,
    map: HashMap<K, usize>,
    slots: Vec<Option<Entry<K, V>>>,
    free: Vec<usize>,
    /// Most recently used entry, or `NIL` when empty.
    head: usize,
    /// Least recently used entry, or `NIL` when empty.
    tail: usize,
    hits: u64,
    misses: u64,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    /// Create a cache holding at most `capacity` entries.
    ///
    /// A zero capacity is clamped to one so `put` always succeeds.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            map: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            hits: 0,
            misses: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Look up `key`, marking it most recently used on a hit.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        match self.map.get(key).copied() {
            Some(idx) => {
                self.hits += 1;
                self.move_to_front(idx);
                self.slots[idx].as_ref().map(|e| &e.value)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Insert or replace `key`, marking it most recently used.
    pub fn put(&mut self, key: K, value: V) {
        if let Some(idx) = self.map.get(&key).copied() {
            if let Some(entry) = self.slots[idx].as_mut() {
                entry.value = value;
            }
            self.move_to_front(idx);
            return;
        }
        if self.map.len() >= self.capacity {
            self.evict_tail();
        }
        let entry = Entry {
            key: key.clone(),
            value,
            prev: NIL,
            next: self.head,
        };
        let idx = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };
        if self.head != NIL {
            if let Some(old_head) = self.slots[self.head].as_mut() {
                old_head.prev = idx;
            }
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
        self.map.insert(key, idx);
    }

    /// Remove `key`, returning its value if present.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.map.remove(key)?;
        self.unlink(idx);
        self.free.push(idx);
        self.slots[idx].take().map(|e| e.value)
    }

    /// Drop all entries and reset the counters.
    pub fn clear(&mut self) {
        self.map.clear();
        self.slots.clear();
        self.free.clear();
        self.head = NIL;
        self.tail = NIL;
        self.hits = 0;
        self.misses = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let total = self.hits + self.misses;
        let hit_rate = if total > 0 {
            self.hits as f64 / total as f64
        } else {
            0.0
        };
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            hit_rate,
            size: self.map.len(),
            capacity: self.capacity,
        }
    }

    fn link_at_front(&mut self, idx: usize) {
        if let Some(entry) = self.slots[idx].as_mut() {
            entry.prev = NIL;
            entry.next = self.head;
        }
        if self.head != NIL {
            if let Some(old_head) = self.slots[self.head].as_mut() {
                old_head.prev = idx;
            }
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == idx {
            return;
        }
        self.unlink(idx);
        self.link_at_front(idx);
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = match self.slots[idx].as_ref() {
            Some(entry) => (entry.prev, entry.next),
            None => return,
        };
        if prev != NIL {
            if let Some(entry) = self.slots[prev].as_mut() {
                entry.next = next;
            }
        } else {
            self.head = next;
        }
        if next != NIL {
            if let Some(entry) = self.slots[next].as_mut() {
                entry.prev = prev;
            }
        } else {
            self.tail = prev;
        }
    }

    fn evict_tail(&mut self) {
        if self.tail == NIL {
            return;
        }
        let key = match self.slots[self.tail].as_ref() {
            Some(entry) => entry.key.clone(),
            None => return,
        };
        self.remove(&key);
    }
}

/// Thread-safe LRU cache shared by reference.
///
/// `get` clones the value out so the lock is held only for pointer work.
pub struct SharedLruCache<K, V> {
    inner: Mutex<LruCache<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> SharedLruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().get(key).cloned()
    }

    pub fn put(&self, key: K, value: V) {
        self.inner.lock().put(key, value);
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().remove(key)
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_inserted_value() {
        let mut cache = LruCache::new(4);
        cache.put("a", 1);
        assert_eq!(cache.get(&"a"), Some(&1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn miss_returns_none() {
        let mut cache: LruCache<&str, i32> = LruCache::new(4);
        assert_eq!(cache.get(&"absent"), None);
    }

    #[test]
    fn put_replaces_existing_value() {
        let mut cache = LruCache::new(4);
        cache.put("a", 1);
        cache.put("a", 2);
        assert_eq!(cache.get(&"a"), Some(&2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = LruCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.get(&"a");
        cache.put("c", 3);
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(&1));
        assert_eq!(cache.get(&"c"), Some(&3));
    }

    #[test]
    fn eviction_order_follows_recency_not_insertion() {
        let mut cache = LruCache::new(3);
        cache.put(1, "one");
        cache.put(2, "two");
        cache.put(3, "three");
        cache.get(&1);
        cache.get(&2);
        cache.put(4, "four");
        assert_eq!(cache.get(&3), None);
        assert_eq!(cache.get(&1), Some(&"one"));
    }

    #[test]
    fn remove_returns_value() {
        let mut cache = LruCache::new(4);
        cache.put("a", 10);
        assert_eq!(cache.remove(&"a"), Some(10));
        assert_eq!(cache.remove(&"a"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn remove_then_reinsert_reuses_slots() {
        let mut cache = LruCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.remove(&"a");
        cache.put("c", 3);
        cache.put("d", 4);
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"c"), Some(&3));
        assert_eq!(cache.get(&"d"), Some(&4));
    }

    #[test]
    fn remove_head_and_tail() {
        let mut cache = LruCache::new(4);
        cache.put(1, 1);
        cache.put(2, 2);
        cache.put(3, 3);
        assert_eq!(cache.remove(&3), Some(3)); // head
        assert_eq!(cache.remove(&1), Some(1)); // tail
        assert_eq!(cache.get(&2), Some(&2));
        cache.put(4, 4);
        cache.put(5, 5);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn clear_resets_counters() {
        let mut cache = LruCache::new(4);
        cache.put("a", 1);
        cache.get(&"a");
        cache.get(&"x");
        cache.clear();
        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.size, 0);
        assert_eq!(cache.get(&"a"), None);
    }

    #[test]
    fn stats_track_hits_and_misses() {
        let mut cache = LruCache::new(4);
        cache.put("a", 1);
        cache.get(&"a");
        cache.get(&"a");
        cache.get(&"missing");
        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.size, 1);
        assert_eq!(stats.capacity, 4);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut cache = LruCache::new(0);
        cache.put("a", 1);
        assert_eq!(cache.get(&"a"), Some(&1));
        assert_eq!(cache.capacity(), 1);
    }

    #[test]
    fn single_slot_cache_evicts_on_every_insert() {
        let mut cache = LruCache::new(1);
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"b"), Some(&2));
    }

    #[test]
    fn heap_values_survive_eviction_churn() {
        let mut cache = LruCache::new(8);
        for i in 0..64 {
            cache.put(i, vec![i; 16]);
        }
        for i in 56..64 {
            assert_eq!(cache.get(&i), Some(&vec![i; 16]));
        }
        assert_eq!(cache.len(), 8);
    }

    #[test]
    fn shared_cache_is_usable_across_threads() {
        use std::sync::Arc;

        let cache: Arc<SharedLruCache<u64, u64>> = Arc::new(SharedLruCache::new(128));
        let mut handles = Vec::new();
        for t in 0..4u64 {
            let cache = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    cache.put(t * 1000 + i, i);
                    let _ = cache.get(&(t * 1000 + i));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        let stats = cache.stats();
        assert!(stats.hits >= 1);
        assert!(stats.size <= 128);
    }
}
