use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::common::PageId;

use super::LruKReplacer;

struct CacheState {
    pages: HashMap<PageId, Bytes>,
    replacer: LruKReplacer,
    hits: u64,
    misses: u64,
}

/// Bounded cache of page images keyed by page id.
///
/// Only immutable images are cached: a page enters the cache once written and
/// leaves it when freed, so a hit always equals the on-disk contents.
pub struct PageCache {
    capacity: usize,
    state: Mutex<CacheState>,
}

impl PageCache {
    /// Creates a cache holding at most `capacity` pages, evicting by LRU-`k`.
    pub fn new(capacity: usize, k: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(CacheState {
                pages: HashMap::with_capacity(capacity),
                replacer: LruKReplacer::new(k),
                hits: 0,
                misses: 0,
            }),
        }
    }

    pub fn get(&self, page_id: PageId) -> Option<Bytes> {
        if self.capacity == 0 {
            return None;
        }
        let mut state = self.state.lock();
        match state.pages.get(&page_id).cloned() {
            Some(page) => {
                state.hits += 1;
                state.replacer.record_access(page_id);
                Some(page)
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    pub fn insert(&self, page_id: PageId, page: Bytes) {
        if self.capacity == 0 {
            return;
        }
        let mut state = self.state.lock();
        if !state.pages.contains_key(&page_id) {
            while state.pages.len() >= self.capacity {
                match state.replacer.evict() {
                    Some(victim) => {
                        state.pages.remove(&victim);
                    }
                    None => break,
                }
            }
        }
        state.pages.insert(page_id, page);
        state.replacer.record_access(page_id);
    }

    /// Drops a page whose slot is being freed or reused.
    pub fn invalidate(&self, page_id: PageId) {
        let mut state = self.state.lock();
        if state.pages.remove(&page_id).is_some() {
            state.replacer.remove(page_id);
        }
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.pages.clear();
        state.replacer.clear();
    }

    pub fn len(&self) -> usize {
        self.state.lock().pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `(hits, misses)` since creation.
    pub fn hit_stats(&self) -> (u64, u64) {
        let state = self.state.lock();
        (state.hits, state.misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(byte: u8) -> Bytes {
        Bytes::from(vec![byte; 16])
    }

    #[test]
    fn test_page_cache_hit_and_miss() {
        let cache = PageCache::new(4, 2);
        assert!(cache.get(PageId::new(1)).is_none());

        cache.insert(PageId::new(1), page(7));
        assert_eq!(cache.get(PageId::new(1)).unwrap(), page(7));
        assert_eq!(cache.hit_stats(), (1, 1));
    }

    #[test]
    fn test_page_cache_respects_capacity() {
        let cache = PageCache::new(2, 2);
        cache.insert(PageId::new(1), page(1));
        cache.insert(PageId::new(2), page(2));
        cache.get(PageId::new(1));
        cache.get(PageId::new(2));
        cache.get(PageId::new(2));
        cache.insert(PageId::new(3), page(3));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(PageId::new(3)).is_some());
    }

    #[test]
    fn test_page_cache_invalidate() {
        let cache = PageCache::new(2, 2);
        cache.insert(PageId::new(9), page(9));
        cache.invalidate(PageId::new(9));
        assert!(cache.get(PageId::new(9)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_page_cache_disabled() {
        let cache = PageCache::new(0, 2);
        cache.insert(PageId::new(1), page(1));
        assert!(cache.get(PageId::new(1)).is_none());
        assert!(cache.is_empty());
    }
}
