use std::collections::{HashMap, VecDeque};

use crate::common::{PageId, Timestamp};

/// Tracks access history for a single cached page
#[derive(Debug)]
struct AccessHistory {
    /// History of access timestamps (most recent at back)
    history: VecDeque<Timestamp>,
}

impl AccessHistory {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
        }
    }

    /// Records an access at the given timestamp
    fn record_access(&mut self, timestamp: Timestamp, k: usize) {
        self.history.push_back(timestamp);
        // Keep only the last k accesses
        while self.history.len() > k {
            self.history.pop_front();
        }
    }

    /// Returns the backward k-distance, or None (+inf) with fewer than k accesses
    fn k_distance(&self, current_timestamp: Timestamp, k: usize) -> Option<Timestamp> {
        if self.history.len() < k {
            None
        } else {
            Some(current_timestamp - self.history[self.history.len() - k])
        }
    }

    fn earliest_timestamp(&self) -> Option<Timestamp> {
        self.history.front().copied()
    }
}

/// LRU-K Replacement Policy over cached pages.
///
/// Evicts the page whose backward k-distance is the maximum of all tracked
/// pages. A page with fewer than k recorded accesses has +inf distance; ties
/// among +inf pages go to the earliest overall access.
///
/// Cached page images are immutable, so every tracked page is evictable; the
/// replacer carries no pinning state. It is not synchronized; the owning
/// cache serializes access.
pub struct LruKReplacer {
    k: usize,
    current_timestamp: Timestamp,
    pages: HashMap<PageId, AccessHistory>,
}

impl LruKReplacer {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            current_timestamp: 0,
            pages: HashMap::new(),
        }
    }

    /// Records that the given page was accessed now, tracking it if new.
    pub fn record_access(&mut self, page_id: PageId) {
        let timestamp = self.current_timestamp;
        self.current_timestamp += 1;
        self.pages
            .entry(page_id)
            .or_insert_with(AccessHistory::new)
            .record_access(timestamp, self.k);
    }

    /// Evicts the page with the largest backward k-distance.
    /// Returns None if no pages are tracked.
    pub fn evict(&mut self) -> Option<PageId> {
        let current_ts = self.current_timestamp;

        let mut victim: Option<PageId> = None;
        let mut victim_k_dist: Option<Timestamp> = None;
        let mut victim_earliest_ts: Option<Timestamp> = None;

        for (page_id, info) in self.pages.iter() {
            let k_dist = info.k_distance(current_ts, self.k);
            let earliest_ts = info.earliest_timestamp();

            let should_replace = match (victim_k_dist, k_dist) {
                (None, Some(_)) => false,
                (Some(_), None) => true,
                (None, None) => match (victim_earliest_ts, earliest_ts) {
                    (Some(v_ts), Some(c_ts)) => c_ts < v_ts,
                    (None, Some(_)) => true,
                    _ => false,
                },
                (Some(v_dist), Some(c_dist)) => c_dist > v_dist,
            };

            if victim.is_none() || should_replace {
                victim = Some(*page_id);
                victim_k_dist = k_dist;
                victim_earliest_ts = earliest_ts;
            }
        }

        if let Some(page_id) = victim {
            self.pages.remove(&page_id);
        }
        victim
    }

    /// Stops tracking a page.
    pub fn remove(&mut self, page_id: PageId) {
        self.pages.remove(&page_id);
    }

    pub fn clear(&mut self) {
        self.pages.clear();
    }

    /// Returns the number of tracked pages.
    pub fn size(&self) -> usize {
        self.pages.len()
    }

    pub fn k(&self) -> usize {
        self.k
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(id: u64) -> PageId {
        PageId::new(id)
    }

    #[test]
    fn test_lru_k_replacer_evict_empty() {
        let mut replacer = LruKReplacer::new(2);
        assert_eq!(replacer.k(), 2);
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_lru_k_replacer_earliest_infinite_first() {
        let mut replacer = LruKReplacer::new(2);
        replacer.record_access(pid(0));
        replacer.record_access(pid(1));
        replacer.record_access(pid(2));
        assert_eq!(replacer.size(), 3);

        // All have fewer than k accesses; earliest goes first
        assert_eq!(replacer.evict(), Some(pid(0)));
        assert_eq!(replacer.size(), 2);
    }

    #[test]
    fn test_lru_k_replacer_prefers_infinite_distance() {
        let mut replacer = LruKReplacer::new(2);
        replacer.record_access(pid(0));
        replacer.record_access(pid(0));
        replacer.record_access(pid(1));

        assert_eq!(replacer.evict(), Some(pid(1)));
        assert_eq!(replacer.evict(), Some(pid(0)));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_lru_k_replacer_largest_k_distance() {
        let mut replacer = LruKReplacer::new(2);
        for id in 0..3 {
            replacer.record_access(pid(id));
            replacer.record_access(pid(id));
        }
        // Page 0 was touched longest ago
        assert_eq!(replacer.evict(), Some(pid(0)));

        // A fresh pair of touches on page 1 makes page 2 the oldest
        replacer.record_access(pid(1));
        replacer.record_access(pid(1));
        assert_eq!(replacer.evict(), Some(pid(2)));
    }

    #[test]
    fn test_lru_k_replacer_remove() {
        let mut replacer = LruKReplacer::new(2);
        replacer.record_access(pid(4));
        replacer.remove(pid(4));
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.evict(), None);
    }
}
