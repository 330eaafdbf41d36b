use std::time::Duration;

use super::error::{DbError, Result};

/// Default size of a page in bytes (4 KB)
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Smallest supported page size
pub const MIN_PAGE_SIZE: usize = 512;

/// Largest supported page size
pub const MAX_PAGE_SIZE: usize = 64 * 1024;

/// Default maximum number of entries per B-tree node
pub const DEFAULT_MAX_KEYS: usize = 64;

/// Hard upper bound for a document key in bytes
pub const MAX_KEY_SIZE: usize = 1024;

/// Node page header: type tag (1) + key count (2) + checksum (4)
pub const NODE_HEADER_SIZE: usize = 7;

/// Leaf entry framing: key length (2) + value length (4)
pub const LEAF_ENTRY_OVERHEAD: usize = 6;

/// Internal entry framing: key length (2) + child page id (8)
pub const INTERNAL_ENTRY_OVERHEAD: usize = 10;

/// A single entry may use at most 1/ENTRY_FRACTION of a node's payload area,
/// so an overflowing node always splits into two halves that fit a page.
pub const ENTRY_FRACTION: usize = 4;

/// Default K value for the LRU-K page cache
pub const DEFAULT_LRUK_K: usize = 2;

/// Default page cache capacity (number of pages)
pub const DEFAULT_CACHE_PAGES: usize = 1024;

/// What `begin_write` does while another write transaction is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritePolicy {
    /// Fail immediately with `WriteConflict`.
    #[default]
    FailFast,
    /// Wait until the active writer commits or aborts.
    Block,
    /// Wait up to the given duration, then fail with `WriteConflict`.
    Timeout(Duration),
}

/// Tunables for a database handle.
#[derive(Debug, Clone)]
pub struct Config {
    pub page_size: usize,
    pub max_keys: usize,
    /// Underflow threshold for non-root nodes; `None` means `max_keys / 2`
    pub min_keys: Option<usize>,
    pub write_policy: WritePolicy,
    /// Number of page images kept by the read cache; 0 disables caching
    pub cache_pages: usize,
    pub cache_k: usize,
    /// Upper bound on the page file size in pages, including page 0
    pub max_pages: Option<u64>,
    /// Whether commits fsync the data file and the commit record
    pub sync_on_commit: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_keys: DEFAULT_MAX_KEYS,
            min_keys: None,
            write_policy: WritePolicy::default(),
            cache_pages: DEFAULT_CACHE_PAGES,
            cache_k: DEFAULT_LRUK_K,
            max_pages: None,
            sync_on_commit: true,
        }
    }
}

impl Config {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys;
        self
    }

    pub fn with_min_keys(mut self, min_keys: usize) -> Self {
        self.min_keys = Some(min_keys);
        self
    }

    pub fn with_write_policy(mut self, policy: WritePolicy) -> Self {
        self.write_policy = policy;
        self
    }

    pub fn with_cache_pages(mut self, cache_pages: usize) -> Self {
        self.cache_pages = cache_pages;
        self
    }

    pub fn with_cache_k(mut self, k: usize) -> Self {
        self.cache_k = k;
        self
    }

    pub fn with_max_pages(mut self, max_pages: u64) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    pub fn with_sync_on_commit(mut self, sync: bool) -> Self {
        self.sync_on_commit = sync;
        self
    }

    /// Effective underflow threshold.
    pub fn min_keys(&self) -> usize {
        self.min_keys.unwrap_or(self.max_keys / 2)
    }

    /// Largest encoded entry (framing included) a node will accept.
    pub fn max_entry_size(&self) -> usize {
        (self.page_size - NODE_HEADER_SIZE) / ENTRY_FRACTION
    }

    /// Largest key accepted, bounded both by `MAX_KEY_SIZE` and by what an
    /// internal entry can carry on this page size.
    pub fn max_key_size(&self) -> usize {
        MAX_KEY_SIZE.min(self.max_entry_size() - INTERNAL_ENTRY_OVERHEAD)
    }

    /// Checks that the settings describe a usable store.
    pub fn validate(&self) -> Result<()> {
        if !self.page_size.is_power_of_two()
            || self.page_size < MIN_PAGE_SIZE
            || self.page_size > MAX_PAGE_SIZE
        {
            return Err(DbError::InvalidConfig(format!(
                "page size {} must be a power of two in [{}, {}]",
                self.page_size, MIN_PAGE_SIZE, MAX_PAGE_SIZE
            )));
        }
        if self.max_keys < 4 || self.max_keys > u16::MAX as usize {
            return Err(DbError::InvalidConfig(format!(
                "max_keys {} must be in [4, {}]",
                self.max_keys,
                u16::MAX
            )));
        }
        let min_keys = self.min_keys();
        if min_keys < 2 || min_keys > self.max_keys / 2 {
            return Err(DbError::InvalidConfig(format!(
                "min_keys {} must be in [2, {}]",
                min_keys,
                self.max_keys / 2
            )));
        }
        if self.cache_k == 0 {
            return Err(DbError::InvalidConfig("cache_k must be positive".into()));
        }
        if let Some(max_pages) = self.max_pages {
            if max_pages < 2 {
                return Err(DbError::InvalidConfig(
                    "max_pages must leave room for the commit record and a root".into(),
                ));
            }
        }
        Ok(())
    }
}
