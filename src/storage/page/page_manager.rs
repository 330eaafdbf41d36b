use std::collections::{BTreeMap, BTreeSet, HashSet};

use bytes::{Bytes, BytesMut};
use log::{debug, warn};
use parking_lot::Mutex;

use crate::buffer::PageCache;
use crate::codec::node::free_marker;
use crate::common::{Config, DbError, PageId, Result, Version};
use crate::storage::disk::DiskManager;

/// Page 0 holds the commit record and is never handed out
pub const COMMIT_PAGE_ID: PageId = PageId(0);

#[derive(Default)]
struct PageState {
    /// Pages eligible for reuse, lowest id first
    free: BTreeSet<PageId>,
    /// Allocated but not yet written
    fresh: HashSet<PageId>,
    /// Allocated by the active writer and not yet published by a commit
    unpublished: HashSet<PageId>,
    /// Published pages superseded by the commit of the keyed version
    retired: BTreeMap<Version, Vec<PageId>>,
}

/// Point-in-time page accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageStats {
    pub num_pages: u64,
    pub free_pages: usize,
    pub retired_pages: usize,
    pub unpublished_pages: usize,
}

/// PageManager owns the page file. It hands out fixed-size pages, lets each
/// be written exactly once, and tracks when superseded pages may be reused.
///
/// Mutating calls (`allocate`, `write`, `free`, `publish`, `retire`) are
/// issued only by the holder of the write gate. `reclaim` and `read` may be
/// called concurrently from any number of threads.
pub struct PageManager {
    disk: DiskManager,
    page_size: usize,
    max_pages: Option<u64>,
    cache: PageCache,
    state: Mutex<PageState>,
}

impl PageManager {
    pub fn new(disk: DiskManager, config: &Config) -> Self {
        Self {
            page_size: disk.page_size(),
            disk,
            max_pages: config.max_pages,
            cache: PageCache::new(config.cache_pages, config.cache_k),
            state: Mutex::new(PageState::default()),
        }
    }

    pub fn disk(&self) -> &DiskManager {
        &self.disk
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Returns an unused page, reusing the lowest free id before growing the
    /// file.
    pub fn allocate(&self) -> Result<PageId> {
        let mut state = self.state.lock();

        let page_id = match state.free.pop_first() {
            Some(page_id) => {
                self.cache.invalidate(page_id);
                page_id
            }
            None => {
                if let Some(limit) = self.max_pages {
                    if self.disk.num_pages() >= limit {
                        return Err(DbError::OutOfSpace { limit });
                    }
                }
                self.disk.extend()
            }
        };

        state.fresh.insert(page_id);
        state.unpublished.insert(page_id);
        Ok(page_id)
    }

    /// Returns an immutable image of the page, `page_size` bytes long.
    pub fn read(&self, page_id: PageId) -> Result<Bytes> {
        if page_id == COMMIT_PAGE_ID {
            return Err(DbError::InvalidPageId(page_id));
        }
        if let Some(page) = self.cache.get(page_id) {
            return Ok(page);
        }

        let mut data = BytesMut::zeroed(self.page_size);
        self.disk.read_page(page_id, &mut data)?;
        let page = data.freeze();
        self.cache.insert(page_id, page.clone());
        Ok(page)
    }

    /// Writes `data` (at most one page, zero padded) to a page returned by
    /// `allocate` and not yet written.
    pub fn write(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        if data.len() > self.page_size {
            return Err(DbError::invariant(format!(
                "{} bytes do not fit a {} byte page",
                data.len(),
                self.page_size
            )));
        }
        if !self.state.lock().fresh.remove(&page_id) {
            return Err(DbError::invariant(format!(
                "write to {} which is not a freshly allocated page",
                page_id
            )));
        }

        let mut page = BytesMut::zeroed(self.page_size);
        page[..data.len()].copy_from_slice(data);
        let page = page.freeze();
        self.disk.write_page(page_id, &page)?;
        self.cache.insert(page_id, page);
        Ok(())
    }

    /// Releases a page allocated by the active writer that no commit has
    /// published. It becomes reusable at once.
    pub fn free(&self, page_id: PageId) -> Result<()> {
        let mut state = self.state.lock();
        if !state.unpublished.remove(&page_id) {
            let reason = if state.free.contains(&page_id) {
                "already free"
            } else {
                "published"
            };
            return Err(DbError::invariant(format!(
                "cannot free {}: page is {}",
                page_id, reason
            )));
        }
        state.fresh.remove(&page_id);
        state.free.insert(page_id);
        drop(state);

        self.cache.invalidate(page_id);
        Ok(())
    }

    /// Marks pages written by a committed transaction as published.
    pub fn publish(&self, pages: &[PageId]) {
        let mut state = self.state.lock();
        for page_id in pages {
            state.unpublished.remove(page_id);
            state.fresh.remove(page_id);
        }
    }

    /// Records published pages superseded by the commit of `version`.
    pub fn retire(&self, pages: Vec<PageId>, version: Version) {
        if pages.is_empty() {
            return;
        }
        self.state
            .lock()
            .retired
            .entry(version)
            .or_default()
            .extend(pages);
    }

    /// Moves every page retired by a version no newer than `oldest_pinned`
    /// into the free list and stamps it with the free marker. Returns the
    /// number of pages reclaimed.
    pub fn reclaim(&self, oldest_pinned: Version) -> usize {
        let reclaimable = {
            let mut state = self.state.lock();
            let keep = state.retired.split_off(&(oldest_pinned + 1));
            std::mem::replace(&mut state.retired, keep)
        };
        if reclaimable.is_empty() {
            return 0;
        }

        let marker = free_marker();
        let mut count = 0;
        for page_id in reclaimable.into_values().flatten() {
            self.cache.invalidate(page_id);
            if let Err(e) = self.stamp_free(page_id, &marker) {
                warn!("failed to stamp free marker on {}: {}", page_id, e);
            }
            self.state.lock().free.insert(page_id);
            count += 1;
        }

        debug!(
            "reclaimed {} pages retired at or before version {}",
            count, oldest_pinned
        );
        count
    }

    /// Replaces the free list with every page in the file that `reachable`
    /// does not contain. Used on open, when no snapshot survives.
    pub fn rebuild_free_list(&self, reachable: &HashSet<PageId>) {
        let num_pages = self.disk.num_pages();
        let mut state = self.state.lock();
        *state = PageState::default();
        state.free = (1..num_pages)
            .map(PageId::new)
            .filter(|page_id| !reachable.contains(page_id))
            .collect();
        debug!(
            "rebuilt free list: {} of {} pages free",
            state.free.len(),
            num_pages
        );
    }

    /// Makes every page written so far durable.
    pub fn sync(&self) -> Result<()> {
        self.disk.sync()
    }

    pub fn is_free(&self, page_id: PageId) -> bool {
        self.state.lock().free.contains(&page_id)
    }

    pub fn stats(&self) -> PageStats {
        let state = self.state.lock();
        PageStats {
            num_pages: self.disk.num_pages(),
            free_pages: state.free.len(),
            retired_pages: state.retired.values().map(Vec::len).sum(),
            unpublished_pages: state.unpublished.len(),
        }
    }

    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    fn stamp_free(&self, page_id: PageId, marker: &[u8]) -> Result<()> {
        let mut page = BytesMut::zeroed(self.page_size);
        page[..marker.len()].copy_from_slice(marker);
        self.disk.write_page(page_id, &page)
    }
}
