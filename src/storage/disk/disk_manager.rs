use std::sync::atomic::{AtomicU64, Ordering};

use log::warn;

use crate::common::{DbError, PageId, Result};

use super::PageIo;

/// DiskManager is responsible for reading and writing pages to/from the
/// backing store. It tracks how many pages the page file holds and counts
/// the I/O operations it performs.
pub struct DiskManager {
    /// Backing byte store
    io: Box<dyn PageIo>,
    /// Size of every page in bytes
    page_size: usize,
    /// Number of page slots handed out so far (written or reserved)
    num_pages: AtomicU64,
    /// Number of page reads performed
    num_reads: AtomicU64,
    /// Number of page writes performed
    num_writes: AtomicU64,
    /// Number of syncs performed
    num_syncs: AtomicU64,
}

impl DiskManager {
    /// Creates a DiskManager over `io`. The page count is derived from the
    /// current length; a trailing partial page (a torn extension) is ignored.
    pub fn new(io: Box<dyn PageIo>, page_size: usize) -> Result<Self> {
        let len = io.len()?;
        let num_pages = len / page_size as u64;
        if len % page_size as u64 != 0 {
            warn!(
                "page file length {} is not a multiple of page size {}, ignoring partial tail",
                len, page_size
            );
        }

        Ok(Self {
            io,
            page_size,
            num_pages: AtomicU64::new(num_pages),
            num_reads: AtomicU64::new(0),
            num_writes: AtomicU64::new(0),
            num_syncs: AtomicU64::new(0),
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Reads a page into the provided buffer.
    /// The buffer must be exactly `page_size` bytes.
    pub fn read_page(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        self.check_len(data.len())?;
        if page_id.as_u64() >= self.num_pages() {
            return Err(DbError::InvalidPageId(page_id));
        }

        self.io.read_at(page_id.offset(self.page_size), data)?;
        self.num_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Writes a page from the provided buffer.
    /// The buffer must be exactly `page_size` bytes.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        self.check_len(data.len())?;

        self.io.write_at(page_id.offset(self.page_size), data)?;
        self.num_pages
            .fetch_max(page_id.as_u64() + 1, Ordering::AcqRel);
        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Writes a sub-range of a page. Used for the commit record slots, which
    /// share page 0.
    pub fn write_at(&self, page_id: PageId, offset: usize, data: &[u8]) -> Result<()> {
        if offset + data.len() > self.page_size {
            return Err(DbError::invariant(format!(
                "write of {} bytes at offset {} overruns a page",
                data.len(),
                offset
            )));
        }
        self.io
            .write_at(page_id.offset(self.page_size) + offset as u64, data)?;
        self.num_pages
            .fetch_max(page_id.as_u64() + 1, Ordering::AcqRel);
        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Reserves the next page slot at the end of the file and returns its id.
    /// The slot has no contents until it is written.
    pub fn extend(&self) -> PageId {
        PageId::new(self.num_pages.fetch_add(1, Ordering::AcqRel))
    }

    /// Makes every completed write durable.
    pub fn sync(&self) -> Result<()> {
        self.io.sync()?;
        self.num_syncs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Returns the number of page slots in the file.
    pub fn num_pages(&self) -> u64 {
        self.num_pages.load(Ordering::Acquire)
    }

    /// Returns the number of page reads performed.
    pub fn num_reads(&self) -> u64 {
        self.num_reads.load(Ordering::Relaxed)
    }

    /// Returns the number of page writes performed.
    pub fn num_writes(&self) -> u64 {
        self.num_writes.load(Ordering::Relaxed)
    }

    /// Returns the number of syncs performed.
    pub fn num_syncs(&self) -> u64 {
        self.num_syncs.load(Ordering::Relaxed)
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len != self.page_size {
            return Err(DbError::invariant(format!(
                "page buffer of {} bytes, expected {}",
                len, self.page_size
            )));
        }
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        // Ensure all data is flushed to disk
        let _ = self.io.sync();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk::{FileIo, MemoryIo};
    use tempfile::NamedTempFile;

    const PAGE: usize = 512;

    #[test]
    fn test_disk_manager_new() {
        let dm = DiskManager::new(Box::new(MemoryIo::new()), PAGE).unwrap();
        assert_eq!(dm.num_pages(), 0);
        assert_eq!(dm.page_size(), PAGE);
    }

    #[test]
    fn test_disk_manager_extend() {
        let dm = DiskManager::new(Box::new(MemoryIo::new()), PAGE).unwrap();

        assert_eq!(dm.extend(), PageId::new(0));
        assert_eq!(dm.extend(), PageId::new(1));
        assert_eq!(dm.num_pages(), 2);
    }

    #[test]
    fn test_disk_manager_read_write() {
        let dm = DiskManager::new(Box::new(MemoryIo::new()), PAGE).unwrap();
        let page_id = dm.extend();

        let mut write_data = vec![0u8; PAGE];
        write_data[0] = 42;
        write_data[100] = 255;
        write_data[PAGE - 1] = 128;
        dm.write_page(page_id, &write_data).unwrap();

        let mut read_data = vec![0u8; PAGE];
        dm.read_page(page_id, &mut read_data).unwrap();
        assert_eq!(read_data, write_data);
        assert_eq!(dm.num_reads(), 1);
        assert_eq!(dm.num_writes(), 1);
    }

    #[test]
    fn test_disk_manager_rejects_bad_buffers() {
        let dm = DiskManager::new(Box::new(MemoryIo::new()), PAGE).unwrap();
        let page_id = dm.extend();
        assert!(dm.write_page(page_id, &[0u8; 10]).is_err());

        let mut buf = vec![0u8; PAGE];
        assert!(matches!(
            dm.read_page(PageId::new(7), &mut buf),
            Err(DbError::InvalidPageId(_))
        ));
    }

    #[test]
    fn test_disk_manager_persistence() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_path_buf();

        {
            let io = FileIo::open(&path, false).unwrap();
            let dm = DiskManager::new(Box::new(io), PAGE).unwrap();
            let page_id = dm.extend();
            let mut data = vec![0u8; PAGE];
            data[0] = 123;
            dm.write_page(page_id, &data).unwrap();
            dm.sync().unwrap();
            assert_eq!(dm.num_syncs(), 1);
        }

        {
            let io = FileIo::open(&path, false).unwrap();
            let dm = DiskManager::new(Box::new(io), PAGE).unwrap();
            assert_eq!(dm.num_pages(), 1);

            let mut data = vec![0u8; PAGE];
            dm.read_page(PageId::new(0), &mut data).unwrap();
            assert_eq!(data[0], 123);
        }
    }

    #[test]
    fn test_disk_manager_ignores_partial_tail() {
        let io = MemoryIo::new();
        io.set_len(PAGE as u64 * 2 + 17).unwrap();
        let dm = DiskManager::new(Box::new(io), PAGE).unwrap();
        assert_eq!(dm.num_pages(), 2);
    }
}
