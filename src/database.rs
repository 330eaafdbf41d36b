use std::path::Path;
use std::sync::Arc;

use log::info;

use crate::common::{Config, DbError, PageId, Result, Version};
use crate::index::TreeStats;
use crate::storage::disk::{FileIo, MemoryIo, PageIo};
use crate::txn::{ReadTransaction, TransactionManager, WriteTransaction};

/// Point-in-time summary of an open store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseStats {
    pub version: Version,
    pub root_page: PageId,
    pub num_pages: u64,
    pub free_pages: usize,
    pub retired_pages: usize,
    pub active_readers: usize,
    pub oldest_pinned_version: Version,
}

/// Handle to an open store. Cloning is cheap; all clones share one store.
#[derive(Clone)]
pub struct Database {
    manager: Arc<TransactionManager>,
}

impl Database {
    /// Creates a new store at `path`. Fails if a non-empty file exists there.
    pub fn create<P: AsRef<Path>>(path: P, config: Config) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() && std::fs::metadata(path)?.len() > 0 {
            return Err(DbError::InvalidDatabaseFile(format!(
                "{} already exists",
                path.display()
            )));
        }
        info!("creating database at {}", path.display());
        Self::open_with_io(Box::new(FileIo::open(path, true)?), config)
    }

    /// Opens the store at `path`, creating it when missing or empty.
    pub fn open<P: AsRef<Path>>(path: P, config: Config) -> Result<Self> {
        let path = path.as_ref();
        info!("opening database at {}", path.display());
        Self::open_with_io(Box::new(FileIo::open(path, true)?), config)
    }

    /// Opens a store over a caller-supplied backend.
    pub fn open_with_io(io: Box<dyn PageIo>, config: Config) -> Result<Self> {
        let manager = TransactionManager::open(io, config)?;
        Ok(Self { manager })
    }

    /// Opens a fresh store that lives only as long as its handles.
    pub fn in_memory(config: Config) -> Result<Self> {
        Self::open_with_io(Box::new(MemoryIo::new()), config)
    }

    pub fn begin_read(&self) -> ReadTransaction {
        self.manager.begin_read()
    }

    pub fn begin_write(&self) -> Result<WriteTransaction> {
        self.manager.begin_write()
    }

    /// Latest committed version.
    pub fn version(&self) -> Version {
        self.manager.published().version
    }

    pub fn config(&self) -> &Config {
        self.manager.config()
    }

    pub fn stats(&self) -> DatabaseStats {
        let published = self.manager.published();
        let pages = self.manager.pages().stats();
        let registry = self.manager.registry();
        DatabaseStats {
            version: published.version,
            root_page: published.root_page,
            num_pages: pages.num_pages,
            free_pages: pages.free_pages,
            retired_pages: pages.retired_pages,
            active_readers: registry.active_readers(),
            oldest_pinned_version: registry.oldest_pinned(),
        }
    }

    /// Checks the structure of the latest version while holding a snapshot of it.
    pub fn verify(&self) -> Result<TreeStats> {
        let reader = self.begin_read();
        let stats = self.manager.tree().verify(reader.root());
        drop(reader);
        stats
    }

    /// Flushes the store and releases this handle. Fails while a write
    /// transaction is active.
    ///
    /// Only this handle is consumed. Other clones and transactions already
    /// open keep the store usable, and the file is closed when the last of
    /// them drops.
    pub fn close(self) -> Result<()> {
        if self.manager.write_active() {
            return Err(DbError::WriteConflict);
        }
        self.manager.pages().sync()?;
        info!("closed database at {}", self.manager.published());
        Ok(())
    }
}
