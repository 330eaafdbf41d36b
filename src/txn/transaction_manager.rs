use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::common::{Config, PageId, Result, RootPointer, TxnId};
use crate::index::{BTree, WriteContext};
use crate::storage::disk::{DiskManager, PageIo};
use crate::storage::page::{PageManager, RootTable};

use super::{ReadTransaction, SnapshotRegistry, WriteGate, WriteTransaction};

/// Coordinates the single writer and the concurrent readers of one store.
///
/// Owns everything that is process-wide for an open store: the page manager,
/// the commit record, the snapshot registry and the write gate.
pub struct TransactionManager {
    pages: Arc<PageManager>,
    tree: BTree,
    registry: SnapshotRegistry,
    gate: WriteGate,
    root_table: Mutex<RootTable>,
    config: Config,
    next_txn_id: AtomicU64,
}

impl TransactionManager {
    /// Opens the store held by `io`, initializing it when empty.
    pub fn open(io: Box<dyn PageIo>, config: Config) -> Result<Arc<Self>> {
        config.validate()?;

        let disk = DiskManager::new(io, config.page_size)?;
        let is_new = disk.num_pages() == 0;
        let pages = Arc::new(PageManager::new(disk, &config));
        let tree = BTree::new(pages.clone(), &config);

        let (root_table, root) = if is_new {
            let mut table = RootTable::format(pages.disk())?;
            let mut ctx = WriteContext::new();
            let root_page = tree.create_empty(&mut ctx)?;
            let (allocated, _) = ctx.take();
            pages.publish(&allocated);
            if config.sync_on_commit {
                pages.sync()?;
            }

            let root = RootPointer::new(0, root_page);
            table.commit(pages.disk(), root, config.sync_on_commit)?;
            info!(
                "initialized database with {} byte pages at {}",
                config.page_size, root
            );
            (table, root)
        } else {
            let table = RootTable::recover(pages.disk())?;
            let root = table.current();
            let reachable = tree.reachable_pages(root.root_page)?;
            pages.rebuild_free_list(&reachable);
            let stats = pages.stats();
            info!(
                "opened database at {}: {} pages, {} free",
                root, stats.num_pages, stats.free_pages
            );
            (table, root)
        };

        Ok(Arc::new(Self {
            pages,
            tree,
            registry: SnapshotRegistry::new(root),
            gate: WriteGate::new(),
            root_table: Mutex::new(root_table),
            config,
            next_txn_id: AtomicU64::new(1),
        }))
    }

    /// Starts a read transaction on the published version. Never blocks on
    /// the writer.
    pub fn begin_read(self: &Arc<Self>) -> ReadTransaction {
        let snapshot = self.registry.pin();
        ReadTransaction::new(self.next_id(), snapshot, self.clone())
    }

    /// Starts the write transaction, waiting for the gate as the configured
    /// `WritePolicy` allows.
    pub fn begin_write(self: &Arc<Self>) -> Result<WriteTransaction> {
        let token = self.gate.acquire(self.config.write_policy)?;
        self.reclaim();
        let base = self.registry.published();
        Ok(WriteTransaction::new(self.next_id(), base, token, self.clone()))
    }

    /// Makes `root` the next version. On error nothing was published and the
    /// previous commit record stays authoritative; the caller aborts.
    pub(crate) fn commit_write(
        &self,
        base: RootPointer,
        root: PageId,
        ctx: &mut WriteContext,
    ) -> Result<RootPointer> {
        let next = base.next(root);
        let sync = self.config.sync_on_commit;

        if sync {
            self.pages.sync()?;
        }
        {
            let mut table = self.root_table.lock();
            if let Err(e) = table.commit(self.pages.disk(), next, sync) {
                if let Err(cleanup) = table.invalidate_inactive(self.pages.disk()) {
                    warn!(
                        "could not invalidate commit slot after failed commit of {}: {}",
                        next, cleanup
                    );
                }
                return Err(e);
            }
        }

        self.registry.publish(next);
        let (allocated, superseded) = ctx.take();
        let retired = superseded.len();
        self.pages.publish(&allocated);
        self.pages.retire(superseded, next.version);
        self.reclaim();

        debug!(
            "committed {}: {} pages written, {} retired",
            next,
            allocated.len(),
            retired
        );
        Ok(next)
    }

    /// Returns every page the transaction allocated to the free list.
    pub(crate) fn abort_write(&self, id: TxnId, ctx: &mut WriteContext) {
        let (allocated, _) = ctx.take();
        for page_id in &allocated {
            if let Err(e) = self.pages.free(*page_id) {
                warn!("failed to free {} while aborting {}: {}", page_id, id, e);
            }
        }
        debug!("aborted {}, released {} pages", id, allocated.len());
    }

    /// Releases a reader's pin; reclaims when it was holding back the oldest
    /// version.
    pub(crate) fn end_read(&self, snapshot: RootPointer) {
        if self.registry.unpin(snapshot.version) {
            self.reclaim();
        }
    }

    /// Frees pages retired by versions no open reader can reach.
    ///
    /// Runs without the write gate, so a closing reader never competes with
    /// writers for it. The oldest pinned version only moves forward, and each
    /// retired set is taken out under the page-state lock, so concurrent
    /// calls free disjoint pages and none of them is reachable from the
    /// writer's base.
    fn reclaim(&self) {
        self.pages.reclaim(self.registry.oldest_pinned());
    }

    fn next_id(&self) -> TxnId {
        TxnId::new(self.next_txn_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn published(&self) -> RootPointer {
        self.registry.published()
    }

    pub fn tree(&self) -> &BTree {
        &self.tree
    }

    pub fn pages(&self) -> &Arc<PageManager> {
        &self.pages
    }

    pub fn registry(&self) -> &SnapshotRegistry {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// True while a write transaction is active.
    pub fn write_active(&self) -> bool {
        self.gate.is_held()
    }
}
