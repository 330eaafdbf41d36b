use std::fmt;
use std::ops::{Bound, RangeBounds};
use std::sync::Arc;

use bytes::Bytes;

use crate::codec::Value;
use crate::common::{DbError, PageId, Result, RootPointer, TxnId, Version};
use crate::index::{BTree, WriteContext};

use super::{TransactionManager, WriteToken};

/// Lifecycle of a transaction; both terminal states are final
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Active,
    Committed,
    Aborted,
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxnState::Active => write!(f, "active"),
            TxnState::Committed => write!(f, "committed"),
            TxnState::Aborted => write!(f, "aborted"),
        }
    }
}

/// A read-only view of one published version.
///
/// The snapshot stays pinned, and its pages alive, until the transaction is
/// closed, fails, or is dropped.
pub struct ReadTransaction {
    id: TxnId,
    snapshot: RootPointer,
    state: TxnState,
    manager: Arc<TransactionManager>,
}

impl ReadTransaction {
    pub(crate) fn new(id: TxnId, snapshot: RootPointer, manager: Arc<TransactionManager>) -> Self {
        Self {
            id,
            snapshot,
            state: TxnState::Active,
            manager,
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Version this transaction reads.
    pub fn version(&self) -> Version {
        self.snapshot.version
    }

    /// Root page of the snapshot.
    pub fn root(&self) -> PageId {
        self.snapshot.root_page
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    pub fn get(&mut self, key: impl AsRef<[u8]>) -> Result<Option<Value>> {
        let key = key.as_ref();
        self.run(|tree, root| decode_opt(tree.get(root, key)?))
    }

    pub fn get_raw(&mut self, key: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        let key = key.as_ref();
        self.run(|tree, root| tree.get(root, key))
    }

    /// Returns the entries whose keys fall in `range`, in ascending order.
    pub fn range<K, R>(&mut self, range: R) -> Result<Vec<(Bytes, Value)>>
    where
        K: AsRef<[u8]>,
        R: RangeBounds<K>,
    {
        let (start, end) = byte_bounds(&range);
        self.run(|tree, root| collect_range(tree, root, start, end))
    }

    /// Returns every entry in ascending key order.
    pub fn scan(&mut self) -> Result<Vec<(Bytes, Value)>> {
        self.run(|tree, root| collect_range(tree, root, Bound::Unbounded, Bound::Unbounded))
    }

    /// Ends the transaction and releases its snapshot.
    pub fn close(&mut self) -> Result<()> {
        self.check_active()?;
        self.finish(TxnState::Committed);
        Ok(())
    }

    fn run<T>(&mut self, op: impl FnOnce(&BTree, PageId) -> Result<T>) -> Result<T> {
        self.check_active()?;
        let result = op(self.manager.tree(), self.snapshot.root_page);
        if result.is_err() {
            self.finish(TxnState::Aborted);
        }
        result
    }

    fn check_active(&self) -> Result<()> {
        if self.state != TxnState::Active {
            return Err(DbError::TransactionClosed(self.id));
        }
        Ok(())
    }

    fn finish(&mut self, state: TxnState) {
        self.state = state;
        self.manager.end_read(self.snapshot);
    }
}

impl Drop for ReadTransaction {
    fn drop(&mut self) {
        if self.state == TxnState::Active {
            self.finish(TxnState::Committed);
        }
    }
}

/// The single active write transaction.
///
/// Mutations build a private tree version on top of the base snapshot; it
/// becomes visible to new readers only when `commit` succeeds. Dropping an
/// active write transaction aborts it.
pub struct WriteTransaction {
    id: TxnId,
    base: RootPointer,
    root: PageId,
    ctx: WriteContext,
    state: TxnState,
    token: Option<WriteToken>,
    manager: Arc<TransactionManager>,
}

impl WriteTransaction {
    pub(crate) fn new(
        id: TxnId,
        base: RootPointer,
        token: WriteToken,
        manager: Arc<TransactionManager>,
    ) -> Self {
        Self {
            id,
            base,
            root: base.root_page,
            ctx: WriteContext::new(),
            state: TxnState::Active,
            token: Some(token),
            manager,
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Version this transaction started from.
    pub fn base_version(&self) -> Version {
        self.base.version
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    /// Reads `key`, seeing this transaction's own writes.
    pub fn get(&mut self, key: impl AsRef<[u8]>) -> Result<Option<Value>> {
        let key = key.as_ref();
        self.read(|tree, root| decode_opt(tree.get(root, key)?))
    }

    pub fn get_raw(&mut self, key: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        let key = key.as_ref();
        self.read(|tree, root| tree.get(root, key))
    }

    pub fn range<K, R>(&mut self, range: R) -> Result<Vec<(Bytes, Value)>>
    where
        K: AsRef<[u8]>,
        R: RangeBounds<K>,
    {
        let (start, end) = byte_bounds(&range);
        self.read(|tree, root| collect_range(tree, root, start, end))
    }

    pub fn scan(&mut self) -> Result<Vec<(Bytes, Value)>> {
        self.read(|tree, root| collect_range(tree, root, Bound::Unbounded, Bound::Unbounded))
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn insert(&mut self, key: impl AsRef<[u8]>, value: &Value) -> Result<()> {
        self.check_active()?;
        let encoded = value.encode()?;
        self.put(key.as_ref(), &encoded)
    }

    /// Stores already encoded value bytes, which must decode as one `Value`.
    pub fn insert_raw(&mut self, key: impl AsRef<[u8]>, value: &[u8]) -> Result<()> {
        self.check_active()?;
        Value::decode(value)?;
        self.put(key.as_ref(), value)
    }

    /// Removes `key`, returning whether it was present.
    pub fn delete(&mut self, key: impl AsRef<[u8]>) -> Result<bool> {
        let key = key.as_ref();
        if self.get_raw(key)?.is_none() {
            return Ok(false);
        }
        self.mutate(|tree, ctx, root| tree.delete(ctx, root, key))?;
        Ok(true)
    }

    /// Publishes this transaction's tree as the next version and returns it.
    /// On failure the transaction is aborted and the previous version stays
    /// current.
    pub fn commit(&mut self) -> Result<Version> {
        self.check_active()?;
        let token = self.token.take();
        let result = self.manager.commit_write(self.base, self.root, &mut self.ctx);
        if result.is_ok() {
            self.state = TxnState::Committed;
        } else {
            self.manager.abort_write(self.id, &mut self.ctx);
            self.state = TxnState::Aborted;
        }
        drop(token);
        result.map(|root| root.version)
    }

    /// Discards every change made by this transaction.
    pub fn abort(&mut self) -> Result<()> {
        self.check_active()?;
        self.abort_inner();
        Ok(())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.manager.tree().check_entry(key, value)?;
        self.mutate(|tree, ctx, root| tree.insert(ctx, root, key, value))
    }

    fn read<T>(&mut self, op: impl FnOnce(&BTree, PageId) -> Result<T>) -> Result<T> {
        self.check_active()?;
        let result = op(self.manager.tree(), self.root);
        if result.is_err() {
            self.abort_inner();
        }
        result
    }

    fn mutate(
        &mut self,
        op: impl FnOnce(&BTree, &mut WriteContext, PageId) -> Result<PageId>,
    ) -> Result<()> {
        self.check_active()?;
        match op(self.manager.tree(), &mut self.ctx, self.root) {
            Ok(root) => {
                self.root = root;
                Ok(())
            }
            Err(e) => {
                self.abort_inner();
                Err(e)
            }
        }
    }

    fn check_active(&self) -> Result<()> {
        if self.state != TxnState::Active {
            return Err(DbError::TransactionClosed(self.id));
        }
        Ok(())
    }

    fn abort_inner(&mut self) {
        self.manager.abort_write(self.id, &mut self.ctx);
        self.state = TxnState::Aborted;
        self.token = None;
    }
}

impl Drop for WriteTransaction {
    fn drop(&mut self) {
        if self.state == TxnState::Active {
            self.abort_inner();
        }
    }
}

fn decode_opt(raw: Option<Bytes>) -> Result<Option<Value>> {
    raw.map(|bytes| Value::decode(&bytes)).transpose()
}

fn collect_range(
    tree: &BTree,
    root: PageId,
    start: Bound<&[u8]>,
    end: Bound<&[u8]>,
) -> Result<Vec<(Bytes, Value)>> {
    tree.range(root, start, end)
        .map(|entry| {
            let (key, value) = entry?;
            Ok((key, Value::decode(&value)?))
        })
        .collect()
}

fn byte_bounds<'a, K: AsRef<[u8]> + 'a, R: RangeBounds<K>>(
    range: &'a R,
) -> (Bound<&'a [u8]>, Bound<&'a [u8]>) {
    fn convert<'b, K: AsRef<[u8]> + 'b>(bound: Bound<&'b K>) -> Bound<&'b [u8]> {
        match bound {
            Bound::Included(key) => Bound::Included(key.as_ref()),
            Bound::Excluded(key) => Bound::Excluded(key.as_ref()),
            Bound::Unbounded => Bound::Unbounded,
        }
    }
    (convert(range.start_bound()), convert(range.end_bound()))
}
