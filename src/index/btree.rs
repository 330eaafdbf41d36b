use std::collections::BTreeSet;
use std::ops::Bound;
use std::sync::Arc;

use bytes::Bytes;
use log::debug;

use crate::codec::node::{internal_entry_size, leaf_entry_size};
use crate::codec::{InternalNode, LeafNode, Node};
use crate::common::{
    Config, DbError, PageId, Result, LEAF_ENTRY_OVERHEAD, NODE_HEADER_SIZE,
};
use crate::storage::page::PageManager;

use super::btree_iterator::RangeIter;

/// Pages touched by one write transaction.
///
/// Pages the transaction allocated are freed the moment they are superseded;
/// superseded pages that an earlier commit published are kept until the
/// commit, then retired.
#[derive(Debug, Default)]
pub struct WriteContext {
    allocated: BTreeSet<PageId>,
    superseded: Vec<PageId>,
}

impl WriteContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live pages this transaction allocated.
    pub fn allocated(&self) -> Vec<PageId> {
        self.allocated.iter().copied().collect()
    }

    /// Published pages this transaction replaced.
    pub fn superseded(&self) -> &[PageId] {
        &self.superseded
    }

    /// Empties the context, returning `(allocated, superseded)`.
    pub fn take(&mut self) -> (Vec<PageId>, Vec<PageId>) {
        let allocated = std::mem::take(&mut self.allocated).into_iter().collect();
        (allocated, std::mem::take(&mut self.superseded))
    }
}

/// Outcome of inserting below one node
enum InsertResult {
    NoSplit(PageId),
    Split(PageId, Bytes, PageId),
}

/// Outcome of deleting below one node
enum DeleteResult {
    Unchanged,
    Updated { page: PageId, underflow: bool },
}

/// Copy-on-write B-tree over the page manager.
///
/// The tree itself is stateless: every operation takes the root to work on.
/// Mutations never modify a page in place; they write new copies of every
/// node on the path and return the new root, leaving the old root intact.
pub struct BTree {
    pages: Arc<PageManager>,
    max_keys: usize,
    min_keys: usize,
    page_size: usize,
    max_key_size: usize,
    max_entry_size: usize,
}

impl BTree {
    pub fn new(pages: Arc<PageManager>, config: &Config) -> Self {
        Self {
            pages,
            max_keys: config.max_keys,
            min_keys: config.min_keys(),
            page_size: config.page_size,
            max_key_size: config.max_key_size(),
            max_entry_size: config.max_entry_size(),
        }
    }

    pub fn pages(&self) -> &Arc<PageManager> {
        &self.pages
    }

    pub fn max_keys(&self) -> usize {
        self.max_keys
    }

    pub fn min_keys(&self) -> usize {
        self.min_keys
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub(crate) fn read_node(&self, page_id: PageId) -> Result<Node> {
        let page = self.pages.read(page_id)?;
        Node::decode(&page)
    }

    /// Writes a new, empty leaf to serve as the root of an empty tree.
    pub fn create_empty(&self, ctx: &mut WriteContext) -> Result<PageId> {
        self.write_node(ctx, &Node::Leaf(LeafNode::default()))
    }

    /// Checks that `key` and `value` fit the size limits of a node.
    pub fn check_entry(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.len() > self.max_key_size {
            return Err(DbError::KeyTooLarge {
                size: key.len(),
                max: self.max_key_size,
            });
        }
        if leaf_entry_size(key, value) > self.max_entry_size {
            return Err(DbError::ValueTooLarge {
                size: value.len(),
                max: self.max_entry_size - LEAF_ENTRY_OVERHEAD - key.len(),
            });
        }
        Ok(())
    }

    /// Looks up `key` in the tree rooted at `root`.
    pub fn get(&self, root: PageId, key: &[u8]) -> Result<Option<Bytes>> {
        let mut page_id = root;
        loop {
            match self.read_node(page_id)? {
                Node::Internal(internal) => {
                    page_id = internal.entries[internal.child_index(key)].1;
                }
                Node::Leaf(leaf) => return Ok(leaf.get(key).cloned()),
            }
        }
    }

    /// Returns an ascending iterator over the entries of `root` within the
    /// given bounds.
    pub fn range<'a>(
        &'a self,
        root: PageId,
        start: Bound<&[u8]>,
        end: Bound<&[u8]>,
    ) -> RangeIter<'a> {
        RangeIter::new(self, root, start, end)
    }

    /// Inserts or replaces `key`, returning the new root.
    pub fn insert(
        &self,
        ctx: &mut WriteContext,
        root: PageId,
        key: &[u8],
        value: &[u8],
    ) -> Result<PageId> {
        self.check_entry(key, value)?;

        let key = Bytes::copy_from_slice(key);
        let value = Bytes::copy_from_slice(value);
        match self.insert_at(ctx, root, key, value)? {
            InsertResult::NoSplit(page_id) => Ok(page_id),
            InsertResult::Split(left, separator, right) => {
                let new_root = InternalNode::new(vec![(Bytes::new(), left), (separator, right)]);
                let page_id = self.write_node(ctx, &Node::Internal(new_root))?;
                debug!("root split, tree grows to new root {}", page_id);
                Ok(page_id)
            }
        }
    }

    fn insert_at(
        &self,
        ctx: &mut WriteContext,
        page_id: PageId,
        key: Bytes,
        value: Bytes,
    ) -> Result<InsertResult> {
        let node = match self.read_node(page_id)? {
            Node::Leaf(mut leaf) => {
                leaf.upsert(key, value);
                Node::Leaf(leaf)
            }
            Node::Internal(mut internal) => {
                let idx = internal.child_index(&key);
                match self.insert_at(ctx, internal.entries[idx].1, key, value)? {
                    InsertResult::NoSplit(child) => internal.entries[idx].1 = child,
                    InsertResult::Split(left, separator, right) => {
                        internal.entries[idx].1 = left;
                        internal.entries.insert(idx + 1, (separator, right));
                    }
                }
                Node::Internal(internal)
            }
        };

        self.discard(ctx, page_id)?;

        if !self.is_overfull(&node) {
            return Ok(InsertResult::NoSplit(self.write_node(ctx, &node)?));
        }
        let (left, separator, right) = match node {
            Node::Leaf(leaf) => {
                let (left, separator, right) = leaf.split(self.page_size);
                (Node::Leaf(left), separator, Node::Leaf(right))
            }
            Node::Internal(internal) => {
                let (left, separator, right) = internal.split(self.page_size);
                (Node::Internal(left), separator, Node::Internal(right))
            }
        };
        let left = self.write_node(ctx, &left)?;
        let right = self.write_node(ctx, &right)?;
        Ok(InsertResult::Split(left, separator, right))
    }

    /// Removes `key`, returning the new root. Deleting an absent key
    /// allocates nothing and returns `root` itself.
    pub fn delete(&self, ctx: &mut WriteContext, root: PageId, key: &[u8]) -> Result<PageId> {
        if self.get(root, key)?.is_none() {
            return Ok(root);
        }

        let mut root = match self.delete_at(ctx, root, key)? {
            DeleteResult::Unchanged => return Ok(root),
            DeleteResult::Updated { page, .. } => page,
        };

        // Collapse a root left with a single child
        loop {
            match self.read_node(root)? {
                Node::Internal(internal) if internal.entries.len() == 1 => {
                    let child = internal.entries[0].1;
                    self.discard(ctx, root)?;
                    debug!("root {} collapsed into {}", root, child);
                    root = child;
                }
                _ => return Ok(root),
            }
        }
    }

    fn delete_at(&self, ctx: &mut WriteContext, page_id: PageId, key: &[u8]) -> Result<DeleteResult> {
        let node = match self.read_node(page_id)? {
            Node::Leaf(mut leaf) => {
                if !leaf.remove(key) {
                    return Ok(DeleteResult::Unchanged);
                }
                Node::Leaf(leaf)
            }
            Node::Internal(mut internal) => {
                let idx = internal.child_index(key);
                match self.delete_at(ctx, internal.entries[idx].1, key)? {
                    DeleteResult::Unchanged => return Ok(DeleteResult::Unchanged),
                    DeleteResult::Updated { page, underflow } => {
                        internal.entries[idx].1 = page;
                        if underflow {
                            self.rebalance(ctx, &mut internal, idx)?;
                        }
                    }
                }
                Node::Internal(internal)
            }
        };

        self.discard(ctx, page_id)?;
        let underflow = node.len() < self.min_keys;
        let page = self.write_node(ctx, &node)?;
        Ok(DeleteResult::Updated { page, underflow })
    }

    /// Repairs the underflowing child at `idx` of `parent` by merging it with
    /// a sibling, or failing that by borrowing one entry from the sibling.
    /// When neither fits the child is left as is.
    fn rebalance(&self, ctx: &mut WriteContext, parent: &mut InternalNode, idx: usize) -> Result<()> {
        if parent.entries.len() < 2 {
            return Ok(());
        }
        let left_idx = if idx > 0 { idx - 1 } else { idx };
        let right_idx = left_idx + 1;
        let separator = parent.entries[right_idx].0.clone();
        let underflow_on_left = idx == left_idx;

        let left = self.read_node(parent.entries[left_idx].1)?;
        let right = self.read_node(parent.entries[right_idx].1)?;

        match (left, right) {
            (Node::Leaf(mut left), Node::Leaf(mut right)) => {
                let merged_len = left.entries.len() + right.entries.len();
                let merged_size = left.encoded_size() + right.encoded_size() - NODE_HEADER_SIZE;
                if self.fits(merged_len, merged_size) {
                    let merged = Node::Leaf(left.merge(right));
                    return self.replace_with_merged(ctx, parent, left_idx, merged);
                }

                if underflow_on_left {
                    if right.entries.len() <= self.min_keys {
                        return Ok(());
                    }
                    let moved = right.entries.remove(0);
                    left.entries.push(moved);
                } else {
                    if left.entries.len() <= self.min_keys {
                        return Ok(());
                    }
                    if let Some(moved) = left.entries.pop() {
                        right.entries.insert(0, moved);
                    }
                }
                let separator = right.entries[0].0.clone();
                self.replace_pair(ctx, parent, left_idx, Node::Leaf(left), separator, Node::Leaf(right))
            }
            (Node::Internal(mut left), Node::Internal(mut right)) => {
                let merged_len = left.entries.len() + right.entries.len();
                let merged_size = left.encoded_size() + right.encoded_size() - NODE_HEADER_SIZE
                    + internal_entry_size(&separator)
                    - internal_entry_size(&right.entries[0].0);
                if self.fits(merged_len, merged_size) {
                    let merged = Node::Internal(left.merge(separator, right));
                    return self.replace_with_merged(ctx, parent, left_idx, merged);
                }

                let new_separator = if underflow_on_left {
                    if right.entries.len() <= self.min_keys {
                        return Ok(());
                    }
                    // The first child of the right node moves under the old separator
                    let (_, child) = right.entries.remove(0);
                    left.entries.push((separator, child));
                    right.entries[0].0.clone()
                } else {
                    if left.entries.len() <= self.min_keys {
                        return Ok(());
                    }
                    let (key, child) = match left.entries.pop() {
                        Some(entry) => entry,
                        None => return Ok(()),
                    };
                    right.entries[0].0 = separator;
                    right.entries.insert(0, (key.clone(), child));
                    key
                };
                self.replace_pair(
                    ctx,
                    parent,
                    left_idx,
                    Node::Internal(left),
                    new_separator,
                    Node::Internal(right),
                )
            }
            _ => Err(DbError::invariant(format!(
                "siblings {} and {} are at different depths",
                parent.entries[left_idx].1, parent.entries[right_idx].1
            ))),
        }
    }

    fn replace_with_merged(
        &self,
        ctx: &mut WriteContext,
        parent: &mut InternalNode,
        left_idx: usize,
        merged: Node,
    ) -> Result<()> {
        let merged_page = self.write_node(ctx, &merged)?;
        let (_, right_page) = parent.entries.remove(left_idx + 1);
        let left_page = std::mem::replace(&mut parent.entries[left_idx].1, merged_page);
        self.discard(ctx, left_page)?;
        self.discard(ctx, right_page)
    }

    /// Installs a rebalanced sibling pair, unless either node or the parent
    /// with the new separator would no longer fit a page.
    fn replace_pair(
        &self,
        ctx: &mut WriteContext,
        parent: &mut InternalNode,
        left_idx: usize,
        left: Node,
        separator: Bytes,
        right: Node,
    ) -> Result<()> {
        if self.is_overfull(&left) || self.is_overfull(&right) {
            return Ok(());
        }
        let parent_size =
            parent.encoded_size() - parent.entries[left_idx + 1].0.len() + separator.len();
        if parent_size > self.page_size {
            return Ok(());
        }

        let new_left = self.write_node(ctx, &left)?;
        let new_right = self.write_node(ctx, &right)?;
        let old_left = std::mem::replace(&mut parent.entries[left_idx].1, new_left);
        let old_right = std::mem::replace(&mut parent.entries[left_idx + 1], (separator, new_right)).1;
        self.discard(ctx, old_left)?;
        self.discard(ctx, old_right)
    }

    fn fits(&self, len: usize, encoded_size: usize) -> bool {
        len <= self.max_keys && encoded_size <= self.page_size
    }

    fn is_overfull(&self, node: &Node) -> bool {
        !self.fits(node.len(), node.encoded_size())
    }

    fn write_node(&self, ctx: &mut WriteContext, node: &Node) -> Result<PageId> {
        let encoded = node.encode()?;
        let page_id = self.pages.allocate()?;
        ctx.allocated.insert(page_id);
        self.pages.write(page_id, &encoded)?;
        Ok(page_id)
    }

    /// Drops a page that the new path no longer references.
    fn discard(&self, ctx: &mut WriteContext, page_id: PageId) -> Result<()> {
        if ctx.allocated.remove(&page_id) {
            self.pages.free(page_id)
        } else {
            ctx.superseded.push(page_id);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk::{DiskManager, MemoryIo};
    use crate::storage::page::COMMIT_PAGE_ID;

    fn tree(config: Config) -> BTree {
        let disk = DiskManager::new(Box::new(MemoryIo::new()), config.page_size).unwrap();
        disk.write_page(COMMIT_PAGE_ID, &vec![0u8; config.page_size])
            .unwrap();
        let pages = Arc::new(PageManager::new(disk, &config));
        BTree::new(pages, &config)
    }

    fn key(i: u32) -> Vec<u8> {
        format!("key{:05}", i).into_bytes()
    }

    fn small_config() -> Config {
        Config::default().with_page_size(512).with_max_keys(4)
    }

    #[test]
    fn test_empty_tree() {
        let tree = tree(small_config());
        let mut ctx = WriteContext::new();
        let root = tree.create_empty(&mut ctx).unwrap();
        assert_eq!(tree.get(root, b"missing").unwrap(), None);
    }

    #[test]
    fn test_insert_splits_root() {
        let tree = tree(small_config());
        let mut ctx = WriteContext::new();
        let mut root = tree.create_empty(&mut ctx).unwrap();
        for i in 0..5 {
            root = tree.insert(&mut ctx, root, &key(i), b"v").unwrap();
        }
        assert!(matches!(tree.read_node(root).unwrap(), Node::Internal(_)));
        for i in 0..5 {
            assert_eq!(tree.get(root, &key(i)).unwrap().as_deref(), Some(&b"v"[..]));
        }
    }

    #[test]
    fn test_superseded_pages_of_same_txn_are_freed() {
        let tree = tree(small_config());
        let mut ctx = WriteContext::new();
        let root = tree.create_empty(&mut ctx).unwrap();
        let root = tree.insert(&mut ctx, root, b"a", b"1").unwrap();
        let root = tree.insert(&mut ctx, root, b"b", b"2").unwrap();

        // Only the live root remains allocated; nothing published was replaced
        assert_eq!(ctx.allocated(), vec![root]);
        assert!(ctx.superseded().is_empty());
    }

    #[test]
    fn test_published_pages_are_superseded_not_freed() {
        let tree = tree(small_config());
        let mut ctx = WriteContext::new();
        let root = tree.create_empty(&mut ctx).unwrap();
        let (allocated, _) = ctx.take();
        tree.pages().publish(&allocated);

        let new_root = tree.insert(&mut ctx, root, b"a", b"1").unwrap();
        assert_ne!(new_root, root);
        assert_eq!(ctx.superseded(), &[root]);
        assert!(!tree.pages().is_free(root));
        assert_eq!(tree.get(root, b"a").unwrap(), None);
    }

    #[test]
    fn test_delete_collapses_root() {
        let tree = tree(small_config());
        let mut ctx = WriteContext::new();
        let mut root = tree.create_empty(&mut ctx).unwrap();
        for i in 0..20 {
            root = tree.insert(&mut ctx, root, &key(i), b"v").unwrap();
        }
        for i in 0..20 {
            root = tree.delete(&mut ctx, root, &key(i)).unwrap();
        }
        match tree.read_node(root).unwrap() {
            Node::Leaf(leaf) => assert!(leaf.entries.is_empty()),
            Node::Internal(_) => panic!("root did not collapse"),
        }
        assert_eq!(ctx.allocated(), vec![root]);
    }

    #[test]
    fn test_delete_absent_allocates_nothing() {
        let tree = tree(small_config());
        let mut ctx = WriteContext::new();
        let root = tree.create_empty(&mut ctx).unwrap();
        let root = tree.insert(&mut ctx, root, b"a", b"1").unwrap();
        let before = tree.pages().stats();

        assert_eq!(tree.delete(&mut ctx, root, b"zz").unwrap(), root);
        assert_eq!(tree.pages().stats(), before);
    }

    #[test]
    fn test_entry_limits() {
        let tree = tree(small_config());
        let config = small_config();
        let mut ctx = WriteContext::new();
        let root = tree.create_empty(&mut ctx).unwrap();

        let long_key = vec![b'k'; config.max_key_size() + 1];
        assert!(matches!(
            tree.insert(&mut ctx, root, &long_key, b""),
            Err(DbError::KeyTooLarge { .. })
        ));

        let big_value = vec![0u8; config.max_entry_size()];
        assert!(matches!(
            tree.insert(&mut ctx, root, b"k", &big_value),
            Err(DbError::ValueTooLarge { .. })
        ));

        let max_value = vec![0u8; config.max_entry_size() - LEAF_ENTRY_OVERHEAD - 1];
        tree.insert(&mut ctx, root, b"k", &max_value).unwrap();
    }

    #[test]
    fn test_large_values_split_by_bytes() {
        let config = Config::default().with_page_size(512).with_max_keys(64);
        let tree = tree(config.clone());
        let mut ctx = WriteContext::new();
        let mut root = tree.create_empty(&mut ctx).unwrap();
        let value = vec![7u8; config.max_entry_size() - LEAF_ENTRY_OVERHEAD - 8];
        for i in 0..40 {
            root = tree.insert(&mut ctx, root, &key(i), &value).unwrap();
        }
        for i in 0..40 {
            assert_eq!(tree.get(root, &key(i)).unwrap().as_deref(), Some(&value[..]));
        }
        let stats = tree.verify(root).unwrap();
        assert_eq!(stats.entries, 40);
        assert!(stats.height >= 2);
    }
}
