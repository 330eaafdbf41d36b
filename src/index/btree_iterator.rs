use std::ops::Bound;

use bytes::Bytes;

use crate::codec::{InternalNode, Node};
use crate::common::{PageId, Result};

use super::btree::BTree;

/// Ascending iterator over a key range of one tree version.
///
/// Copy-on-write pages cannot carry sibling links, so the iterator keeps the
/// path from the root as an explicit stack and climbs it to reach the next
/// leaf. It yields an error at most once and then stops.
pub struct RangeIter<'a> {
    tree: &'a BTree,
    root: Option<PageId>,
    /// Internal nodes on the path, each with the index of the child in use
    stack: Vec<(InternalNode, usize)>,
    leaf: std::vec::IntoIter<(Bytes, Bytes)>,
    start: Bound<Bytes>,
    end: Bound<Bytes>,
    done: bool,
}

impl<'a> RangeIter<'a> {
    pub(crate) fn new(tree: &'a BTree, root: PageId, start: Bound<&[u8]>, end: Bound<&[u8]>) -> Self {
        Self {
            tree,
            root: Some(root),
            stack: Vec::new(),
            leaf: Vec::new().into_iter(),
            start: to_owned_bound(start),
            end: to_owned_bound(end),
            done: false,
        }
    }

    /// Walks down from `page_id` to a leaf, following `seek` or the leftmost
    /// child when there is none.
    fn descend(&mut self, mut page_id: PageId, seek: Option<Bytes>) -> Result<()> {
        loop {
            match self.tree.read_node(page_id)? {
                Node::Internal(internal) => {
                    let idx = seek
                        .as_ref()
                        .map_or(0, |key| internal.child_index(key));
                    page_id = internal.entries[idx].1;
                    self.stack.push((internal, idx));
                }
                Node::Leaf(leaf) => {
                    self.leaf = leaf.entries.into_iter();
                    return Ok(());
                }
            }
        }
    }

    /// Moves to the leaf after the current one. Returns false at the end of
    /// the tree.
    fn next_leaf(&mut self) -> Result<bool> {
        while let Some((node, idx)) = self.stack.pop() {
            if idx + 1 < node.entries.len() {
                let child = node.entries[idx + 1].1;
                self.stack.push((node, idx + 1));
                self.descend(child, None)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn before_start(&self, key: &[u8]) -> bool {
        match &self.start {
            Bound::Included(start) => key < start.as_ref(),
            Bound::Excluded(start) => key <= start.as_ref(),
            Bound::Unbounded => false,
        }
    }

    fn past_end(&self, key: &[u8]) -> bool {
        match &self.end {
            Bound::Included(end) => key > end.as_ref(),
            Bound::Excluded(end) => key >= end.as_ref(),
            Bound::Unbounded => false,
        }
    }
}

impl Iterator for RangeIter<'_> {
    type Item = Result<(Bytes, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }

            if let Some(root) = self.root.take() {
                let seek = match &self.start {
                    Bound::Included(key) | Bound::Excluded(key) => Some(key.clone()),
                    Bound::Unbounded => None,
                };
                if let Err(e) = self.descend(root, seek) {
                    self.done = true;
                    return Some(Err(e));
                }
            }

            if let Some((key, value)) = self.leaf.next() {
                if self.before_start(&key) {
                    continue;
                }
                if self.past_end(&key) {
                    self.done = true;
                    return None;
                }
                return Some(Ok((key, value)));
            }

            match self.next_leaf() {
                Ok(true) => {}
                Ok(false) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

fn to_owned_bound(bound: Bound<&[u8]>) -> Bound<Bytes> {
    match bound {
        Bound::Included(key) => Bound::Included(Bytes::copy_from_slice(key)),
        Bound::Excluded(key) => Bound::Excluded(Bytes::copy_from_slice(key)),
        Bound::Unbounded => Bound::Unbounded,
    }
}
