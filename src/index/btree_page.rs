use bytes::Bytes;

use crate::codec::node::{internal_entry_size, leaf_entry_size};
use crate::codec::{InternalNode, LeafNode};
use crate::common::NODE_HEADER_SIZE;

/// Index at which an overfull run of entries is cut in two.
///
/// When the entries fit in `max_bytes` the node overflowed by count and is
/// halved by count; otherwise the cut balances bytes. The result is always in
/// `[1, n - 1]`.
pub fn split_index(entry_sizes: &[usize], max_bytes: usize) -> usize {
    let n = entry_sizes.len();
    debug_assert!(n >= 2, "cannot split {} entries", n);
    let total: usize = entry_sizes.iter().sum();
    if total <= max_bytes {
        return (n / 2).clamp(1, n - 1);
    }

    let mut acc = 0;
    for (i, size) in entry_sizes.iter().enumerate() {
        acc += size;
        if acc * 2 >= total {
            return (i + 1).clamp(1, n - 1);
        }
    }
    (n / 2).clamp(1, n - 1)
}

impl LeafNode {
    /// Binary search for `key`: `Ok(index)` when present, else the insertion point.
    pub fn search(&self, key: &[u8]) -> Result<usize, usize> {
        self.entries.binary_search_by(|(k, _)| k.as_ref().cmp(key))
    }

    pub fn get(&self, key: &[u8]) -> Option<&Bytes> {
        self.search(key).ok().map(|i| &self.entries[i].1)
    }

    /// Inserts or replaces the value stored under `key`.
    pub fn upsert(&mut self, key: Bytes, value: Bytes) {
        match self.search(&key) {
            Ok(i) => self.entries[i].1 = value,
            Err(i) => self.entries.insert(i, (key, value)),
        }
    }

    /// Removes `key`, returning whether it was present.
    pub fn remove(&mut self, key: &[u8]) -> bool {
        match self.search(key) {
            Ok(i) => {
                self.entries.remove(i);
                true
            }
            Err(_) => false,
        }
    }

    /// Splits an overfull leaf. Returns the left half, the separator (the
    /// right half's first key) and the right half.
    pub fn split(mut self, page_size: usize) -> (LeafNode, Bytes, LeafNode) {
        let sizes: Vec<usize> = self
            .entries
            .iter()
            .map(|(k, v)| leaf_entry_size(k, v))
            .collect();
        let mid = split_index(&sizes, page_size - NODE_HEADER_SIZE);
        let right = LeafNode::new(self.entries.split_off(mid));
        let separator = right.entries[0].0.clone();
        (self, separator, right)
    }

    /// Appends every entry of the right sibling.
    pub fn merge(mut self, mut right: LeafNode) -> LeafNode {
        self.entries.append(&mut right.entries);
        self
    }
}

impl InternalNode {
    /// Position of the child covering `key`: the last entry whose key is
    /// `<= key`, or entry 0.
    pub fn child_index(&self, key: &[u8]) -> usize {
        self.entries
            .partition_point(|(k, _)| k.as_ref() <= key)
            .saturating_sub(1)
    }

    /// Splits an overfull internal node. The right half keeps its first key,
    /// which doubles as the separator pushed to the parent.
    pub fn split(mut self, page_size: usize) -> (InternalNode, Bytes, InternalNode) {
        let sizes: Vec<usize> = self
            .entries
            .iter()
            .map(|(k, _)| internal_entry_size(k))
            .collect();
        let mid = split_index(&sizes, page_size - NODE_HEADER_SIZE);
        let right = InternalNode::new(self.entries.split_off(mid));
        let separator = right.entries[0].0.clone();
        (self, separator, right)
    }

    /// Appends the right sibling, whose first entry takes over the parent's
    /// `separator` as its key.
    pub fn merge(mut self, separator: Bytes, mut right: InternalNode) -> InternalNode {
        if let Some(first) = right.entries.first_mut() {
            first.0 = separator;
        }
        self.entries.append(&mut right.entries);
        self
    }
}
