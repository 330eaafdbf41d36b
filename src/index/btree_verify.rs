use std::collections::HashSet;

use bytes::Bytes;

use crate::codec::Node;
use crate::common::{DbError, PageId, Result};

use super::btree::BTree;

/// Shape of one tree version, as measured by `BTree::verify`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    /// Number of levels; a lone leaf root has height 1
    pub height: usize,
    pub leaf_pages: usize,
    pub internal_pages: usize,
    pub entries: u64,
    /// Non-root nodes below `min_keys` that could not be merged or
    /// rebalanced without exceeding a page
    pub underfull_nodes: usize,
}

struct Walk {
    stats: TreeStats,
    leaf_depth: Option<usize>,
    seen: HashSet<PageId>,
}

impl BTree {
    /// Checks the structure of the tree rooted at `root`: key order,
    /// separator bounds, uniform leaf depth, fan-out and page-size limits, and
    /// that no page is reachable twice.
    pub fn verify(&self, root: PageId) -> Result<TreeStats> {
        let mut walk = Walk {
            stats: TreeStats::default(),
            leaf_depth: None,
            seen: HashSet::new(),
        };
        self.verify_node(root, None, None, 1, true, &mut walk)?;
        walk.stats.height = walk.leaf_depth.unwrap_or(0);
        Ok(walk.stats)
    }

    /// Collects every page reachable from `root`.
    pub fn reachable_pages(&self, root: PageId) -> Result<HashSet<PageId>> {
        let mut seen = HashSet::new();
        let mut pending = vec![root];
        while let Some(page_id) = pending.pop() {
            if !seen.insert(page_id) {
                return Err(DbError::corrupt(format!("{} is reachable twice", page_id)));
            }
            if let Node::Internal(internal) = self.read_node(page_id)? {
                pending.extend(internal.entries.iter().map(|(_, child)| *child));
            }
        }
        Ok(seen)
    }

    fn verify_node(
        &self,
        page_id: PageId,
        lower: Option<&Bytes>,
        upper: Option<&Bytes>,
        depth: usize,
        is_root: bool,
        walk: &mut Walk,
    ) -> Result<()> {
        if !walk.seen.insert(page_id) {
            return Err(violation(page_id, "page is reachable twice"));
        }

        let node = self.read_node(page_id)?;
        if node.len() > self.max_keys() {
            return Err(violation(
                page_id,
                format!("{} entries exceed max_keys {}", node.len(), self.max_keys()),
            ));
        }
        if node.encoded_size() > self.page_size() {
            return Err(violation(page_id, "node does not fit a page"));
        }
        if !is_root && node.len() < self.min_keys() {
            walk.stats.underfull_nodes += 1;
        }

        let in_bounds = |key: &Bytes| {
            lower.map_or(true, |lower| key >= lower) && upper.map_or(true, |upper| key < upper)
        };

        match node {
            Node::Leaf(leaf) => {
                if let Some(expected) = walk.leaf_depth {
                    if expected != depth {
                        return Err(violation(
                            page_id,
                            format!("leaf at depth {}, expected {}", depth, expected),
                        ));
                    }
                } else {
                    walk.leaf_depth = Some(depth);
                }
                for (i, (key, _)) in leaf.entries.iter().enumerate() {
                    if i > 0 && leaf.entries[i - 1].0 >= *key {
                        return Err(violation(page_id, "leaf keys out of order"));
                    }
                    if !in_bounds(key) {
                        return Err(violation(page_id, "leaf key outside separator bounds"));
                    }
                }
                walk.stats.leaf_pages += 1;
                walk.stats.entries += leaf.entries.len() as u64;
            }
            Node::Internal(internal) => {
                for i in 1..internal.entries.len() {
                    let key = &internal.entries[i].0;
                    if i > 1 && internal.entries[i - 1].0 >= *key {
                        return Err(violation(page_id, "separators out of order"));
                    }
                    if !in_bounds(key) {
                        return Err(violation(page_id, "separator outside parent bounds"));
                    }
                }
                walk.stats.internal_pages += 1;

                for (i, (key, child)) in internal.entries.iter().enumerate() {
                    let child_lower = if i == 0 { lower } else { Some(key) };
                    let child_upper = internal.entries.get(i + 1).map(|(k, _)| k).or(upper);
                    self.verify_node(*child, child_lower, child_upper, depth + 1, false, walk)?;
                }
            }
        }
        Ok(())
    }
}

fn violation(page_id: PageId, msg: impl std::fmt::Display) -> DbError {
    DbError::invariant(format!("{}: {}", page_id, msg))
}
