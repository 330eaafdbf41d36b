use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::common::{RootPointer, Version};

struct Registry {
    published: RootPointer,
    /// Open readers per pinned version
    pins: BTreeMap<Version, usize>,
}

/// The published root together with the versions pinned by open readers.
///
/// Both live under one lock, so a reader always pins a version that is still
/// published at the moment of pinning, and the writer computes the oldest pin
/// against a consistent view.
pub struct SnapshotRegistry {
    inner: Mutex<Registry>,
}

impl SnapshotRegistry {
    pub fn new(published: RootPointer) -> Self {
        Self {
            inner: Mutex::new(Registry {
                published,
                pins: BTreeMap::new(),
            }),
        }
    }

    /// Pins and returns the currently published root.
    pub fn pin(&self) -> RootPointer {
        let mut inner = self.inner.lock();
        let root = inner.published;
        *inner.pins.entry(root.version).or_insert(0) += 1;
        root
    }

    /// Releases one pin of `version`. Returns true when this was the last
    /// reader of the oldest pinned version, i.e. the oldest pin moved forward.
    pub fn unpin(&self, version: Version) -> bool {
        let mut inner = self.inner.lock();
        let oldest = inner.pins.keys().next().copied();
        let remaining = match inner.pins.get_mut(&version) {
            Some(count) => {
                *count -= 1;
                *count
            }
            None => return false,
        };
        if remaining > 0 {
            return false;
        }
        inner.pins.remove(&version);
        oldest == Some(version)
    }

    /// Makes `root` the root handed to new readers.
    pub fn publish(&self, root: RootPointer) {
        self.inner.lock().published = root;
    }

    pub fn published(&self) -> RootPointer {
        self.inner.lock().published
    }

    /// Oldest version any open reader may still access; the published
    /// version when no reader is open.
    pub fn oldest_pinned(&self) -> Version {
        let inner = self.inner.lock();
        inner
            .pins
            .keys()
            .next()
            .copied()
            .unwrap_or(inner.published.version)
    }

    /// Number of open readers.
    pub fn active_readers(&self) -> usize {
        self.inner.lock().pins.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::PageId;

    fn root(version: Version) -> RootPointer {
        RootPointer::new(version, PageId::new(version + 1))
    }

    #[test]
    fn test_oldest_pinned_defaults_to_published() {
        let registry = SnapshotRegistry::new(root(3));
        assert_eq!(registry.oldest_pinned(), 3);
        assert_eq!(registry.active_readers(), 0);
    }

    #[test]
    fn test_pins_hold_oldest_version() {
        let registry = SnapshotRegistry::new(root(1));
        assert_eq!(registry.pin(), root(1));
        assert_eq!(registry.pin(), root(1));

        registry.publish(root(2));
        assert_eq!(registry.pin(), root(2));
        assert_eq!(registry.oldest_pinned(), 1);
        assert_eq!(registry.active_readers(), 3);

        assert!(!registry.unpin(1));
        assert!(registry.unpin(1));
        assert_eq!(registry.oldest_pinned(), 2);

        // Version 2 is now the oldest pin
        assert!(registry.unpin(2));
        assert_eq!(registry.oldest_pinned(), 2);
    }

    #[test]
    fn test_unpin_newer_version_does_not_advance() {
        let registry = SnapshotRegistry::new(root(1));
        registry.pin();
        registry.publish(root(2));
        registry.pin();
        assert!(!registry.unpin(2));
        assert_eq!(registry.oldest_pinned(), 1);
    }
}
