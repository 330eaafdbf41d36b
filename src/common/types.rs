use std::fmt;

/// Page identifier type - addresses one fixed-size slot in the page file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u64);

impl PageId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Byte offset of this page within the page file.
    pub fn offset(&self, page_size: usize) -> u64 {
        self.0 * page_size as u64
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageId({})", self.0)
    }
}

/// Transaction identifier, unique for the lifetime of a `Database` handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxnId(pub u64);

impl TxnId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxnId({})", self.0)
    }
}

/// Commit version; increases by exactly one per successful commit
pub type Version = u64;

/// The published tree root together with the version that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootPointer {
    pub version: Version,
    pub root_page: PageId,
}

impl RootPointer {
    pub fn new(version: Version, root_page: PageId) -> Self {
        Self { version, root_page }
    }

    /// The pointer a successful commit of `root_page` on top of `self` produces.
    pub fn next(&self, root_page: PageId) -> Self {
        Self {
            version: self.version + 1,
            root_page,
        }
    }
}

impl fmt::Display for RootPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}@{}", self.version, self.root_page)
    }
}

/// Timestamp type for LRU-K tracking
pub type Timestamp = u64;
