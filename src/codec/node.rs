use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::common::{
    DbError, PageId, Result, INTERNAL_ENTRY_OVERHEAD, LEAF_ENTRY_OVERHEAD, NODE_HEADER_SIZE,
};

/// Page type tags
const TAG_FREE: u8 = 0x00;
const TAG_LEAF: u8 = 0x01;
const TAG_INTERNAL: u8 = 0x02;

/// Offset of the checksum within the node header
const CHECKSUM_OFFSET: usize = 3;

/// Leaf node: ordered `(key, value)` pairs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeafNode {
    pub entries: Vec<(Bytes, Bytes)>,
}

/// Internal node: ordered `(key, child)` pairs.
///
/// Entry `i` covers keys in `[key_i, key_{i+1})`; entry 0 also covers every
/// key below `key_1`, so its own key is never consulted for routing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InternalNode {
    pub entries: Vec<(Bytes, PageId)>,
}

/// A decoded B-tree node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Leaf(LeafNode),
    Internal(InternalNode),
}

/// Encoded size of one leaf entry
pub fn leaf_entry_size(key: &[u8], value: &[u8]) -> usize {
    LEAF_ENTRY_OVERHEAD + key.len() + value.len()
}

/// Encoded size of one internal entry
pub fn internal_entry_size(key: &[u8]) -> usize {
    INTERNAL_ENTRY_OVERHEAD + key.len()
}

impl LeafNode {
    pub fn new(entries: Vec<(Bytes, Bytes)>) -> Self {
        Self { entries }
    }

    pub fn encoded_size(&self) -> usize {
        NODE_HEADER_SIZE
            + self
                .entries
                .iter()
                .map(|(k, v)| leaf_entry_size(k, v))
                .sum::<usize>()
    }
}

impl InternalNode {
    pub fn new(entries: Vec<(Bytes, PageId)>) -> Self {
        Self { entries }
    }

    pub fn encoded_size(&self) -> usize {
        NODE_HEADER_SIZE
            + self
                .entries
                .iter()
                .map(|(k, _)| internal_entry_size(k))
                .sum::<usize>()
    }
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    pub fn len(&self) -> usize {
        match self {
            Node::Leaf(leaf) => leaf.entries.len(),
            Node::Internal(internal) => internal.entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn encoded_size(&self) -> usize {
        match self {
            Node::Leaf(leaf) => leaf.encoded_size(),
            Node::Internal(internal) => internal.encoded_size(),
        }
    }

    /// Serializes the node. The result is unpadded; the page manager pads
    /// it to a full page.
    pub fn encode(&self) -> Result<Bytes> {
        let count = u16::try_from(self.len())
            .map_err(|_| DbError::invariant(format!("node with {} entries", self.len())))?;

        let mut buf = BytesMut::with_capacity(self.encoded_size());
        match self {
            Node::Leaf(leaf) => {
                put_header(&mut buf, TAG_LEAF, count);
                for (key, value) in &leaf.entries {
                    buf.put_u16_le(key_len(key)?);
                    buf.put_slice(key);
                    buf.put_u32_le(value.len() as u32);
                    buf.put_slice(value);
                }
            }
            Node::Internal(internal) => {
                put_header(&mut buf, TAG_INTERNAL, count);
                for (key, child) in &internal.entries {
                    buf.put_u16_le(key_len(key)?);
                    buf.put_slice(key);
                    buf.put_u64_le(child.as_u64());
                }
            }
        }

        let checksum = checksum(&buf);
        buf[CHECKSUM_OFFSET..NODE_HEADER_SIZE].copy_from_slice(&checksum.to_le_bytes());
        Ok(buf.freeze())
    }

    /// Parses a node page. Keys and values share the page's buffer.
    /// Bytes after the last entry are padding and ignored.
    pub fn decode(page: &Bytes) -> Result<Node> {
        if page.len() < NODE_HEADER_SIZE {
            return Err(DbError::corrupt(format!(
                "node page of {} bytes has no header",
                page.len()
            )));
        }

        let mut buf = &page[..];
        let tag = buf.get_u8();
        let count = buf.get_u16_le() as usize;
        let stored = buf.get_u32_le();

        let node = match tag {
            TAG_LEAF => {
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    let key = take_key(page, &mut buf)?;
                    ensure(buf, 4, "value length")?;
                    let len = buf.get_u32_le() as usize;
                    let value = take_slice(page, &mut buf, len, "value")?;
                    entries.push((key, value));
                }
                Node::Leaf(LeafNode { entries })
            }
            TAG_INTERNAL => {
                if count == 0 {
                    return Err(DbError::corrupt("internal node without children"));
                }
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    let key = take_key(page, &mut buf)?;
                    ensure(buf, 8, "child page id")?;
                    entries.push((key, PageId::new(buf.get_u64_le())));
                }
                Node::Internal(InternalNode { entries })
            }
            TAG_FREE => return Err(DbError::corrupt("page is free")),
            other => return Err(DbError::corrupt(format!("unknown node tag {:#04x}", other))),
        };

        let end = page.len() - buf.remaining();
        let actual = checksum_parts(&page[..CHECKSUM_OFFSET], &page[NODE_HEADER_SIZE..end]);
        if actual != stored {
            return Err(DbError::corrupt(format!(
                "node checksum mismatch: stored {:#010x}, computed {:#010x}",
                stored, actual
            )));
        }
        Ok(node)
    }
}

/// Encoded marker stamped on reclaimed pages
pub fn free_marker() -> Bytes {
    let mut buf = BytesMut::with_capacity(NODE_HEADER_SIZE);
    put_header(&mut buf, TAG_FREE, 0);
    let checksum = checksum(&buf);
    buf[CHECKSUM_OFFSET..NODE_HEADER_SIZE].copy_from_slice(&checksum.to_le_bytes());
    buf.freeze()
}

/// True when `page` carries a valid free marker.
pub fn is_free_page(page: &[u8]) -> bool {
    page.len() >= NODE_HEADER_SIZE && page[..NODE_HEADER_SIZE] == free_marker()[..]
}

fn put_header(buf: &mut BytesMut, tag: u8, count: u16) {
    buf.put_u8(tag);
    buf.put_u16_le(count);
    // Checksum, patched once the entries are written
    buf.put_u32_le(0);
}

fn key_len(key: &[u8]) -> Result<u16> {
    u16::try_from(key.len())
        .map_err(|_| DbError::invariant(format!("key of {} bytes in node", key.len())))
}

/// CRC-32 over the tag, the count and the entry bytes of an encoded node
fn checksum(encoded: &[u8]) -> u32 {
    checksum_parts(&encoded[..CHECKSUM_OFFSET], &encoded[NODE_HEADER_SIZE..])
}

fn checksum_parts(header: &[u8], entries: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(header);
    hasher.update(entries);
    hasher.finalize()
}

fn ensure(buf: &[u8], needed: usize, what: &str) -> Result<()> {
    if buf.remaining() < needed {
        return Err(DbError::corrupt(format!(
            "{} overruns the page ({} bytes needed, {} remain)",
            what,
            needed,
            buf.remaining()
        )));
    }
    Ok(())
}

fn take_slice(page: &Bytes, buf: &mut &[u8], len: usize, what: &str) -> Result<Bytes> {
    ensure(buf, len, what)?;
    let start = page.len() - buf.remaining();
    buf.advance(len);
    Ok(page.slice(start..start + len))
}

fn take_key(page: &Bytes, buf: &mut &[u8]) -> Result<Bytes> {
    ensure(buf, 2, "key length")?;
    let len = buf.get_u16_le() as usize;
    take_slice(page, buf, len, "key")
}
