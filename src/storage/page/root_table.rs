use bytes::{Buf, BufMut, BytesMut};
use log::{info, warn};

use crate::common::{DbError, PageId, Result, RootPointer};
use crate::storage::disk::DiskManager;

use super::COMMIT_PAGE_ID;

/// "COWD"
const MAGIC: u32 = 0x434F_5744;
const FORMAT_VERSION: u16 = 1;
const SLOT_VALID: u8 = 1;

/// Encoded size of one commit slot
pub const SLOT_SIZE: usize = 32;
/// Bytes covered by the slot checksum
const SLOT_BODY: usize = SLOT_SIZE - 4;

/// One decoded commit record slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitRecord {
    pub page_size: u32,
    pub root: RootPointer,
}

impl CommitRecord {
    pub fn encode(&self) -> [u8; SLOT_SIZE] {
        let mut buf = BytesMut::with_capacity(SLOT_SIZE);
        buf.put_u32_le(MAGIC);
        buf.put_u16_le(FORMAT_VERSION);
        buf.put_u8(SLOT_VALID);
        buf.put_u8(0);
        buf.put_u32_le(self.page_size);
        buf.put_u64_le(self.root.version);
        buf.put_u64_le(self.root.root_page.as_u64());
        buf.put_u32_le(crc32fast::hash(&buf));

        let mut out = [0u8; SLOT_SIZE];
        out.copy_from_slice(&buf);
        out
    }

    /// Decodes a slot, returning `None` for anything that is not a complete,
    /// checksummed, valid record.
    pub fn decode(slot: &[u8]) -> Option<CommitRecord> {
        if slot.len() < SLOT_SIZE {
            return None;
        }
        let mut buf = &slot[..SLOT_SIZE];
        let magic = buf.get_u32_le();
        let format = buf.get_u16_le();
        let valid = buf.get_u8();
        let _reserved = buf.get_u8();
        let page_size = buf.get_u32_le();
        let version = buf.get_u64_le();
        let root_page = PageId::new(buf.get_u64_le());
        let checksum = buf.get_u32_le();

        if magic != MAGIC
            || format != FORMAT_VERSION
            || valid != SLOT_VALID
            || checksum != crc32fast::hash(&slot[..SLOT_BODY])
        {
            return None;
        }
        Some(CommitRecord {
            page_size,
            root: RootPointer::new(version, root_page),
        })
    }
}

/// The double-buffered commit record stored in page 0.
///
/// Slot 0 lives at offset 0 and slot 1 at `page_size / 2`. A commit writes
/// the inactive slot and syncs; the synced slot then becomes authoritative.
/// Recovery takes the valid slot with the higher version.
pub struct RootTable {
    page_size: usize,
    active_slot: usize,
    current: RootPointer,
}

impl RootTable {
    /// Writes an empty commit page to a new file. Neither slot is valid until
    /// the first `commit`, which lands in slot 0.
    pub fn format(disk: &DiskManager) -> Result<Self> {
        let page_size = disk.page_size();
        disk.write_page(COMMIT_PAGE_ID, &vec![0u8; page_size])?;
        Ok(Self {
            page_size,
            active_slot: 1,
            current: RootPointer::new(0, COMMIT_PAGE_ID),
        })
    }

    /// Reads both slots and adopts the valid one with the higher version.
    pub fn recover(disk: &DiskManager) -> Result<Self> {
        let page_size = disk.page_size();
        let mut page = vec![0u8; page_size];
        disk.read_page(COMMIT_PAGE_ID, &mut page)?;

        let mut best: Option<(usize, CommitRecord)> = None;
        for slot in 0..2 {
            let offset = Self::slot_offset(page_size, slot);
            let record = match CommitRecord::decode(&page[offset..]) {
                Some(record) => record,
                None => {
                    warn!("commit slot {} is not valid, ignoring it", slot);
                    continue;
                }
            };
            if record.page_size as usize != page_size {
                return Err(DbError::InvalidDatabaseFile(format!(
                    "file uses {} byte pages, configured for {}",
                    record.page_size, page_size
                )));
            }
            if best.map_or(true, |(_, b)| record.root.version > b.root.version) {
                best = Some((slot, record));
            }
        }

        let (active_slot, record) = best.ok_or_else(|| {
            DbError::InvalidDatabaseFile("no valid commit record in page 0".into())
        })?;
        info!(
            "recovered commit record {} from slot {}",
            record.root, active_slot
        );
        Ok(Self {
            page_size,
            active_slot,
            current: record.root,
        })
    }

    pub fn current(&self) -> RootPointer {
        self.current
    }

    pub fn active_slot(&self) -> usize {
        self.active_slot
    }

    /// Durably installs `next` in the inactive slot and makes it
    /// authoritative. With `sync` off the record is written but not fsynced.
    pub fn commit(&mut self, disk: &DiskManager, next: RootPointer, sync: bool) -> Result<()> {
        let slot = 1 - self.active_slot;
        let record = CommitRecord {
            page_size: self.page_size as u32,
            root: next,
        };
        disk.write_at(
            COMMIT_PAGE_ID,
            Self::slot_offset(self.page_size, slot),
            &record.encode(),
        )?;
        if sync {
            disk.sync()?;
        }

        self.active_slot = slot;
        self.current = next;
        Ok(())
    }

    /// Overwrites the inactive slot with an invalid record so that a
    /// half-written commit can never be chosen by recovery.
    pub fn invalidate_inactive(&self, disk: &DiskManager) -> Result<()> {
        let slot = 1 - self.active_slot;
        disk.write_at(
            COMMIT_PAGE_ID,
            Self::slot_offset(self.page_size, slot),
            &[0u8; SLOT_SIZE],
        )?;
        disk.sync()
    }

    fn slot_offset(page_size: usize, slot: usize) -> usize {
        slot * (page_size / 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk::MemoryIo;

    const PAGE: usize = 512;

    fn disk() -> DiskManager {
        DiskManager::new(Box::new(MemoryIo::new()), PAGE).unwrap()
    }

    #[test]
    fn test_record_layout() {
        let record = CommitRecord {
            page_size: 4096,
            root: RootPointer::new(7, PageId::new(3)),
        };
        let encoded = record.encode();
        assert_eq!(&encoded[..4], &MAGIC.to_le_bytes());
        assert_eq!(encoded[6], SLOT_VALID);
        assert_eq!(&encoded[12..20], &7u64.to_le_bytes());
        assert_eq!(CommitRecord::decode(&encoded), Some(record));
    }

    #[test]
    fn test_record_rejects_bad_checksum() {
        let record = CommitRecord {
            page_size: 512,
            root: RootPointer::new(1, PageId::new(1)),
        };
        let mut encoded = record.encode();
        encoded[15] ^= 1;
        assert_eq!(CommitRecord::decode(&encoded), None);
    }

    #[test]
    fn test_formatted_page_has_no_valid_slot() {
        let disk = disk();
        RootTable::format(&disk).unwrap();
        assert!(matches!(
            RootTable::recover(&disk),
            Err(DbError::InvalidDatabaseFile(_))
        ));
    }

    #[test]
    fn test_commits_alternate_slots() {
        let disk = disk();
        let mut table = RootTable::format(&disk).unwrap();

        table
            .commit(&disk, RootPointer::new(0, PageId::new(1)), true)
            .unwrap();
        assert_eq!(table.active_slot(), 0);
        table
            .commit(&disk, RootPointer::new(1, PageId::new(5)), true)
            .unwrap();
        assert_eq!(table.active_slot(), 1);

        let recovered = RootTable::recover(&disk).unwrap();
        assert_eq!(recovered.current(), RootPointer::new(1, PageId::new(5)));
        assert_eq!(recovered.active_slot(), 1);
    }

    #[test]
    fn test_recover_falls_back_on_torn_slot() {
        let disk = disk();
        let mut table = RootTable::format(&disk).unwrap();
        table
            .commit(&disk, RootPointer::new(0, PageId::new(1)), true)
            .unwrap();
        table
            .commit(&disk, RootPointer::new(1, PageId::new(2)), true)
            .unwrap();

        // Tear the newest slot (slot 1)
        disk.write_at(COMMIT_PAGE_ID, PAGE / 2 + 20, &[0xff; 4])
            .unwrap();

        let recovered = RootTable::recover(&disk).unwrap();
        assert_eq!(recovered.current(), RootPointer::new(0, PageId::new(1)));
        assert_eq!(recovered.active_slot(), 0);
    }

    #[test]
    fn test_invalidate_inactive() {
        let disk = disk();
        let mut table = RootTable::format(&disk).unwrap();
        table
            .commit(&disk, RootPointer::new(0, PageId::new(1)), true)
            .unwrap();
        table
            .commit(&disk, RootPointer::new(1, PageId::new(2)), true)
            .unwrap();
        // Inactive slot now holds version 0
        table.invalidate_inactive(&disk).unwrap();

        let recovered = RootTable::recover(&disk).unwrap();
        assert_eq!(recovered.current().version, 1);
    }

    #[test]
    fn test_page_size_mismatch() {
        let disk = disk();
        let mut table = RootTable::format(&disk).unwrap();
        table
            .commit(&disk, RootPointer::new(0, PageId::new(1)), true)
            .unwrap();

        let record = CommitRecord {
            page_size: 1024,
            root: RootPointer::new(3, PageId::new(1)),
        };
        disk.write_at(COMMIT_PAGE_ID, PAGE / 2, &record.encode())
            .unwrap();
        assert!(matches!(
            RootTable::recover(&disk),
            Err(DbError::InvalidDatabaseFile(_))
        ));
    }
}
