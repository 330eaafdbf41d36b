use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use parking_lot::RwLock;

/// Positional byte I/O underneath the page file.
///
/// Implementations must allow concurrent `read_at` calls from many threads.
/// The storage engine guarantees that writes never overlap a region that a
/// concurrent reader may observe, so no ordering between `read_at` and
/// `write_at` is required beyond what each call itself provides.
pub trait PageIo: Send + Sync {
    /// Fills `buf` from `offset`; a short read is an `UnexpectedEof` error.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Writes all of `data` at `offset`, growing the backing store if needed.
    fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()>;

    /// Makes every completed write durable.
    fn sync(&self) -> io::Result<()>;

    /// Current length in bytes.
    fn len(&self) -> io::Result<u64>;

    fn set_len(&self, len: u64) -> io::Result<()>;
}

/// File-backed page I/O using positional reads and writes.
pub struct FileIo {
    file: File,
}

impl FileIo {
    /// Opens `path`, creating it when `create` is set.
    pub fn open<P: AsRef<Path>>(path: P, create: bool) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .truncate(false)
            .open(path)?;
        Ok(Self { file })
    }
}

impl PageIo for FileIo {
    #[cfg(unix)]
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.read_exact_at(buf, offset)
    }

    #[cfg(unix)]
    fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.write_all_at(data, offset)
    }

    #[cfg(windows)]
    fn read_at(&self, mut offset: u64, mut buf: &mut [u8]) -> io::Result<()> {
        use std::os::windows::fs::FileExt;
        while !buf.is_empty() {
            match self.file.seek_read(buf, offset) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "failed to fill whole buffer",
                    ));
                }
                Ok(n) => {
                    let tmp = buf;
                    buf = &mut tmp[n..];
                    offset += n as u64;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    #[cfg(windows)]
    fn write_at(&self, mut offset: u64, mut data: &[u8]) -> io::Result<()> {
        use std::os::windows::fs::FileExt;
        while !data.is_empty() {
            match self.file.seek_write(data, offset) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "failed to write whole buffer",
                    ));
                }
                Ok(n) => {
                    data = &data[n..];
                    offset += n as u64;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }
}

/// Volatile page I/O held entirely in memory.
#[derive(Default)]
pub struct MemoryIo {
    data: RwLock<Vec<u8>>,
}

impl MemoryIo {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PageIo for MemoryIo {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let data = self.data.read();
        let start = offset as usize;
        let end = start + buf.len();
        if end > data.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past end of memory store",
            ));
        }
        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let mut data = self.data.write();
        let start = offset as usize;
        let end = start + buf.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn sync(&self) -> io::Result<()> {
        Ok(())
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        self.data.write().resize(len as usize, 0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn exercise(io: &dyn PageIo) {
        assert_eq!(io.len().unwrap(), 0);
        io.write_at(10, b"hello").unwrap();
        assert_eq!(io.len().unwrap(), 15);

        let mut buf = [0u8; 5];
        io.read_at(10, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        let mut past_end = [0u8; 8];
        let err = io.read_at(12, &mut past_end).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        io.set_len(32).unwrap();
        assert_eq!(io.len().unwrap(), 32);
        io.sync().unwrap();
    }

    #[test]
    fn test_memory_io() {
        exercise(&MemoryIo::new());
    }

    #[test]
    fn test_file_io() {
        let temp_file = NamedTempFile::new().unwrap();
        let io = FileIo::open(temp_file.path(), false).unwrap();
        exercise(&io);
    }
}
