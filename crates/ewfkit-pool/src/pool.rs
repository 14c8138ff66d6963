//! Bounded file descriptor pool
//!
//! Segment tables can reference thousands of files; the pool multiplexes
//! them over a bounded set of open descriptors. Entries are opened lazily,
//! the least recently used open descriptor is closed when the budget is
//! reached, and evicted entries reopen transparently on next access.
//!
//! Lock order: the pool-wide open-set lock is never acquired while holding
//! an entry lock.

use std::fs::{File, OpenOptions};
use std::io::{SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use ewfkit_core::{Error, ReadWriteSeek, Result};
use tracing::debug;

/// How an entry is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Existing file, read only
    Read,
    /// Existing file, read and write
    ReadWrite,
    /// Create or truncate, read and write
    Create,
}

impl AccessMode {
    fn writable(&self) -> bool {
        !matches!(self, AccessMode::Read)
    }
}

enum Handle {
    /// Descriptor currently closed; reopened from the entry path on access
    Closed,
    File(File),
    /// Caller supplied stream; pinned open for the lifetime of the pool
    Object(Box<dyn ReadWriteSeek>),
}

impl Handle {
    fn stream(&mut self) -> Option<&mut dyn ReadWriteSeek> {
        match self {
            Handle::Closed => None,
            Handle::File(file) => Some(file),
            Handle::Object(object) => Some(object.as_mut()),
        }
    }
}

struct PoolEntry {
    /// Path of a file-backed entry; object entries have none
    path: Option<PathBuf>,
    access: Mutex<AccessMode>,
    handle: Mutex<Handle>,
    /// LRU stamp; zero means never opened
    stamp: AtomicU64,
}

/// A pool of logical file entries multiplexed over bounded descriptors
pub struct FilePool {
    entries: RwLock<Vec<Arc<PoolEntry>>>,
    /// Guards the open-descriptor budget
    open_set: Mutex<Vec<usize>>,
    clock: AtomicU64,
    maximum_open: usize,
}

/// Default descriptor budget
pub const DEFAULT_MAXIMUM_OPEN: usize = 64;

impl FilePool {
    /// Create a pool with the default descriptor budget
    pub fn new() -> Self {
        Self::with_maximum_open(DEFAULT_MAXIMUM_OPEN)
    }

    /// Create a pool that keeps at most `maximum_open` descriptors open
    pub fn with_maximum_open(maximum_open: usize) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            open_set: Mutex::new(Vec::new()),
            clock: AtomicU64::new(1),
            maximum_open: maximum_open.max(1),
        }
    }

    /// Add a path-backed entry, returning its entry number
    pub fn add(&self, path: impl AsRef<Path>, access: AccessMode) -> usize {
        self.push_entry(PoolEntry {
            path: Some(path.as_ref().to_path_buf()),
            access: Mutex::new(access),
            handle: Mutex::new(Handle::Closed),
            stamp: AtomicU64::new(0),
        })
    }

    /// Add a caller-supplied stream as an entry
    ///
    /// Object entries are never evicted; they count against the descriptor
    /// budget of the embedder, not the pool.
    pub fn add_object(&self, object: Box<dyn ReadWriteSeek>, access: AccessMode) -> usize {
        self.push_entry(PoolEntry {
            path: None,
            access: Mutex::new(access),
            handle: Mutex::new(Handle::Object(object)),
            stamp: AtomicU64::new(0),
        })
    }

    fn push_entry(&self, entry: PoolEntry) -> usize {
        let mut entries = self.entries.write().expect("pool entries lock");
        entries.push(Arc::new(entry));
        entries.len() - 1
    }

    /// Number of entries in the pool
    pub fn number_of_entries(&self) -> usize {
        self.entries.read().expect("pool entries lock").len()
    }

    /// Path of a path-backed entry
    pub fn path(&self, entry: usize) -> Result<PathBuf> {
        let entry = self.entry(entry)?;
        entry.path.clone().ok_or_else(|| {
            Error::invalid_argument("entry is backed by a file object, not a path")
        })
    }

    /// Read exactly `buf.len()` bytes at `offset`
    pub fn read_at(&self, entry: usize, offset: u64, buf: &mut [u8]) -> Result<()> {
        let entry_arc = self.entry(entry)?;
        // A concurrent opener may evict this descriptor between the open
        // and the lock; reopen and retry when that happens
        loop {
            self.ensure_open(entry, &entry_arc)?;
            let mut handle = entry_arc.handle.lock().expect("pool entry lock");
            let Some(stream) = handle.stream() else {
                continue;
            };
            stream.seek(SeekFrom::Start(offset))?;
            stream.read_exact(buf)?;
            break;
        }
        self.touch(&entry_arc);
        Ok(())
    }

    /// Write all of `buf` at `offset`
    pub fn write_at(&self, entry: usize, offset: u64, buf: &[u8]) -> Result<()> {
        let entry_arc = self.entry(entry)?;
        if !entry_arc.access.lock().expect("pool entry access lock").writable() {
            return Err(Error::invalid_argument("entry is not open for writing"));
        }
        loop {
            self.ensure_open(entry, &entry_arc)?;
            let mut handle = entry_arc.handle.lock().expect("pool entry lock");
            let Some(stream) = handle.stream() else {
                continue;
            };
            stream.seek(SeekFrom::Start(offset))?;
            stream.write_all(buf)?;
            break;
        }
        self.touch(&entry_arc);
        Ok(())
    }

    /// Current size of the entry in bytes
    pub fn size(&self, entry: usize) -> Result<u64> {
        let entry_arc = self.entry(entry)?;
        if let Some(path) = &entry_arc.path {
            // Metadata is enough; no need to burn a descriptor
            return Ok(std::fs::metadata(path)?.len());
        }
        let mut handle = entry_arc.handle.lock().expect("pool entry lock");
        let stream = handle
            .stream()
            .ok_or_else(|| Error::invalid_argument("entry closed"))?;
        Ok(stream.seek(SeekFrom::End(0))?)
    }

    /// Flush and drop the descriptor of one entry
    pub fn close(&self, entry: usize) -> Result<()> {
        let entry_arc = self.entry(entry)?;
        {
            let mut handle = entry_arc.handle.lock().expect("pool entry lock");
            match &mut *handle {
                Handle::File(file) => {
                    file.flush()?;
                    *handle = Handle::Closed;
                }
                Handle::Object(object) => {
                    object.flush()?;
                }
                Handle::Closed => {}
            }
        }
        let mut open_set = self.open_set.lock().expect("pool open set lock");
        open_set.retain(|&index| index != entry);
        Ok(())
    }

    /// Flush and drop every open descriptor
    pub fn close_all(&self) -> Result<()> {
        for entry in 0..self.number_of_entries() {
            self.close(entry)?;
        }
        Ok(())
    }

    /// Change the access mode of an entry, reopening its descriptor
    pub fn reopen(&self, entry: usize, access: AccessMode) -> Result<()> {
        let entry_arc = self.entry(entry)?;
        if entry_arc.path.is_none() {
            return Err(Error::invalid_argument(
                "file-object entries cannot change access mode",
            ));
        }
        self.close(entry)?;
        *entry_arc.access.lock().expect("pool entry access lock") = access;
        Ok(())
    }

    fn entry(&self, entry: usize) -> Result<Arc<PoolEntry>> {
        let entries = self.entries.read().expect("pool entries lock");
        entries
            .get(entry)
            .cloned()
            .ok_or_else(|| Error::invalid_argument(format!("no pool entry {entry}")))
    }

    fn touch(&self, entry: &Arc<PoolEntry>) {
        entry
            .stamp
            .store(self.clock.fetch_add(1, Ordering::Relaxed), Ordering::Relaxed);
    }

    /// Open the descriptor of a path-backed entry, evicting if needed
    fn ensure_open(&self, index: usize, entry: &Arc<PoolEntry>) -> Result<()> {
        let Some(path) = entry.path.clone() else {
            // Object entries are always open
            return Ok(());
        };
        {
            let handle = entry.handle.lock().expect("pool entry lock");
            if !matches!(*handle, Handle::Closed) {
                return Ok(());
            }
        }
        // Make room in the open set before opening
        {
            let mut open_set = self.open_set.lock().expect("pool open set lock");
            while open_set.len() >= self.maximum_open {
                let Some(victim_index) = self.coldest(&open_set, index) else {
                    break;
                };
                open_set.retain(|&open| open != victim_index);
                let victim = {
                    let entries = self.entries.read().expect("pool entries lock");
                    entries[victim_index].clone()
                };
                let mut handle = victim.handle.lock().expect("pool entry lock");
                if let Handle::File(file) = &mut *handle {
                    debug!(entry = victim_index, "evicting pool descriptor");
                    file.flush()?;
                    *handle = Handle::Closed;
                }
            }
            let access = *entry.access.lock().expect("pool entry access lock");
            let file = open_with_access(&path, access)?;

            // Creation truncates; afterwards the entry behaves as read-write
            if access == AccessMode::Create {
                *entry.access.lock().expect("pool entry access lock") = AccessMode::ReadWrite;
            }
            *entry.handle.lock().expect("pool entry lock") = Handle::File(file);
            open_set.push(index);
        }
        Ok(())
    }

    fn coldest(&self, open_set: &[usize], skip: usize) -> Option<usize> {
        let entries = self.entries.read().expect("pool entries lock");
        open_set
            .iter()
            .copied()
            .filter(|&index| index != skip)
            .min_by_key(|&index| entries[index].stamp.load(Ordering::Relaxed))
    }
}

impl Default for FilePool {
    fn default() -> Self {
        Self::new()
    }
}

fn open_with_access(path: &Path, access: AccessMode) -> Result<File> {
    let file = match access {
        AccessMode::Read => OpenOptions::new().read(true).open(path),
        AccessMode::ReadWrite => OpenOptions::new().read(true).write(true).open(path),
        AccessMode::Create => OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path),
    };
    file.map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(content).unwrap();
        path
    }

    #[test]
    fn test_read_at() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.bin", b"hello world");

        let pool = FilePool::new();
        let entry = pool.add(&path, AccessMode::Read);

        let mut buf = [0u8; 5];
        pool.read_at(entry, 6, &mut buf).unwrap();
        assert_eq!(&buf, b"world");
        assert_eq!(pool.size(entry).unwrap(), 11);
    }

    #[test]
    fn test_write_at_requires_writable() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.bin", b"hello world");

        let pool = FilePool::new();
        let entry = pool.add(&path, AccessMode::Read);
        assert!(pool.write_at(entry, 0, b"x").is_err());

        pool.reopen(entry, AccessMode::ReadWrite).unwrap();
        pool.write_at(entry, 0, b"jello").unwrap();

        let mut buf = [0u8; 11];
        pool.read_at(entry, 0, &mut buf).unwrap();
        assert_eq!(&buf, b"jello world");
    }

    #[test]
    fn test_create_truncates_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seg.E01");

        let pool = FilePool::new();
        let entry = pool.add(&path, AccessMode::Create);
        pool.write_at(entry, 0, b"abc").unwrap();
        // A second access must not truncate what was written
        pool.write_at(entry, 3, b"def").unwrap();
        assert_eq!(pool.size(entry).unwrap(), 6);
    }

    #[test]
    fn test_eviction_under_descriptor_budget() {
        let dir = TempDir::new().unwrap();
        let pool = FilePool::with_maximum_open(2);

        let mut entries = Vec::new();
        for index in 0..5 {
            let path = write_file(&dir, &format!("seg{index}.bin"), &[index as u8; 16]);
            entries.push(pool.add(&path, AccessMode::Read));
        }

        // Touch every entry more times than the budget allows
        for round in 0..3 {
            for (index, &entry) in entries.iter().enumerate() {
                let mut buf = [0u8; 4];
                pool.read_at(entry, round as u64, &mut buf).unwrap();
                assert_eq!(buf, [index as u8; 4]);
            }
        }
    }

    #[test]
    fn test_object_entry() {
        let cursor = std::io::Cursor::new(b"object data".to_vec());
        let pool = FilePool::new();
        let entry = pool.add_object(Box::new(cursor), AccessMode::Read);

        let mut buf = [0u8; 6];
        pool.read_at(entry, 0, &mut buf).unwrap();
        assert_eq!(&buf, b"object");
        assert_eq!(pool.size(entry).unwrap(), 11);
        assert!(pool.reopen(entry, AccessMode::ReadWrite).is_err());
    }

    #[test]
    fn test_unknown_entry() {
        let pool = FilePool::new();
        let mut buf = [0u8; 1];
        assert!(pool.read_at(7, 0, &mut buf).is_err());
    }
}
