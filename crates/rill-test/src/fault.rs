use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use rill_common::dfs::{Dfs, DfsFile, DfsWriter};

#[derive(Debug, Default)]
struct Faults {
    unreadable: HashSet<String>,
    fail_appends: bool,
}

#[derive(Debug, Default)]
struct Shared {
    faults: RwLock<Faults>,
    opens: AtomicU64,
    reads: AtomicU64,
    appends: AtomicU64,
}

impl Shared {
    fn is_unreadable(&self, path: &str) -> bool {
        let faults = self.faults.read();
        faults.unreadable.iter().any(|name| path.ends_with(name.as_str()))
    }

    fn check_append(&self, path: &str) -> io::Result<()> {
        if self.faults.read().fail_appends {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("injected append failure on {path}"),
            ));
        }
        Ok(())
    }
}

/// A [`Dfs`] that forwards to another one and fails on demand.
///
/// Faults are checked on every call, so handles opened before a fault was
/// injected fail too, and recover once it is cleared.
pub struct FaultyDfs {
    inner: Arc<dyn Dfs>,
    shared: Arc<Shared>,
}

impl FaultyDfs {
    /// Wraps `inner`.
    pub fn new(inner: Arc<dyn Dfs>) -> Self {
        Self {
            inner,
            shared: Arc::new(Shared::default()),
        }
    }

    /// Makes reads of files whose path ends with `name` fail.
    pub fn fail_reads_of(&self, name: impl Into<String>) {
        self.shared.faults.write().unreadable.insert(name.into());
    }

    /// Clears every read fault.
    pub fn restore_reads(&self) {
        self.shared.faults.write().unreadable.clear();
    }

    /// Makes appends fail until called again with `false`.
    pub fn fail_appends(&self, fail: bool) {
        self.shared.faults.write().fail_appends = fail;
    }

    /// Returns files opened for reading.
    pub fn open_count(&self) -> u64 {
        self.shared.opens.load(Ordering::Relaxed)
    }

    /// Returns positional reads served.
    pub fn read_count(&self) -> u64 {
        self.shared.reads.load(Ordering::Relaxed)
    }

    /// Returns appends attempted.
    pub fn append_count(&self) -> u64 {
        self.shared.appends.load(Ordering::Relaxed)
    }

    /// Lists the files of `dir`, sorted.
    pub fn sorted_list(&self, dir: &str) -> io::Result<Vec<String>> {
        let mut names = self.inner.list(dir)?;
        names.sort();
        Ok(names)
    }
}

impl Dfs for FaultyDfs {
    fn open_read(&self, path: &str) -> io::Result<Arc<dyn DfsFile>> {
        self.shared.opens.fetch_add(1, Ordering::Relaxed);
        let file = self.inner.open_read(path)?;
        Ok(Arc::new(FaultyFile {
            inner: file,
            shared: Arc::clone(&self.shared),
        }))
    }

    fn create(&self, path: &str) -> io::Result<Box<dyn DfsWriter>> {
        self.shared.check_append(path)?;
        let writer = self.inner.create(path)?;
        Ok(Box::new(FaultyWriter {
            inner: writer,
            shared: Arc::clone(&self.shared),
        }))
    }

    fn remove(&self, path: &str) -> io::Result<()> {
        self.inner.remove(path)
    }

    fn list(&self, dir: &str) -> io::Result<Vec<String>> {
        self.inner.list(dir)
    }

    fn file_size(&self, path: &str) -> io::Result<u64> {
        self.inner.file_size(path)
    }

    fn create_dir_all(&self, dir: &str) -> io::Result<()> {
        self.inner.create_dir_all(dir)
    }

    fn exists(&self, path: &str) -> bool {
        self.inner.exists(path)
    }
}

impl std::fmt::Debug for FaultyDfs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultyDfs")
            .field("faults", &*self.shared.faults.read())
            .field("reads", &self.read_count())
            .finish()
    }
}

struct FaultyFile {
    inner: Arc<dyn DfsFile>,
    shared: Arc<Shared>,
}

impl DfsFile for FaultyFile {
    fn path(&self) -> &str {
        self.inner.path()
    }

    fn len(&self) -> io::Result<u64> {
        self.inner.len()
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.shared.reads.fetch_add(1, Ordering::Relaxed);
        if self.shared.is_unreadable(self.inner.path()) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("injected read failure on {}", self.inner.path()),
            ));
        }
        self.inner.read_at(buf, offset)
    }
}

struct FaultyWriter {
    inner: Box<dyn DfsWriter>,
    shared: Arc<Shared>,
}

impl DfsWriter for FaultyWriter {
    fn path(&self) -> &str {
        self.inner.path()
    }

    fn append(&mut self, data: &[u8]) -> io::Result<()> {
        self.shared.appends.fetch_add(1, Ordering::Relaxed);
        self.shared.check_append(self.inner.path())?;
        self.inner.append(data)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.shared.check_append(self.inner.path())?;
        self.inner.sync()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.shared.check_append(self.inner.path())?;
        self.inner.truncate(len)
    }

    fn len(&self) -> u64 {
        self.inner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_common::dfs::LocalDfs;

    #[test]
    fn test_read_faults_toggle() {
        let dir = tempfile::tempdir().unwrap();
        let dfs = FaultyDfs::new(Arc::new(LocalDfs::new(dir.path()).unwrap()));
        let mut writer = dfs.create("a.data").unwrap();
        writer.append(b"hello").unwrap();
        writer.sync().unwrap();

        let file = dfs.open_read("a.data").unwrap();
        let mut buf = [0u8; 5];
        dfs.fail_reads_of("a.data");
        assert!(file.read_at(&mut buf, 0).is_err());
        dfs.restore_reads();
        assert_eq!(file.read_full_at(&mut buf, 0).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        assert!(dfs.read_count() >= 2);
        assert_eq!(dfs.open_count(), 1);
    }

    #[test]
    fn test_append_faults() {
        let dir = tempfile::tempdir().unwrap();
        let dfs = FaultyDfs::new(Arc::new(LocalDfs::new(dir.path()).unwrap()));
        let mut writer = dfs.create("b.meta").unwrap();
        dfs.fail_appends(true);
        assert!(writer.append(b"x").is_err());
        assert!(dfs.create("c.meta").is_err());
        dfs.fail_appends(false);
        writer.append(b"x").unwrap();
        assert_eq!(dfs.append_count(), 2);
    }
}
