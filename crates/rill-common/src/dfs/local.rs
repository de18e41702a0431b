//! Local-disk `Dfs` implementation.
//!
//! Maps DFS paths onto a root directory. Used by the daemon when no remote
//! filesystem is configured and by every test.

use std::fs::{self, File as StdFile, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Dfs, DfsFile, DfsWriter};

/// A filesystem rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalDfs {
    root: PathBuf,
}

impl LocalDfs {
    /// Creates a filesystem rooted at `root`, creating the directory.
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a DFS path to a local path.
    #[must_use]
    pub fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

impl Dfs for LocalDfs {
    fn open_read(&self, path: &str) -> io::Result<Arc<dyn DfsFile>> {
        let file = StdFile::open(self.resolve(path))?;
        Ok(Arc::new(LocalFile {
            file: Mutex::new(file),
            path: path.to_string(),
        }))
    }

    fn create(&self, path: &str) -> io::Result<Box<dyn DfsWriter>> {
        let local = self.resolve(path);
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&local)?;
        Ok(Box::new(LocalWriter {
            file,
            path: path.to_string(),
            len: 0,
        }))
    }

    fn remove(&self, path: &str) -> io::Result<()> {
        fs::remove_file(self.resolve(path))
    }

    fn list(&self, dir: &str) -> io::Result<Vec<String>> {
        let local = self.resolve(dir);
        if !local.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(local)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn file_size(&self, path: &str) -> io::Result<u64> {
        Ok(fs::metadata(self.resolve(path))?.len())
    }

    fn create_dir_all(&self, dir: &str) -> io::Result<()> {
        fs::create_dir_all(self.resolve(dir))
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).exists()
    }
}

/// A local file opened for reading.
struct LocalFile {
    file: Mutex<StdFile>,
    path: String,
}

impl DfsFile for LocalFile {
    fn path(&self) -> &str {
        &self.path
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.file.lock().metadata()?.len())
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read(buf)
    }
}

impl std::fmt::Debug for LocalFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalFile").field("path", &self.path).finish()
    }
}

/// A local file opened for appending.
struct LocalWriter {
    file: StdFile,
    path: String,
    len: u64,
}

impl DfsWriter for LocalWriter {
    fn path(&self) -> &str {
        &self.path
    }

    fn append(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data)?;
        self.len += data.len() as u64;
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_data()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.file.flush()?;
        self.file.set_len(len)?;
        self.file.seek(SeekFrom::Start(len))?;
        self.len = len;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.len
    }
}
