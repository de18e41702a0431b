//! Distributed filesystem abstraction.
//!
//! The broker only needs a narrow slice of a DFS client: positional reads of
//! immutable or growing files, append-only writers with an explicit sync,
//! directory listing and removal. Paths are `/`-separated and relative to the
//! filesystem root.
//!
//! ```text
//!   Dfs ──open_read──► DfsFile   (pread, len)
//!       ──create────► DfsWriter (append, sync)
//!       ──list/remove/size
//! ```

mod local;

pub use local::LocalDfs;

use std::io;
use std::sync::Arc;

/// A file opened for positional reads.
///
/// Implementations must be safe to share between threads.
pub trait DfsFile: Send + Sync {
    /// Returns the path the file was opened with.
    fn path(&self) -> &str;

    /// Returns the current file length. Appending files may grow between calls.
    fn len(&self) -> io::Result<u64>;

    /// Returns true if the file is currently empty.
    fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Reads up to `buf.len()` bytes at `offset`. Returns 0 at end of file.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Reads until `buf` is full or end of file is reached.
    ///
    /// Returns the number of bytes read.
    fn read_full_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let mut total_read = 0;
        while total_read < buf.len() {
            let n = self.read_at(&mut buf[total_read..], offset + total_read as u64)?;
            if n == 0 {
                break;
            }
            total_read += n;
        }
        Ok(total_read)
    }
}

/// An append-only file being written.
pub trait DfsWriter: Send {
    /// Returns the path of the file.
    fn path(&self) -> &str;

    /// Appends `data` at the end of the file.
    fn append(&mut self, data: &[u8]) -> io::Result<()>;

    /// Makes everything appended so far durable.
    fn sync(&mut self) -> io::Result<()>;

    /// Cuts the file back to `len` bytes; later appends land at `len`.
    fn truncate(&mut self, len: u64) -> io::Result<()>;

    /// Returns the number of bytes appended so far.
    fn len(&self) -> u64;

    /// Returns true if nothing was appended.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The filesystem operations the broker relies on.
pub trait Dfs: Send + Sync {
    /// Opens an existing file for reading.
    fn open_read(&self, path: &str) -> io::Result<Arc<dyn DfsFile>>;

    /// Creates a new file for appending, failing if it already exists.
    fn create(&self, path: &str) -> io::Result<Box<dyn DfsWriter>>;

    /// Removes a file.
    fn remove(&self, path: &str) -> io::Result<()>;

    /// Lists the names (not paths) of regular files in `dir`.
    fn list(&self, dir: &str) -> io::Result<Vec<String>>;

    /// Returns the length of a file.
    fn file_size(&self, path: &str) -> io::Result<u64>;

    /// Creates a directory and all parents.
    fn create_dir_all(&self, dir: &str) -> io::Result<()>;

    /// Returns true if the path exists.
    fn exists(&self, path: &str) -> bool;

    /// Returns the total size of the regular files in `dir`.
    fn dir_size(&self, dir: &str) -> io::Result<u64> {
        let mut total = 0;
        for name in self.list(dir)? {
            total += self.file_size(&join(dir, &name))?;
        }
        Ok(total)
    }
}

/// Joins a directory and a file name with `/`.
#[must_use]
pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}
