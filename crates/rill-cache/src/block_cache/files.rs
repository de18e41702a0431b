//! Open file handles, `one_file_fd_num` per file.
//!
//! A thread always uses the same slot of a file, chosen by hashing its id,
//! so concurrent readers of one file spread over several handles. A handle
//! flagged bad is never repaired; the next access opens a fresh one.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use rill_common::dfs::{Dfs, DfsFile};

/// One open handle.
pub(crate) struct FileWrapper {
    file: Arc<dyn DfsFile>,
    bad: AtomicBool,
}

impl FileWrapper {
    pub(crate) fn file(&self) -> &dyn DfsFile {
        self.file.as_ref()
    }

    pub(crate) fn mark_bad(&self) {
        self.bad.store(true, Ordering::Release);
    }

    pub(crate) fn is_bad(&self) -> bool {
        self.bad.load(Ordering::Acquire)
    }
}

struct FileSlots {
    wrappers: Vec<Option<Arc<FileWrapper>>>,
    last_access: Instant,
}

impl FileSlots {
    fn all_bad(&self) -> bool {
        let mut opened = self.wrappers.iter().flatten().peekable();
        opened.peek().is_some() && opened.all(|w| w.is_bad())
    }
}

/// Handles of every file the cache reads.
pub(crate) struct FileTable {
    dfs: Arc<dyn Dfs>,
    fds_per_file: usize,
    files: Mutex<HashMap<String, FileSlots>>,
}

impl FileTable {
    pub(crate) fn new(dfs: Arc<dyn Dfs>, fds_per_file: usize) -> Self {
        Self {
            dfs,
            fds_per_file: fds_per_file.max(1),
            files: Mutex::new(HashMap::new()),
        }
    }

    fn slot_index(&self) -> usize {
        let mut hasher = DefaultHasher::new();
        thread::current().id().hash(&mut hasher);
        (hasher.finish() % self.fds_per_file as u64) as usize
    }

    /// Returns this thread's handle for `file_name`, opening one if the slot
    /// is empty or bad.
    pub(crate) fn wrapper(&self, file_name: &str) -> io::Result<Arc<FileWrapper>> {
        let slot = self.slot_index();
        {
            let mut files = self.files.lock();
            if let Some(slots) = files.get_mut(file_name) {
                slots.last_access = Instant::now();
                if let Some(wrapper) = &slots.wrappers[slot] {
                    if !wrapper.is_bad() {
                        return Ok(Arc::clone(wrapper));
                    }
                }
            }
        }

        let file = self.dfs.open_read(file_name)?;
        let opened = Arc::new(FileWrapper {
            file,
            bad: AtomicBool::new(false),
        });
        debug!(file = file_name, slot, "opened file handle");

        let mut files = self.files.lock();
        let slots = files
            .entry(file_name.to_string())
            .or_insert_with(|| FileSlots {
                wrappers: vec![None; self.fds_per_file],
                last_access: Instant::now(),
            });
        slots.last_access = Instant::now();
        match &slots.wrappers[slot] {
            Some(current) if !current.is_bad() => Ok(Arc::clone(current)),
            _ => {
                slots.wrappers[slot] = Some(Arc::clone(&opened));
                Ok(opened)
            }
        }
    }

    /// Drops files whose handles are all bad or that were idle longer than
    /// `reserve_time`. Returns the number dropped.
    pub(crate) fn recycle(&self, reserve_time: Duration) -> usize {
        let mut files = self.files.lock();
        let before = files.len();
        files.retain(|name, slots| {
            let keep = !slots.all_bad() && slots.last_access.elapsed() <= reserve_time;
            if !keep {
                debug!(file = %name, "closing file handles");
            }
            keep
        });
        before - files.len()
    }

    /// Drops every handle of `file_name`.
    pub(crate) fn remove(&self, file_name: &str) -> bool {
        self.files.lock().remove(file_name).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.files.lock().len()
    }

    pub(crate) fn clear(&self) {
        self.files.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_common::dfs::{DfsWriter, LocalDfs};
    use tempfile::tempdir;

    fn table_with_file() -> (tempfile::TempDir, FileTable) {
        let dir = tempdir().unwrap();
        let dfs = LocalDfs::new(dir.path()).unwrap();
        let mut writer = dfs.create("a.data").unwrap();
        writer.append(b"hello").unwrap();
        writer.sync().unwrap();
        (dir, FileTable::new(Arc::new(dfs), 2))
    }

    #[test]
    fn test_wrapper_is_reused_until_bad() {
        let (_dir, table) = table_with_file();
        let first = table.wrapper("a.data").unwrap();
        let second = table.wrapper("a.data").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        first.mark_bad();
        let third = table.wrapper("a.data").unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert!(!third.is_bad());
    }

    #[test]
    fn test_missing_file_fails_open() {
        let (_dir, table) = table_with_file();
        assert!(table.wrapper("missing.data").is_err());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_recycle_drops_bad_and_idle() {
        let (_dir, table) = table_with_file();
        table.wrapper("a.data").unwrap().mark_bad();
        assert_eq!(table.recycle(Duration::from_secs(600)), 1);

        table.wrapper("a.data").unwrap();
        assert_eq!(table.recycle(Duration::from_secs(600)), 0);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(table.recycle(Duration::from_millis(5)), 1);
        assert_eq!(table.len(), 0);
    }
}
