//! File pairs of one partition directory.

use std::io;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use rill_common::config::ObsoleteFileCriterion;
use rill_common::dfs::{join, Dfs};
use rill_common::naming::{data_file_name, parse_file_name, FileKind};
use rill_common::{RillError, RillResult};

use super::{FileManager, FilePairInfo};
use crate::codec::MetaEntry;

/// File manager over a partition directory of a [`Dfs`].
pub struct LocalFileManager {
    dfs: Arc<dyn Dfs>,
    dir: String,
    criterion: ObsoleteFileCriterion,
    pairs: RwLock<Vec<FilePairInfo>>,
}

impl LocalFileManager {
    /// Creates a manager for `dir`. Call [`FileManager::init`] before use.
    pub fn new(dfs: Arc<dyn Dfs>, dir: impl Into<String>, criterion: ObsoleteFileCriterion) -> Self {
        Self {
            dfs,
            dir: dir.into(),
            criterion,
            pairs: RwLock::new(Vec::new()),
        }
    }

    /// Returns the partition directory.
    pub fn dir(&self) -> &str {
        &self.dir
    }

    /// Publishes the committed state of a pair, adding it if new.
    pub fn record_commit(&self, pair: FilePairInfo) {
        let mut pairs = self.pairs.write();
        match pairs.binary_search_by_key(&pair.start_id, |p| p.start_id) {
            Ok(index) => pairs[index] = pair,
            Err(index) => pairs.insert(index, pair),
        }
    }

    /// Marks the pair starting at `start_id` as no longer appended to.
    pub fn finish_pair(&self, start_id: u64) {
        let mut pairs = self.pairs.write();
        if let Ok(index) = pairs.binary_search_by_key(&start_id, |p| p.start_id) {
            pairs[index].appending = false;
        }
    }

    fn recover_pair(&self, meta_name: &str, start_id: u64, start_ts: i64) -> RillResult<Option<FilePairInfo>> {
        let meta_path = join(&self.dir, meta_name);
        let data_path = join(&self.dir, &data_file_name(start_id, start_ts));
        if !self.dfs.exists(&data_path) {
            warn!(meta = %meta_path, "meta file without data file");
            return Ok(None);
        }

        let file = self.dfs.open_read(&meta_path)?;
        let mut count = file.len()? / MetaEntry::SIZE as u64;
        let mut buf = [0u8; MetaEntry::SIZE];
        while count > 0 {
            let offset = (count - 1) * MetaEntry::SIZE as u64;
            let read = file.read_full_at(&mut buf, offset)?;
            match MetaEntry::from_bytes(&buf[..read]) {
                Ok(entry) if entry.msg_id == start_id + count - 1 => {
                    let mut pair = FilePairInfo::new(&self.dir, start_id, start_ts);
                    pair.end_id = start_id + count;
                    pair.end_ts = entry.timestamp;
                    pair.data_len = entry.end_offset();
                    return Ok(Some(pair));
                }
                _ => {
                    warn!(meta = %meta_path, entry = count - 1, "dropping torn meta entry");
                    count -= 1;
                }
            }
        }
        Ok(None)
    }

    fn remove_quietly(&self, path: &str) -> io::Result<()> {
        match self.dfs.remove(path) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

impl FileManager for LocalFileManager {
    fn init(&self) -> RillResult<()> {
        let mut recovered = Vec::new();
        for name in self.dfs.list(&self.dir)? {
            let Some((start_id, start_ts, FileKind::Meta)) = parse_file_name(&name) else {
                continue;
            };
            if let Some(pair) = self.recover_pair(&name, start_id, start_ts)? {
                recovered.push(pair);
            }
        }
        recovered.sort_by_key(|pair| pair.start_id);
        info!(
            dir = %self.dir,
            pairs = recovered.len(),
            end_id = recovered.last().map_or(0, |pair| pair.end_id),
            "file pairs recovered"
        );
        *self.pairs.write() = recovered;
        Ok(())
    }

    fn file_pairs(&self) -> Vec<FilePairInfo> {
        self.pairs.read().clone()
    }

    fn locate(&self, msg_id: u64) -> Option<FilePairInfo> {
        let pairs = self.pairs.read();
        pairs
            .iter()
            .filter(|pair| !pair.is_empty())
            .find(|pair| pair.end_id > msg_id)
            .cloned()
    }

    fn locate_by_timestamp(&self, timestamp: i64) -> Option<FilePairInfo> {
        let pairs = self.pairs.read();
        pairs
            .iter()
            .filter(|pair| !pair.is_empty())
            .find(|pair| pair.end_ts >= timestamp)
            .cloned()
    }

    fn min_message_id(&self) -> Option<u64> {
        let pairs = self.pairs.read();
        pairs.iter().find(|pair| !pair.is_empty()).map(|pair| pair.start_id)
    }

    fn end_message_id(&self) -> Option<u64> {
        let pairs = self.pairs.read();
        pairs.iter().rev().find(|pair| !pair.is_empty()).map(|pair| pair.end_id)
    }

    fn del_expired_file(&self, committed_timestamp: i64) -> RillResult<Vec<FilePairInfo>> {
        let reserved = self.criterion.reserved_time.as_micros() as i64;
        let expired: Vec<FilePairInfo> = {
            let pairs = self.pairs.read();
            let over_count = if self.criterion.max_file_count > 0 {
                pairs.len().saturating_sub(self.criterion.max_file_count)
            } else {
                0
            };
            pairs
                .iter()
                .take(pairs.len().saturating_sub(1))
                .enumerate()
                .filter(|(index, pair)| {
                    !pair.appending
                        && (*index < over_count || pair.end_ts < committed_timestamp - reserved)
                })
                .map(|(_, pair)| pair.clone())
                .collect()
        };

        let mut deleted = Vec::with_capacity(expired.len());
        for pair in expired {
            if let Err(err) = self
                .remove_quietly(&pair.data_name)
                .and_then(|()| self.remove_quietly(&pair.meta_name))
            {
                warn!(file = %pair.data_name, error = %err, "failed to delete expired pair");
                if deleted.is_empty() {
                    return Err(RillError::from(err));
                }
                break;
            }
            debug!(file = %pair.data_name, end_id = pair.end_id, "expired pair deleted");
            deleted.push(pair);
        }

        if !deleted.is_empty() {
            let mut pairs = self.pairs.write();
            pairs.retain(|pair| !deleted.iter().any(|gone| gone.start_id == pair.start_id));
        }
        Ok(deleted)
    }

    fn total_size(&self) -> RillResult<u64> {
        Ok(self.dfs.dir_size(&self.dir)?)
    }
}

impl std::fmt::Debug for LocalFileManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalFileManager")
            .field("dir", &self.dir)
            .field("pairs", &self.pairs.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use rill_common::dfs::{DfsWriter, LocalDfs};
    use rill_common::naming::meta_file_name;

    fn write_pair(dfs: &LocalDfs, dir: &str, start_id: u64, count: u64, ts: i64) {
        let mut meta = dfs.create(&join(dir, &meta_file_name(start_id, ts))).unwrap();
        let mut data = dfs.create(&join(dir, &data_file_name(start_id, ts))).unwrap();
        for i in 0..count {
            let entry = MetaEntry {
                msg_id: start_id + i,
                timestamp: ts + i as i64,
                offset: (i * 4) as u32,
                len: 4,
                uint16_payload: 0,
                compressed: false,
            };
            meta.append(&entry.to_bytes()).unwrap();
            data.append(b"abcd").unwrap();
        }
        meta.sync().unwrap();
        data.sync().unwrap();
    }

    fn manager(dir: &tempfile::TempDir, criterion: ObsoleteFileCriterion) -> (LocalDfs, LocalFileManager) {
        let dfs = LocalDfs::new(dir.path()).unwrap();
        let manager = LocalFileManager::new(Arc::new(LocalDfs::new(dir.path()).unwrap()), "t/0", criterion);
        (dfs, manager)
    }

    #[test]
    fn test_init_recovers_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let (dfs, manager) = manager(&dir, ObsoleteFileCriterion::default());
        write_pair(&dfs, "t/0", 0, 5, 100);
        write_pair(&dfs, "t/0", 5, 3, 200);
        manager.init().unwrap();

        let pairs = manager.file_pairs();
        assert_eq!(pairs.len(), 2);
        assert_eq!((pairs[0].start_id, pairs[0].end_id), (0, 5));
        assert_eq!(pairs[0].end_ts, 104);
        assert_eq!(pairs[0].data_len, 20);
        assert_eq!(manager.min_message_id(), Some(0));
        assert_eq!(manager.end_message_id(), Some(8));

        assert_eq!(manager.locate(3).unwrap().start_id, 0);
        assert_eq!(manager.locate(5).unwrap().start_id, 5);
        assert!(manager.locate(8).is_none());
        assert_eq!(manager.locate_by_timestamp(150).unwrap().start_id, 5);
    }

    #[test]
    fn test_init_drops_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let (dfs, manager) = manager(&dir, ObsoleteFileCriterion::default());
        write_pair(&dfs, "t/0", 0, 4, 100);
        {
            let path = dfs.resolve(&join("t/0", &meta_file_name(0, 100)));
            let mut bytes = std::fs::read(&path).unwrap();
            bytes[3 * MetaEntry::SIZE + 2] ^= 0xff;
            bytes.extend_from_slice(&[1, 2, 3]);
            std::fs::write(&path, bytes).unwrap();
        }
        manager.init().unwrap();
        assert_eq!(manager.end_message_id(), Some(3));
    }

    #[test]
    fn test_gap_between_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let (dfs, manager) = manager(&dir, ObsoleteFileCriterion::default());
        write_pair(&dfs, "t/0", 0, 2, 100);
        write_pair(&dfs, "t/0", 10, 2, 200);
        manager.init().unwrap();
        // Ids 2..10 are missing; the next pair is returned.
        assert_eq!(manager.locate(4).unwrap().start_id, 10);
    }

    #[test]
    fn test_del_expired_keeps_latest() {
        let dir = tempfile::tempdir().unwrap();
        let criterion = ObsoleteFileCriterion {
            reserved_time: Duration::from_micros(50),
            max_file_count: 0,
        };
        let (dfs, manager) = manager(&dir, criterion);
        write_pair(&dfs, "t/0", 0, 2, 100);
        write_pair(&dfs, "t/0", 2, 2, 200);
        write_pair(&dfs, "t/0", 4, 2, 300);
        manager.init().unwrap();

        let deleted = manager.del_expired_file(1_000).unwrap();
        assert_eq!(deleted.len(), 2);
        assert!(!dfs.exists(&deleted[0].data_name));
        assert_eq!(manager.min_message_id(), Some(4));

        assert!(manager.del_expired_file(10_000).unwrap().is_empty());
    }

    #[test]
    fn test_del_by_file_count() {
        let dir = tempfile::tempdir().unwrap();
        let criterion = ObsoleteFileCriterion {
            reserved_time: Duration::from_secs(3600),
            max_file_count: 2,
        };
        let (dfs, manager) = manager(&dir, criterion);
        for i in 0..4 {
            write_pair(&dfs, "t/0", i * 2, 2, 100 + i as i64 * 10);
        }
        manager.init().unwrap();
        let deleted = manager.del_expired_file(200).unwrap();
        assert_eq!(deleted.len(), 2);
        assert_eq!(manager.file_pairs().len(), 2);
    }

    #[test]
    fn test_appending_pair_not_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let criterion = ObsoleteFileCriterion {
            reserved_time: Duration::ZERO,
            max_file_count: 0,
        };
        let (_dfs, manager) = manager(&dir, criterion);
        let mut first = FilePairInfo::new("t/0", 0, 1);
        first.end_id = 2;
        first.appending = true;
        let mut second = FilePairInfo::new("t/0", 2, 5);
        second.end_id = 3;
        manager.record_commit(first);
        manager.record_commit(second);
        assert!(manager.del_expired_file(1_000).unwrap().is_empty());
        manager.finish_pair(0);
        assert_eq!(manager.del_expired_file(1_000).unwrap().len(), 1);
    }
}
