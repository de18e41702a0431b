//! Writes messages into file pairs.

use std::sync::Arc;

use tracing::{debug, error, warn};

use rill_common::dfs::{Dfs, DfsWriter};
use rill_common::{PartitionId, RillError, RillResult};

use super::{FileManager, FilePairInfo, LocalFileManager, MessageCommitter};
use crate::codec::MetaEntry;
use crate::message::Message;

struct OpenPair {
    info: FilePairInfo,
    /// State at the last successful sync.
    synced: FilePairInfo,
    meta: Box<dyn DfsWriter>,
    data: Box<dyn DfsWriter>,
    dirty: bool,
    /// Bytes past `synced` may be on disk and must be cut before appending.
    torn: bool,
}

/// Committer that appends to the newest file pair of a partition directory
/// and rolls to a new pair when the data file is full or ids jump.
///
/// After `max_commit_failures` consecutive failures the committer seals and
/// refuses all further work.
pub struct LocalCommitter {
    partition: PartitionId,
    dfs: Arc<dyn Dfs>,
    files: Arc<LocalFileManager>,
    max_file_size: usize,
    max_commit_failures: u32,
    current: Option<OpenPair>,
    written_id: u64,
    committed_id: u64,
    committed_ts: i64,
    failures: u32,
    sealed: bool,
}

impl LocalCommitter {
    /// Creates a committer that continues after the pairs `files` recovered.
    pub fn new(
        partition: PartitionId,
        dfs: Arc<dyn Dfs>,
        files: Arc<LocalFileManager>,
        max_file_size: usize,
        max_commit_failures: u32,
    ) -> Self {
        let pairs = files.file_pairs();
        let last = pairs.iter().rev().find(|pair| !pair.is_empty());
        let committed_id = last.map_or(0, |pair| pair.end_id);
        let committed_ts = last.map_or(0, |pair| pair.end_ts);
        Self {
            partition,
            dfs,
            files,
            max_file_size,
            max_commit_failures,
            current: None,
            written_id: committed_id,
            committed_id,
            committed_ts,
            failures: 0,
            sealed: false,
        }
    }

    /// Returns consecutive failures since the last success.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    fn sealed_error(&self) -> RillError {
        RillError::Sealed {
            partition: self.partition.clone(),
        }
    }

    fn open_pair(&mut self, start_id: u64, start_ts: i64) -> RillResult<OpenPair> {
        let mut info = FilePairInfo::new(self.files.dir(), start_id, start_ts);
        info.appending = true;
        for stale in [&info.meta_name, &info.data_name] {
            if self.dfs.exists(stale) {
                warn!(partition = %self.partition, file = %stale, "removing unpublished pair file");
                self.dfs.remove(stale)?;
            }
        }
        let data = self.dfs.create(&info.data_name)?;
        let meta = self.dfs.create(&info.meta_name)?;
        debug!(partition = %self.partition, start_id, "file pair opened");
        Ok(OpenPair {
            synced: info.clone(),
            info,
            meta,
            data,
            dirty: false,
            torn: false,
        })
    }

    /// Cuts a torn pair back to its last synced length.
    fn repair_current(&mut self) -> RillResult<()> {
        let Some(pair) = self.current.as_mut() else {
            return Ok(());
        };
        if !pair.torn {
            return Ok(());
        }
        let entries = pair.info.end_id - pair.info.start_id;
        pair.data.truncate(pair.info.data_len)?;
        pair.meta.truncate(entries * MetaEntry::SIZE as u64)?;
        pair.torn = false;
        pair.dirty = true;
        debug!(
            partition = %self.partition,
            start_id = pair.info.start_id,
            end_id = pair.info.end_id,
            "torn pair cut back to last sync"
        );
        Ok(())
    }

    fn sync_current(&mut self) -> RillResult<()> {
        self.repair_current()?;
        let Some(pair) = self.current.as_mut() else {
            return Ok(());
        };
        if pair.dirty {
            pair.data.sync()?;
            pair.meta.sync()?;
            pair.dirty = false;
        }
        pair.synced = pair.info.clone();
        self.committed_id = pair.info.end_id;
        self.committed_ts = pair.info.end_ts;
        if !pair.info.is_empty() {
            self.files.record_commit(pair.info.clone());
        }
        Ok(())
    }

    fn roll(&mut self) -> RillResult<()> {
        self.sync_current()?;
        if let Some(pair) = self.current.take() {
            self.files.finish_pair(pair.info.start_id);
        }
        Ok(())
    }

    fn append_one(&mut self, message: &Message) -> RillResult<()> {
        self.repair_current()?;
        let needs_roll = self.current.as_ref().is_some_and(|pair| {
            message.msg_id != pair.info.end_id
                || pair.info.data_len + message.payload.len() as u64 > self.max_file_size as u64
        });
        if needs_roll {
            self.roll()?;
        }
        if self.current.is_none() {
            self.current = Some(self.open_pair(message.msg_id, message.timestamp)?);
        }
        let Some(pair) = self.current.as_mut() else {
            return Err(RillError::internal("no open file pair"));
        };

        let entry = MetaEntry {
            msg_id: message.msg_id,
            timestamp: message.timestamp,
            offset: pair.info.data_len as u32,
            len: message.payload.len() as u32,
            uint16_payload: message.uint16_payload,
            compressed: message.compressed,
        };
        pair.dirty = true;
        pair.data.append(&message.payload)?;
        pair.meta.append(&entry.to_bytes())?;
        pair.info.end_id = message.msg_id + 1;
        pair.info.end_ts = message.timestamp;
        pair.info.data_len += message.payload.len() as u64;
        self.written_id = message.msg_id + 1;
        Ok(())
    }

    fn record_failure(&mut self, err: &RillError) -> RillError {
        self.failures += 1;
        // Whatever was written since the last sync must be rewritten.
        if let Some(pair) = self.current.as_mut() {
            pair.info = pair.synced.clone();
            pair.torn = true;
        }
        self.written_id = self.committed_id;
        if self.failures >= self.max_commit_failures {
            self.sealed = true;
            error!(
                partition = %self.partition,
                failures = self.failures,
                error = %err,
                "committer sealed"
            );
            return self.sealed_error();
        }
        warn!(partition = %self.partition, failures = self.failures, error = %err, "commit failed");
        RillError::CommitFailed {
            partition: self.partition.clone(),
            reason: err.to_string(),
        }
    }
}

impl MessageCommitter for LocalCommitter {
    fn write(&mut self, messages: &[Message]) -> RillResult<()> {
        if self.sealed {
            return Err(self.sealed_error());
        }
        let from = self.written_id;
        for message in messages.iter().filter(|m| m.msg_id >= from) {
            if let Err(err) = self.append_one(message) {
                return Err(self.record_failure(&err));
            }
        }
        Ok(())
    }

    fn commit_file(&mut self) -> RillResult<()> {
        if self.sealed {
            return Err(self.sealed_error());
        }
        let result = match self.current.as_ref() {
            Some(pair) if pair.info.data_len >= self.max_file_size as u64 => self.roll(),
            _ => self.sync_current(),
        };
        match result {
            Ok(()) => {
                self.failures = 0;
                Ok(())
            }
            Err(err) => Err(self.record_failure(&err)),
        }
    }

    fn written_id(&self) -> u64 {
        self.written_id
    }

    fn committed_id(&self) -> u64 {
        self.committed_id
    }

    fn committed_timestamp(&self) -> i64 {
        self.committed_ts
    }

    fn has_seal_error(&self) -> bool {
        self.sealed
    }
}

impl std::fmt::Debug for LocalCommitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCommitter")
            .field("partition", &self.partition)
            .field("written_id", &self.written_id)
            .field("committed_id", &self.committed_id)
            .field("failures", &self.failures)
            .field("sealed", &self.sealed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rill_common::config::ObsoleteFileCriterion;
    use rill_common::dfs::LocalDfs;

    fn message(msg_id: u64, payload: &'static [u8]) -> Message {
        Message {
            msg_id,
            timestamp: 1_000 + msg_id as i64,
            uint16_payload: 7,
            compressed: false,
            payload: Bytes::from_static(payload),
        }
    }

    fn setup(dir: &tempfile::TempDir, max_file_size: usize) -> (Arc<LocalFileManager>, LocalCommitter) {
        let dfs: Arc<dyn Dfs> = Arc::new(LocalDfs::new(dir.path()).unwrap());
        let files = Arc::new(LocalFileManager::new(
            Arc::clone(&dfs),
            "t/0",
            ObsoleteFileCriterion::default(),
        ));
        files.init().unwrap();
        let committer = LocalCommitter::new(PartitionId::new("t", 0), dfs, Arc::clone(&files), max_file_size, 3);
        (files, committer)
    }

    #[test]
    fn test_write_then_commit_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let (files, mut committer) = setup(&dir, 1 << 20);

        committer.write(&[message(0, b"aa"), message(1, b"bbb")]).unwrap();
        assert_eq!(committer.written_id(), 2);
        assert_eq!(committer.committed_id(), 0);
        assert!(files.locate(0).is_none());

        committer.commit_file().unwrap();
        assert_eq!(committer.committed_id(), 2);
        assert_eq!(committer.committed_timestamp(), 1_001);
        let pair = files.locate(1).unwrap();
        assert_eq!((pair.start_id, pair.end_id, pair.data_len), (0, 2, 5));
        assert!(pair.appending);
    }

    #[test]
    fn test_rolls_on_size_and_gap() {
        let dir = tempfile::tempdir().unwrap();
        let (files, mut committer) = setup(&dir, 4);

        committer.write(&[message(0, b"abc"), message(1, b"de")]).unwrap();
        committer.write(&[message(5, b"f")]).unwrap();
        committer.commit_file().unwrap();

        let pairs = files.file_pairs();
        let ranges: Vec<_> = pairs.iter().map(|p| (p.start_id, p.end_id)).collect();
        assert_eq!(ranges, vec![(0, 1), (1, 2), (5, 6)]);
        assert!(!pairs[0].appending);
        assert_eq!(committer.written_id(), 6);
    }

    #[test]
    fn test_rewrites_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (_files, mut committer) = setup(&dir, 1 << 20);
        committer.write(&[message(0, b"a"), message(1, b"b")]).unwrap();
        committer.write(&[message(1, b"b"), message(2, b"c")]).unwrap();
        committer.commit_file().unwrap();
        assert_eq!(committer.committed_id(), 3);
    }

    #[test]
    fn test_recovery_continues_after_last_pair() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (_files, mut committer) = setup(&dir, 1 << 20);
            committer.write(&[message(0, b"a"), message(1, b"b")]).unwrap();
            committer.commit_file().unwrap();
        }
        let (files, mut committer) = setup(&dir, 1 << 20);
        assert_eq!(committer.committed_id(), 2);
        assert_eq!(committer.written_id(), 2);
        committer.write(&[message(2, b"c")]).unwrap();
        committer.commit_file().unwrap();
        assert_eq!(files.file_pairs().len(), 2);
        assert!(!committer.has_seal_error());
    }
}
