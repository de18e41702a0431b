//! Collaborators the partition engine drives.
//!
//! The engine owns no file format. It maps message ids to file pairs through
//! a [`FileManager`], makes buffered messages durable through a
//! [`MessageCommitter`], and, for memory-prefer topics, learns how far
//! downstream consumers got from a [`CommitManager`].
//!
//! The local implementations in this module store each file pair as a data
//! file of concatenated payloads and a meta file of fixed-size
//! [`MetaEntry`](crate::codec::MetaEntry) records.

mod commit_manager;
mod committer;
mod file_manager;

pub use commit_manager::MemoryCommitManager;
pub use committer::LocalCommitter;
pub use file_manager::LocalFileManager;

use std::sync::Arc;

use rill_common::dfs::join;
use rill_common::RillResult;

use crate::message::Message;

/// One committed file pair.
///
/// `end_id` is exclusive: the pair holds ids `start_id..end_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePairInfo {
    /// First message id in the pair.
    pub start_id: u64,
    /// One past the last committed message id.
    pub end_id: u64,
    /// Timestamp of the first message.
    pub start_ts: i64,
    /// Timestamp of the last committed message.
    pub end_ts: i64,
    /// Path of the meta file.
    pub meta_name: String,
    /// Path of the data file.
    pub data_name: String,
    /// Committed length of the data file.
    pub data_len: u64,
    /// True while the committer still appends to the pair.
    pub appending: bool,
}

impl FilePairInfo {
    /// Creates an empty pair starting at `start_id` inside `dir`.
    pub fn new(dir: &str, start_id: u64, start_ts: i64) -> Self {
        Self {
            start_id,
            end_id: start_id,
            start_ts,
            end_ts: start_ts,
            meta_name: join(dir, &rill_common::naming::meta_file_name(start_id, start_ts)),
            data_name: join(dir, &rill_common::naming::data_file_name(start_id, start_ts)),
            data_len: 0,
            appending: false,
        }
    }

    /// Returns the number of committed messages.
    pub fn message_count(&self) -> u64 {
        self.end_id - self.start_id
    }

    /// Returns true if the pair holds no committed message.
    pub fn is_empty(&self) -> bool {
        self.end_id == self.start_id
    }

    /// Returns true if `msg_id` lies in the pair.
    pub fn contains(&self, msg_id: u64) -> bool {
        (self.start_id..self.end_id).contains(&msg_id)
    }

    /// Returns the meta file offset of `msg_id`'s entry.
    pub fn meta_offset(&self, msg_id: u64) -> u64 {
        (msg_id - self.start_id) * crate::codec::MetaEntry::SIZE as u64
    }
}

/// Maps message ids to committed file pairs.
pub trait FileManager: Send + Sync {
    /// Scans the partition directory and rebuilds the pair list.
    fn init(&self) -> RillResult<()>;

    /// Returns all pairs ordered by start id.
    fn file_pairs(&self) -> Vec<FilePairInfo>;

    /// Returns the first pair whose range ends after `msg_id`.
    ///
    /// The pair may start after `msg_id` when ids are missing.
    fn locate(&self, msg_id: u64) -> Option<FilePairInfo>;

    /// Returns the first pair whose last timestamp is at least `timestamp`.
    fn locate_by_timestamp(&self, timestamp: i64) -> Option<FilePairInfo>;

    /// Returns the smallest committed id still on DFS.
    fn min_message_id(&self) -> Option<u64>;

    /// Returns one past the largest committed id on DFS.
    fn end_message_id(&self) -> Option<u64>;

    /// Deletes pairs that are expired relative to `committed_timestamp`
    /// and returns them.
    fn del_expired_file(&self, committed_timestamp: i64) -> RillResult<Vec<FilePairInfo>>;

    /// Returns the bytes used by the partition on DFS.
    fn total_size(&self) -> RillResult<u64>;
}

/// Writes messages to DFS and makes them durable.
pub trait MessageCommitter: Send {
    /// Appends messages; ids must be increasing.
    fn write(&mut self, messages: &[Message]) -> RillResult<()>;

    /// Syncs everything written so far.
    fn commit_file(&mut self) -> RillResult<()>;

    /// Returns one past the last written id.
    fn written_id(&self) -> u64;

    /// Returns one past the last durable id.
    fn committed_id(&self) -> u64;

    /// Returns the timestamp of the last durable message.
    fn committed_timestamp(&self) -> i64;

    /// Returns true once a write failure is permanent.
    fn has_seal_error(&self) -> bool;
}

/// Progress reported by downstream consumers of a memory-prefer topic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerCommit {
    /// One past the last id consumers committed.
    pub committed_id: u64,
    /// When consumers last reported, in microseconds.
    pub last_access_time: i64,
    /// Timestamp of the last consumer-committed message, in microseconds.
    pub committed_time: i64,
}

/// Source of consumer progress.
pub trait CommitManager: Send + Sync {
    /// Returns the latest consumer progress.
    fn commit_id_and_access_time(&self) -> ConsumerCommit;
}

/// The collaborators one engine uses.
pub struct Collaborators {
    /// Committed file pairs.
    pub file_manager: Arc<dyn FileManager>,
    /// DFS writer.
    pub committer: Box<dyn MessageCommitter>,
    /// Consumer progress.
    pub commit_manager: Arc<dyn CommitManager>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("file_pairs", &self.file_manager.file_pairs().len())
            .field("written_id", &self.committer.written_id())
            .field("committed_id", &self.committer.committed_id())
            .finish()
    }
}
