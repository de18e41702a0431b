//! Engine statistics and heartbeat snapshots.

use std::sync::atomic::{AtomicU64, Ordering};

use rill_common::{PartitionId, PartitionStatus, TopicMode};

/// Counters of one engine.
#[derive(Debug, Default)]
pub struct EngineStats {
    writes: AtomicU64,
    write_messages: AtomicU64,
    write_bytes: AtomicU64,
    reads: AtomicU64,
    read_messages: AtomicU64,
    read_bytes: AtomicU64,
    dfs_reads: AtomicU64,
    commits: AtomicU64,
    commit_failures: AtomicU64,
    recycled_blocks: AtomicU64,
    forced_recycles: AtomicU64,
    data_loss: AtomicU64,
    rejections: AtomicU64,
}

impl EngineStats {
    #[inline]
    pub(crate) fn record_write(&self, messages: usize, bytes: usize) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.write_messages.fetch_add(messages as u64, Ordering::Relaxed);
        self.write_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_read(&self, messages: usize, bytes: usize, from_dfs: bool) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.read_messages.fetch_add(messages as u64, Ordering::Relaxed);
        self.read_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        if from_dfs {
            self.dfs_reads.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_commit_failure(&self) {
        self.commit_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_recycle(&self, blocks: usize, forced: bool) {
        self.recycled_blocks.fetch_add(blocks as u64, Ordering::Relaxed);
        if forced {
            self.forced_recycles.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_data_loss(&self) {
        self.data_loss.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_rejection(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns accepted write requests.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Returns accepted messages.
    pub fn write_messages(&self) -> u64 {
        self.write_messages.load(Ordering::Relaxed)
    }

    /// Returns served read requests.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Returns served reads that touched DFS.
    pub fn dfs_reads(&self) -> u64 {
        self.dfs_reads.load(Ordering::Relaxed)
    }

    /// Returns successful commits.
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Returns failed commits.
    pub fn commit_failures(&self) -> u64 {
        self.commit_failures.load(Ordering::Relaxed)
    }

    /// Returns blocks freed by recycling.
    pub fn recycled_blocks(&self) -> u64 {
        self.recycled_blocks.load(Ordering::Relaxed)
    }

    /// Returns recycle passes that dropped data regardless of readers.
    pub fn forced_recycles(&self) -> u64 {
        self.forced_recycles.load(Ordering::Relaxed)
    }

    /// Returns reads answered with data loss.
    pub fn data_loss(&self) -> u64 {
        self.data_loss.load(Ordering::Relaxed)
    }

    /// Returns requests rejected as busy.
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }
}

impl std::fmt::Display for EngineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "EngineStats {{ writes: {}, reads: {} ({} dfs), commits: {}/{} failed, recycled: {}, data_loss: {} }}",
            self.writes(),
            self.reads(),
            self.dfs_reads(),
            self.commits(),
            self.commit_failures(),
            self.recycled_blocks(),
            self.data_loss()
        )
    }
}

/// Status reported to the heartbeat path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionStatusSnapshot {
    /// Partition.
    pub partition: PartitionId,
    /// Session id.
    pub session_id: u64,
    /// Lifecycle state.
    pub status: PartitionStatus,
    /// Durability mode.
    pub topic_mode: TopicMode,
    /// True if the partition is being unloaded without a final commit.
    pub force_unload: bool,
    /// One past the last received id.
    pub received_id: u64,
    /// One past the last written id.
    pub written_id: u64,
    /// One past the last durable id.
    pub committed_id: u64,
    /// True once the committer sealed.
    pub sealed: bool,
    /// The most recent commit failure, cleared by the next success.
    pub last_commit_error: Option<String>,
}

/// Metrics reported to the heartbeat path.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionMetricsSnapshot {
    /// Partition.
    pub partition: PartitionId,
    /// Messages held in memory.
    pub buffered_messages: usize,
    /// Payload bytes held in memory.
    pub buffered_bytes: usize,
    /// Blocks held by the partition's pool.
    pub buffer_blocks: usize,
    /// Fraction of the partition's block quota in use.
    pub buffer_usage: f64,
    /// Tracked readers.
    pub readers: usize,
    /// Bytes on DFS at the last sync.
    pub dfs_usage_bytes: u64,
    /// Accepted write requests.
    pub writes: u64,
    /// Served read requests.
    pub reads: u64,
    /// Successful commits.
    pub commits: u64,
    /// Failed commits.
    pub commit_failures: u64,
    /// Blocks freed by recycling.
    pub recycled_blocks: u64,
    /// Reads answered with data loss.
    pub data_loss: u64,
}
