//! Commit policies.
//!
//! A partition's topic mode picks one policy at load time. The policy
//! decides when a commit is due and how far buffered messages may be
//! dropped from memory; the engine performs the commit itself.
//!
//! | mode           | policy                 | DFS | commit driven by            |
//! |----------------|------------------------|-----|-----------------------------|
//! | memory_only    | [`MemoryOnlyCommit`]   | no  | pointer advance             |
//! | normal         | [`PersistCommit`]      | yes | timer or unwritten bytes    |
//! | persist_data   | [`PersistCommit`]      | yes | timer or unwritten bytes    |
//! | memory_prefer  | [`MemoryPreferCommit`] | yes | consumer delay or max age   |
//! | security       | [`SecurityBatchCommit`]| yes | the partition's batcher     |

mod security;

pub(crate) use security::BatchSink;
pub use security::SecurityBatcher;

use std::fmt;
use std::time::Duration;

use rill_common::config::PartitionConfig;
use rill_common::TopicMode;

use crate::collab::ConsumerCommit;

/// Commit bookkeeping a policy decides on.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitProgress {
    /// One past the last received id.
    pub received_id: u64,
    /// One past the last id written to DFS.
    pub written_id: u64,
    /// One past the last durable id.
    pub committed_id: u64,
    /// Payload bytes received but not yet written.
    pub unwritten_bytes: usize,
    /// Timestamp of the newest received message.
    pub last_timestamp: i64,
    /// Time since the last successful commit.
    pub since_last_commit: Duration,
    /// Consumer progress; only memory-prefer topics report it.
    pub consumer: ConsumerCommit,
}

impl CommitProgress {
    /// Returns true if some received message is not durable.
    pub fn has_uncommitted(&self) -> bool {
        self.committed_id < self.received_id
    }
}

/// Durability strategy of one partition.
pub trait CommitPolicy: Send + Sync + fmt::Debug {
    /// Returns the topic mode the policy implements.
    fn mode(&self) -> TopicMode;

    /// Returns true if commits write to DFS.
    fn persists(&self) -> bool {
        true
    }

    /// Returns true if the partition drives its own commits.
    fn is_self_driven(&self) -> bool {
        false
    }

    /// Returns true if a commit should run now.
    fn is_due(&self, progress: &CommitProgress) -> bool;

    /// Returns the id below which buffered messages may leave memory.
    fn recyclable_id(&self, progress: &CommitProgress) -> u64;

    /// Returns the id below which consumers have acknowledged reading,
    /// when the mode tracks it.
    fn consumed_id(&self, _progress: &CommitProgress) -> Option<u64> {
        None
    }

    /// Returns true if expired file pairs may be deleted.
    fn deletes_expired_files(&self) -> bool {
        self.mode().expires_files()
    }
}

/// Creates the policy for `config.topic_mode`.
pub fn policy_for(config: &PartitionConfig) -> Box<dyn CommitPolicy> {
    match config.topic_mode {
        TopicMode::MemoryOnly => Box::new(MemoryOnlyCommit),
        TopicMode::Normal | TopicMode::PersistData => Box::new(PersistCommit {
            mode: config.topic_mode,
            interval: config.commit_interval,
            threshold_bytes: config.commit_threshold_bytes,
        }),
        TopicMode::MemoryPrefer => Box::new(MemoryPreferCommit {
            max_delay: config.max_commit_interval_when_delay,
            max_interval: config.max_commit_interval_for_memory_prefer,
        }),
        TopicMode::Security => Box::new(SecurityBatchCommit),
    }
}

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// Nothing reaches DFS; every received message counts as committed.
#[derive(Debug, Clone, Copy)]
pub struct MemoryOnlyCommit;

impl CommitPolicy for MemoryOnlyCommit {
    fn mode(&self) -> TopicMode {
        TopicMode::MemoryOnly
    }

    fn persists(&self) -> bool {
        false
    }

    fn is_due(&self, progress: &CommitProgress) -> bool {
        progress.has_uncommitted()
    }

    fn recyclable_id(&self, progress: &CommitProgress) -> u64 {
        progress.received_id
    }
}

/// Every message is written and synced, on a timer or once enough bytes
/// are pending.
#[derive(Debug, Clone, Copy)]
pub struct PersistCommit {
    mode: TopicMode,
    interval: Duration,
    threshold_bytes: usize,
}

impl CommitPolicy for PersistCommit {
    fn mode(&self) -> TopicMode {
        self.mode
    }

    fn is_due(&self, progress: &CommitProgress) -> bool {
        progress.has_uncommitted()
            && (progress.since_last_commit >= self.interval
                || progress.unwritten_bytes >= self.threshold_bytes)
    }

    fn recyclable_id(&self, progress: &CommitProgress) -> u64 {
        progress.committed_id
    }
}

/// Commits lag behind consumers; DFS is only forced when consumers fall
/// behind or the last commit is too old.
#[derive(Debug, Clone, Copy)]
pub struct MemoryPreferCommit {
    max_delay: Duration,
    max_interval: Duration,
}

impl MemoryPreferCommit {
    fn consumer_delay(progress: &CommitProgress) -> Duration {
        if progress.consumer.committed_id >= progress.received_id {
            return Duration::ZERO;
        }
        let behind = progress.last_timestamp - progress.consumer.committed_time;
        Duration::from_micros(behind.max(0) as u64)
    }
}

impl CommitPolicy for MemoryPreferCommit {
    fn mode(&self) -> TopicMode {
        TopicMode::MemoryPrefer
    }

    fn is_due(&self, progress: &CommitProgress) -> bool {
        progress.has_uncommitted()
            && (Self::consumer_delay(progress) > self.max_delay
                || progress.since_last_commit > self.max_interval)
    }

    fn recyclable_id(&self, progress: &CommitProgress) -> u64 {
        progress
            .committed_id
            .max(progress.consumer.committed_id)
            .min(progress.received_id)
    }

    fn consumed_id(&self, progress: &CommitProgress) -> Option<u64> {
        Some(progress.consumer.committed_id.min(progress.received_id))
    }
}

/// Commits are performed by the partition's [`SecurityBatcher`].
#[derive(Debug, Clone, Copy)]
pub struct SecurityBatchCommit;

impl CommitPolicy for SecurityBatchCommit {
    fn mode(&self) -> TopicMode {
        TopicMode::Security
    }

    fn is_self_driven(&self) -> bool {
        true
    }

    fn is_due(&self, _progress: &CommitProgress) -> bool {
        false
    }

    fn recyclable_id(&self, progress: &CommitProgress) -> u64 {
        progress.committed_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress() -> CommitProgress {
        CommitProgress {
            received_id: 100,
            written_id: 50,
            committed_id: 40,
            unwritten_bytes: 10,
            last_timestamp: 10_000_000,
            since_last_commit: Duration::from_millis(10),
            consumer: ConsumerCommit::default(),
        }
    }

    #[test]
    fn test_policy_selection() {
        for mode in [
            TopicMode::Normal,
            TopicMode::MemoryOnly,
            TopicMode::MemoryPrefer,
            TopicMode::PersistData,
            TopicMode::Security,
        ] {
            let policy = policy_for(&PartitionConfig::for_mode(mode));
            assert_eq!(policy.mode(), mode);
            assert_eq!(policy.persists(), mode.persists_to_dfs());
            assert_eq!(policy.is_self_driven(), mode.is_self_driven());
            assert_eq!(policy.deletes_expired_files(), mode.expires_files());
        }
    }

    #[test]
    fn test_memory_only_recycles_everything() {
        let policy = MemoryOnlyCommit;
        assert!(policy.is_due(&progress()));
        assert_eq!(policy.recyclable_id(&progress()), 100);
    }

    #[test]
    fn test_persist_due_on_timer_or_bytes() {
        let config = PartitionConfig::default()
            .with_commit_interval(Duration::from_secs(1))
            .with_commit_threshold_bytes(1024);
        let policy = policy_for(&config);

        let mut p = progress();
        assert!(!policy.is_due(&p));
        p.unwritten_bytes = 2048;
        assert!(policy.is_due(&p));
        p.unwritten_bytes = 0;
        p.since_last_commit = Duration::from_secs(2);
        assert!(policy.is_due(&p));
        p.committed_id = p.received_id;
        assert!(!policy.is_due(&p));
        assert_eq!(policy.recyclable_id(&progress()), 40);
    }

    #[test]
    fn test_memory_prefer_forced_on_delay() {
        let config = PartitionConfig::for_mode(TopicMode::MemoryPrefer)
            .with_memory_prefer_limits(Duration::from_secs(5), Duration::from_secs(300));
        let policy = policy_for(&config);

        let mut p = progress();
        p.consumer = ConsumerCommit {
            committed_id: 90,
            last_access_time: 0,
            committed_time: 9_000_000,
        };
        // One second behind: not forced.
        assert!(!policy.is_due(&p));
        assert_eq!(policy.recyclable_id(&p), 90);

        p.consumer.committed_time = 1_000_000;
        assert!(policy.is_due(&p));

        p.consumer.committed_time = 9_000_000;
        p.since_last_commit = Duration::from_secs(301);
        assert!(policy.is_due(&p));
    }

    #[test]
    fn test_memory_prefer_caught_up_consumer() {
        let policy = policy_for(&PartitionConfig::for_mode(TopicMode::MemoryPrefer));
        let mut p = progress();
        p.consumer.committed_id = 100;
        assert!(!policy.is_due(&p));
        p.consumer.committed_id = 500;
        assert_eq!(policy.recyclable_id(&p), 100);
        assert_eq!(policy.consumed_id(&p), Some(100));

        let normal = policy_for(&PartitionConfig::for_mode(TopicMode::Normal));
        assert_eq!(normal.consumed_id(&p), None);
    }

    #[test]
    fn test_security_never_due_externally() {
        let policy = policy_for(&PartitionConfig::for_mode(TopicMode::Security));
        let mut p = progress();
        p.since_last_commit = Duration::from_secs(1000);
        assert!(!policy.is_due(&p));
    }
}
