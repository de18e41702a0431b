//! Component configuration structures.
//!
//! Every struct has a `Default` suitable for production and a `validate()`
//! that rejects values the components cannot work with.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{
    DEFAULT_BLOCK_SIZE, DEFAULT_FILE_CACHE_BLOCKS, DEFAULT_LEASE_POLL_INTERVAL_MS,
    DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_ONE_FILE_READ_LIMIT, DEFAULT_READ_FILE_LIMIT,
    DEFAULT_READ_LIMIT, DEFAULT_RECYCLE_PERCENT, DEFAULT_SECURITY_COMMIT_BYTES,
    DEFAULT_SECURITY_REQUEST_TIMEOUT_MS, DEFAULT_WRITE_CACHE_BLOCKS, DEFAULT_WRITE_LIMIT,
    MAX_DATA_FILE_SIZE, MAX_MESSAGE_SIZE_LIMIT, MIN_BLOCK_SIZE,
};
use crate::error::{RillError, RillResult};
use crate::types::TopicMode;

/// Buffer pool configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferPoolConfig {
    /// Size of every block in bytes.
    /// Default: 65536 (64 KB)
    pub block_size: usize,

    /// Blocks in the worker-wide write cache that partitions borrow from.
    /// Default: 16384
    pub write_cache_blocks: usize,

    /// Blocks in the worker-wide DFS file cache.
    /// Default: 8192
    pub file_cache_blocks: usize,

    /// Upper bound on blocks a single partition may hold.
    /// Default: 1024
    pub partition_max_blocks: usize,

    /// Blocks a partition keeps on its own free list instead of returning
    /// them to the write cache.
    /// Default: 4
    pub partition_reserve_blocks: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            write_cache_blocks: DEFAULT_WRITE_CACHE_BLOCKS,
            file_cache_blocks: DEFAULT_FILE_CACHE_BLOCKS,
            partition_max_blocks: 1024,
            partition_reserve_blocks: 4,
        }
    }
}

impl BufferPoolConfig {
    /// Sets the block size.
    #[must_use]
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Sets the write cache capacity in blocks.
    #[must_use]
    pub fn with_write_cache_blocks(mut self, blocks: usize) -> Self {
        self.write_cache_blocks = blocks;
        self
    }

    /// Sets the file cache capacity in blocks.
    #[must_use]
    pub fn with_file_cache_blocks(mut self, blocks: usize) -> Self {
        self.file_cache_blocks = blocks;
        self
    }

    /// Sets the per-partition block limit.
    #[must_use]
    pub fn with_partition_max_blocks(mut self, blocks: usize) -> Self {
        self.partition_max_blocks = blocks;
        self
    }

    /// Returns the write cache size in bytes.
    #[must_use]
    pub const fn write_cache_bytes(&self) -> usize {
        self.block_size * self.write_cache_blocks
    }

    /// Validates the configuration.
    pub fn validate(&self) -> RillResult<()> {
        if self.block_size < MIN_BLOCK_SIZE {
            return Err(RillError::invalid_config(format!(
                "block_size must be at least {MIN_BLOCK_SIZE} bytes"
            )));
        }
        if self.write_cache_blocks == 0 || self.file_cache_blocks == 0 {
            return Err(RillError::invalid_config(
                "write_cache_blocks and file_cache_blocks must be non-zero",
            ));
        }
        if self.partition_max_blocks == 0 {
            return Err(RillError::invalid_config(
                "partition_max_blocks must be non-zero",
            ));
        }
        if self.partition_reserve_blocks > self.partition_max_blocks {
            return Err(RillError::invalid_config(
                "partition_reserve_blocks cannot exceed partition_max_blocks",
            ));
        }
        Ok(())
    }
}

/// Admission control configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Concurrent reads, shared with get-max-id and get-min-id requests.
    /// Default: 64
    pub read_limit: usize,

    /// Concurrent writes.
    /// Default: 64
    pub write_limit: usize,

    /// Concurrent DFS block reads.
    /// Default: 32
    pub read_file_limit: usize,

    /// Concurrent DFS block reads of one file.
    /// Default: 8
    pub one_file_read_limit: usize,

    /// Upper bound on one wait for a held lease.
    /// Default: 40ms
    #[serde(with = "humantime_serde")]
    pub lease_poll_interval: Duration,

    /// A lease held longer than this may be taken over.
    /// Default: 2s
    #[serde(with = "humantime_serde")]
    pub lease_max_wait_time: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            read_limit: DEFAULT_READ_LIMIT,
            write_limit: DEFAULT_WRITE_LIMIT,
            read_file_limit: DEFAULT_READ_FILE_LIMIT,
            one_file_read_limit: DEFAULT_ONE_FILE_READ_LIMIT,
            lease_poll_interval: Duration::from_millis(DEFAULT_LEASE_POLL_INTERVAL_MS),
            lease_max_wait_time: Duration::from_secs(2),
        }
    }
}

impl AdmissionConfig {
    /// Sets the read limit.
    #[must_use]
    pub fn with_read_limit(mut self, limit: usize) -> Self {
        self.read_limit = limit;
        self
    }

    /// Sets the write limit.
    #[must_use]
    pub fn with_write_limit(mut self, limit: usize) -> Self {
        self.write_limit = limit;
        self
    }

    /// Sets the global and per-file read-file limits.
    #[must_use]
    pub fn with_read_file_limits(mut self, global: usize, one_file: usize) -> Self {
        self.read_file_limit = global;
        self.one_file_read_limit = one_file;
        self
    }

    /// Sets the lease takeover time.
    #[must_use]
    pub fn with_lease_max_wait_time(mut self, wait: Duration) -> Self {
        self.lease_max_wait_time = wait;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> RillResult<()> {
        if self.read_limit == 0 || self.write_limit == 0 || self.read_file_limit == 0 {
            return Err(RillError::invalid_config("admission limits must be non-zero"));
        }
        if self.one_file_read_limit == 0 {
            return Err(RillError::invalid_config(
                "one_file_read_limit must be non-zero",
            ));
        }
        if self.lease_poll_interval.is_zero() {
            return Err(RillError::invalid_config(
                "lease_poll_interval must be non-zero",
            ));
        }
        Ok(())
    }
}

/// DFS block cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockCacheConfig {
    /// File wrappers kept per file; threads are spread across them.
    /// Default: 4
    pub one_file_fd_num: usize,

    /// Files untouched for this long are closed by `recycle_file`.
    /// Default: 10m
    #[serde(with = "humantime_serde")]
    pub file_reserve_time: Duration,

    /// Fraction of entries evicted by one distance pass.
    /// Default: 0.1
    pub recycle_percent: f64,

    /// Samples averaged into a reader's read rate.
    /// Default: 8
    pub rate_samples: usize,

    /// Pool usage above which the periodic sweep recycles.
    /// Default: 0.8
    pub recycle_threshold: f64,

    /// Explicit meta-pool distance threshold in seconds.
    pub meta_threshold: Option<f64>,

    /// Explicit data-pool distance threshold in seconds.
    pub data_threshold: Option<f64>,
}

impl Default for BlockCacheConfig {
    fn default() -> Self {
        Self {
            one_file_fd_num: 4,
            file_reserve_time: Duration::from_secs(600),
            recycle_percent: DEFAULT_RECYCLE_PERCENT,
            rate_samples: 8,
            recycle_threshold: 0.8,
            meta_threshold: None,
            data_threshold: None,
        }
    }
}

impl BlockCacheConfig {
    /// Sets the number of wrappers per file.
    #[must_use]
    pub fn with_one_file_fd_num(mut self, n: usize) -> Self {
        self.one_file_fd_num = n;
        self
    }

    /// Sets the file reserve time.
    #[must_use]
    pub fn with_file_reserve_time(mut self, time: Duration) -> Self {
        self.file_reserve_time = time;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> RillResult<()> {
        if self.one_file_fd_num == 0 {
            return Err(RillError::invalid_config("one_file_fd_num must be non-zero"));
        }
        if !(self.recycle_percent > 0.0 && self.recycle_percent <= 1.0) {
            return Err(RillError::invalid_config(
                "recycle_percent must be in (0, 1]",
            ));
        }
        if !(0.0..=1.0).contains(&self.recycle_threshold) {
            return Err(RillError::invalid_config(
                "recycle_threshold must be in [0, 1]",
            ));
        }
        if self.rate_samples == 0 {
            return Err(RillError::invalid_config("rate_samples must be non-zero"));
        }
        Ok(())
    }
}

/// When a committed file pair may be deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObsoleteFileCriterion {
    /// Committed file pairs older than this are deleted.
    /// Default: 24h
    #[serde(with = "humantime_serde")]
    pub reserved_time: Duration,

    /// Keep at most this many file pairs; 0 means unlimited.
    /// Default: 0
    pub max_file_count: usize,
}

impl Default for ObsoleteFileCriterion {
    fn default() -> Self {
        Self {
            reserved_time: Duration::from_secs(24 * 3600),
            max_file_count: 0,
        }
    }
}

/// Per-partition engine configuration.
///
/// # Example
///
/// ```rust
/// use rill_common::config::PartitionConfig;
/// use rill_common::types::TopicMode;
///
/// let config = PartitionConfig::default().with_topic_mode(TopicMode::Security);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    /// Durability mode.
    /// Default: normal
    pub topic_mode: TopicMode,

    /// Largest accepted payload.
    /// Default: 2 MB
    pub max_message_size: usize,

    /// Compress payloads with lz4 before buffering them.
    /// Default: false
    pub enable_compression: bool,

    /// Only payloads at least this large are compressed.
    /// Default: 1024
    pub compress_threshold: usize,

    /// Reject writes and reads once the committer is sealed.
    /// Default: true
    pub enable_fast_recovery: bool,

    /// Timer-driven commit interval.
    /// Default: 1s
    #[serde(with = "humantime_serde")]
    pub commit_interval: Duration,

    /// Uncommitted bytes that make a commit due immediately.
    /// Default: 4 MB
    pub commit_threshold_bytes: usize,

    /// Memory-prefer: force a DFS commit when consumers lag by more than this.
    /// Default: 30s
    #[serde(with = "humantime_serde")]
    pub max_commit_interval_when_delay: Duration,

    /// Memory-prefer: force a DFS commit at least this often.
    /// Default: 5m
    #[serde(with = "humantime_serde")]
    pub max_commit_interval_for_memory_prefer: Duration,

    /// Security: longest a batch waits before committing.
    /// Default: 50ms
    #[serde(with = "humantime_serde")]
    pub max_wait_time_for_security_commit: Duration,

    /// Security: queued bytes that wake the batcher early.
    /// Default: 1 MB
    pub max_data_size_for_security_commit: usize,

    /// Security: queued requests older than this are denied busy.
    /// Default: 5s
    #[serde(with = "humantime_serde")]
    pub security_request_timeout: Duration,

    /// Read bytes per second before requests are throttled; 0 disables.
    /// Default: 0
    pub flow_control_bytes_per_sec: usize,

    /// Fraction of buffered data evicted when no reader bound frees blocks.
    /// Default: 0.1
    pub recycle_percent: f64,

    /// Partition pool usage above which the periodic sweep recycles.
    /// Default: 0.8
    pub recycle_threshold: f64,

    /// Readers idle longer than this are forgotten.
    /// Default: 5m
    #[serde(with = "humantime_serde")]
    pub reader_expire_time: Duration,

    /// Default deadline of one read or write.
    /// Default: 1s
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Size at which the committer starts a new file pair.
    /// Default: 64 MB
    pub max_file_size: usize,

    /// Consecutive write failures after which the committer seals.
    /// Default: 3
    pub max_commit_failures: u32,

    /// Expired-file deletion policy.
    pub obsolete: ObsoleteFileCriterion,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            topic_mode: TopicMode::Normal,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            enable_compression: false,
            compress_threshold: 1024,
            enable_fast_recovery: true,
            commit_interval: Duration::from_secs(1),
            commit_threshold_bytes: 4 * 1024 * 1024,
            max_commit_interval_when_delay: Duration::from_secs(30),
            max_commit_interval_for_memory_prefer: Duration::from_secs(300),
            max_wait_time_for_security_commit: Duration::from_millis(50),
            max_data_size_for_security_commit: DEFAULT_SECURITY_COMMIT_BYTES,
            security_request_timeout: Duration::from_millis(DEFAULT_SECURITY_REQUEST_TIMEOUT_MS),
            flow_control_bytes_per_sec: 0,
            recycle_percent: DEFAULT_RECYCLE_PERCENT,
            recycle_threshold: 0.8,
            reader_expire_time: Duration::from_secs(300),
            request_timeout: Duration::from_secs(1),
            max_file_size: 64 * 1024 * 1024,
            max_commit_failures: 3,
            obsolete: ObsoleteFileCriterion::default(),
        }
    }
}

impl PartitionConfig {
    /// Creates a configuration for the given mode.
    #[must_use]
    pub fn for_mode(topic_mode: TopicMode) -> Self {
        Self {
            topic_mode,
            ..Default::default()
        }
    }

    /// Sets the topic mode.
    #[must_use]
    pub fn with_topic_mode(mut self, mode: TopicMode) -> Self {
        self.topic_mode = mode;
        self
    }

    /// Sets the maximum message size.
    #[must_use]
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Enables or disables payload compression.
    #[must_use]
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.enable_compression = enabled;
        self
    }

    /// Sets the commit interval.
    #[must_use]
    pub fn with_commit_interval(mut self, interval: Duration) -> Self {
        self.commit_interval = interval;
        self
    }

    /// Sets the commit size threshold.
    #[must_use]
    pub fn with_commit_threshold_bytes(mut self, bytes: usize) -> Self {
        self.commit_threshold_bytes = bytes;
        self
    }

    /// Sets the security batch limits.
    #[must_use]
    pub fn with_security_commit(mut self, max_wait: Duration, max_bytes: usize) -> Self {
        self.max_wait_time_for_security_commit = max_wait;
        self.max_data_size_for_security_commit = max_bytes;
        self
    }

    /// Sets the memory-prefer commit limits.
    #[must_use]
    pub fn with_memory_prefer_limits(mut self, when_delay: Duration, max_interval: Duration) -> Self {
        self.max_commit_interval_when_delay = when_delay;
        self.max_commit_interval_for_memory_prefer = max_interval;
        self
    }

    /// Sets the read flow-control budget.
    #[must_use]
    pub fn with_flow_control(mut self, bytes_per_sec: usize) -> Self {
        self.flow_control_bytes_per_sec = bytes_per_sec;
        self
    }

    /// Sets the file roll size.
    #[must_use]
    pub fn with_max_file_size(mut self, size: usize) -> Self {
        self.max_file_size = size;
        self
    }

    /// Sets the request deadline.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Enables or disables fast recovery.
    #[must_use]
    pub fn with_fast_recovery(mut self, enabled: bool) -> Self {
        self.enable_fast_recovery = enabled;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> RillResult<()> {
        if self.max_message_size == 0 || self.max_message_size > MAX_MESSAGE_SIZE_LIMIT {
            return Err(RillError::invalid_config(format!(
                "max_message_size must be in 1..={MAX_MESSAGE_SIZE_LIMIT}"
            )));
        }
        if !(self.recycle_percent > 0.0 && self.recycle_percent <= 1.0) {
            return Err(RillError::invalid_config(
                "recycle_percent must be in (0, 1]",
            ));
        }
        if !(0.0..=1.0).contains(&self.recycle_threshold) {
            return Err(RillError::invalid_config(
                "recycle_threshold must be in [0, 1]",
            ));
        }
        if self.max_file_size == 0 || self.max_file_size > MAX_DATA_FILE_SIZE {
            return Err(RillError::invalid_config(format!(
                "max_file_size must be in 1..={MAX_DATA_FILE_SIZE}"
            )));
        }
        if self.max_commit_failures == 0 {
            return Err(RillError::invalid_config(
                "max_commit_failures must be non-zero",
            ));
        }
        if self.topic_mode == TopicMode::Security
            && self.max_wait_time_for_security_commit.is_zero()
        {
            return Err(RillError::invalid_config(
                "max_wait_time_for_security_commit must be non-zero",
            ));
        }
        Ok(())
    }
}

/// Supervisor loop and worker pool configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Write cache recycle loop period.
    /// Default: 100ms
    #[serde(with = "humantime_serde")]
    pub recycle_write_cache_interval: Duration,

    /// Block cache and file recycle loop period.
    /// Default: 500ms
    #[serde(with = "humantime_serde")]
    pub recycle_file_cache_interval: Duration,

    /// Expired file deletion loop period.
    /// Default: 60s
    #[serde(with = "humantime_serde")]
    pub delete_expired_file_interval: Duration,

    /// Commit scheduling loop period.
    /// Default: 100ms
    #[serde(with = "humantime_serde")]
    pub commit_loop_interval: Duration,

    /// Mean DFS usage sync period.
    /// Default: 10s
    #[serde(with = "humantime_serde")]
    pub sync_dfs_usage_interval: Duration,

    /// Relative jitter applied to the DFS usage sync period.
    /// Default: 0.15
    pub sync_jitter: f64,

    /// Threads in the load/unload/commit worker pool.
    /// Default: 4
    pub worker_threads: usize,

    /// Batches smaller than this are processed serially.
    /// Default: 4
    pub concurrent_threshold: usize,

    /// Unload logs a warning when in-flight requests outlive this.
    /// Default: 5s
    #[serde(with = "humantime_serde")]
    pub unload_grace_period: Duration,

    /// Unload gives up waiting for in-flight requests after this.
    /// Default: 60s
    #[serde(with = "humantime_serde")]
    pub unload_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            recycle_write_cache_interval: Duration::from_millis(100),
            recycle_file_cache_interval: Duration::from_millis(500),
            delete_expired_file_interval: Duration::from_secs(60),
            commit_loop_interval: Duration::from_millis(100),
            sync_dfs_usage_interval: Duration::from_secs(10),
            sync_jitter: 0.15,
            worker_threads: 4,
            concurrent_threshold: 4,
            unload_grace_period: Duration::from_secs(5),
            unload_timeout: Duration::from_secs(60),
        }
    }
}

impl SupervisorConfig {
    /// Creates a configuration with short loop periods for testing.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            recycle_write_cache_interval: Duration::from_millis(10),
            recycle_file_cache_interval: Duration::from_millis(10),
            delete_expired_file_interval: Duration::from_millis(50),
            commit_loop_interval: Duration::from_millis(10),
            sync_dfs_usage_interval: Duration::from_millis(50),
            worker_threads: 2,
            concurrent_threshold: 2,
            unload_grace_period: Duration::from_millis(200),
            unload_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    /// Sets the worker pool size.
    #[must_use]
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Sets the serial/parallel cutover.
    #[must_use]
    pub fn with_concurrent_threshold(mut self, threshold: usize) -> Self {
        self.concurrent_threshold = threshold;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> RillResult<()> {
        let intervals = [
            self.recycle_write_cache_interval,
            self.recycle_file_cache_interval,
            self.delete_expired_file_interval,
            self.commit_loop_interval,
            self.sync_dfs_usage_interval,
        ];
        if intervals.iter().any(Duration::is_zero) {
            return Err(RillError::invalid_config("loop intervals must be non-zero"));
        }
        if !(0.0..1.0).contains(&self.sync_jitter) {
            return Err(RillError::invalid_config("sync_jitter must be in [0, 1)"));
        }
        if self.worker_threads == 0 {
            return Err(RillError::invalid_config("worker_threads must be non-zero"));
        }
        Ok(())
    }
}

/// Serde helper for Duration using humantime format.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        s.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(BufferPoolConfig::default().validate().is_ok());
        assert!(AdmissionConfig::default().validate().is_ok());
        assert!(BlockCacheConfig::default().validate().is_ok());
        assert!(PartitionConfig::default().validate().is_ok());
        assert!(SupervisorConfig::default().validate().is_ok());
        assert!(SupervisorConfig::for_testing().validate().is_ok());
    }

    #[test]
    fn test_buffer_pool_validation() {
        let config = BufferPoolConfig::default().with_block_size(16);
        assert!(config.validate().is_err());

        let mut config = BufferPoolConfig::default();
        config.partition_reserve_blocks = config.partition_max_blocks + 1;
        assert!(config.validate().is_err());

        let config = BufferPoolConfig::default()
            .with_block_size(1024)
            .with_write_cache_blocks(10);
        assert_eq!(config.write_cache_bytes(), 10 * 1024);
    }

    #[test]
    fn test_partition_validation() {
        let config = PartitionConfig::default().with_max_message_size(0);
        assert!(config.validate().is_err());

        let mut config = PartitionConfig::for_mode(TopicMode::Security);
        config.max_wait_time_for_security_commit = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = PartitionConfig::default();
        config.recycle_percent = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_admission_validation() {
        assert!(AdmissionConfig::default()
            .with_read_limit(0)
            .validate()
            .is_err());
        assert!(AdmissionConfig::default()
            .with_read_file_limits(4, 0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = PartitionConfig::for_mode(TopicMode::MemoryPrefer)
            .with_commit_interval(Duration::from_millis(250));
        let text = toml::to_string(&config).unwrap();
        assert!(text.contains("memory_prefer"));
        assert!(text.contains("250ms"));

        let parsed: PartitionConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: BlockCacheConfig = toml::from_str("one_file_fd_num = 2").unwrap();
        assert_eq!(parsed.one_file_fd_num, 2);
        assert_eq!(parsed.rate_samples, BlockCacheConfig::default().rate_samples);
        assert!(parsed.meta_threshold.is_none());
    }
}
