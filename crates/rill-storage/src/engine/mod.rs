//! The partition engine.
//!
//! One [`PartitionEngine`] owns the memory ring of a partition, its commit
//! state and its DFS collaborators. Writes land in the ring and are pushed to
//! DFS by the commit policy; reads are served from the ring when the start id
//! is still buffered and through the shared block cache otherwise.
//!
//! ```text
//!   add_message ─► validate ─► compress ─► ┬─ SECURITY ─► batcher ─┐
//!                                          └─ recycle ─► ring ◄────┘
//!                                                         │ commit policy
//!                                                         ▼
//!   get_message ─► ring (start ≥ front) ──────────► committer ─► DFS pairs
//!            └──► block cache (start < front) ◄────────────────────┘
//! ```
//!
//! Lifecycle: `Loading → Running → Stopping → Stopped`. Requests are only
//! admitted while running; [`PartitionEngine::stop`] waits for admitted
//! requests to drain before the final commit.

mod quiesce;
mod read;
mod recycle;
mod request;
mod status;
mod write;

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use rill_buffer::BufferPool;
use rill_cache::{AdmissionCenter, BlockCache, ReaderInfoMap};
use rill_common::config::{AdmissionConfig, BlockCacheConfig, BufferPoolConfig, PartitionConfig};
use rill_common::dfs::Dfs;
use rill_common::metrics::{MetricsSink, NoopMetrics};
use rill_common::{PartitionId, PartitionStatus, RillError, RillResult, TopicMode};

use crate::collab::{
    Collaborators, CommitManager, FileManager, LocalCommitter, LocalFileManager, MemoryCommitManager,
    MessageCommitter,
};
use crate::commit::{policy_for, BatchSink, CommitPolicy, SecurityBatcher};
use crate::flow::FlowControl;
use crate::ring::MemoryRing;

use quiesce::{Inflight, InflightGuard};

pub use request::{
    FieldFilter, MaxIdInfo, ReadRequest, ReadResponse, Reply, ResponseMeta, StopOptions, WriteAck,
    WriteRequest,
};
pub use status::{EngineStats, PartitionMetricsSnapshot, PartitionStatusSnapshot};

// ---------------------------------------------------------------------------
// Shared resources
// ---------------------------------------------------------------------------

/// Worker-wide resources shared by every engine.
#[derive(Clone)]
pub struct EngineContext {
    /// Root pool partition rings borrow from.
    pub write_pool: Arc<BufferPool>,
    /// DFS block cache.
    pub block_cache: Arc<BlockCache>,
    /// Admission counters and leases.
    pub admission: Arc<AdmissionCenter>,
    /// Reader positions of every partition.
    pub readers: Arc<ReaderInfoMap>,
    /// Filesystem holding the file pairs.
    pub dfs: Arc<dyn Dfs>,
    /// Pool geometry and per-partition quotas.
    pub buffer: BufferPoolConfig,
    /// Metrics hook.
    pub metrics: Arc<dyn MetricsSink>,
}

impl EngineContext {
    /// Builds the write pool, file cache pool, admission center and block
    /// cache from configuration.
    pub fn new(
        dfs: Arc<dyn Dfs>,
        buffer: BufferPoolConfig,
        admission: AdmissionConfig,
        cache: BlockCacheConfig,
    ) -> RillResult<Self> {
        buffer.validate()?;
        admission.validate()?;
        cache.validate()?;

        let write_pool = Arc::new(
            BufferPool::new(buffer.block_size, buffer.write_cache_blocks)?.with_label("write-cache"),
        );
        let file_pool = Arc::new(
            BufferPool::new(buffer.block_size, buffer.file_cache_blocks)?.with_label("file-cache"),
        );
        let admission = Arc::new(AdmissionCenter::new(admission));
        let readers = Arc::new(ReaderInfoMap::new(cache.rate_samples));
        let block_cache = Arc::new(BlockCache::new(
            cache,
            file_pool,
            Arc::clone(&admission),
            Arc::clone(&dfs),
        ));
        Ok(Self {
            write_pool,
            block_cache,
            admission,
            readers,
            dfs,
            buffer,
            metrics: Arc::new(NoopMetrics),
        })
    }

    /// Replaces the metrics hook.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("write_pool", &self.write_pool)
            .field("block_cache", &self.block_cache)
            .field("readers", &self.readers.len())
            .finish()
    }
}

/// What to load.
#[derive(Clone)]
pub struct PartitionSpec {
    /// Partition id.
    pub partition: PartitionId,
    /// Session id handed out by the coordinator; reads must carry it.
    pub session_id: u64,
    /// Partition configuration.
    pub config: PartitionConfig,
    /// DFS directory of the file pairs; defaults to `topic/partition`.
    pub data_dir: Option<String>,
    /// Source of consumer commit offsets; defaults to an in-memory manager.
    pub commit_manager: Option<Arc<dyn CommitManager>>,
}

impl PartitionSpec {
    /// Creates a spec with default directory and commit manager.
    pub fn new(partition: PartitionId, session_id: u64, config: PartitionConfig) -> Self {
        Self {
            partition,
            session_id,
            config,
            data_dir: None,
            commit_manager: None,
        }
    }

    /// Sets the DFS directory.
    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<String>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Sets the consumer commit source.
    #[must_use]
    pub fn with_commit_manager(mut self, manager: Arc<dyn CommitManager>) -> Self {
        self.commit_manager = Some(manager);
        self
    }

    /// Returns the DFS directory.
    pub fn dir(&self) -> String {
        self.data_dir
            .clone()
            .unwrap_or_else(|| self.partition.to_string())
    }
}

impl std::fmt::Debug for PartitionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionSpec")
            .field("partition", &self.partition)
            .field("session_id", &self.session_id)
            .field("topic_mode", &self.config.topic_mode)
            .field("data_dir", &self.dir())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct RingState {
    ring: MemoryRing,
    /// Payload bytes at or after the written id.
    unwritten_bytes: usize,
    /// Set by `stop` once no more appends may land.
    closed: bool,
}

/// Exclusive ids, monotonic: `received ≥ written ≥ committed`.
struct CommitIds {
    received: AtomicU64,
    written: AtomicU64,
    committed: AtomicU64,
    committed_ts: AtomicI64,
    last_commit: Mutex<Instant>,
}

/// Clears the committing flag when a commit ends.
struct CommittingFlag<'a>(&'a AtomicBool);

impl<'a> CommittingFlag<'a> {
    fn set(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for CommittingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Storage engine of one partition.
pub struct PartitionEngine {
    partition: PartitionId,
    session_id: u64,
    config: PartitionConfig,
    data_dir: String,
    status: AtomicU8,
    force_unload: AtomicBool,
    policy: Box<dyn CommitPolicy>,

    ring: Mutex<RingState>,
    pool: Arc<BufferPool>,
    committer: Mutex<Box<dyn MessageCommitter>>,
    committing: AtomicBool,
    sealed: AtomicBool,
    retired: AtomicBool,
    ids: CommitIds,

    file_manager: Arc<dyn FileManager>,
    commit_manager: Arc<dyn CommitManager>,
    block_cache: Arc<BlockCache>,
    admission: Arc<AdmissionCenter>,
    readers: Arc<ReaderInfoMap>,
    flow: FlowControl,
    batcher: Option<SecurityBatcher>,

    inflight: Inflight,
    stats: EngineStats,
    last_commit_error: Mutex<Option<String>>,
    dfs_usage: AtomicU64,
    metrics: Arc<dyn MetricsSink>,
}

impl PartitionEngine {
    /// Loads a partition with the local file-pair collaborators.
    pub fn load(spec: PartitionSpec, ctx: &EngineContext) -> RillResult<Arc<Self>> {
        let dir = spec.dir();
        let files = Arc::new(LocalFileManager::new(
            Arc::clone(&ctx.dfs),
            dir.clone(),
            spec.config.obsolete.clone(),
        ));
        if spec.config.topic_mode.persists_to_dfs() {
            ctx.dfs.create_dir_all(&dir)?;
            files.init()?;
        }
        let committer = LocalCommitter::new(
            spec.partition.clone(),
            Arc::clone(&ctx.dfs),
            Arc::clone(&files),
            spec.config.max_file_size,
            spec.config.max_commit_failures,
        );
        let commit_manager = spec
            .commit_manager
            .clone()
            .unwrap_or_else(|| Arc::new(MemoryCommitManager::new()));
        Self::load_with(
            spec,
            ctx,
            Collaborators {
                file_manager: files,
                committer: Box::new(committer),
                commit_manager,
            },
        )
    }

    /// Loads a partition with caller-supplied collaborators.
    pub fn load_with(
        spec: PartitionSpec,
        ctx: &EngineContext,
        collab: Collaborators,
    ) -> RillResult<Arc<Self>> {
        let started = Instant::now();
        spec.config.validate()?;
        let data_dir = spec.dir();
        let PartitionSpec {
            partition,
            session_id,
            config,
            ..
        } = spec;
        let Collaborators {
            file_manager,
            committer,
            commit_manager,
        } = collab;

        let policy = policy_for(&config);
        let committed_ts = committer.committed_timestamp();
        let next_id = file_manager
            .end_message_id()
            .unwrap_or(0)
            .max(committer.committed_id());
        let pool = Arc::new(
            BufferPool::chained(
                Arc::clone(&ctx.write_pool),
                ctx.buffer.partition_max_blocks,
                ctx.buffer.partition_reserve_blocks,
            )?
            .with_label(partition.to_string()),
        );
        let ring = MemoryRing::new(Arc::clone(&pool), next_id, committed_ts);

        let mut batcher_error = None;
        let engine = Arc::new_cyclic(|weak: &Weak<Self>| {
            let batcher = if policy.is_self_driven() {
                let sink: Weak<dyn BatchSink> = weak.clone();
                match SecurityBatcher::start(partition.clone(), &config, sink) {
                    Ok(batcher) => Some(batcher),
                    Err(err) => {
                        batcher_error = Some(err);
                        None
                    }
                }
            } else {
                None
            };
            Self {
                flow: FlowControl::new(config.flow_control_bytes_per_sec),
                partition,
                session_id,
                data_dir,
                status: AtomicU8::new(PartitionStatus::Loading.as_u8()),
                force_unload: AtomicBool::new(false),
                policy,
                ring: Mutex::new(RingState {
                    ring,
                    unwritten_bytes: 0,
                    closed: false,
                }),
                pool,
                committer: Mutex::new(committer),
                committing: AtomicBool::new(false),
                sealed: AtomicBool::new(false),
                retired: AtomicBool::new(false),
                ids: CommitIds {
                    received: AtomicU64::new(next_id),
                    written: AtomicU64::new(next_id),
                    committed: AtomicU64::new(next_id),
                    committed_ts: AtomicI64::new(committed_ts),
                    last_commit: Mutex::new(Instant::now()),
                },
                file_manager,
                commit_manager,
                block_cache: Arc::clone(&ctx.block_cache),
                admission: Arc::clone(&ctx.admission),
                readers: Arc::clone(&ctx.readers),
                batcher,
                inflight: Inflight::default(),
                stats: EngineStats::default(),
                last_commit_error: Mutex::new(None),
                dfs_usage: AtomicU64::new(0),
                metrics: Arc::clone(&ctx.metrics),
                config,
            }
        });
        if let Some(err) = batcher_error {
            return Err(err);
        }

        engine.set_status(PartitionStatus::Running);
        engine.metrics.latency("partition.load", started.elapsed());
        info!(
            partition = %engine.partition,
            session_id = engine.session_id,
            mode = %engine.config.topic_mode,
            next_msg_id = next_id,
            "partition loaded"
        );
        Ok(engine)
    }

    /// Stops the engine.
    ///
    /// New requests are rejected at once; queued security writes are
    /// committed; admitted requests get up to `options.timeout` to finish.
    /// Requests still running after that can neither append nor commit.
    /// Unless forced, buffered messages are committed before the ring is
    /// released. Stopping twice is a no-op.
    pub fn stop(&self, options: StopOptions) -> RillResult<()> {
        let proceed = self.inflight.close(|| {
            if matches!(self.status(), PartitionStatus::Stopping | PartitionStatus::Stopped) {
                return false;
            }
            self.force_unload.store(options.force, Ordering::Release);
            self.set_status(PartitionStatus::Stopping);
            true
        });
        if !proceed {
            return Ok(());
        }
        info!(partition = %self.partition, force = options.force, "stopping partition");

        if let Some(batcher) = &self.batcher {
            batcher.stop();
        }
        if !self
            .inflight
            .wait_quiesced(&self.partition, options.grace, options.timeout)
        {
            warn!(
                partition = %self.partition,
                inflight = self.inflight.count(),
                "stopping with requests still in flight"
            );
        }
        self.ring.lock().closed = true;

        let result = if options.force {
            Ok(())
        } else {
            self.commit_inner(true).map(|_| ())
        };
        if let Err(err) = &result {
            warn!(partition = %self.partition, error = %err, "final commit failed");
        }

        {
            // Waits out a commit started by a straggler.
            let _committer = self.committer.lock();
            self.retired.store(true, Ordering::Release);
            let mut state = self.ring.lock();
            state.ring.clear();
            state.unwritten_bytes = 0;
        }
        self.readers.remove_partition(&self.partition);
        self.pool.free_unused_blocks();
        self.set_status(PartitionStatus::Stopped);
        info!(partition = %self.partition, "partition stopped");
        result
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Returns the partition id.
    pub fn partition(&self) -> &PartitionId {
        &self.partition
    }

    /// Returns the session id.
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Returns the configuration.
    pub fn config(&self) -> &PartitionConfig {
        &self.config
    }

    /// Returns the durability mode.
    pub fn topic_mode(&self) -> TopicMode {
        self.config.topic_mode
    }

    /// Returns the DFS directory.
    pub fn data_dir(&self) -> &str {
        &self.data_dir
    }

    /// Returns the lifecycle state.
    pub fn status(&self) -> PartitionStatus {
        PartitionStatus::from_u8(self.status.load(Ordering::Acquire)).unwrap_or(PartitionStatus::Stopped)
    }

    fn set_status(&self, status: PartitionStatus) {
        self.status.store(status.as_u8(), Ordering::Release);
    }

    /// Returns true while serving traffic.
    pub fn is_running(&self) -> bool {
        self.status().is_running()
    }

    /// Returns true if the commit loop must leave this engine alone.
    pub fn is_self_driven(&self) -> bool {
        self.policy.is_self_driven()
    }

    /// Returns true while a commit is in progress.
    pub fn is_committing(&self) -> bool {
        self.committing.load(Ordering::Acquire)
    }

    /// Returns true once the committer sealed.
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Returns one past the last received id.
    pub fn received_id(&self) -> u64 {
        self.ids.received.load(Ordering::Acquire)
    }

    /// Returns one past the last id handed to the committer.
    pub fn written_id(&self) -> u64 {
        self.ids.written.load(Ordering::Acquire)
    }

    /// Returns one past the last durable id.
    pub fn committed_id(&self) -> u64 {
        self.ids.committed.load(Ordering::Acquire)
    }

    /// Returns the largest received id, if any.
    pub fn max_msg_id(&self) -> Option<u64> {
        self.received_id().checked_sub(1)
    }

    /// Returns the oldest id still stored in memory or on DFS.
    pub fn min_message_id(&self) -> u64 {
        let front = self.ring.lock().ring.front_id();
        self.file_manager
            .min_message_id()
            .map_or(front, |files| files.min(front))
    }

    /// Returns the partition's buffer pool.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Returns the engine counters.
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Returns the number of security requests waiting for a batch.
    pub fn pending_security_requests(&self) -> usize {
        self.batcher.as_ref().map_or(0, SecurityBatcher::pending)
    }

    /// Returns the bookkeeping attached to replies.
    pub fn response_meta(&self) -> ResponseMeta {
        ResponseMeta {
            session_id: self.session_id,
            committed_id: self.committed_id(),
            max_msg_id: self.max_msg_id(),
        }
    }

    fn reply<T>(&self, result: RillResult<T>) -> Reply<T> {
        Reply {
            meta: self.response_meta(),
            result,
        }
    }

    // -----------------------------------------------------------------------
    // Request gating
    // -----------------------------------------------------------------------

    fn enter(&self) -> RillResult<InflightGuard<'_>> {
        self.inflight.enter(|| match self.status() {
            PartitionStatus::Running => Ok(()),
            PartitionStatus::Loading => Err(RillError::PartitionNotFound {
                partition: self.partition.clone(),
            }),
            PartitionStatus::Stopping | PartitionStatus::Stopped => {
                Err(RillError::PartitionStopping {
                    partition: self.partition.clone(),
                })
            }
        })
    }

    fn stopping(&self) -> RillError {
        RillError::PartitionStopping {
            partition: self.partition.clone(),
        }
    }

    fn seal_check(&self) -> RillResult<()> {
        if self.config.enable_fast_recovery && self.is_sealed() {
            return Err(RillError::Sealed {
                partition: self.partition.clone(),
            });
        }
        Ok(())
    }

    fn mark_sealed(&self) {
        if !self.sealed.swap(true, Ordering::AcqRel) {
            error!(partition = %self.partition, "committer sealed; partition can no longer persist");
            self.metrics.counter("partition.sealed", 1);
        }
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    /// Returns the status reported to the heartbeat path.
    pub fn status_snapshot(&self) -> PartitionStatusSnapshot {
        PartitionStatusSnapshot {
            partition: self.partition.clone(),
            session_id: self.session_id,
            status: self.status(),
            topic_mode: self.config.topic_mode,
            force_unload: self.force_unload.load(Ordering::Acquire),
            received_id: self.received_id(),
            written_id: self.written_id(),
            committed_id: self.committed_id(),
            sealed: self.is_sealed(),
            last_commit_error: self.last_commit_error.lock().clone(),
        }
    }

    /// Returns the metrics reported to the heartbeat path.
    pub fn metrics_snapshot(&self) -> PartitionMetricsSnapshot {
        let (buffered_messages, buffered_bytes, buffer_blocks) = {
            let state = self.ring.lock();
            (state.ring.len(), state.ring.bytes(), state.ring.block_count())
        };
        PartitionMetricsSnapshot {
            partition: self.partition.clone(),
            buffered_messages,
            buffered_bytes,
            buffer_blocks,
            buffer_usage: self.pool.usage(),
            readers: self.readers.partition_len(&self.partition),
            dfs_usage_bytes: self.dfs_usage.load(Ordering::Relaxed),
            writes: self.stats.writes(),
            reads: self.stats.reads(),
            commits: self.stats.commits(),
            commit_failures: self.stats.commit_failures(),
            recycled_blocks: self.stats.recycled_blocks(),
            data_loss: self.stats.data_loss(),
        }
    }
}

impl std::fmt::Debug for PartitionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionEngine")
            .field("partition", &self.partition)
            .field("session_id", &self.session_id)
            .field("status", &self.status())
            .field("policy", &self.policy)
            .field("received_id", &self.received_id())
            .field("written_id", &self.written_id())
            .field("committed_id", &self.committed_id())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::message::{MessageInput, PreparedMessage};
    use rill_common::dfs::LocalDfs;
    use std::time::Duration;

    pub(crate) fn context(dir: &tempfile::TempDir, blocks: usize) -> EngineContext {
        let dfs: Arc<dyn Dfs> = Arc::new(LocalDfs::new(dir.path()).unwrap());
        let mut buffer = BufferPoolConfig::default()
            .with_block_size(1024)
            .with_write_cache_blocks(blocks * 4)
            .with_file_cache_blocks(64)
            .with_partition_max_blocks(blocks);
        buffer.partition_reserve_blocks = 1;
        EngineContext::new(dfs, buffer, AdmissionConfig::default(), BlockCacheConfig::default()).unwrap()
    }

    pub(crate) fn spec(mode: TopicMode) -> PartitionSpec {
        let config = PartitionConfig::for_mode(mode)
            .with_commit_interval(Duration::from_secs(3600))
            .with_commit_threshold_bytes(usize::MAX / 2)
            .with_security_commit(Duration::from_millis(5), 1024 * 1024);
        PartitionSpec::new(PartitionId::new("orders", 0), 7, config)
    }

    pub(crate) fn quick_stop() -> StopOptions {
        StopOptions::graceful(Duration::from_millis(50), Duration::from_secs(2))
    }

    #[test]
    fn test_load_starts_running() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, 16);
        let engine = PartitionEngine::load(spec(TopicMode::Normal), &ctx).unwrap();
        assert_eq!(engine.status(), PartitionStatus::Running);
        assert_eq!(engine.received_id(), 0);
        assert_eq!(engine.max_msg_id(), None);
        assert_eq!(engine.data_dir(), "orders/0");
        assert!(ctx.dfs.exists("orders/0"));
    }

    #[test]
    fn test_stop_is_idempotent_and_rejects_traffic() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, 16);
        let engine = PartitionEngine::load(spec(TopicMode::MemoryOnly), &ctx).unwrap();
        engine.stop(quick_stop()).unwrap();
        engine.stop(quick_stop()).unwrap();
        assert_eq!(engine.status(), PartitionStatus::Stopped);

        let reply = engine.add_message(WriteRequest::from_payloads([&b"late"[..]]));
        assert!(matches!(reply.result, Err(RillError::PartitionStopping { .. })));
        assert_eq!(reply.meta.session_id, 7);
    }

    #[test]
    fn test_reload_continues_after_committed_ids() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, 16);
        let engine = PartitionEngine::load(spec(TopicMode::Normal), &ctx).unwrap();
        for _ in 0..3 {
            engine
                .add_message(WriteRequest::from_payloads([&b"abc"[..], &b"def"[..]]))
                .into_result()
                .unwrap();
        }
        engine.stop(quick_stop()).unwrap();
        assert_eq!(engine.committed_id(), 6);

        let reloaded = PartitionEngine::load(spec(TopicMode::Normal), &ctx).unwrap();
        assert_eq!(reloaded.received_id(), 6);
        assert_eq!(reloaded.committed_id(), 6);
        let ack = reloaded
            .add_message(WriteRequest::from_payloads([&b"next"[..]]))
            .into_result()
            .unwrap();
        assert_eq!(ack.first_msg_id, 6);
    }

    #[test]
    fn test_forced_stop_skips_final_commit() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, 16);
        let engine = PartitionEngine::load(spec(TopicMode::Normal), &ctx).unwrap();
        engine
            .add_message(WriteRequest::from_payloads([&b"volatile"[..]]))
            .into_result()
            .unwrap();
        engine.stop(quick_stop().forced()).unwrap();
        assert_eq!(engine.committed_id(), 0);
        assert!(engine.status_snapshot().force_unload);
        assert_eq!(engine.pool().used_block_count(), 0);
    }

    #[test]
    fn test_stop_past_quiesce_timeout_fences_stragglers() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, 16);
        let engine = PartitionEngine::load(spec(TopicMode::Normal), &ctx).unwrap();
        engine
            .add_message(WriteRequest::from_payloads([&b"first"[..]]))
            .into_result()
            .unwrap();

        let straggler = engine.inflight.enter(|| Ok(())).unwrap();
        let options = StopOptions::graceful(Duration::from_millis(5), Duration::from_millis(30));
        engine.stop(options).unwrap();
        assert_eq!(engine.status(), PartitionStatus::Stopped);
        assert_eq!(engine.committed_id(), 1);
        assert_eq!(engine.pool().used_block_count(), 0);

        // The held request resumes after the ring was released.
        let late = vec![PreparedMessage::prepare(
            MessageInput::new(b"late".to_vec()),
            false,
            0,
        )];
        assert!(matches!(
            engine.append_prepared(late),
            Err(RillError::PartitionStopping { .. })
        ));
        assert!(matches!(
            engine.commit_message(),
            Err(RillError::PartitionStopping { .. })
        ));
        assert_eq!(engine.received_id(), 1);
        assert_eq!(engine.committed_id(), 1);
        drop(straggler);
    }

    #[test]
    fn test_snapshots_report_state() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, 16);
        let engine = PartitionEngine::load(spec(TopicMode::MemoryOnly), &ctx).unwrap();
        engine
            .add_message(WriteRequest::from_payloads([&b"12345"[..]]))
            .into_result()
            .unwrap();

        let status = engine.status_snapshot();
        assert_eq!(status.received_id, 1);
        assert_eq!(status.committed_id, 1);
        assert!(!status.sealed);

        let metrics = engine.metrics_snapshot();
        assert_eq!(metrics.buffered_messages, 1);
        assert_eq!(metrics.buffered_bytes, 5);
        assert_eq!(metrics.writes, 1);
    }
}
