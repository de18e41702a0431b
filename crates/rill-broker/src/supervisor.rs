//! The worker's partition supervisor.
//!
//! ```text
//!                    ┌──────────────── Supervisor ─────────────────┐
//!   load / unload ──►│ PartitionMap ◄── five maintenance loops      │
//!   requests ───────►│     │            (snapshot of running        │
//!                    │     ▼             engines per pass)          │
//!                    │ PartitionEngine ... PartitionEngine          │
//!                    └─────────────────────────────────────────────┘
//! ```
//!
//! Batches below `concurrent_threshold` are handled on the caller's thread;
//! larger ones fan out on a bounded rayon pool.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, error, info, warn};

use rill_common::config::SupervisorConfig;
use rill_common::{PartitionId, RillError, RillResult};
use rill_storage::{
    EngineContext, MaxIdInfo, PartitionEngine, PartitionMetricsSnapshot, PartitionSpec,
    PartitionStatusSnapshot, ReadRequest, ReadResponse, Reply, ResponseMeta, StopOptions, WriteAck,
    WriteRequest,
};

use crate::loops::{jittered, spawn_loop, LoopSignal};
use crate::map::PartitionMap;

/// Outcome of one partition in a batch.
pub type BatchResult = Vec<(PartitionId, RillResult<()>)>;

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Supervisor counters.
#[derive(Debug, Default)]
pub struct SupervisorStats {
    loads: AtomicU64,
    load_failures: AtomicU64,
    unloads: AtomicU64,
    commits: AtomicU64,
    commit_failures: AtomicU64,
    write_blocks_recycled: AtomicU64,
    cache_blocks_recycled: AtomicU64,
    files_deleted: AtomicU64,
}

impl SupervisorStats {
    /// Returns partitions loaded.
    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    /// Returns failed loads.
    pub fn load_failures(&self) -> u64 {
        self.load_failures.load(Ordering::Relaxed)
    }

    /// Returns partitions unloaded.
    pub fn unloads(&self) -> u64 {
        self.unloads.load(Ordering::Relaxed)
    }

    /// Returns commits dispatched by the commit loop.
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Returns dispatched commits that failed.
    pub fn commit_failures(&self) -> u64 {
        self.commit_failures.load(Ordering::Relaxed)
    }

    /// Returns ring blocks freed by the write cache loop.
    pub fn write_blocks_recycled(&self) -> u64 {
        self.write_blocks_recycled.load(Ordering::Relaxed)
    }

    /// Returns cache blocks freed by the block cache loop.
    pub fn cache_blocks_recycled(&self) -> u64 {
        self.cache_blocks_recycled.load(Ordering::Relaxed)
    }

    /// Returns expired file pairs deleted.
    pub fn files_deleted(&self) -> u64 {
        self.files_deleted.load(Ordering::Relaxed)
    }
}

impl std::fmt::Display for SupervisorStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SupervisorStats {{ loads: {} ({} failed), unloads: {}, commits: {} ({} failed), recycled: {}+{}, deleted: {} }}",
            self.loads(),
            self.load_failures(),
            self.unloads(),
            self.commits(),
            self.commit_failures(),
            self.write_blocks_recycled(),
            self.cache_blocks_recycled(),
            self.files_deleted()
        )
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

/// Owns every partition engine of the worker.
pub struct Supervisor {
    ctx: EngineContext,
    config: SupervisorConfig,
    partitions: PartitionMap,
    workers: rayon::ThreadPool,
    signal: Arc<LoopSignal>,
    loops: Mutex<Vec<JoinHandle<()>>>,
    stats: SupervisorStats,
}

impl Supervisor {
    /// Creates a supervisor with its worker pool. Loops start with
    /// [`Supervisor::start`].
    pub fn new(ctx: EngineContext, config: SupervisorConfig) -> RillResult<Arc<Self>> {
        config.validate()?;
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|index| format!("rill-worker-{index}"))
            .build()
            .map_err(|err| RillError::internal(format!("failed to build worker pool: {err}")))?;
        Ok(Arc::new(Self {
            ctx,
            config,
            partitions: PartitionMap::new(),
            workers,
            signal: Arc::new(LoopSignal::new()),
            loops: Mutex::new(Vec::new()),
            stats: SupervisorStats::default(),
        }))
    }

    /// Starts the maintenance loops. Calling it again is a no-op.
    pub fn start(self: &Arc<Self>) -> RillResult<()> {
        let mut loops = self.loops.lock();
        if !loops.is_empty() || self.signal.is_stopped() {
            return Ok(());
        }
        let config = &self.config;
        let fixed = |period: Duration| move || period;
        let (sync_period, sync_jitter) = (config.sync_dfs_usage_interval, config.sync_jitter);

        loops.push(self.spawn_task(
            "recycle-write-cache",
            fixed(config.recycle_write_cache_interval),
            |supervisor| {
                supervisor.recycle_write_cache();
            },
        )?);
        loops.push(self.spawn_task(
            "recycle-block-cache",
            fixed(config.recycle_file_cache_interval),
            |supervisor| {
                supervisor.recycle_block_cache();
            },
        )?);
        loops.push(self.spawn_task(
            "delete-expired-files",
            fixed(config.delete_expired_file_interval),
            |supervisor| {
                supervisor.delete_expired_files();
            },
        )?);
        loops.push(self.spawn_task(
            "commit",
            fixed(config.commit_loop_interval),
            |supervisor| {
                supervisor.commit_due();
            },
        )?);
        loops.push(self.spawn_task(
            "sync-dfs-usage",
            move || jittered(sync_period, sync_jitter),
            |supervisor| {
                supervisor.sync_dfs_usage();
            },
        )?);
        info!(loops = loops.len(), workers = config.worker_threads, "supervisor started");
        Ok(())
    }

    fn spawn_task(
        self: &Arc<Self>,
        name: &str,
        period: impl FnMut() -> Duration + Send + 'static,
        pass: fn(&Supervisor),
    ) -> RillResult<JoinHandle<()>> {
        let weak = Arc::downgrade(self);
        let handle = spawn_loop(name, Arc::clone(&self.signal), period, move || {
            match weak.upgrade() {
                Some(supervisor) => {
                    pass(&supervisor);
                    true
                }
                None => false,
            }
        })?;
        Ok(handle)
    }

    fn fan_out<T, R>(&self, items: Vec<T>, op: impl Fn(T) -> R + Send + Sync) -> Vec<R>
    where
        T: Send,
        R: Send,
    {
        if items.len() < self.config.concurrent_threshold {
            items.into_iter().map(op).collect()
        } else {
            self.workers
                .install(|| items.into_par_iter().map(|item| op(item)).collect())
        }
    }

    // -----------------------------------------------------------------------
    // Load / unload
    // -----------------------------------------------------------------------

    /// Loads a batch of partitions.
    pub fn load(&self, specs: Vec<PartitionSpec>) -> BatchResult {
        self.fan_out(specs, |spec| {
            let partition = spec.partition.clone();
            let result = self.load_one(spec);
            if let Err(err) = &result {
                self.stats.load_failures.fetch_add(1, Ordering::Relaxed);
                warn!(partition = %partition, error = %err, "load failed");
            }
            (partition, result)
        })
    }

    fn load_one(&self, spec: PartitionSpec) -> RillResult<()> {
        let partition = spec.partition.clone();
        if self.partitions.contains(&partition) {
            return Err(RillError::PartitionAlreadyLoaded { partition });
        }
        let started = Instant::now();
        let engine = PartitionEngine::load(spec, &self.ctx)?;
        if let Err(engine) = self.partitions.insert(engine) {
            engine.stop(self.stop_options(true))?;
            return Err(RillError::PartitionAlreadyLoaded { partition });
        }
        self.stats.loads.fetch_add(1, Ordering::Relaxed);
        self.ctx.metrics.latency("supervisor.load", started.elapsed());
        Ok(())
    }

    /// Unloads a batch of partitions. Without `force` each engine commits
    /// what it buffered before its memory is released.
    pub fn unload(&self, partitions: Vec<PartitionId>, force: bool) -> BatchResult {
        self.fan_out(partitions, |partition| {
            let result = self.unload_one(&partition, force);
            (partition, result)
        })
    }

    fn unload_one(&self, partition: &PartitionId, force: bool) -> RillResult<()> {
        let engine = self
            .partitions
            .remove(partition)
            .ok_or_else(|| RillError::PartitionNotFound {
                partition: partition.clone(),
            })?;
        let started = Instant::now();
        let result = engine.stop(self.stop_options(force));
        let holders = Arc::strong_count(&engine) - 1;
        if holders > 0 {
            debug!(partition = %partition, holders, "engine still referenced after stop");
        }
        drop(engine);

        self.stats.unloads.fetch_add(1, Ordering::Relaxed);
        self.ctx.metrics.latency("supervisor.unload", started.elapsed());
        info!(
            partition = %partition,
            force,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "partition unloaded"
        );
        result
    }

    fn stop_options(&self, force: bool) -> StopOptions {
        let options = StopOptions::graceful(self.config.unload_grace_period, self.config.unload_timeout);
        if force {
            options.forced()
        } else {
            options
        }
    }

    /// Halts the loops and unloads every partition.
    pub fn stop(&self) -> RillResult<()> {
        self.signal.stop();
        let handles = std::mem::take(&mut *self.loops.lock());
        for handle in handles {
            if handle.join().is_err() {
                warn!("maintenance loop panicked");
            }
        }

        let results = self.unload(self.partitions.ids(), false);
        let failed = results.iter().filter(|(_, result)| result.is_err()).count();
        if !self.partitions.is_empty() {
            error!(left = self.partitions.len(), "partitions left after stop");
            return Err(RillError::internal("partition map not empty after stop"));
        }
        info!(unloaded = results.len(), failed, stats = %self.stats, "supervisor stopped");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Routing
    // -----------------------------------------------------------------------

    /// Returns the engine of `partition`.
    pub fn engine(&self, partition: &PartitionId) -> RillResult<Arc<PartitionEngine>> {
        self.partitions
            .get(partition)
            .ok_or_else(|| RillError::PartitionNotFound {
                partition: partition.clone(),
            })
    }

    fn route<T>(&self, partition: &PartitionId, op: impl FnOnce(&PartitionEngine) -> Reply<T>) -> Reply<T> {
        match self.engine(partition) {
            Ok(engine) => op(engine.as_ref()),
            Err(err) => Reply {
                meta: ResponseMeta::default(),
                result: Err(err),
            },
        }
    }

    /// Appends messages to `partition`.
    pub fn add_message(&self, partition: &PartitionId, request: WriteRequest) -> Reply<WriteAck> {
        self.route(partition, |engine| engine.add_message(request))
    }

    /// Reads from `partition`.
    pub fn get_message(&self, partition: &PartitionId, request: ReadRequest) -> Reply<ReadResponse> {
        self.route(partition, |engine| engine.get_message(request))
    }

    /// Returns the largest id of `partition`.
    pub fn get_max_message_id(&self, partition: &PartitionId) -> Reply<MaxIdInfo> {
        self.route(partition, PartitionEngine::get_max_message_id)
    }

    /// Returns the first id of `partition` written at or after `timestamp`.
    pub fn get_min_message_id_by_time(&self, partition: &PartitionId, timestamp: i64) -> Reply<u64> {
        self.route(partition, |engine| engine.get_min_message_id_by_time(timestamp))
    }

    /// Commits `partition` now.
    pub fn commit_message(&self, partition: &PartitionId) -> RillResult<()> {
        self.engine(partition)?.commit_message()
    }

    /// Returns the status of every partition, sorted by id.
    pub fn partition_statuses(&self) -> Vec<PartitionStatusSnapshot> {
        let mut statuses: Vec<_> = self
            .partitions
            .all()
            .iter()
            .map(|engine| engine.status_snapshot())
            .collect();
        statuses.sort_by(|a, b| a.partition.cmp(&b.partition));
        statuses
    }

    /// Returns the metrics of every partition, sorted by id.
    pub fn partition_metrics(&self) -> Vec<PartitionMetricsSnapshot> {
        let mut metrics: Vec<_> = self
            .partitions
            .all()
            .iter()
            .map(|engine| engine.metrics_snapshot())
            .collect();
        metrics.sort_by(|a, b| a.partition.cmp(&b.partition));
        metrics
    }

    // -----------------------------------------------------------------------
    // Maintenance passes
    // -----------------------------------------------------------------------

    /// Recycles the rings of every running engine. Returns blocks freed.
    pub fn recycle_write_cache(&self) -> usize {
        let freed: usize = self
            .partitions
            .running()
            .iter()
            .map(|engine| engine.recycle_buffer(None))
            .sum();
        if freed > 0 {
            self.stats
                .write_blocks_recycled
                .fetch_add(freed as u64, Ordering::Relaxed);
            self.ctx
                .metrics
                .gauge("worker.write_cache_usage", self.ctx.write_pool.usage());
        }
        freed
    }

    /// Recycles the block cache when it runs low, closes idle files and
    /// forgets idle readers. Returns cache blocks freed.
    pub fn recycle_block_cache(&self) -> usize {
        let cache = &self.ctx.block_cache;
        let freed = if cache.needs_recycle() {
            cache.recycle(&self.ctx.readers, cache.periodic_request()).total()
        } else {
            0
        };
        let closed = cache.recycle_file();
        let purged: usize = self
            .partitions
            .running()
            .iter()
            .map(|engine| engine.recycle_file_cache())
            .sum();
        if freed > 0 || closed > 0 || purged > 0 {
            debug!(freed, closed, purged, "recycled block cache");
        }
        self.stats
            .cache_blocks_recycled
            .fetch_add(freed as u64, Ordering::Relaxed);
        freed
    }

    /// Deletes expired file pairs of every running engine. Returns pairs
    /// deleted.
    pub fn delete_expired_files(&self) -> usize {
        let mut deleted = 0;
        for engine in self.partitions.running() {
            match engine.delete_expired_files() {
                Ok(count) => deleted += count,
                Err(err) => {
                    warn!(partition = %engine.partition(), error = %err, "expired file deletion failed");
                }
            }
        }
        self.stats
            .files_deleted
            .fetch_add(deleted as u64, Ordering::Relaxed);
        deleted
    }

    /// Commits every engine whose policy says a commit is due. Engines
    /// mid-commit or committing on their own are skipped. Returns the
    /// number of successful commits.
    pub fn commit_due(&self) -> usize {
        let due: Vec<Arc<PartitionEngine>> = self
            .partitions
            .running()
            .into_iter()
            .filter(|engine| engine.need_commit())
            .collect();
        if due.is_empty() {
            return 0;
        }
        let results = self.fan_out(due, |engine| match engine.commit_message() {
            Ok(()) => true,
            Err(err) => {
                debug!(partition = %engine.partition(), error = %err, "scheduled commit failed");
                false
            }
        });
        let committed = results.iter().filter(|ok| **ok).count();
        let failed = results.len() - committed;
        self.stats.commits.fetch_add(committed as u64, Ordering::Relaxed);
        self.stats.commit_failures.fetch_add(failed as u64, Ordering::Relaxed);
        self.ctx.metrics.counter("supervisor.commits", committed as u64);
        committed
    }

    /// Refreshes DFS usage of every running engine. Returns the total.
    pub fn sync_dfs_usage(&self) -> u64 {
        let mut total = 0;
        for engine in self.partitions.running() {
            match engine.sync_dfs_usage() {
                Ok(bytes) => total += bytes,
                Err(err) => {
                    debug!(partition = %engine.partition(), error = %err, "dfs usage sync failed");
                }
            }
        }
        self.ctx.metrics.gauge("worker.dfs_usage_bytes", total as f64);
        total
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Returns the shared engine resources.
    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Returns the loaded partitions.
    pub fn partitions(&self) -> &PartitionMap {
        &self.partitions
    }

    /// Returns the supervisor counters.
    pub fn stats(&self) -> &SupervisorStats {
        &self.stats
    }

    /// Returns true while maintenance loops run.
    pub fn is_started(&self) -> bool {
        !self.loops.lock().is_empty()
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.signal.stop();
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("partitions", &self.partitions)
            .field("loops", &self.loops.lock().len())
            .field("stats", &self.stats.to_string())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_common::config::{AdmissionConfig, BlockCacheConfig, BufferPoolConfig, PartitionConfig};
    use rill_common::dfs::LocalDfs;
    use rill_common::TopicMode;
    use rill_storage::MessageInput;

    fn supervisor(dir: &tempfile::TempDir, config: SupervisorConfig) -> Arc<Supervisor> {
        let ctx = EngineContext::new(
            Arc::new(LocalDfs::new(dir.path()).unwrap()),
            BufferPoolConfig::default()
                .with_block_size(1024)
                .with_write_cache_blocks(256)
                .with_file_cache_blocks(64)
                .with_partition_max_blocks(32),
            AdmissionConfig::default(),
            BlockCacheConfig::default(),
        )
        .unwrap();
        Supervisor::new(ctx, config).unwrap()
    }

    fn spec(topic: &str, n: u32, config: PartitionConfig) -> PartitionSpec {
        PartitionSpec::new(PartitionId::new(topic, n), 9, config)
    }

    fn idle_normal() -> PartitionConfig {
        PartitionConfig::for_mode(TopicMode::Normal)
            .with_commit_interval(Duration::from_secs(3600))
            .with_commit_threshold_bytes(usize::MAX / 2)
    }

    fn write(supervisor: &Supervisor, partition: &PartitionId, payload: &'static [u8]) -> WriteAck {
        supervisor
            .add_message(partition, WriteRequest::new(vec![MessageInput::new(payload)]))
            .into_result()
            .unwrap()
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_load_serial_and_parallel() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor(&dir, SupervisorConfig::for_testing().with_concurrent_threshold(3));

        let serial = supervisor.load(vec![spec("a", 0, idle_normal())]);
        assert!(serial.iter().all(|(_, result)| result.is_ok()));

        let parallel = supervisor.load((0..4).map(|n| spec("b", n, idle_normal())).collect());
        assert_eq!(parallel.len(), 4);
        assert!(parallel.iter().all(|(_, result)| result.is_ok()));
        assert_eq!(supervisor.partitions().len(), 5);

        let again = supervisor.load(vec![spec("a", 0, idle_normal())]);
        assert!(matches!(again[0].1, Err(RillError::PartitionAlreadyLoaded { .. })));
        assert_eq!(supervisor.stats().loads(), 5);
        assert_eq!(supervisor.stats().load_failures(), 1);

        supervisor.stop().unwrap();
        assert!(supervisor.partitions().is_empty());
    }

    #[test]
    fn test_invalid_partition_config_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor(&dir, SupervisorConfig::for_testing());
        let mut config = idle_normal();
        config.max_commit_failures = 0;
        let results = supervisor.load(vec![spec("bad", 0, config)]);
        assert!(results[0].1.is_err());
        assert!(supervisor.partitions().is_empty());
    }

    #[test]
    fn test_routing_and_unknown_partition() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor(&dir, SupervisorConfig::for_testing());
        let orders = PartitionId::new("orders", 0);
        supervisor.load(vec![spec("orders", 0, idle_normal())]);

        let ack = write(&supervisor, &orders, b"first");
        assert_eq!(ack.first_msg_id, 0);
        let read = supervisor
            .get_message(&orders, ReadRequest::new(9, "c", 0))
            .into_result()
            .unwrap();
        assert_eq!(&read.messages[0].payload[..], b"first");
        assert_eq!(
            supervisor.get_max_message_id(&orders).into_result().unwrap().max_msg_id,
            Some(0)
        );

        let missing = PartitionId::new("orders", 1);
        let reply = supervisor.add_message(&missing, WriteRequest::new(vec![MessageInput::new(&b"x"[..])]));
        assert_eq!(reply.meta, ResponseMeta::default());
        assert!(reply.result.unwrap_err().is_not_found());
        assert!(supervisor.commit_message(&missing).is_err());

        supervisor.stop().unwrap();
    }

    #[test]
    fn test_unload_commits_and_reload_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor(&dir, SupervisorConfig::for_testing());
        let orders = PartitionId::new("orders", 0);
        supervisor.load(vec![spec("orders", 0, idle_normal())]);
        write(&supervisor, &orders, b"a");
        write(&supervisor, &orders, b"b");

        let results = supervisor.unload(vec![orders.clone()], false);
        assert!(results[0].1.is_ok());
        let after = supervisor.get_message(&orders, ReadRequest::new(9, "c", 0));
        assert!(after.result.unwrap_err().is_not_found());
        assert!(supervisor.unload(vec![orders.clone()], false)[0].1.is_err());

        supervisor.load(vec![spec("orders", 0, idle_normal())]);
        let engine = supervisor.engine(&orders).unwrap();
        assert_eq!(engine.committed_id(), 2);
        assert_eq!(write(&supervisor, &orders, b"c").first_msg_id, 2);
        let read = supervisor
            .get_message(&orders, ReadRequest::new(9, "c", 0))
            .into_result()
            .unwrap();
        assert_eq!(read.messages.len(), 3);
        drop(engine);
        supervisor.stop().unwrap();
    }

    #[test]
    fn test_forced_unload_skips_commit() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor(&dir, SupervisorConfig::for_testing());
        let orders = PartitionId::new("orders", 0);
        supervisor.load(vec![spec("orders", 0, idle_normal())]);
        write(&supervisor, &orders, b"lost");
        supervisor.unload(vec![orders.clone()], true);

        supervisor.load(vec![spec("orders", 0, idle_normal())]);
        assert_eq!(supervisor.engine(&orders).unwrap().received_id(), 0);
        supervisor.stop().unwrap();
    }

    #[test]
    fn test_commit_due_skips_idle_and_security() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor(&dir, SupervisorConfig::for_testing());
        let eager = PartitionConfig::for_mode(TopicMode::Normal).with_commit_interval(Duration::from_millis(1));
        let security = PartitionConfig::for_mode(TopicMode::Security)
            .with_security_commit(Duration::from_millis(5), 1024 * 1024);
        supervisor.load(vec![
            spec("eager", 0, eager),
            spec("idle", 0, idle_normal()),
            spec("secure", 0, security),
        ]);
        let (eager, idle, secure) = (
            PartitionId::new("eager", 0),
            PartitionId::new("idle", 0),
            PartitionId::new("secure", 0),
        );
        write(&supervisor, &idle, b"i");
        write(&supervisor, &secure, b"s");
        std::thread::sleep(Duration::from_millis(5));
        write(&supervisor, &eager, b"e");
        std::thread::sleep(Duration::from_millis(5));

        let committed = supervisor.commit_due();
        assert!(committed <= 1);
        assert_eq!(supervisor.engine(&eager).unwrap().committed_id(), 1);
        assert_eq!(supervisor.engine(&idle).unwrap().committed_id(), 0);
        assert_eq!(supervisor.engine(&secure).unwrap().committed_id(), 1);
        assert_eq!(supervisor.commit_due(), 0);
        supervisor.stop().unwrap();
    }

    #[test]
    fn test_loops_commit_and_stop() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor(&dir, SupervisorConfig::for_testing());
        supervisor.start().unwrap();
        supervisor.start().unwrap();
        assert!(supervisor.is_started());

        let orders = PartitionId::new("orders", 0);
        let config = PartitionConfig::for_mode(TopicMode::Normal)
            .with_commit_interval(Duration::from_millis(5))
            .with_commit_threshold_bytes(usize::MAX / 2);
        supervisor.load(vec![spec("orders", 0, config)]);
        write(&supervisor, &orders, b"tick");

        let engine = supervisor.engine(&orders).unwrap();
        assert!(wait_for(|| engine.committed_id() == 1));
        assert!(wait_for(|| engine.metrics_snapshot().dfs_usage_bytes > 0));
        drop(engine);

        supervisor.stop().unwrap();
        assert!(!supervisor.is_started());
        assert!(supervisor.partitions().is_empty());
        supervisor.stop().unwrap();
    }

    #[test]
    fn test_recycle_write_cache_follows_readers() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor(&dir, SupervisorConfig::for_testing());
        let clicks = PartitionId::new("clicks", 0);
        supervisor.load(vec![spec("clicks", 0, PartitionConfig::for_mode(TopicMode::MemoryOnly))]);
        for _ in 0..4 {
            supervisor
                .add_message(&clicks, WriteRequest::new(vec![MessageInput::new(vec![0u8; 1024])]))
                .into_result()
                .unwrap();
        }
        supervisor
            .get_message(&clicks, ReadRequest::new(9, "reader", 0).with_max_count(2))
            .into_result()
            .unwrap();

        assert_eq!(supervisor.recycle_write_cache(), 2);
        assert_eq!(supervisor.engine(&clicks).unwrap().min_message_id(), 2);
        assert_eq!(supervisor.stats().write_blocks_recycled(), 2);
        supervisor.stop().unwrap();
    }

    #[test]
    fn test_snapshots_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor(&dir, SupervisorConfig::for_testing());
        supervisor.load(vec![spec("z", 0, idle_normal()), spec("a", 1, idle_normal())]);
        let statuses = supervisor.partition_statuses();
        assert_eq!(statuses[0].partition, PartitionId::new("a", 1));
        assert_eq!(statuses[1].session_id, 9);
        assert_eq!(supervisor.partition_metrics().len(), 2);
        assert_eq!(supervisor.delete_expired_files(), 0);
        assert_eq!(supervisor.recycle_block_cache(), 0);
        supervisor.stop().unwrap();
    }
}
