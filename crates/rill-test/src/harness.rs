use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use rill_broker::Supervisor;
use rill_common::config::{
    AdmissionConfig, BlockCacheConfig, BufferPoolConfig, PartitionConfig, SupervisorConfig,
};
use rill_common::dfs::{join, Dfs, LocalDfs};
use rill_common::naming::{is_data_file, parse_start_id};
use rill_common::{PartitionId, TopicMode};
use rill_storage::{EngineContext, PartitionEngine, PartitionSpec, StopOptions};

use crate::fault::FaultyDfs;

/// Block size used by every harness pool.
pub const BLOCK_SIZE: usize = 1024;

/// Session id of harness partitions.
pub const SESSION: u64 = 1;

/// A temporary DFS root behind a [`FaultyDfs`] plus the shared engine
/// resources built on it.
pub struct Harness {
    dfs: Arc<FaultyDfs>,
    ctx: EngineContext,
    _dir: TempDir,
}

impl Harness {
    /// Creates a harness whose partitions may hold `partition_blocks` blocks.
    pub fn new(partition_blocks: usize) -> Self {
        let buffer = BufferPoolConfig::default()
            .with_block_size(BLOCK_SIZE)
            .with_write_cache_blocks(partition_blocks * 8)
            .with_file_cache_blocks(256)
            .with_partition_max_blocks(partition_blocks);
        Self::with_buffer(buffer)
    }

    /// Creates a harness with explicit pool geometry.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory or the context cannot be created.
    pub fn with_buffer(mut buffer: BufferPoolConfig) -> Self {
        buffer.partition_reserve_blocks = buffer.partition_reserve_blocks.min(1);
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let local = LocalDfs::new(dir.path()).expect("Failed to open local DFS");
        let dfs = Arc::new(FaultyDfs::new(Arc::new(local)));
        let shared: Arc<dyn Dfs> = Arc::clone(&dfs) as Arc<dyn Dfs>;
        let ctx = EngineContext::new(
            shared,
            buffer,
            AdmissionConfig::default(),
            BlockCacheConfig::default(),
        )
        .expect("Failed to build engine context");
        Self { dfs, ctx, _dir: dir }
    }

    /// Returns the fault injector.
    pub fn dfs(&self) -> &FaultyDfs {
        &self.dfs
    }

    /// Returns the shared engine resources.
    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Loads partition `orders/<partition>` with `config`.
    ///
    /// # Panics
    ///
    /// Panics if the engine fails to load.
    pub fn load(&self, partition: u32, config: PartitionConfig) -> Arc<PartitionEngine> {
        PartitionEngine::load(spec(partition, config), &self.ctx)
            .expect("Failed to load partition")
    }

    /// Builds a supervisor over the harness context with fast loops.
    ///
    /// # Panics
    ///
    /// Panics if the supervisor configuration is rejected.
    pub fn supervisor(&self) -> Arc<Supervisor> {
        Supervisor::new(self.ctx.clone(), SupervisorConfig::for_testing())
            .expect("Failed to create supervisor")
    }

    /// Returns the data files of `orders/<partition>` ordered by start id.
    ///
    /// # Panics
    ///
    /// Panics if the directory cannot be listed.
    pub fn data_files(&self, partition: u32) -> Vec<(u64, String)> {
        let dir = partition_id(partition).to_string();
        let mut files: Vec<(u64, String)> = self
            .dfs
            .sorted_list(&dir)
            .expect("Failed to list partition dir")
            .into_iter()
            .filter(|name| is_data_file(name))
            .filter_map(|name| parse_start_id(&name).map(|id| (id, join(&dir, &name))))
            .collect();
        files.sort();
        files
    }
}

impl std::fmt::Debug for Harness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harness")
            .field("dfs", &self.dfs)
            .field("ctx", &self.ctx)
            .finish()
    }
}

/// Returns the id of harness partition `partition`.
pub fn partition_id(partition: u32) -> PartitionId {
    PartitionId::new("orders", partition)
}

/// Returns the `PartitionSpec` of harness partition `partition`.
pub fn spec(partition: u32, config: PartitionConfig) -> PartitionSpec {
    PartitionSpec::new(partition_id(partition), SESSION, config)
}

/// Returns a config that only commits when asked.
pub fn manual_commit(mode: TopicMode) -> PartitionConfig {
    PartitionConfig::for_mode(mode)
        .with_commit_interval(Duration::from_secs(3600))
        .with_commit_threshold_bytes(usize::MAX / 2)
}

/// Returns stop options short enough for tests.
pub fn quick_stop() -> StopOptions {
    StopOptions::graceful(Duration::from_millis(50), Duration::from_secs(5))
}
