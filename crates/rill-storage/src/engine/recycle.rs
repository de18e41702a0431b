//! Memory recycling and periodic maintenance of one engine.

use std::sync::atomic::Ordering;

use tracing::{debug, info};

use rill_common::RillResult;

use super::PartitionEngine;

impl PartitionEngine {
    /// Frees ring blocks.
    ///
    /// Messages every reader has consumed go first, never past what the
    /// commit policy allows. Without reader positions (or consumer commits
    /// in memory-prefer mode) nothing counts as consumed. If that frees
    /// nothing, or less than `need` blocks, and the pool is under pressure,
    /// `recycle_percent` of the recyclable bytes (at least the deficit) are
    /// dropped regardless of readers. Surplus blocks then go back to the
    /// write pool.
    ///
    /// Returns the number of blocks freed from the ring.
    pub fn recycle_buffer(&self, need: Option<usize>) -> usize {
        let progress = self.progress();
        let recyclable = self.policy.recyclable_id(&progress);
        let consumed = self
            .readers
            .min_position(&self.partition)
            .or_else(|| self.policy.consumed_id(&progress))
            .unwrap_or(0);
        let bound = consumed.min(recyclable);
        let deficit = need.unwrap_or(0);
        let under_pressure =
            need.is_some() || self.pool.usage() >= self.config.recycle_threshold;

        let mut state = self.ring.lock();
        let mut freed = state.ring.evict_before(bound).blocks;
        let mut forced = false;
        if under_pressure && (freed == 0 || freed < deficit) {
            let recyclable_bytes = state
                .ring
                .bytes()
                .saturating_sub(state.ring.bytes_from(recyclable));
            let by_percent = (recyclable_bytes as f64 * self.config.recycle_percent).ceil() as usize;
            let by_deficit = deficit.saturating_sub(freed) * self.pool.block_size();
            let target = by_percent.max(by_deficit);
            if target > 0 {
                let evicted = state.ring.evict_bytes(recyclable, target);
                forced = evicted.messages > 0;
                freed += evicted.blocks;
            }
        }
        state.unwritten_bytes = state.ring.bytes_from(self.written_id());
        let front = state.ring.front_id();
        drop(state);

        let returned = self.pool.free_unused_blocks();
        self.stats.record_recycle(freed, forced);
        if freed > 0 || forced {
            debug!(
                partition = %self.partition,
                freed,
                returned,
                forced,
                front_msg_id = front,
                "recycled write buffer"
            );
            self.metrics.counter("partition.recycled_blocks", freed as u64);
        }
        freed
    }

    /// Drops readers idle longer than `reader_expire_time`.
    pub fn recycle_file_cache(&self) -> usize {
        let purged = self
            .readers
            .purge_idle(&self.partition, self.config.reader_expire_time);
        if purged > 0 {
            debug!(partition = %self.partition, purged, "purged idle readers");
        }
        purged
    }

    /// Deletes file pairs the obsolete criterion no longer keeps and evicts
    /// their cached blocks. Returns the number of pairs deleted.
    pub fn delete_expired_files(&self) -> RillResult<usize> {
        if !self.policy.persists() || !self.policy.deletes_expired_files() {
            return Ok(0);
        }
        let committed_ts = self.ids.committed_ts.load(Ordering::Acquire);
        let deleted = self.file_manager.del_expired_file(committed_ts)?;
        for pair in &deleted {
            self.block_cache.invalidate_file(&pair.meta_name);
            self.block_cache.invalidate_file(&pair.data_name);
        }
        if let Some(last) = deleted.last() {
            info!(
                partition = %self.partition,
                pairs = deleted.len(),
                min_msg_id = last.end_id,
                "deleted expired files"
            );
        }
        Ok(deleted.len())
    }

    /// Refreshes the DFS usage reported in metrics.
    pub fn sync_dfs_usage(&self) -> RillResult<u64> {
        if !self.policy.persists() {
            return Ok(0);
        }
        let bytes = self.file_manager.total_size()?;
        self.dfs_usage.store(bytes, Ordering::Relaxed);
        self.metrics.gauge("partition.dfs_usage_bytes", bytes as f64);
        Ok(bytes)
    }
}
