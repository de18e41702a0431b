//! # rill-buffer
//!
//! Fixed-size block pools for Rill.
//!
//! Pools form a two-level hierarchy: one worker-wide root pool per purpose
//! (write cache, file cache) and one chained pool per partition that borrows
//! blocks from the root up to a private quota.
//!
//! ```text
//!            ┌──────────────────────────┐
//!            │  root pool (write cache) │  creates blocks lazily up to max
//!            └────────────┬─────────────┘
//!          borrow ▲       │       ▲ return surplus
//!      ┌──────────┴──┐ ┌──┴───────┴──┐
//!      │ partition A │ │ partition B │  own free list, own max, reserve
//!      └─────────────┘ └─────────────┘
//! ```
//!
//! Running out of blocks is not an error: [`BufferPool::allocate`] returns
//! `None` and the caller recycles and retries, or rejects the request.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod block;
mod error;
mod pool;

pub use block::Block;
pub use error::{BufferError, BufferResult};
pub use pool::BufferPool;

/// Point-in-time statistics of one pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferPoolStats {
    /// Successful allocations.
    pub allocations: u64,
    /// Allocations that found the pool exhausted.
    pub exhaustions: u64,
    /// Blocks handed back to the parent pool.
    pub returned_to_parent: u64,
    /// Blocks currently held by callers.
    pub used_blocks: usize,
    /// Blocks on the pool's own free list.
    pub unused_blocks: usize,
    /// Maximum blocks the pool may hand out.
    pub max_blocks: usize,
}

impl BufferPoolStats {
    /// Returns the fraction of the pool in use (0.0 to 1.0).
    #[must_use]
    pub fn usage(&self) -> f64 {
        if self.max_blocks == 0 {
            0.0
        } else {
            self.used_blocks as f64 / self.max_blocks as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_usage() {
        let mut stats = BufferPoolStats::default();
        assert_eq!(stats.usage(), 0.0);

        stats.max_blocks = 10;
        stats.used_blocks = 4;
        assert!((stats.usage() - 0.4).abs() < f64::EPSILON);
    }
}
