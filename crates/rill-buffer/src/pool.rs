//! Hierarchical block pool.
//!
//! # Design
//!
//! - A root pool creates zeroed blocks lazily, never more than its max
//! - A chained pool keeps a small free list and borrows from its parent
//! - `used + unused(own) <= max` holds for every pool at all times
//! - Freed blocks above the reserve go straight back to the parent

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::block::Block;
use crate::error::{BufferError, BufferResult};
use crate::BufferPoolStats;

/// Mutable pool bookkeeping, guarded by one lock.
#[derive(Debug)]
struct PoolState {
    /// Blocks owned by this pool and not handed out.
    free: Vec<Block>,
    /// Blocks currently held by callers.
    used: usize,
    /// Upper bound on `used`.
    max: usize,
    /// Free-list length kept before blocks are forwarded to the parent.
    reserve: usize,
    /// Root pools only: blocks in existence (`used + free.len()`).
    created: usize,
}

/// A pool of fixed-size blocks, optionally chained to a parent.
///
/// # Example
///
/// ```rust
/// use rill_buffer::BufferPool;
/// use std::sync::Arc;
///
/// let center = Arc::new(BufferPool::new(1024, 64).unwrap());
/// let partition = BufferPool::chained(Arc::clone(&center), 8, 2).unwrap();
///
/// let block = partition.allocate().expect("pool not exhausted");
/// assert_eq!(block.len(), 1024);
/// assert_eq!(center.used_block_count(), 1);
///
/// partition.free(block);
/// assert_eq!(partition.unused_block_count(), 1);
/// ```
pub struct BufferPool {
    label: String,
    block_size: usize,
    parent: Option<Arc<BufferPool>>,
    state: Mutex<PoolState>,
    allocations: AtomicU64,
    exhaustions: AtomicU64,
    returned_to_parent: AtomicU64,
}

impl BufferPool {
    /// Creates a root pool that hands out at most `max_block_count` blocks.
    pub fn new(block_size: usize, max_block_count: usize) -> BufferResult<Self> {
        if block_size == 0 {
            return Err(BufferError::config("block_size must be greater than 0"));
        }
        Ok(Self::build(block_size, max_block_count, 0, None))
    }

    /// Creates a root pool sized by total bytes.
    pub fn for_bytes(block_size: usize, total_bytes: usize) -> BufferResult<Self> {
        if block_size == 0 {
            return Err(BufferError::config("block_size must be greater than 0"));
        }
        Self::new(block_size, total_bytes / block_size)
    }

    /// Creates a pool that borrows blocks from `parent`.
    ///
    /// The pool never holds more than `max_block_count` blocks and keeps up
    /// to `reserve_block_count` freed blocks for itself.
    pub fn chained(
        parent: Arc<BufferPool>,
        max_block_count: usize,
        reserve_block_count: usize,
    ) -> BufferResult<Self> {
        if reserve_block_count > max_block_count {
            return Err(BufferError::config(format!(
                "reserve {reserve_block_count} exceeds max {max_block_count}"
            )));
        }
        let block_size = parent.block_size;
        Ok(Self::build(
            block_size,
            max_block_count,
            reserve_block_count,
            Some(parent),
        ))
    }

    fn build(block_size: usize, max: usize, reserve: usize, parent: Option<Arc<Self>>) -> Self {
        Self {
            label: String::new(),
            block_size,
            parent,
            state: Mutex::new(PoolState {
                free: Vec::new(),
                used: 0,
                max,
                reserve,
                created: 0,
            }),
            allocations: AtomicU64::new(0),
            exhaustions: AtomicU64::new(0),
            returned_to_parent: AtomicU64::new(0),
        }
    }

    /// Attaches a label used in log messages.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Returns the label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Allocates a block.
    ///
    /// Tries the own free list first, then borrows from the parent, and a
    /// root pool creates a fresh block while below its max. Returns `None`
    /// when the pool (or its parent) is exhausted.
    #[must_use]
    pub fn allocate(&self) -> Option<Block> {
        let mut state = self.state.lock();
        if state.used >= state.max {
            drop(state);
            self.exhaustions.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        if let Some(block) = state.free.pop() {
            state.used += 1;
            drop(state);
            self.allocations.fetch_add(1, Ordering::Relaxed);
            return Some(block);
        }

        // The slot is claimed before the lock is released so concurrent
        // callers cannot overshoot `max` while the parent is consulted.
        state.used += 1;
        let block = match &self.parent {
            None => {
                state.created += 1;
                drop(state);
                Some(Block::zeroed(self.block_size))
            }
            Some(parent) => {
                drop(state);
                let borrowed = parent.allocate();
                if borrowed.is_none() {
                    self.state.lock().used -= 1;
                }
                borrowed
            }
        };

        match block {
            Some(block) => {
                self.allocations.fetch_add(1, Ordering::Relaxed);
                Some(block)
            }
            None => {
                self.exhaustions.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Returns a block to the pool.
    ///
    /// A chained pool whose free list already holds its reserve forwards the
    /// block to the parent.
    pub fn free(&self, block: Block) {
        debug_assert_eq!(
            block.len(),
            self.block_size,
            "{}",
            BufferError::ForeignBlock {
                expected: self.block_size,
                actual: block.len(),
            }
        );

        let mut state = self.state.lock();
        if state.used == 0 {
            warn!(pool = %self.label, "free called on a pool with no used blocks");
        }
        state.used = state.used.saturating_sub(1);

        match &self.parent {
            Some(parent) if state.free.len() >= state.reserve => {
                drop(state);
                self.returned_to_parent.fetch_add(1, Ordering::Relaxed);
                parent.free(block);
            }
            _ => state.free.push(block),
        }
    }

    /// Frees every block yielded by `blocks`.
    pub fn free_all(&self, blocks: impl IntoIterator<Item = Block>) {
        for block in blocks {
            self.free(block);
        }
    }

    /// Sets the number of free blocks kept locally and trims the free list
    /// down to it.
    pub fn set_reserve_block_count(&self, reserve: usize) {
        {
            let mut state = self.state.lock();
            state.reserve = reserve.min(state.max);
        }
        self.free_unused_blocks();
    }

    /// Releases free blocks above the reserve.
    ///
    /// A chained pool hands them to its parent; a root pool drops them so
    /// their memory goes back to the allocator. Returns the number released.
    pub fn free_unused_blocks(&self) -> usize {
        let surplus: Vec<Block> = {
            let mut state = self.state.lock();
            let keep = state.reserve.min(state.free.len());
            let surplus = state.free.split_off(keep);
            if self.parent.is_none() {
                state.created -= surplus.len();
            }
            surplus
        };

        let released = surplus.len();
        if released == 0 {
            return 0;
        }
        match &self.parent {
            Some(parent) => {
                self.returned_to_parent
                    .fetch_add(released as u64, Ordering::Relaxed);
                parent.free_all(surplus);
            }
            None => drop(surplus),
        }
        debug!(pool = %self.label, released, "released unused blocks");
        released
    }

    /// Returns the block size in bytes.
    #[inline]
    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    /// Returns the number of blocks held by callers.
    #[must_use]
    pub fn used_block_count(&self) -> usize {
        self.state.lock().used
    }

    /// Returns the number of blocks on the own free list.
    #[must_use]
    pub fn unused_block_count(&self) -> usize {
        self.state.lock().free.len()
    }

    /// Returns the maximum number of blocks the pool hands out.
    #[must_use]
    pub fn max_block_count(&self) -> usize {
        self.state.lock().max
    }

    /// Returns the reserve.
    #[must_use]
    pub fn reserve_block_count(&self) -> usize {
        self.state.lock().reserve
    }

    /// Returns how many blocks the parent could still hand out, or 0 for a
    /// root pool.
    #[must_use]
    pub fn parent_unused_block_count(&self) -> usize {
        self.parent
            .as_ref()
            .map_or(0, |parent| parent.available_block_count())
    }

    /// Returns how many more blocks `allocate` can currently succeed for.
    #[must_use]
    pub fn available_block_count(&self) -> usize {
        let (headroom, unused) = {
            let state = self.state.lock();
            (state.max - state.used, state.free.len())
        };
        match &self.parent {
            None => headroom,
            Some(parent) => headroom.min(unused + parent.available_block_count()),
        }
    }

    /// Returns true if this pool borrows from a parent.
    #[inline]
    #[must_use]
    pub fn is_chained(&self) -> bool {
        self.parent.is_some()
    }

    /// Returns the parent pool, if any.
    #[must_use]
    pub fn parent(&self) -> Option<&Arc<BufferPool>> {
        self.parent.as_ref()
    }

    /// Returns the fraction of `max` in use.
    #[must_use]
    pub fn usage(&self) -> f64 {
        self.stats().usage()
    }

    /// Returns a snapshot of the pool's statistics.
    #[must_use]
    pub fn stats(&self) -> BufferPoolStats {
        let (used, unused, max) = {
            let state = self.state.lock();
            (state.used, state.free.len(), state.max)
        };
        BufferPoolStats {
            allocations: self.allocations.load(Ordering::Relaxed),
            exhaustions: self.exhaustions.load(Ordering::Relaxed),
            returned_to_parent: self.returned_to_parent.load(Ordering::Relaxed),
            used_blocks: used,
            unused_blocks: unused,
            max_blocks: max,
        }
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.used > 0 {
            warn!(
                pool = %self.label,
                used = state.used,
                "buffer pool dropped with blocks outstanding"
            );
        }
        let free = std::mem::take(&mut state.free);
        if let Some(parent) = &self.parent {
            parent.free_all(free);
        }
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BufferPool")
            .field("label", &self.label)
            .field("block_size", &self.block_size)
            .field("used", &state.used)
            .field("unused", &state.free.len())
            .field("max", &state.max)
            .field("chained", &self.parent.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;

    #[test]
    fn test_exhaustion_and_recovery() {
        let pool = BufferPool::for_bytes(10, 100).unwrap();
        let mut blocks: Vec<Block> = (0..10).map(|_| pool.allocate().unwrap()).collect();
        assert_eq!(pool.used_block_count(), 10);
        assert!(pool.allocate().is_none());
        assert_eq!(pool.stats().exhaustions, 1);

        pool.free(blocks.pop().unwrap());
        let again = pool.allocate();
        assert!(again.is_some());
        blocks.extend(again);
        pool.free_all(blocks);
        assert_eq!(pool.used_block_count(), 0);
    }

    #[test]
    fn test_invalid_geometry() {
        assert!(BufferPool::new(0, 10).is_err());
        let root = Arc::new(BufferPool::new(8, 10).unwrap());
        assert!(BufferPool::chained(root, 2, 3).is_err());
    }

    #[test]
    fn test_chained_borrows_from_parent() {
        let root = Arc::new(BufferPool::new(64, 4).unwrap());
        let child = BufferPool::chained(Arc::clone(&root), 3, 1).unwrap();

        let a = child.allocate().unwrap();
        let b = child.allocate().unwrap();
        let c = child.allocate().unwrap();
        assert!(child.allocate().is_none(), "child max reached");
        assert_eq!(root.used_block_count(), 3);
        assert_eq!(child.parent_unused_block_count(), 1);

        // First free stays local (reserve 1), the rest go back to the root.
        child.free(a);
        assert_eq!(child.unused_block_count(), 1);
        child.free(b);
        child.free(c);
        assert_eq!(child.unused_block_count(), 1);
        assert_eq!(root.used_block_count(), 1);
        assert_eq!(child.stats().returned_to_parent, 2);
    }

    #[test]
    fn test_child_limited_by_parent() {
        let root = Arc::new(BufferPool::new(64, 2).unwrap());
        let child = BufferPool::chained(Arc::clone(&root), 10, 0).unwrap();
        let blocks: Vec<_> = (0..2).map(|_| child.allocate().unwrap()).collect();
        assert!(child.allocate().is_none());
        assert_eq!(child.used_block_count(), 2, "failed borrow releases the slot");
        assert_eq!(child.available_block_count(), 0);
        child.free_all(blocks);
        assert_eq!(root.used_block_count(), 0);
    }

    #[test]
    fn test_free_unused_blocks() {
        let root = Arc::new(BufferPool::new(64, 8).unwrap());
        let child = BufferPool::chained(Arc::clone(&root), 8, 8).unwrap();
        let blocks: Vec<_> = (0..5).map(|_| child.allocate().unwrap()).collect();
        child.free_all(blocks);
        assert_eq!(child.unused_block_count(), 5);
        assert_eq!(root.used_block_count(), 5);

        child.set_reserve_block_count(2);
        assert_eq!(child.unused_block_count(), 2);
        assert_eq!(root.used_block_count(), 2);
        assert_eq!(root.unused_block_count(), 3);

        assert_eq!(root.free_unused_blocks(), 3);
        assert_eq!(root.unused_block_count(), 0);
        assert_eq!(root.available_block_count(), 6);
    }

    #[test]
    fn test_drop_returns_free_list_to_parent() {
        let root = Arc::new(BufferPool::new(64, 4).unwrap());
        {
            let child = BufferPool::chained(Arc::clone(&root), 4, 4).unwrap();
            let block = child.allocate().unwrap();
            child.free(block);
            assert_eq!(root.used_block_count(), 1);
        }
        assert_eq!(root.used_block_count(), 0);
    }

    #[test]
    fn test_concurrent_never_exceeds_max() {
        let root = Arc::new(BufferPool::new(32, 16).unwrap());
        let children: Vec<_> = (0..4)
            .map(|_| Arc::new(BufferPool::chained(Arc::clone(&root), 6, 1).unwrap()))
            .collect();

        let handles: Vec<_> = children
            .iter()
            .map(|child| {
                let child = Arc::clone(child);
                let root = Arc::clone(&root);
                thread::spawn(move || {
                    for _ in 0..200 {
                        let mut held = Vec::new();
                        while let Some(block) = child.allocate() {
                            assert!(child.used_block_count() <= 6);
                            assert!(root.used_block_count() <= 16);
                            held.push(block);
                        }
                        child.free_all(held);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        for child in &children {
            assert_eq!(child.used_block_count(), 0);
        }
    }

    proptest! {
        #[test]
        fn prop_pool_invariants(ops in prop::collection::vec(any::<bool>(), 1..200)) {
            let root = Arc::new(BufferPool::new(16, 12).unwrap());
            let child = BufferPool::chained(Arc::clone(&root), 8, 2).unwrap();
            let mut held = Vec::new();

            for allocate in ops {
                if allocate {
                    if let Some(block) = child.allocate() {
                        held.push(block);
                    }
                } else if let Some(block) = held.pop() {
                    child.free(block);
                }
                prop_assert_eq!(child.used_block_count(), held.len());
                prop_assert!(child.used_block_count() <= child.max_block_count());
                prop_assert!(child.used_block_count() + child.unused_block_count() <= child.max_block_count());
                prop_assert!(root.used_block_count() <= root.max_block_count());
                prop_assert_eq!(root.used_block_count(), held.len() + child.unused_block_count());
            }
            child.free_all(held);
        }
    }
}
