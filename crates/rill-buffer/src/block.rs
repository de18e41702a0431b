//! Fixed-size byte blocks.

use std::fmt;
use std::ops::{Deref, DerefMut};

/// A fixed-size, heap-allocated byte buffer owned by exactly one holder.
///
/// Blocks are created by a root [`BufferPool`](crate::BufferPool) and must
/// be handed back with [`BufferPool::free`](crate::BufferPool::free) when the
/// holder is done. Dropping a block instead simply releases its memory and
/// leaves the pool's used count too high.
pub struct Block {
    data: Box<[u8]>,
}

impl Block {
    /// Allocates a zeroed block.
    pub(crate) fn zeroed(size: usize) -> Self {
        Self {
            data: vec![0u8; size].into_boxed_slice(),
        }
    }

    /// Returns the block size.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true for a zero-sized block.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the contents.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Returns the contents mutably.
    #[inline]
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Deref for Block {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for Block {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_access() {
        let mut block = Block::zeroed(16);
        assert_eq!(block.len(), 16);
        assert!(block.iter().all(|b| *b == 0));

        block[..3].copy_from_slice(b"abc");
        assert_eq!(&block.as_slice()[..3], b"abc");
        block.as_mut_slice()[15] = 9;
        assert_eq!(block[15], 9);
    }
}
