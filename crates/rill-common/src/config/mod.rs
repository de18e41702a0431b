//! Configuration for Rill.
//!
//! This module provides configuration structures for the buffer pools,
//! admission control, block cache, partition engines and supervisor loops.

mod components;

pub use components::{
    AdmissionConfig, BlockCacheConfig, BufferPoolConfig, ObsoleteFileCriterion, PartitionConfig,
    SupervisorConfig,
};
