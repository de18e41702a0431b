//! # rill-cache
//!
//! Admission control and DFS block caching for Rill.
//!
//! - **AdmissionCenter**: bounded concurrency counters and per-(file, block)
//!   leases that de-duplicate concurrent fetches of the same block
//! - **ReaderInfoMap**: soft per-reader state (position and read rate)
//! - **BlockCache**: meta/data block cache with obsolete and distance eviction
//!
//! ```text
//!   read_block(file, offset)
//!        │
//!        ├─ hit ────────────────────────────────► Arc<CachedBlock>
//!        │
//!        └─ miss ─► lease(file, block) ─► re-check ─► read-file slot
//!                                                     │
//!                        pread one aligned block ◄────┘
//!                        cache unless short tail of an appending file
//! ```
//!
//! # Example
//!
//! ```rust
//! use rill_cache::AdmissionCenter;
//! use rill_common::config::AdmissionConfig;
//!
//! let center = AdmissionCenter::new(AdmissionConfig::default().with_read_limit(1));
//! assert!(center.inc_read_count());
//! assert!(!center.inc_read_count());
//!
//! // get-max-id has its own counter, capped at the same limit.
//! assert!(center.inc_get_max_id_count());
//! assert!(!center.inc_get_max_id_count());
//! center.dec_get_max_id_count();
//! center.dec_read_count();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod admission;
pub mod block_cache;
pub mod reader;
pub mod stats;

pub use admission::{AdmissionCenter, AdmissionPermit, FileReadPermit, Lease, PermissionKey};
pub use block_cache::{
    BlockCache, CacheError, CacheResult, CachedBlock, FileBlockKey, RecycleOutcome, RecycleRequest,
};
pub use reader::{ReadFileInfo, ReaderHandle, ReaderInfo, ReaderInfoMap, ReaderKey, ReaderPosition};
pub use stats::{AdmissionStats, CacheStats};
