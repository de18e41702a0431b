//! # rill-common
//!
//! Common types, errors, and utilities for Rill.
//!
//! This crate provides the foundational types and abstractions shared by the
//! buffer pool, block cache, partition engine and supervisor:
//!
//! - **Types**: Partition identifiers, topic modes, partition status, read filters
//! - **Errors**: Unified error handling with `RillError` and stable `ErrorCode`s
//! - **Config**: Component configuration structures
//! - **DFS**: The distributed-filesystem abstraction and a local implementation
//! - **Naming**: File-pair naming shared by the committer and the block cache
//!
//! ## Example
//!
//! ```rust
//! use rill_common::types::{PartitionId, TopicMode};
//! use rill_common::error::RillResult;
//!
//! fn example() -> RillResult<()> {
//!     let partition = PartitionId::new("orders", 3);
//!     assert_eq!(partition.to_string(), "orders/3");
//!     assert!(TopicMode::Normal.persists_to_dfs());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod constants;
pub mod dfs;
pub mod error;
pub mod metrics;
pub mod naming;
pub mod timeout;
pub mod types;

// Re-export commonly used items at the crate root
pub use constants::*;
pub use error::{ErrorCode, RillError, RillResult};
pub use timeout::TimeoutChecker;
pub use types::{Filter, PartitionId, PartitionStatus, TopicMode};
