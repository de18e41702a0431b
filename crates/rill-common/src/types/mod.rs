//! Type definitions for Rill.
//!
//! This module contains the identifiers and small value types shared by
//! every layer of the broker.

mod filter;
mod partition;

pub use filter::Filter;
pub use partition::{PartitionId, PartitionStatus, TopicMode};
