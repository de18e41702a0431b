//! # rill-test
//!
//! Fixtures and integration tests for Rill.
//!
//! This crate contains:
//! - A fault-injecting DFS wrapper with read counters
//! - Engine contexts over temporary directories
//! - Deterministic message workloads

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Fault injection around a real DFS.
pub mod fault;

/// Engine and supervisor setup over temporary directories.
pub mod harness;

/// Message generators and read helpers.
pub mod workload;

pub use fault::FaultyDfs;
pub use harness::Harness;
