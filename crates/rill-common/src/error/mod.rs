//! Error handling for Rill.
//!
//! This module provides a unified error type and result alias used
//! across all Rill components.

mod broker;

pub use broker::{ErrorCode, RillError};

/// Result type alias for Rill operations.
pub type RillResult<T> = std::result::Result<T, RillError>;
