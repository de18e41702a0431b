//! Broker error types.
//!
//! Every failure a partition can report maps to one of five classes:
//! busy (retry later), not-found, data-loss (resume at `next_msg_id`),
//! fatal/sealed and validation. The classification helpers on
//! [`RillError`] are what callers branch on.

use std::fmt;
use thiserror::Error;

use crate::types::PartitionId;

/// Error codes for categorizing errors.
///
/// These codes can be used for programmatic error handling and
/// are stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Unknown or unspecified error.
    Unknown = 0x0000,
    /// Internal error (bug).
    Internal = 0x0001,
    /// Invalid argument provided.
    InvalidArgument = 0x0003,
    /// Operation timed out.
    Timeout = 0x0004,
    /// Invalid configuration.
    InvalidConfig = 0x0005,

    // I/O errors (0x0100 - 0x01FF)
    /// General I/O error.
    Io = 0x0100,
    /// Data corruption detected.
    Corruption = 0x0104,

    // Admission errors (0x0200 - 0x02FF)
    /// An admission counter is at its limit.
    AdmissionRejected = 0x0200,
    /// The buffer pool could not supply blocks.
    BufferExhausted = 0x0201,
    /// The partition's read flow-control window is exhausted.
    FlowControl = 0x0202,
    /// A lease could not be obtained in time.
    LeaseTimeout = 0x0203,
    /// A queued request expired before being applied.
    RequestTimeout = 0x0204,

    // Partition errors (0x0300 - 0x03FF)
    /// Partition is not loaded on this worker.
    PartitionNotFound = 0x0300,
    /// Partition is stopping or stopped.
    PartitionStopping = 0x0301,
    /// Request session does not match the partition session.
    SessionMismatch = 0x0302,
    /// Partition is already loaded.
    PartitionExists = 0x0303,

    // Data errors (0x0400 - 0x04FF)
    /// No message at or after the requested position yet.
    NoData = 0x0400,
    /// Requested timestamp is newer than any message.
    TimestampTooNew = 0x0401,
    /// Messages in the requested range were lost.
    DataLoss = 0x0402,

    // Commit errors (0x0500 - 0x05FF)
    /// Commit to DFS failed (retryable).
    CommitFailed = 0x0500,
    /// The committer is sealed; the partition cannot make data durable.
    Sealed = 0x0501,

    // Validation errors (0x0600 - 0x06FF)
    /// Message payload exceeds the configured maximum.
    MessageTooLarge = 0x0600,
    /// Request carried no messages.
    EmptyRequest = 0x0601,
    /// Malformed message.
    InvalidMessage = 0x0602,
    /// Filter cannot be applied.
    UnsupportedFilter = 0x0603,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "I/O",
            0x02 => "Admission",
            0x03 => "Partition",
            0x04 => "Data",
            0x05 => "Commit",
            0x06 => "Validation",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The main error type for Rill.
///
/// # Example
///
/// ```rust
/// use rill_common::error::{RillError, RillResult};
/// use rill_common::types::PartitionId;
///
/// fn lookup(partition: PartitionId) -> RillResult<()> {
///     Err(RillError::PartitionNotFound { partition })
/// }
///
/// let err = lookup(PartitionId::new("orders", 0)).unwrap_err();
/// assert!(err.is_not_found());
/// ```
#[derive(Debug, Error)]
pub enum RillError {
    // ==========================================================================
    // General Errors
    // ==========================================================================
    /// Internal error - this indicates a bug.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },

    /// Invalid argument provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Error message.
        message: String,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds.
        duration_ms: u64,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },

    // ==========================================================================
    // I/O Errors
    // ==========================================================================
    /// I/O error from the underlying filesystem.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Data corruption detected.
    #[error("data corruption detected: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    // ==========================================================================
    // Admission Errors (busy)
    // ==========================================================================
    /// An admission counter is at its limit.
    #[error("{resource} admission limit {limit} reached")]
    AdmissionRejected {
        /// Which counter rejected the request.
        resource: &'static str,
        /// The configured limit.
        limit: usize,
    },

    /// Buffer pool could not supply enough blocks even after recycling.
    #[error("buffer exhausted: needed {needed} blocks, {available} available")]
    BufferExhausted {
        /// Blocks needed.
        needed: usize,
        /// Blocks available after recycling.
        available: usize,
    },

    /// Read flow-control window exhausted.
    #[error("flow control exceeded for partition {partition}")]
    FlowControlExceeded {
        /// The throttled partition.
        partition: PartitionId,
    },

    /// Lease on a file block could not be obtained before the deadline.
    #[error("lease on {file}#{block_index} timed out")]
    LeaseTimeout {
        /// File name.
        file: String,
        /// Block index.
        block_index: u64,
    },

    /// A queued write expired before the batch committer reached it.
    #[error("request queued for {waited_ms}ms exceeded {limit_ms}ms")]
    RequestTimeout {
        /// Time spent queued.
        waited_ms: u64,
        /// Configured limit.
        limit_ms: u64,
    },

    // ==========================================================================
    // Partition Errors (not found)
    // ==========================================================================
    /// Partition is not loaded.
    #[error("partition {partition} not found")]
    PartitionNotFound {
        /// The missing partition.
        partition: PartitionId,
    },

    /// Partition is stopping and no longer serves traffic.
    #[error("partition {partition} is stopping")]
    PartitionStopping {
        /// The stopping partition.
        partition: PartitionId,
    },

    /// Request session id does not match.
    #[error("session mismatch on {partition}: expected {expected}, got {actual}")]
    SessionMismatch {
        /// The partition.
        partition: PartitionId,
        /// Current session id.
        expected: u64,
        /// Session id carried by the request.
        actual: u64,
    },

    /// Partition is already loaded.
    #[error("partition {partition} already loaded")]
    PartitionAlreadyLoaded {
        /// The partition.
        partition: PartitionId,
    },

    // ==========================================================================
    // Data Errors
    // ==========================================================================
    /// Nothing at or after the requested id yet.
    #[error("no data at or after message {next_msg_id}")]
    NoData {
        /// Id the caller should retry from.
        next_msg_id: u64,
    },

    /// Requested timestamp is newer than the newest message.
    #[error("timestamp {timestamp} is newer than the latest message")]
    TimestampTooNew {
        /// The requested timestamp.
        timestamp: i64,
    },

    /// A range of messages could not be read.
    #[error("data lost before message {next_msg_id}: {reason}")]
    DataLoss {
        /// First id after the gap; resume from here.
        next_msg_id: u64,
        /// What failed.
        reason: String,
    },

    // ==========================================================================
    // Commit Errors
    // ==========================================================================
    /// Commit to DFS failed; the maintenance loop retries.
    #[error("commit failed for partition {partition}: {reason}")]
    CommitFailed {
        /// The partition.
        partition: PartitionId,
        /// Reason for failure.
        reason: String,
    },

    /// The committer hit a persistent write failure.
    #[error("partition {partition} is sealed")]
    Sealed {
        /// The sealed partition.
        partition: PartitionId,
    },

    // ==========================================================================
    // Validation Errors
    // ==========================================================================
    /// Message is too large.
    #[error("message size {size} exceeds maximum {max_size}")]
    MessageTooLarge {
        /// Actual size.
        size: usize,
        /// Maximum allowed size.
        max_size: usize,
    },

    /// Request carried no messages.
    #[error("request contains no messages")]
    EmptyRequest,

    /// Malformed message.
    #[error("invalid message: {reason}")]
    InvalidMessage {
        /// What is wrong with it.
        reason: String,
    },

    /// Filter cannot be applied.
    #[error("unsupported filter: {reason}")]
    UnsupportedFilter {
        /// What is wrong with it.
        reason: String,
    },
}

impl RillError {
    /// Returns the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Internal { .. } => ErrorCode::Internal,
            Self::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::InvalidConfig { .. } => ErrorCode::InvalidConfig,
            Self::Io { .. } => ErrorCode::Io,
            Self::Corruption { .. } => ErrorCode::Corruption,
            Self::AdmissionRejected { .. } => ErrorCode::AdmissionRejected,
            Self::BufferExhausted { .. } => ErrorCode::BufferExhausted,
            Self::FlowControlExceeded { .. } => ErrorCode::FlowControl,
            Self::LeaseTimeout { .. } => ErrorCode::LeaseTimeout,
            Self::RequestTimeout { .. } => ErrorCode::RequestTimeout,
            Self::PartitionNotFound { .. } => ErrorCode::PartitionNotFound,
            Self::PartitionStopping { .. } => ErrorCode::PartitionStopping,
            Self::SessionMismatch { .. } => ErrorCode::SessionMismatch,
            Self::PartitionAlreadyLoaded { .. } => ErrorCode::PartitionExists,
            Self::NoData { .. } => ErrorCode::NoData,
            Self::TimestampTooNew { .. } => ErrorCode::TimestampTooNew,
            Self::DataLoss { .. } => ErrorCode::DataLoss,
            Self::CommitFailed { .. } => ErrorCode::CommitFailed,
            Self::Sealed { .. } => ErrorCode::Sealed,
            Self::MessageTooLarge { .. } => ErrorCode::MessageTooLarge,
            Self::EmptyRequest => ErrorCode::EmptyRequest,
            Self::InvalidMessage { .. } => ErrorCode::InvalidMessage,
            Self::UnsupportedFilter { .. } => ErrorCode::UnsupportedFilter,
        }
    }

    /// Returns true for admission/backpressure errors.
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::AdmissionRejected { .. }
                | Self::BufferExhausted { .. }
                | Self::FlowControlExceeded { .. }
                | Self::LeaseTimeout { .. }
                | Self::RequestTimeout { .. }
                | Self::Timeout { .. }
        )
    }

    /// Returns true for not-found class errors.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::PartitionNotFound { .. }
                | Self::PartitionStopping { .. }
                | Self::SessionMismatch { .. }
        )
    }

    /// Returns true if messages were lost and the caller should resume later.
    #[must_use]
    pub const fn is_data_loss(&self) -> bool {
        matches!(self, Self::DataLoss { .. })
    }

    /// Returns true if the partition can no longer make progress.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Sealed { .. } | Self::Internal { .. })
    }

    /// Returns true for request validation failures.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MessageTooLarge { .. }
                | Self::EmptyRequest
                | Self::InvalidMessage { .. }
                | Self::UnsupportedFilter { .. }
                | Self::InvalidArgument { .. }
        )
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.is_busy() || matches!(self, Self::CommitFailed { .. } | Self::NoData { .. })
    }

    /// Returns the resume position carried by no-data and data-loss errors.
    #[must_use]
    pub const fn next_msg_id(&self) -> Option<u64> {
        match self {
            Self::NoData { next_msg_id } | Self::DataLoss { next_msg_id, .. } => {
                Some(*next_msg_id)
            }
            _ => None,
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    #[must_use]
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Creates a data-loss error.
    #[must_use]
    pub fn data_loss(next_msg_id: u64, reason: impl Into<String>) -> Self {
        Self::DataLoss {
            next_msg_id,
            reason: reason.into(),
        }
    }

    /// Creates an admission rejection.
    #[must_use]
    pub const fn rejected(resource: &'static str, limit: usize) -> Self {
        Self::AdmissionRejected { resource, limit }
    }
}
