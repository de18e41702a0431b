//! System-wide constants for Rill.
//!
//! Defaults here are shared by the configuration structs and by tests that
//! need to reason about block geometry.

// =============================================================================
// Block and Memory Constants
// =============================================================================

/// Default block size used by buffer pools and the block cache (64 KB).
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Minimum block size accepted by configuration validation (512 bytes).
pub const MIN_BLOCK_SIZE: usize = 512;

/// Default number of blocks in the worker-wide write cache pool (1 GB).
pub const DEFAULT_WRITE_CACHE_BLOCKS: usize = 16 * 1024;

/// Default number of blocks in the worker-wide file cache pool (512 MB).
pub const DEFAULT_FILE_CACHE_BLOCKS: usize = 8 * 1024;

/// Default fraction of recyclable data evicted by a forced recycle pass.
pub const DEFAULT_RECYCLE_PERCENT: f64 = 0.1;

// =============================================================================
// Message Constants
// =============================================================================

/// Default maximum payload size of a single message (2 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 2 * 1024 * 1024;

/// Size of one entry in a meta file.
///
/// Layout (little-endian): msg_id (8), timestamp (8), data offset (4),
/// payload length (4), uint16 payload (2), flags (1), reserved (1), and a
/// crc32 of the preceding 28 bytes (4).
pub const META_ENTRY_SIZE: usize = 32;

/// Hard upper bound on `max_message_size` (64 MB).
pub const MAX_MESSAGE_SIZE_LIMIT: usize = 64 * 1024 * 1024;

/// Largest data file addressable by a meta entry offset (2 GB).
pub const MAX_DATA_FILE_SIZE: usize = 2 * 1024 * 1024 * 1024;

// =============================================================================
// Admission Constants
// =============================================================================

/// Default concurrent read/get-max-id/get-min-id limit.
pub const DEFAULT_READ_LIMIT: usize = 64;

/// Default concurrent write limit.
pub const DEFAULT_WRITE_LIMIT: usize = 64;

/// Default concurrent DFS read-file limit.
pub const DEFAULT_READ_FILE_LIMIT: usize = 32;

/// Default concurrent readers of one file.
pub const DEFAULT_ONE_FILE_READ_LIMIT: usize = 8;

/// Default lease poll interval in milliseconds.
pub const DEFAULT_LEASE_POLL_INTERVAL_MS: u64 = 40;

// =============================================================================
// Security Commit Constants
// =============================================================================

/// Requests queued longer than this are denied with a busy error (ms).
pub const DEFAULT_SECURITY_REQUEST_TIMEOUT_MS: u64 = 5_000;

/// Default batch size that wakes the security committer early (1 MB).
pub const DEFAULT_SECURITY_COMMIT_BYTES: usize = 1024 * 1024;
