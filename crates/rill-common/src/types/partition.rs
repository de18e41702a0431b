//! Partition identity, durability mode and lifecycle status.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifies one partition of one topic.
///
/// # Example
///
/// ```rust
/// use rill_common::types::PartitionId;
///
/// let id = PartitionId::new("orders", 3);
/// assert_eq!(id.topic(), "orders");
/// assert_eq!(id.partition(), 3);
/// assert_eq!(id.to_string(), "orders/3");
/// ```
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionId {
    topic: String,
    partition: u32,
}

impl PartitionId {
    /// Creates a new partition id.
    #[inline]
    #[must_use]
    pub fn new(topic: impl Into<String>, partition: u32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }

    /// Returns the topic name.
    #[inline]
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Returns the partition index.
    #[inline]
    #[must_use]
    pub const fn partition(&self) -> u32 {
        self.partition
    }
}

impl fmt::Debug for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PartitionId({}/{})", self.topic, self.partition)
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.partition)
    }
}

/// Durability policy of a topic, fixed when a partition is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicMode {
    /// Every write is flushed to DFS on a timer or size threshold.
    #[default]
    Normal,
    /// Nothing is written to DFS.
    MemoryOnly,
    /// DFS commit lags behind consumer progress.
    MemoryPrefer,
    /// Like `Normal`, but files are never expired.
    PersistData,
    /// Writes are batched and committed before the caller is answered.
    Security,
}

impl TopicMode {
    /// Returns true if messages of this mode are ever written to DFS.
    #[inline]
    #[must_use]
    pub const fn persists_to_dfs(self) -> bool {
        !matches!(self, Self::MemoryOnly)
    }

    /// Returns true if commits are driven by the partition itself rather
    /// than by the supervisor's commit loop.
    #[inline]
    #[must_use]
    pub const fn is_self_driven(self) -> bool {
        matches!(self, Self::Security)
    }

    /// Returns true if expired file pairs may be deleted.
    #[inline]
    #[must_use]
    pub const fn expires_files(self) -> bool {
        !matches!(self, Self::MemoryOnly | Self::PersistData)
    }

    /// Returns the lowercase name used in configuration files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::MemoryOnly => "memory_only",
            Self::MemoryPrefer => "memory_prefer",
            Self::PersistData => "persist_data",
            Self::Security => "security",
        }
    }
}

impl fmt::Display for TopicMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TopicMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(Self::Normal),
            "memory_only" => Ok(Self::MemoryOnly),
            "memory_prefer" => Ok(Self::MemoryPrefer),
            "persist_data" => Ok(Self::PersistData),
            "security" => Ok(Self::Security),
            other => Err(format!("unknown topic mode '{other}'")),
        }
    }
}

/// Lifecycle of a partition engine.
///
/// ```text
/// Loading ──► Running ──► Stopping ──► Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum PartitionStatus {
    /// Files are being recovered; no traffic yet.
    Loading = 0,
    /// Serving reads and writes.
    Running = 1,
    /// Unload in progress; new requests are rejected.
    Stopping = 2,
    /// Fully stopped.
    Stopped = 3,
}

impl PartitionStatus {
    /// Returns the raw representation.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Converts from the raw representation.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Loading),
            1 => Some(Self::Running),
            2 => Some(Self::Stopping),
            3 => Some(Self::Stopped),
            _ => None,
        }
    }

    /// Returns true if the partition accepts traffic.
    #[inline]
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for PartitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Loading => "LOADING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}
