//! Broker configuration.
//!
//! One TOML file carries every component's settings plus the partitions
//! the worker loads at startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use rill_common::config::{
    AdmissionConfig, BlockCacheConfig, BufferPoolConfig, PartitionConfig, SupervisorConfig,
};
use rill_common::{PartitionId, TopicMode};
use rill_storage::PartitionSpec;

/// Worker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Root directory of the local DFS.
    #[serde(default = "default_dfs_root")]
    pub dfs_root: PathBuf,

    /// Seconds between status reports.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_interval_secs: u64,

    /// Emit metrics as trace events.
    #[serde(default)]
    pub trace_metrics: bool,

    /// Write cache and file cache pools.
    #[serde(default)]
    pub buffer: BufferPoolConfig,

    /// Admission limits.
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Block cache eviction.
    #[serde(default)]
    pub block_cache: BlockCacheConfig,

    /// Maintenance loops and worker pool.
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Settings every partition starts from.
    #[serde(default)]
    pub partition_defaults: PartitionConfig,

    /// Partitions loaded at startup.
    #[serde(default)]
    pub partitions: Vec<PartitionAssignment>,
}

/// One partition assigned to this worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionAssignment {
    /// Topic name.
    pub topic: String,
    /// Partition number.
    pub partition: u32,
    /// Session id readers must present.
    #[serde(default = "default_session_id")]
    pub session_id: u64,
    /// Overrides the default topic mode.
    #[serde(default)]
    pub topic_mode: Option<TopicMode>,
    /// Overrides the DFS directory.
    #[serde(default)]
    pub data_dir: Option<String>,
}

fn default_dfs_root() -> PathBuf {
    PathBuf::from("./rill-data")
}

fn default_heartbeat_secs() -> u64 {
    10
}

fn default_session_id() -> u64 {
    1
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            dfs_root: default_dfs_root(),
            heartbeat_interval_secs: default_heartbeat_secs(),
            trace_metrics: false,
            buffer: BufferPoolConfig::default(),
            admission: AdmissionConfig::default(),
            block_cache: BlockCacheConfig::default(),
            supervisor: SupervisorConfig::default(),
            partition_defaults: PartitionConfig::default(),
            partitions: Vec::new(),
        }
    }
}

impl BrokerConfig {
    /// Creates a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Saves configuration to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_toml()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Converts configuration to TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validates every component section and each assignment.
    pub fn validate(&self) -> Result<()> {
        self.buffer.validate().context("[buffer]")?;
        self.admission.validate().context("[admission]")?;
        self.block_cache.validate().context("[block_cache]")?;
        self.supervisor.validate().context("[supervisor]")?;
        for assignment in &self.partitions {
            self.partition_config(assignment)
                .validate()
                .with_context(|| format!("partition {}/{}", assignment.topic, assignment.partition))?;
        }
        Ok(())
    }

    /// Returns the interval between status reports.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    /// Returns the effective configuration of one assignment.
    pub fn partition_config(&self, assignment: &PartitionAssignment) -> PartitionConfig {
        let config = self.partition_defaults.clone();
        match assignment.topic_mode {
            Some(mode) => config.with_topic_mode(mode),
            None => config,
        }
    }

    /// Returns the load specs of every configured partition.
    pub fn partition_specs(&self) -> Vec<PartitionSpec> {
        self.partitions
            .iter()
            .map(|assignment| {
                let spec = PartitionSpec::new(
                    PartitionId::new(assignment.topic.clone(), assignment.partition),
                    assignment.session_id,
                    self.partition_config(assignment),
                );
                match &assignment.data_dir {
                    Some(dir) => spec.with_data_dir(dir.clone()),
                    None => spec,
                }
            })
            .collect()
    }

    /// Creates a builder for configuration.
    pub fn builder() -> BrokerConfigBuilder {
        BrokerConfigBuilder::new()
    }
}

/// Builder for broker configuration.
#[derive(Default)]
pub struct BrokerConfigBuilder {
    config: BrokerConfig,
}

impl BrokerConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the DFS root.
    pub fn dfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.dfs_root = root.into();
        self
    }

    /// Sets the buffer pools.
    pub fn buffer(mut self, buffer: BufferPoolConfig) -> Self {
        self.config.buffer = buffer;
        self
    }

    /// Sets the supervisor loops.
    pub fn supervisor(mut self, supervisor: SupervisorConfig) -> Self {
        self.config.supervisor = supervisor;
        self
    }

    /// Sets the partition defaults.
    pub fn partition_defaults(mut self, defaults: PartitionConfig) -> Self {
        self.config.partition_defaults = defaults;
        self
    }

    /// Adds a partition with the default mode.
    pub fn partition(mut self, topic: impl Into<String>, partition: u32, session_id: u64) -> Self {
        self.config.partitions.push(PartitionAssignment {
            topic: topic.into(),
            partition,
            session_id,
            topic_mode: None,
            data_dir: None,
        });
        self
    }

    /// Adds a partition with an explicit mode.
    pub fn partition_with_mode(
        mut self,
        topic: impl Into<String>,
        partition: u32,
        session_id: u64,
        mode: TopicMode,
    ) -> Self {
        self.config.partitions.push(PartitionAssignment {
            topic: topic.into(),
            partition,
            session_id,
            topic_mode: Some(mode),
            data_dir: None,
        });
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> BrokerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = BrokerConfig::default();
        assert_eq!(config.dfs_root, PathBuf::from("./rill-data"));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(10));
        assert!(config.partitions.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("rilld.toml");

        let config = BrokerConfig::builder()
            .dfs_root("/data/rill")
            .supervisor(SupervisorConfig::default().with_worker_threads(8))
            .partition("orders", 0, 3)
            .partition_with_mode("audit", 1, 4, TopicMode::Security)
            .build();
        config.save(&path).unwrap();

        let loaded = BrokerConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.supervisor.worker_threads, 8);
    }

    #[test]
    fn test_minimal_file_uses_defaults() {
        let config: BrokerConfig = toml::from_str(
            r#"
            dfs_root = "/srv/rill"

            [supervisor]
            commit_loop_interval = "250ms"

            [[partitions]]
            topic = "clicks"
            partition = 2
            topic_mode = "memory_only"
            "#,
        )
        .unwrap();

        assert_eq!(config.supervisor.commit_loop_interval, Duration::from_millis(250));
        assert_eq!(config.buffer, BufferPoolConfig::default());
        let specs = config.partition_specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].partition, PartitionId::new("clicks", 2));
        assert_eq!(specs[0].session_id, 1);
        assert_eq!(specs[0].config.topic_mode, TopicMode::MemoryOnly);
        assert_eq!(specs[0].dir(), "clicks/2");
    }

    #[test]
    fn test_validate_rejects_bad_section() {
        let mut config = BrokerConfig::default();
        config.supervisor.worker_threads = 0;
        let err = config.validate().unwrap_err();
        assert!(format!("{err:#}").contains("supervisor"));
    }
}
