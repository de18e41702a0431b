//! # rill-broker
//!
//! The worker side of Rill: a [`Supervisor`] owning every partition engine
//! assigned to the process, the maintenance loops that keep memory and DFS
//! usage in check, and the configuration the `rilld` daemon starts from.
//!
//! - **Supervisor**: batch load/unload, request routing, status snapshots
//! - **Maintenance loops**: write cache recycling, block cache recycling,
//!   expired file deletion, commit scheduling, jittered DFS usage sync
//! - **BrokerConfig**: one TOML file for every component
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use rill_broker::{BrokerConfig, Supervisor};
//! use rill_common::dfs::LocalDfs;
//! use rill_storage::EngineContext;
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = BrokerConfig::builder().dfs_root("/tmp/rill").partition("orders", 0, 1).build();
//! let ctx = EngineContext::new(
//!     Arc::new(LocalDfs::new(&config.dfs_root)?),
//!     config.buffer.clone(),
//!     config.admission.clone(),
//!     config.block_cache.clone(),
//! )?;
//! let supervisor = Supervisor::new(ctx, config.supervisor.clone())?;
//! supervisor.start()?;
//! supervisor.load(config.partition_specs());
//! // ... serve traffic ...
//! supervisor.stop()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod loops;
pub mod map;
pub mod supervisor;

pub use config::{BrokerConfig, BrokerConfigBuilder, PartitionAssignment};
pub use map::PartitionMap;
pub use supervisor::{BatchResult, Supervisor, SupervisorStats};
