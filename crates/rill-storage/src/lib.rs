//! # rill-storage
//!
//! The storage engine of one topic partition.
//!
//! - **MemoryRing**: recent messages packed into blocks from a chained
//!   [`BufferPool`](rill_buffer::BufferPool)
//! - **CommitPolicy**: one policy per topic mode, deciding when buffered
//!   messages reach DFS and how far memory may be recycled
//! - **SecurityBatcher**: group commit for writes acknowledged only once
//!   durable
//! - **PartitionEngine**: the write, read, commit and recycle paths
//! - **collab**: file manager, committer and consumer-progress seams with
//!   local implementations over [`Dfs`](rill_common::dfs::Dfs)
//!
//! ```text
//!   add_message ─► validate ─► ring.append ───────────► ack
//!                                  │        (security: ack after commit)
//!                                  ▼
//!                           committer.write ─► commit_file ─► meta/data pair
//!
//!   get_message ─► ring hit? ─► yes ─► messages
//!                       │
//!                       no ─► file manager ─► block cache ─► messages
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use rill_common::config::{AdmissionConfig, BlockCacheConfig, BufferPoolConfig, PartitionConfig};
//! use rill_common::dfs::LocalDfs;
//! use rill_common::{PartitionId, TopicMode};
//! use rill_storage::{EngineContext, MessageInput, PartitionEngine, PartitionSpec, ReadRequest, WriteRequest};
//! use std::sync::Arc;
//!
//! # fn main() -> rill_common::RillResult<()> {
//! let dfs = Arc::new(LocalDfs::new("/tmp/rill")?);
//! let ctx = EngineContext::new(
//!     dfs,
//!     BufferPoolConfig::default(),
//!     AdmissionConfig::default(),
//!     BlockCacheConfig::default(),
//! )?;
//! let spec = PartitionSpec::new(
//!     PartitionId::new("orders", 0),
//!     1,
//!     PartitionConfig::for_mode(TopicMode::Normal),
//! );
//! let engine = PartitionEngine::load(spec, &ctx)?;
//!
//! let ack = engine
//!     .add_message(WriteRequest::new(vec![MessageInput::new(&b"hello"[..])]))
//!     .into_result()?;
//! let read = engine
//!     .get_message(ReadRequest::new(1, "consumer-a", ack.first_msg_id))
//!     .into_result()?;
//! assert_eq!(read.messages.len(), 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod collab;
pub mod commit;
pub mod engine;
pub mod flow;
pub mod message;
pub mod ring;

pub use codec::MetaEntry;
pub use collab::{
    Collaborators, CommitManager, ConsumerCommit, FileManager, FilePairInfo, LocalCommitter,
    LocalFileManager, MemoryCommitManager, MessageCommitter,
};
pub use commit::{policy_for, CommitPolicy, CommitProgress, SecurityBatcher};
pub use engine::{
    EngineContext, EngineStats, FieldFilter, MaxIdInfo, PartitionEngine, PartitionMetricsSnapshot,
    PartitionSpec, PartitionStatusSnapshot, ReadRequest, ReadResponse, Reply, ResponseMeta,
    StopOptions, WriteAck, WriteRequest,
};
pub use flow::FlowControl;
pub use message::{Message, MessageInput};
pub use ring::{Evicted, MemoryRing};
