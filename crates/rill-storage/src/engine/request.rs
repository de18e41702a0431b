//! Request and reply types of the partition engine.

use std::fmt;
use std::sync::Arc;

use rill_common::{Filter, RillResult};

use crate::message::{Message, MessageInput};

/// Bookkeeping attached to every reply, including failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseMeta {
    /// Session of the partition that answered.
    pub session_id: u64,
    /// One past the last durable id.
    pub committed_id: u64,
    /// Largest id received, if any.
    pub max_msg_id: Option<u64>,
}

/// A result together with the partition's bookkeeping.
#[derive(Debug)]
pub struct Reply<T> {
    /// Bookkeeping at reply time.
    pub meta: ResponseMeta,
    /// The outcome.
    pub result: RillResult<T>,
}

impl<T> Reply<T> {
    /// Returns true if the request succeeded.
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// Discards the bookkeeping.
    pub fn into_result(self) -> RillResult<T> {
        self.result
    }
}

/// Messages produced by one client call.
#[derive(Debug, Clone, Default)]
pub struct WriteRequest {
    /// Messages in production order.
    pub messages: Vec<MessageInput>,
}

impl WriteRequest {
    /// Creates a request.
    pub fn new(messages: Vec<MessageInput>) -> Self {
        Self { messages }
    }

    /// Creates a request of plain payloads.
    pub fn from_payloads<I, P>(payloads: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<bytes::Bytes>,
    {
        Self::new(payloads.into_iter().map(MessageInput::new).collect())
    }
}

/// Outcome of an accepted write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteAck {
    /// Id assigned to the first message.
    pub first_msg_id: u64,
    /// Messages accepted.
    pub count: usize,
    /// Timestamp assigned to the messages.
    pub timestamp: i64,
}

impl WriteAck {
    /// Returns the id of the last accepted message.
    pub fn last_msg_id(&self) -> u64 {
        self.first_msg_id + self.count as u64 - 1
    }
}

/// Post-processing applied to messages before they are returned.
pub trait FieldFilter: Send + Sync {
    /// Rewrites or drops messages.
    fn apply(&self, messages: Vec<Message>) -> RillResult<Vec<Message>>;
}

/// A consumer read.
#[derive(Clone)]
pub struct ReadRequest {
    /// Session the consumer believes the partition has.
    pub session_id: u64,
    /// Consumer identity; readers are tracked per client and filter.
    pub client_id: String,
    /// First id wanted.
    pub start_id: u64,
    /// Timestamp used to reposition a start id that is no longer stored.
    pub start_timestamp: Option<i64>,
    /// Upper bound on returned messages.
    pub max_count: usize,
    /// Upper bound on returned payload bytes; one message is always allowed.
    pub max_bytes: usize,
    /// Routing-hash range.
    pub filter: Filter,
    /// Optional post-pass.
    pub field_filter: Option<Arc<dyn FieldFilter>>,
    /// Decompress payloads before returning them.
    pub decompress: bool,
}

impl ReadRequest {
    /// Creates an unbounded read of everything from `start_id`.
    pub fn new(session_id: u64, client_id: impl Into<String>, start_id: u64) -> Self {
        Self {
            session_id,
            client_id: client_id.into(),
            start_id,
            start_timestamp: None,
            max_count: usize::MAX,
            max_bytes: usize::MAX,
            filter: Filter::ALL,
            field_filter: None,
            decompress: true,
        }
    }

    /// Sets the message limit.
    #[must_use]
    pub fn with_max_count(mut self, max_count: usize) -> Self {
        self.max_count = max_count;
        self
    }

    /// Sets the byte limit.
    #[must_use]
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Sets the routing-hash filter.
    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Sets the repositioning timestamp.
    #[must_use]
    pub fn with_start_timestamp(mut self, timestamp: i64) -> Self {
        self.start_timestamp = Some(timestamp);
        self
    }

    /// Sets the field filter.
    #[must_use]
    pub fn with_field_filter(mut self, filter: Arc<dyn FieldFilter>) -> Self {
        self.field_filter = Some(filter);
        self
    }

    /// Returns payloads as stored.
    #[must_use]
    pub fn keep_compressed(mut self) -> Self {
        self.decompress = false;
        self
    }
}

impl fmt::Debug for ReadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadRequest")
            .field("session_id", &self.session_id)
            .field("client_id", &self.client_id)
            .field("start_id", &self.start_id)
            .field("start_timestamp", &self.start_timestamp)
            .field("max_count", &self.max_count)
            .field("max_bytes", &self.max_bytes)
            .field("filter", &self.filter)
            .field("field_filter", &self.field_filter.is_some())
            .finish()
    }
}

/// Messages returned by a read.
#[derive(Debug, Clone, Default)]
pub struct ReadResponse {
    /// Messages in id order.
    pub messages: Vec<Message>,
    /// Where the next read should start.
    pub next_msg_id: u64,
    /// Timestamp of the last scanned message.
    pub last_timestamp: Option<i64>,
}

/// The newest message of a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxIdInfo {
    /// Largest id received, if any.
    pub max_msg_id: Option<u64>,
    /// Its timestamp.
    pub timestamp: i64,
}

/// How an engine stops.
#[derive(Debug, Clone, Copy)]
pub struct StopOptions {
    /// Skip the final commit.
    pub force: bool,
    /// Waiting longer than this for in-flight requests logs a warning.
    pub grace: std::time::Duration,
    /// Stop waiting for in-flight requests after this long.
    pub timeout: std::time::Duration,
}

impl StopOptions {
    /// A graceful stop with a final commit.
    pub fn graceful(grace: std::time::Duration, timeout: std::time::Duration) -> Self {
        Self {
            force: false,
            grace,
            timeout,
        }
    }

    /// Returns a copy that skips the final commit.
    #[must_use]
    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

impl Default for StopOptions {
    fn default() -> Self {
        Self::graceful(
            std::time::Duration::from_secs(5),
            std::time::Duration::from_secs(60),
        )
    }
}
