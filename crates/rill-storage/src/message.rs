//! Messages and payload compression.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use rill_common::{RillError, RillResult};

/// A message as stored by a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Position in the partition, dense and increasing.
    pub msg_id: u64,
    /// Append time in microseconds since the epoch; non-decreasing.
    pub timestamp: i64,
    /// Routing hash matched by range filters.
    pub uint16_payload: u16,
    /// True if `payload` is lz4 compressed.
    pub compressed: bool,
    /// Message body.
    pub payload: Bytes,
}

impl Message {
    /// Returns the payload, decompressed if needed.
    pub fn decompressed(&self) -> RillResult<Message> {
        if !self.compressed {
            return Ok(self.clone());
        }
        Ok(Message {
            payload: decompress(&self.payload)?,
            compressed: false,
            ..self.clone()
        })
    }
}

/// A message as produced by a client, before the partition assigns it an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageInput {
    /// Message body.
    pub payload: Bytes,
    /// Routing hash matched by range filters.
    pub uint16_payload: u16,
}

impl MessageInput {
    /// Creates a message with a zero routing hash.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            uint16_payload: 0,
        }
    }

    /// Sets the routing hash.
    #[must_use]
    pub fn with_uint16(mut self, value: u16) -> Self {
        self.uint16_payload = value;
        self
    }
}

/// A validated message waiting for an id.
#[derive(Debug, Clone)]
pub(crate) struct PreparedMessage {
    pub(crate) payload: Bytes,
    pub(crate) uint16_payload: u16,
    pub(crate) compressed: bool,
}

impl PreparedMessage {
    /// Compresses `input` when enabled and the payload reaches `threshold`.
    /// Compression is kept only when it saves space.
    pub(crate) fn prepare(input: MessageInput, compress: bool, threshold: usize) -> Self {
        if compress && input.payload.len() >= threshold {
            let packed = lz4_flex::compress_prepend_size(&input.payload);
            if packed.len() < input.payload.len() {
                return Self {
                    payload: Bytes::from(packed),
                    uint16_payload: input.uint16_payload,
                    compressed: true,
                };
            }
        }
        Self {
            payload: input.payload,
            uint16_payload: input.uint16_payload,
            compressed: false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.payload.len()
    }
}

/// Decompresses an lz4 payload with a prepended size.
pub fn decompress(payload: &[u8]) -> RillResult<Bytes> {
    lz4_flex::decompress_size_prepended(payload)
        .map(Bytes::from)
        .map_err(|err| RillError::corruption(format!("lz4 payload: {err}")))
}

/// Returns the current time in microseconds since the epoch.
pub fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_micros() as i64)
}
