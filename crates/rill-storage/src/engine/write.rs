//! Write path and commit driver.

use std::sync::atomic::Ordering;
use std::time::Instant;

use tracing::{debug, warn};

use rill_common::{RillError, RillResult, TopicMode};

use super::{CommittingFlag, PartitionEngine, Reply, WriteAck, WriteRequest};
use crate::collab::ConsumerCommit;
use crate::commit::{BatchSink, CommitProgress};
use crate::message::{now_micros, PreparedMessage};

impl PartitionEngine {
    /// Appends the messages of one request.
    ///
    /// Security partitions reply only after the batch holding the request
    /// was committed; other modes reply once the messages are buffered.
    pub fn add_message(&self, request: WriteRequest) -> Reply<WriteAck> {
        let result = self.add_message_inner(request);
        if let Err(err) = &result {
            if err.is_busy() {
                self.stats.record_rejection();
                debug!(partition = %self.partition, error = %err, "write rejected");
            }
        }
        self.reply(result)
    }

    fn add_message_inner(&self, request: WriteRequest) -> RillResult<WriteAck> {
        let _inflight = self.enter()?;
        self.seal_check()?;
        let _permit = self.admission.try_write()?;
        self.validate(&request)?;

        let prepared: Vec<PreparedMessage> = request
            .messages
            .into_iter()
            .map(|input| {
                PreparedMessage::prepare(
                    input,
                    self.config.enable_compression,
                    self.config.compress_threshold,
                )
            })
            .collect();

        match &self.batcher {
            Some(batcher) => batcher.submit(prepared),
            None => {
                let ack = self.append_prepared(prepared)?;
                self.maybe_commit();
                Ok(ack)
            }
        }
    }

    fn validate(&self, request: &WriteRequest) -> RillResult<()> {
        if request.messages.is_empty() {
            return Err(RillError::EmptyRequest);
        }
        let max_size = self.config.max_message_size;
        if let Some(message) = request.messages.iter().find(|m| m.payload.len() > max_size) {
            return Err(RillError::MessageTooLarge {
                size: message.payload.len(),
                max_size,
            });
        }
        Ok(())
    }

    /// Buffers prepared messages, recycling first when the pool cannot
    /// cover them.
    pub(crate) fn append_prepared(&self, messages: Vec<PreparedMessage>) -> RillResult<WriteAck> {
        let bytes: usize = messages.iter().map(PreparedMessage::len).sum();
        let needed = self.ring.lock().ring.blocks_needed(bytes);
        let available = self.pool.available_block_count();
        if needed > available {
            self.recycle_buffer(Some(needed - available));
        }

        let mut state = self.ring.lock();
        if state.closed {
            return Err(self.stopping());
        }
        if let Err(missing) = state.ring.reserve(bytes) {
            drop(state);
            self.recycle_buffer(Some(missing));
            state = self.ring.lock();
            if state.closed {
                return Err(self.stopping());
            }
            state.ring.reserve(bytes).map_err(|missing| RillError::BufferExhausted {
                needed: missing,
                available: self.pool.available_block_count(),
            })?;
        }

        let first_msg_id = state.ring.append(&messages, now_micros());
        let timestamp = state.ring.last_timestamp();
        state.unwritten_bytes += bytes;
        self.ids.received.fetch_max(state.ring.next_id(), Ordering::AcqRel);
        drop(state);

        self.stats.record_write(messages.len(), bytes);
        Ok(WriteAck {
            first_msg_id,
            count: messages.len(),
            timestamp,
        })
    }

    fn maybe_commit(&self) {
        if !self.need_commit() {
            return;
        }
        if let Err(err) = self.commit_inner(false) {
            debug!(partition = %self.partition, error = %err, "opportunistic commit failed");
        }
    }

    // -----------------------------------------------------------------------
    // Commit
    // -----------------------------------------------------------------------

    /// Returns true if the commit loop should commit this engine now.
    pub fn need_commit(&self) -> bool {
        if !self.is_running() || self.policy.is_self_driven() || self.is_committing() {
            return false;
        }
        self.policy.is_due(&self.progress())
    }

    /// Commits everything buffered, waiting for a concurrent commit to end.
    pub fn commit_message(&self) -> RillResult<()> {
        self.commit_inner(true).map(|_| ())
    }

    pub(crate) fn progress(&self) -> CommitProgress {
        let (unwritten_bytes, last_timestamp) = {
            let state = self.ring.lock();
            (state.unwritten_bytes, state.ring.last_timestamp())
        };
        let consumer = if self.config.topic_mode == TopicMode::MemoryPrefer {
            self.commit_manager.commit_id_and_access_time()
        } else {
            ConsumerCommit::default()
        };
        CommitProgress {
            received_id: self.received_id(),
            written_id: self.written_id(),
            committed_id: self.committed_id(),
            unwritten_bytes,
            last_timestamp,
            since_last_commit: self.ids.last_commit.lock().elapsed(),
            consumer,
        }
    }

    /// Runs one commit. Returns false if `blocking` is off and another
    /// commit holds the committer.
    pub(crate) fn commit_inner(&self, blocking: bool) -> RillResult<bool> {
        if self.retired.load(Ordering::Acquire) {
            return Err(self.stopping());
        }
        if !self.policy.persists() {
            let received = self.received_id();
            self.ids.written.fetch_max(received, Ordering::AcqRel);
            self.ids.committed.fetch_max(received, Ordering::AcqRel);
            self.ring.lock().unwritten_bytes = 0;
            *self.ids.last_commit.lock() = Instant::now();
            return Ok(true);
        }

        let mut committer = if blocking {
            self.committer.lock()
        } else {
            match self.committer.try_lock() {
                Some(committer) => committer,
                None => return Ok(false),
            }
        };
        if self.retired.load(Ordering::Acquire) {
            return Err(self.stopping());
        }
        let _committing = CommittingFlag::set(&self.committing);
        if committer.has_seal_error() {
            self.mark_sealed();
            return Err(RillError::Sealed {
                partition: self.partition.clone(),
            });
        }

        let started = Instant::now();
        let pending = self.ring.lock().ring.messages_from(committer.written_id());
        match committer.write(&pending).and_then(|()| committer.commit_file()) {
            Ok(()) => {
                let written = committer.written_id();
                self.ids.written.fetch_max(written, Ordering::AcqRel);
                self.ids
                    .committed
                    .fetch_max(committer.committed_id(), Ordering::AcqRel);
                self.ids
                    .committed_ts
                    .fetch_max(committer.committed_timestamp(), Ordering::AcqRel);
                {
                    let mut state = self.ring.lock();
                    state.unwritten_bytes = state.ring.bytes_from(written);
                }
                *self.ids.last_commit.lock() = Instant::now();
                *self.last_commit_error.lock() = None;
                self.stats.record_commit();
                self.metrics.latency("partition.commit", started.elapsed());
                debug!(
                    partition = %self.partition,
                    messages = pending.len(),
                    committed_id = self.committed_id(),
                    "commit finished"
                );
                Ok(true)
            }
            Err(err) => {
                self.stats.record_commit_failure();
                self.metrics.counter("partition.commit_failures", 1);
                *self.last_commit_error.lock() = Some(err.to_string());
                if committer.has_seal_error() || err.is_fatal() {
                    self.mark_sealed();
                } else {
                    warn!(partition = %self.partition, error = %err, "commit failed; will retry");
                }
                Err(err)
            }
        }
    }
}

impl BatchSink for PartitionEngine {
    fn apply_batch(&self, messages: Vec<PreparedMessage>) -> RillResult<WriteAck> {
        self.append_prepared(messages)
    }

    fn force_commit(&self) -> RillResult<()> {
        self.commit_inner(true).map(|_| ())
    }
}
