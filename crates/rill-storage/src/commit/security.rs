//! Batched commits for security topics.
//!
//! Writers enqueue their messages and block. A dedicated thread sleeps while
//! the queue is empty and wakes when enough bytes are queued or the oldest
//! request has waited
//! `max_wait_time_for_security_commit`, drops requests that exceeded the
//! request timeout, appends the rest, commits once, and only then replies to
//! every writer of the batch.
//!
//! ```text
//!   submit ─► queue ──(bytes ≥ max | oldest ≥ max_wait | stop)──► worker
//!     ▲                                                            │
//!     └──────────── reply after append + force commit ◄────────────┘
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use rill_common::config::PartitionConfig;
use rill_common::{PartitionId, RillError, RillResult};

use crate::engine::WriteAck;
use crate::message::PreparedMessage;

/// Where a batch goes once the worker has drained it.
pub(crate) trait BatchSink: Send + Sync {
    /// Appends one request's messages.
    fn apply_batch(&self, messages: Vec<PreparedMessage>) -> RillResult<WriteAck>;

    /// Makes everything appended so far durable.
    fn force_commit(&self) -> RillResult<()>;
}

#[derive(Default)]
struct ReplySlot {
    result: Mutex<Option<RillResult<WriteAck>>>,
    ready: Condvar,
}

impl ReplySlot {
    fn fill(&self, result: RillResult<WriteAck>) {
        *self.result.lock() = Some(result);
        self.ready.notify_all();
    }

    fn wait(&self, limit: Duration) -> Option<RillResult<WriteAck>> {
        let deadline = Instant::now() + limit;
        let mut result = self.result.lock();
        while result.is_none() {
            if self.ready.wait_until(&mut result, deadline).timed_out() {
                break;
            }
        }
        result.take()
    }
}

struct WriteRequestItem {
    messages: Vec<PreparedMessage>,
    enqueued: Instant,
    reply: Arc<ReplySlot>,
}

#[derive(Default)]
struct BatchQueue {
    items: Vec<WriteRequestItem>,
    bytes: usize,
    stopping: bool,
}

struct Shared {
    partition: PartitionId,
    queue: Mutex<BatchQueue>,
    wake: Condvar,
    max_wait: Duration,
    max_bytes: usize,
    request_timeout: Duration,
    batches: AtomicU64,
    timeouts: AtomicU64,
}

/// The batch committer of one security partition.
pub struct SecurityBatcher {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SecurityBatcher {
    /// Starts the worker thread.
    pub(crate) fn start(
        partition: PartitionId,
        config: &PartitionConfig,
        sink: Weak<dyn BatchSink>,
    ) -> RillResult<Self> {
        let shared = Arc::new(Shared {
            partition,
            queue: Mutex::new(BatchQueue::default()),
            wake: Condvar::new(),
            max_wait: config.max_wait_time_for_security_commit,
            max_bytes: config.max_data_size_for_security_commit,
            request_timeout: config.security_request_timeout,
            batches: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        });
        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("rill-security-{}", shared.partition))
            .spawn(move || worker_shared.run(&sink))?;
        Ok(Self {
            shared,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Queues `messages` and blocks until their batch is committed.
    pub(crate) fn submit(&self, messages: Vec<PreparedMessage>) -> RillResult<WriteAck> {
        let bytes: usize = messages.iter().map(PreparedMessage::len).sum();
        let reply = Arc::new(ReplySlot::default());
        {
            let mut queue = self.shared.queue.lock();
            if queue.stopping {
                return Err(RillError::PartitionStopping {
                    partition: self.shared.partition.clone(),
                });
            }
            let was_empty = queue.items.is_empty();
            queue.items.push(WriteRequestItem {
                messages,
                enqueued: Instant::now(),
                reply: Arc::clone(&reply),
            });
            queue.bytes += bytes;
            // The worker times its wait from the oldest request.
            if was_empty || queue.bytes >= self.shared.max_bytes {
                self.shared.wake.notify_one();
            }
        }

        let limit = (self.shared.request_timeout + self.shared.max_wait) * 2;
        reply.wait(limit).unwrap_or_else(|| {
            Err(RillError::RequestTimeout {
                waited_ms: limit.as_millis() as u64,
                limit_ms: self.shared.request_timeout.as_millis() as u64,
            })
        })
    }

    /// Rejects new requests, commits what is queued and joins the worker.
    pub fn stop(&self) {
        {
            let mut queue = self.shared.queue.lock();
            queue.stopping = true;
            self.shared.wake.notify_all();
        }
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!(partition = %self.shared.partition, "security batcher panicked");
            }
        }
    }

    /// Returns the number of queued requests.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().items.len()
    }

    /// Returns the number of batches committed.
    pub fn batches(&self) -> u64 {
        self.shared.batches.load(Ordering::Relaxed)
    }

    /// Returns the number of requests denied for waiting too long.
    pub fn timeouts(&self) -> u64 {
        self.shared.timeouts.load(Ordering::Relaxed)
    }
}

impl Drop for SecurityBatcher {
    fn drop(&mut self) {
        let mut queue = self.shared.queue.lock();
        queue.stopping = true;
        self.shared.wake.notify_all();
    }
}

impl std::fmt::Debug for SecurityBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityBatcher")
            .field("partition", &self.shared.partition)
            .field("pending", &self.pending())
            .field("batches", &self.batches())
            .finish()
    }
}

impl Shared {
    fn run(&self, sink: &Weak<dyn BatchSink>) {
        loop {
            let (batch, stopping) = self.next_batch();
            if !batch.is_empty() {
                self.process(batch, sink);
            }
            if stopping {
                debug!(partition = %self.partition, "security batcher stopped");
                return;
            }
        }
    }

    fn next_batch(&self) -> (Vec<WriteRequestItem>, bool) {
        let mut queue = self.queue.lock();
        while !queue.stopping && queue.bytes < self.max_bytes {
            let wait = match queue.items.first() {
                None => {
                    self.wake.wait(&mut queue);
                    continue;
                }
                Some(first) => {
                    let age = first.enqueued.elapsed();
                    if age >= self.max_wait {
                        break;
                    }
                    self.max_wait - age
                }
            };
            self.wake.wait_for(&mut queue, wait);
        }
        queue.bytes = 0;
        (std::mem::take(&mut queue.items), queue.stopping)
    }

    fn process(&self, batch: Vec<WriteRequestItem>, sink: &Weak<dyn BatchSink>) {
        let Some(sink) = sink.upgrade() else {
            for item in batch {
                item.reply.fill(Err(RillError::PartitionStopping {
                    partition: self.partition.clone(),
                }));
            }
            return;
        };

        let mut applied = Vec::with_capacity(batch.len());
        for item in batch {
            let waited = item.enqueued.elapsed();
            if waited > self.request_timeout {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                item.reply.fill(Err(RillError::RequestTimeout {
                    waited_ms: waited.as_millis() as u64,
                    limit_ms: self.request_timeout.as_millis() as u64,
                }));
                continue;
            }
            match sink.apply_batch(item.messages) {
                Ok(ack) => applied.push((item.reply, ack)),
                Err(err) => item.reply.fill(Err(err)),
            }
        }
        if applied.is_empty() {
            return;
        }

        match sink.force_commit() {
            Ok(()) => {
                self.batches.fetch_add(1, Ordering::Relaxed);
                debug!(partition = %self.partition, requests = applied.len(), "security batch committed");
                for (reply, ack) in applied {
                    reply.fill(Ok(ack));
                }
            }
            Err(err) => {
                for (reply, _) in applied {
                    reply.fill(Err(self.commit_error(&err)));
                }
            }
        }
    }

    fn commit_error(&self, err: &RillError) -> RillError {
        if err.is_fatal() {
            RillError::Sealed {
                partition: self.partition.clone(),
            }
        } else {
            RillError::CommitFailed {
                partition: self.partition.clone(),
                reason: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageInput;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingSink {
        next_id: Mutex<u64>,
        commits: AtomicUsize,
        fail_commit: bool,
    }

    impl BatchSink for CountingSink {
        fn apply_batch(&self, messages: Vec<PreparedMessage>) -> RillResult<WriteAck> {
            let mut next = self.next_id.lock();
            let first = *next;
            *next += messages.len() as u64;
            Ok(WriteAck {
                first_msg_id: first,
                count: messages.len(),
                timestamp: 0,
            })
        }

        fn force_commit(&self) -> RillResult<()> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            if self.fail_commit {
                return Err(RillError::internal("disk gone"));
            }
            Ok(())
        }
    }

    fn config(max_wait: Duration, max_bytes: usize) -> PartitionConfig {
        let mut config = PartitionConfig::for_mode(rill_common::TopicMode::Security)
            .with_security_commit(max_wait, max_bytes);
        config.security_request_timeout = Duration::from_secs(5);
        config
    }

    fn payload(len: usize) -> Vec<PreparedMessage> {
        vec![PreparedMessage::prepare(MessageInput::new(vec![1u8; len]), false, 0)]
    }

    fn start(sink: &Arc<CountingSink>, config: &PartitionConfig) -> Arc<SecurityBatcher> {
        let weak: Weak<dyn BatchSink> = Arc::downgrade(sink) as Weak<dyn BatchSink>;
        Arc::new(SecurityBatcher::start(PartitionId::new("sec", 0), config, weak).unwrap())
    }

    #[test]
    fn test_byte_threshold_commits_without_waiting() {
        let sink = Arc::new(CountingSink::default());
        let batcher = start(&sink, &config(Duration::from_secs(30), 1024 * 1024));

        let started = Instant::now();
        let writers: Vec<_> = (0..2)
            .map(|_| {
                let batcher = Arc::clone(&batcher);
                thread::spawn(move || batcher.submit(payload(768 * 1024)))
            })
            .collect();
        let mut firsts: Vec<u64> = writers
            .into_iter()
            .map(|w| w.join().unwrap().unwrap().first_msg_id)
            .collect();
        firsts.sort_unstable();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(firsts, vec![0, 1]);
        assert_eq!(sink.commits.load(Ordering::SeqCst), 1);
        assert_eq!(batcher.batches(), 1);
        batcher.stop();
    }

    #[test]
    fn test_timer_commits_small_batch() {
        let sink = Arc::new(CountingSink::default());
        let batcher = start(&sink, &config(Duration::from_millis(20), 1024 * 1024));
        let ack = batcher.submit(payload(10)).unwrap();
        assert_eq!(ack.count, 1);
        assert_eq!(sink.commits.load(Ordering::SeqCst), 1);
        batcher.stop();
    }

    #[test]
    fn test_lone_request_waits_max_wait_from_enqueue() {
        let max_wait = Duration::from_millis(200);
        let sink = Arc::new(CountingSink::default());
        let batcher = start(&sink, &config(max_wait, 1024 * 1024));
        // Let the worker settle into its idle wait first.
        thread::sleep(Duration::from_millis(150));

        let started = Instant::now();
        batcher.submit(payload(10)).unwrap();
        let waited = started.elapsed();
        assert!(waited >= max_wait, "flushed early after {waited:?}");
        assert!(waited < Duration::from_millis(350), "flushed late after {waited:?}");
        assert_eq!(sink.commits.load(Ordering::SeqCst), 1);
        batcher.stop();
    }

    #[test]
    fn test_stale_requests_denied() {
        let sink = Arc::new(CountingSink::default());
        let mut config = config(Duration::from_millis(50), 1024 * 1024);
        config.security_request_timeout = Duration::from_millis(1);
        let batcher = start(&sink, &config);

        let err = batcher.submit(payload(10)).unwrap_err();
        assert!(err.is_busy());
        let deadline = Instant::now() + Duration::from_secs(5);
        while batcher.timeouts() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(batcher.timeouts(), 1);
        assert_eq!(sink.commits.load(Ordering::SeqCst), 0);
        batcher.stop();
    }

    #[test]
    fn test_commit_failure_reaches_every_writer() {
        let sink = Arc::new(CountingSink {
            fail_commit: true,
            ..Default::default()
        });
        let batcher = start(&sink, &config(Duration::from_millis(10), 1024 * 1024));
        let err = batcher.submit(payload(10)).unwrap_err();
        assert_eq!(err.code(), rill_common::ErrorCode::Sealed);
        batcher.stop();
    }

    #[test]
    fn test_stop_drains_then_rejects() {
        let sink = Arc::new(CountingSink::default());
        let batcher = start(&sink, &config(Duration::from_secs(30), 1024 * 1024));

        let writer = {
            let batcher = Arc::clone(&batcher);
            thread::spawn(move || batcher.submit(payload(10)))
        };
        while batcher.pending() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        batcher.stop();
        assert!(writer.join().unwrap().is_ok());

        let err = batcher.submit(payload(10)).unwrap_err();
        assert!(err.is_not_found());
    }
}
