//! Read path: memory ring first, DFS file pairs through the block cache
//! for ids the ring no longer holds.

use std::time::Instant;

use bytes::{Bytes, BytesMut};
use tracing::debug;

use rill_cache::{CacheError, CacheResult, ReaderHandle, ReaderKey};
use rill_common::{RillError, RillResult, TimeoutChecker};

use super::{MaxIdInfo, PartitionEngine, ReadRequest, ReadResponse, Reply};
use crate::codec::MetaEntry;
use crate::collab::FilePairInfo;
use crate::message::Message;

/// Messages collected by one read, with its limits.
struct ReadBatch<'a> {
    request: &'a ReadRequest,
    messages: Vec<Message>,
    bytes: usize,
    scanned: usize,
    full: bool,
    next: u64,
    last_timestamp: Option<i64>,
}

impl<'a> ReadBatch<'a> {
    fn new(request: &'a ReadRequest) -> Self {
        Self {
            request,
            messages: Vec::new(),
            bytes: 0,
            scanned: 0,
            full: false,
            next: request.start_id,
            last_timestamp: None,
        }
    }

    fn is_full(&self) -> bool {
        self.full
    }

    /// Takes `message` unless a limit is hit. Returns false once no more
    /// messages fit.
    fn offer(&mut self, message: Message) -> bool {
        if self.full {
            return false;
        }
        let len = message.payload.len();
        let matches = self.request.filter.matches(message.uint16_payload);
        if matches && !self.messages.is_empty() && self.bytes + len > self.request.max_bytes {
            self.full = true;
            return false;
        }
        self.scanned += 1;
        self.next = message.msg_id + 1;
        self.last_timestamp = Some(message.timestamp);
        if matches {
            self.bytes += len;
            self.messages.push(message);
        }
        self.full =
            self.messages.len() >= self.request.max_count || self.bytes >= self.request.max_bytes;
        !self.full
    }

    fn reposition(&mut self, msg_id: u64) {
        self.next = msg_id;
    }
}

impl PartitionEngine {
    /// Reads messages starting at `request.start_id`.
    ///
    /// `NoData` means nothing is stored at or after the start yet;
    /// `DataLoss` carries the id to resume from after a gap.
    pub fn get_message(&self, request: ReadRequest) -> Reply<ReadResponse> {
        let started = Instant::now();
        let result = self.get_message_inner(&request);
        match &result {
            Err(err) if err.is_busy() => {
                self.stats.record_rejection();
                debug!(partition = %self.partition, error = %err, "read rejected");
            }
            Err(err) if err.is_data_loss() => {
                self.stats.record_data_loss();
                debug!(partition = %self.partition, error = %err, "read hit a gap");
            }
            _ => self.metrics.latency("partition.read", started.elapsed()),
        }
        self.reply(result)
    }

    fn get_message_inner(&self, request: &ReadRequest) -> RillResult<ReadResponse> {
        let _inflight = self.enter()?;
        self.seal_check()?;
        if !self.flow.try_admit() {
            return Err(RillError::FlowControlExceeded {
                partition: self.partition.clone(),
            });
        }
        if request.session_id != self.session_id {
            return Err(RillError::SessionMismatch {
                partition: self.partition.clone(),
                expected: self.session_id,
                actual: request.session_id,
            });
        }
        if !request.filter.is_valid() {
            return Err(RillError::UnsupportedFilter {
                reason: format!("empty range {:?}", request.filter),
            });
        }
        if request.max_count == 0 || request.max_bytes == 0 {
            return Err(RillError::invalid_argument("read limits must be non-zero"));
        }
        let _permit = self.admission.try_read()?;

        let reader = self.readers.get_or_create(&ReaderKey::new(
            self.partition.clone(),
            request.client_id.clone(),
            request.filter,
        ));
        reader.lock().record_request(request.start_id);

        let received = self.received_id();
        if request.start_id >= received {
            return Err(RillError::NoData {
                next_msg_id: received,
            });
        }

        let mut batch = ReadBatch::new(request);
        let front = self.ring.lock().ring.front_id();
        let from_dfs = request.start_id < front;
        if from_dfs {
            if !self.policy.persists() {
                return Err(RillError::data_loss(front, "evicted from memory"));
            }
            let checker = TimeoutChecker::new(self.config.request_timeout);
            self.read_from_dfs(&mut batch, &checker, &reader)?;
        }
        if !batch.is_full() {
            self.read_from_memory(&mut batch);
        }

        if batch.messages.is_empty() && batch.next >= self.received_id() {
            return Err(RillError::NoData {
                next_msg_id: batch.next,
            });
        }
        self.finish_read(batch, &reader, from_dfs)
    }

    fn finish_read(
        &self,
        batch: ReadBatch<'_>,
        reader: &ReaderHandle,
        from_dfs: bool,
    ) -> RillResult<ReadResponse> {
        let request = batch.request;
        let served = batch.messages.len();
        let mut messages = batch.messages;
        if request.decompress {
            messages = messages
                .iter()
                .map(Message::decompressed)
                .collect::<RillResult<Vec<_>>>()?;
        }
        if let Some(filter) = &request.field_filter {
            messages = filter.apply(messages)?;
        }

        if let Some(last_timestamp) = batch.last_timestamp {
            let mut info = reader.lock();
            info.record_served(batch.next - 1, last_timestamp);
            if from_dfs && served > 0 {
                info.data.set_avg_msg_size(batch.bytes as f64 / served as f64);
            }
        }
        self.flow.charge(batch.bytes);
        self.stats.record_read(messages.len(), batch.bytes, from_dfs);

        Ok(ReadResponse {
            messages,
            next_msg_id: batch.next,
            last_timestamp: batch.last_timestamp,
        })
    }

    fn read_from_memory(&self, batch: &mut ReadBatch<'_>) {
        let state = self.ring.lock();
        if batch.next < state.ring.front_id() {
            return;
        }
        state.ring.scan(batch.next, |message| batch.offer(message));
    }

    // -----------------------------------------------------------------------
    // DFS
    // -----------------------------------------------------------------------

    fn read_from_dfs(
        &self,
        batch: &mut ReadBatch<'_>,
        checker: &TimeoutChecker,
        reader: &ReaderHandle,
    ) -> RillResult<()> {
        let _permit = self.admission.try_read_file()?;
        let mut repaired = false;
        loop {
            let front = self.ring.lock().ring.front_id();
            let id = batch.next;
            if id >= front || batch.is_full() {
                return Ok(());
            }

            let Some(pair) = self.file_manager.locate(id) else {
                return Self::gap(batch, front, "not held by any file");
            };
            if pair.start_id > id {
                let expired = self.file_manager.min_message_id() == Some(pair.start_id);
                if expired && !repaired && batch.scanned == 0 {
                    repaired = true;
                    let start = self.repair_start(batch.request, pair.start_id);
                    debug!(
                        partition = %self.partition,
                        requested = id,
                        start,
                        "start id expired; repositioned"
                    );
                    batch.reposition(start);
                    continue;
                }
                return Self::gap(batch, pair.start_id, "missing from files");
            }

            if let Err(err) = self.read_pair(&pair, batch, checker, reader) {
                if batch.scanned > 0 {
                    return Ok(());
                }
                return Err(err.into_data_loss(pair.end_id));
            }
            if batch.next < pair.end_id {
                return Ok(());
            }
        }
    }

    /// Ends a read at a gap: partial results are returned as is; an empty
    /// read reports the loss.
    fn gap(batch: &ReadBatch<'_>, next_msg_id: u64, reason: &str) -> RillResult<()> {
        if batch.scanned > 0 {
            Ok(())
        } else {
            Err(RillError::data_loss(next_msg_id, reason))
        }
    }

    fn repair_start(&self, request: &ReadRequest, oldest: u64) -> u64 {
        match request.start_timestamp {
            Some(timestamp) => match self.find_id_by_time(timestamp) {
                Ok(id) => id.max(oldest),
                Err(_) => self.received_id(),
            },
            None => oldest,
        }
    }

    fn read_pair(
        &self,
        pair: &FilePairInfo,
        batch: &mut ReadBatch<'_>,
        checker: &TimeoutChecker,
        reader: &ReaderHandle,
    ) -> CacheResult<()> {
        let mut id = batch.next;
        while id < pair.end_id {
            let entry = self.read_meta_entry(pair, id, checker, Some(reader))?;
            let payload = self.read_range(
                &pair.data_name,
                u64::from(entry.offset),
                entry.len as usize,
                pair.appending,
                checker,
                Some(reader),
            )?;
            let message = Message {
                msg_id: entry.msg_id,
                timestamp: entry.timestamp,
                uint16_payload: entry.uint16_payload,
                compressed: entry.compressed,
                payload,
            };
            if !batch.offer(message) {
                break;
            }
            id += 1;
        }
        Ok(())
    }

    fn read_meta_entry(
        &self,
        pair: &FilePairInfo,
        msg_id: u64,
        checker: &TimeoutChecker,
        reader: Option<&ReaderHandle>,
    ) -> CacheResult<MetaEntry> {
        let offset = pair.meta_offset(msg_id);
        let raw = self.read_range(
            &pair.meta_name,
            offset,
            MetaEntry::SIZE,
            pair.appending,
            checker,
            reader,
        )?;
        let block_index = offset / self.block_cache.block_size() as u64;
        let entry = MetaEntry::from_bytes(&raw).map_err(|err| CacheError::BlockLost {
            file: pair.meta_name.clone(),
            block_index,
            reason: err.to_string(),
        })?;
        if entry.msg_id != msg_id {
            return Err(CacheError::BlockLost {
                file: pair.meta_name.clone(),
                block_index,
                reason: format!("entry for {msg_id} holds {}", entry.msg_id),
            });
        }
        Ok(entry)
    }

    /// Reads `len` bytes at `offset`, crossing block boundaries.
    fn read_range(
        &self,
        file: &str,
        offset: u64,
        len: usize,
        appending: bool,
        checker: &TimeoutChecker,
        reader: Option<&ReaderHandle>,
    ) -> CacheResult<Bytes> {
        let mut out = BytesMut::with_capacity(len);
        let mut pos = offset;
        while out.len() < len {
            let block = self
                .block_cache
                .read_block(file, pos, appending, checker, reader)?;
            let within = (pos - block.offset()) as usize;
            let available = block.len().saturating_sub(within);
            if available == 0 {
                return Err(CacheError::BlockLost {
                    file: file.to_string(),
                    block_index: block.block_index(),
                    reason: format!("short block at offset {pos}"),
                });
            }
            let take = available.min(len - out.len());
            out.extend_from_slice(&block.data()[within..within + take]);
            pos += take as u64;
        }
        Ok(out.freeze())
    }

    // -----------------------------------------------------------------------
    // Id lookups
    // -----------------------------------------------------------------------

    /// Returns the first stored id whose timestamp is at least `timestamp`.
    pub(crate) fn find_id_by_time(&self, timestamp: i64) -> RillResult<u64> {
        let (front_id, front_ts, ring_hit, last_ts) = {
            let state = self.ring.lock();
            (
                state.ring.front_id(),
                state.ring.front_timestamp(),
                state.ring.first_id_at_or_after(timestamp),
                state.ring.last_timestamp(),
            )
        };
        if self.received_id() == 0 || timestamp > last_ts {
            return Err(RillError::TimestampTooNew { timestamp });
        }
        if let (Some(front_ts), Some(id)) = (front_ts, ring_hit) {
            if front_ts <= timestamp {
                return Ok(id);
            }
        }
        if !self.policy.persists() {
            return Ok(front_id);
        }
        match self.file_manager.locate_by_timestamp(timestamp) {
            Some(pair) => self.search_pair_by_time(&pair, timestamp),
            None => Ok(front_id),
        }
    }

    /// Binary search over the meta entries of `pair`.
    fn search_pair_by_time(&self, pair: &FilePairInfo, timestamp: i64) -> RillResult<u64> {
        if pair.start_ts >= timestamp {
            return Ok(pair.start_id);
        }
        let checker = TimeoutChecker::new(self.config.request_timeout);
        let (mut low, mut high) = (pair.start_id, pair.end_id - 1);
        while low < high {
            let mid = low + (high - low) / 2;
            let entry = self
                .read_meta_entry(pair, mid, &checker, None)
                .map_err(|err| err.into_data_loss(pair.end_id))?;
            if entry.timestamp < timestamp {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        Ok(low)
    }

    /// Returns the newest id and its timestamp.
    pub fn get_max_message_id(&self) -> Reply<MaxIdInfo> {
        let result = self.get_max_message_id_inner();
        self.reply(result)
    }

    fn get_max_message_id_inner(&self) -> RillResult<MaxIdInfo> {
        let _inflight = self.enter()?;
        let _permit = self.admission.try_get_max_id()?;
        let timestamp = self.ring.lock().ring.last_timestamp();
        Ok(MaxIdInfo {
            max_msg_id: self.max_msg_id(),
            timestamp,
        })
    }

    /// Returns the first id whose timestamp is at least `timestamp`.
    pub fn get_min_message_id_by_time(&self, timestamp: i64) -> Reply<u64> {
        let result = self.get_min_message_id_by_time_inner(timestamp);
        self.reply(result)
    }

    fn get_min_message_id_by_time_inner(&self, timestamp: i64) -> RillResult<u64> {
        let _inflight = self.enter()?;
        let _permit = self.admission.try_get_min_id()?;
        self.find_id_by_time(timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{context, quick_stop, spec};
    use super::super::WriteRequest;
    use super::*;
    use crate::message::MessageInput;
    use rill_common::{Filter, TopicMode};
    use std::sync::Arc;

    fn write(engine: &PartitionEngine, payloads: &[&'static [u8]]) {
        engine
            .add_message(WriteRequest::new(
                payloads.iter().map(|p| MessageInput::new(*p)).collect(),
            ))
            .into_result()
            .unwrap();
    }

    fn ids(response: &ReadResponse) -> Vec<u64> {
        response.messages.iter().map(|m| m.msg_id).collect()
    }

    #[test]
    fn test_read_from_memory_with_limits() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, 16);
        let engine = PartitionEngine::load(spec(TopicMode::MemoryOnly), &ctx).unwrap();
        write(&engine, &[b"a", b"bb", b"ccc", b"dddd"]);

        let all = engine.get_message(ReadRequest::new(7, "c1", 0)).into_result().unwrap();
        assert_eq!(ids(&all), vec![0, 1, 2, 3]);
        assert_eq!(all.next_msg_id, 4);

        let counted = engine
            .get_message(ReadRequest::new(7, "c1", 1).with_max_count(2))
            .into_result()
            .unwrap();
        assert_eq!(ids(&counted), vec![1, 2]);
        assert_eq!(counted.next_msg_id, 3);

        let sized = engine
            .get_message(ReadRequest::new(7, "c1", 0).with_max_bytes(3))
            .into_result()
            .unwrap();
        assert_eq!(ids(&sized), vec![0, 1]);

        let oversized = engine
            .get_message(ReadRequest::new(7, "c1", 3).with_max_bytes(1))
            .into_result()
            .unwrap();
        assert_eq!(ids(&oversized), vec![3], "one message always fits");
    }

    #[test]
    fn test_no_data_and_session_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, 16);
        let engine = PartitionEngine::load(spec(TopicMode::MemoryOnly), &ctx).unwrap();

        let empty = engine.get_message(ReadRequest::new(7, "c1", 0));
        assert!(matches!(empty.result, Err(RillError::NoData { next_msg_id: 0 })));

        write(&engine, &[b"x"]);
        let ahead = engine.get_message(ReadRequest::new(7, "c1", 5));
        assert!(matches!(ahead.result, Err(RillError::NoData { next_msg_id: 1 })));

        let stale = engine.get_message(ReadRequest::new(3, "c1", 0));
        let err = stale.result.unwrap_err();
        assert!(matches!(err, RillError::SessionMismatch { expected: 7, actual: 3, .. }));
        assert!(err.is_not_found());
        assert_eq!(stale.meta.max_msg_id, Some(0));
    }

    #[test]
    fn test_filter_skips_and_rejects_empty_range() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, 16);
        let engine = PartitionEngine::load(spec(TopicMode::MemoryOnly), &ctx).unwrap();
        engine
            .add_message(WriteRequest::new(vec![
                MessageInput::new(&b"a"[..]).with_uint16(10),
                MessageInput::new(&b"b"[..]).with_uint16(500),
                MessageInput::new(&b"c"[..]).with_uint16(20),
            ]))
            .into_result()
            .unwrap();

        let low = engine
            .get_message(ReadRequest::new(7, "c1", 0).with_filter(Filter::new(0, 100)))
            .into_result()
            .unwrap();
        assert_eq!(ids(&low), vec![0, 2]);
        assert_eq!(low.next_msg_id, 3);

        let invalid = engine.get_message(
            ReadRequest::new(7, "c1", 0).with_filter(Filter::new(9, 1)),
        );
        assert!(matches!(invalid.result, Err(RillError::UnsupportedFilter { .. })));
    }

    #[test]
    fn test_read_from_dfs_after_recycle() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, 16);
        let engine = PartitionEngine::load(spec(TopicMode::Normal), &ctx).unwrap();
        write(&engine, &[b"one", b"two", b"three"]);
        engine.commit_message().unwrap();
        write(&engine, &[b"four"]);
        engine.recycle_buffer(Some(engine.pool().max_block_count()));
        assert_eq!(engine.ring.lock().ring.front_id(), 3);

        let response = engine.get_message(ReadRequest::new(7, "c1", 0)).into_result().unwrap();
        assert_eq!(ids(&response), vec![0, 1, 2, 3]);
        assert_eq!(&response.messages[2].payload[..], b"three");
        assert_eq!(engine.stats().dfs_reads(), 1);
    }

    #[test]
    fn test_memory_only_eviction_is_data_loss() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, 16);
        let engine = PartitionEngine::load(spec(TopicMode::MemoryOnly), &ctx).unwrap();
        write(&engine, &[b"a", b"b", b"c"]);
        engine.recycle_buffer(Some(engine.pool().max_block_count()));

        let reply = engine.get_message(ReadRequest::new(7, "c1", 0));
        match reply.result {
            Err(RillError::DataLoss { next_msg_id, .. }) => assert_eq!(next_msg_id, 3),
            other => panic!("expected data loss, got {other:?}"),
        }
        assert_eq!(engine.stats().data_loss(), 1);
    }

    #[test]
    fn test_find_id_by_time() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, 16);
        let engine = PartitionEngine::load(spec(TopicMode::Normal), &ctx).unwrap();
        let mut stamps = Vec::new();
        for payload in [&b"a"[..], b"b", b"c", b"d"] {
            let ack = engine
                .add_message(WriteRequest::new(vec![MessageInput::new(payload)]))
                .into_result()
                .unwrap();
            stamps.push(ack.timestamp);
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        engine.commit_message().unwrap();
        engine.recycle_buffer(Some(engine.pool().max_block_count()));

        let found = engine.get_min_message_id_by_time(stamps[2]).into_result().unwrap();
        assert_eq!(found, 2);
        let first = engine.get_min_message_id_by_time(stamps[0] - 1).into_result().unwrap();
        assert_eq!(first, 0);
        let too_new = engine.get_min_message_id_by_time(stamps[3] + 1);
        assert!(matches!(too_new.result, Err(RillError::TimestampTooNew { .. })));

        let max = engine.get_max_message_id().into_result().unwrap();
        assert_eq!(max.max_msg_id, Some(3));
        assert_eq!(max.timestamp, stamps[3]);
    }

    struct DropOdd;

    impl super::super::FieldFilter for DropOdd {
        fn apply(&self, messages: Vec<Message>) -> RillResult<Vec<Message>> {
            Ok(messages.into_iter().filter(|m| m.msg_id % 2 == 0).collect())
        }
    }

    #[test]
    fn test_field_filter_post_pass_and_compression() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, 16);
        let mut spec = spec(TopicMode::MemoryOnly);
        spec.config = spec.config.with_compression(true);
        spec.config.compress_threshold = 16;
        let engine = PartitionEngine::load(spec, &ctx).unwrap();
        let big = vec![b'z'; 512];
        engine
            .add_message(WriteRequest::new(vec![
                MessageInput::new(big.clone()),
                MessageInput::new(big.clone()),
                MessageInput::new(big.clone()),
            ]))
            .into_result()
            .unwrap();

        let response = engine
            .get_message(ReadRequest::new(7, "c1", 0).with_field_filter(Arc::new(DropOdd)))
            .into_result()
            .unwrap();
        assert_eq!(ids(&response), vec![0, 2]);
        assert_eq!(response.next_msg_id, 3);
        assert!(response.messages.iter().all(|m| !m.compressed && m.payload.len() == 512));

        let raw = engine
            .get_message(ReadRequest::new(7, "c1", 0).keep_compressed())
            .into_result()
            .unwrap();
        assert!(raw.messages.iter().all(|m| m.compressed));
    }

    #[test]
    fn test_flow_control_rejects_when_window_spent() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, 16);
        let mut spec = spec(TopicMode::MemoryOnly);
        spec.config = spec.config.with_flow_control(4);
        let engine = PartitionEngine::load(spec, &ctx).unwrap();
        write(&engine, &[b"12345678"]);

        assert!(engine.get_message(ReadRequest::new(7, "c1", 0)).is_ok());
        let throttled = engine.get_message(ReadRequest::new(7, "c1", 0));
        let err = throttled.result.unwrap_err();
        assert!(matches!(err, RillError::FlowControlExceeded { .. }));
        assert!(err.is_busy());
    }

    #[test]
    fn test_reads_rejected_after_stop() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, 16);
        let engine = PartitionEngine::load(spec(TopicMode::MemoryOnly), &ctx).unwrap();
        write(&engine, &[b"x"]);
        engine.stop(quick_stop()).unwrap();
        let reply = engine.get_message(ReadRequest::new(7, "c1", 0));
        assert!(matches!(reply.result, Err(RillError::PartitionStopping { .. })));
        assert_eq!(ctx.readers.partition_len(engine.partition()), 0);
    }
}
