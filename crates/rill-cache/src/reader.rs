//! Soft per-reader state.
//!
//! A reader is one `(partition, client, filter)` triple. The engine records
//! what it served; the block cache records where in the DFS files the reader
//! is and how fast it moves. Eviction uses both to predict which cached
//! blocks a reader will need soon.
//!
//! All state here is advisory. Losing a reader only makes eviction less
//! precise.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use rill_common::naming::FileKind;
use rill_common::{Filter, PartitionId};

/// Identifies one reader.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReaderKey {
    /// Partition being read.
    pub partition: PartitionId,
    /// Client identifier.
    pub client_id: String,
    /// Filter range the client reads with.
    pub filter: Filter,
}

impl ReaderKey {
    /// Creates a key.
    pub fn new(partition: PartitionId, client_id: impl Into<String>, filter: Filter) -> Self {
        Self {
            partition,
            client_id: client_id.into(),
            filter,
        }
    }
}

/// A reader's position in one kind of file, with its read rate.
#[derive(Debug, Clone)]
pub struct ReadFileInfo {
    /// File last read; empty before the first file read.
    pub file_name: String,
    /// First message id stored in `file_name`.
    pub file_start_id: u64,
    /// Block last read.
    pub block_index: u64,
    /// Smoothed read rate in bytes per second.
    pub rate: f64,
    /// Average message size seen by this reader in bytes.
    pub avg_msg_size: f64,
    samples: VecDeque<f64>,
    max_samples: usize,
    last_update: Option<Instant>,
}

impl ReadFileInfo {
    /// Creates an empty record that averages up to `max_samples` rates.
    pub fn new(max_samples: usize) -> Self {
        Self {
            file_name: String::new(),
            file_start_id: 0,
            block_index: 0,
            rate: 0.0,
            avg_msg_size: 0.0,
            samples: VecDeque::with_capacity(max_samples),
            max_samples: max_samples.max(1),
            last_update: None,
        }
    }

    /// Returns true once a file has been read.
    pub fn is_positioned(&self) -> bool {
        !self.file_name.is_empty()
    }

    /// Moves the reader to `(file_name, block_index)` and samples its rate.
    ///
    /// The first move only records the position.
    pub fn advance(
        &mut self,
        file_name: &str,
        file_start_id: u64,
        block_index: u64,
        block_size: usize,
        now: Instant,
    ) {
        if let Some(last) = self.last_update {
            let moved = if file_name == self.file_name {
                block_index.saturating_sub(self.block_index)
            } else if file_start_id > self.file_start_id {
                block_index + 1
            } else {
                0
            };
            let elapsed = now.saturating_duration_since(last).as_secs_f64();
            if moved > 0 && elapsed > 0.0 {
                self.push_sample(moved as f64 * block_size as f64 / elapsed);
            }
        }
        if file_name != self.file_name {
            self.file_name = file_name.to_string();
        }
        self.file_start_id = file_start_id;
        self.block_index = block_index;
        self.last_update = Some(now);
    }

    fn push_sample(&mut self, rate: f64) {
        if self.samples.len() == self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(rate);
        self.rate = self.samples.iter().sum::<f64>() / self.samples.len() as f64;
    }

    /// Overrides the measured rate.
    pub fn set_rate(&mut self, rate: f64) {
        self.samples.clear();
        self.rate = rate;
    }

    /// Records the average message size seen by the reader.
    pub fn set_avg_msg_size(&mut self, avg_msg_size: f64) {
        self.avg_msg_size = avg_msg_size;
    }

    /// Returns the number of rate samples held.
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

/// State of one reader.
#[derive(Debug, Clone)]
pub struct ReaderInfo {
    /// Time of the last request.
    pub last_request: Instant,
    /// Last message id served, if any.
    pub last_msg_id: Option<u64>,
    /// Start id of the latest request.
    pub requested_msg_id: Option<u64>,
    /// Timestamp of the last message served.
    pub last_timestamp: i64,
    /// Position in meta files.
    pub meta: ReadFileInfo,
    /// Position in data files.
    pub data: ReadFileInfo,
}

impl ReaderInfo {
    fn new(rate_samples: usize) -> Self {
        Self {
            last_request: Instant::now(),
            last_msg_id: None,
            requested_msg_id: None,
            last_timestamp: 0,
            meta: ReadFileInfo::new(rate_samples),
            data: ReadFileInfo::new(rate_samples),
        }
    }

    /// Records a request starting at `start_id`.
    pub fn record_request(&mut self, start_id: u64) {
        self.requested_msg_id = Some(start_id);
        self.last_request = Instant::now();
    }

    /// Returns the first id this reader has not consumed: one past the
    /// last served id, or the start of its first request.
    pub fn position(&self) -> Option<u64> {
        self.last_msg_id.map(|id| id + 1).or(self.requested_msg_id)
    }

    /// Records the last message served by a request.
    pub fn record_served(&mut self, last_msg_id: u64, last_timestamp: i64) {
        self.last_msg_id = Some(last_msg_id);
        self.last_timestamp = last_timestamp;
        self.last_request = Instant::now();
    }

    /// Returns the file record for `kind`.
    pub fn file_info(&self, kind: FileKind) -> &ReadFileInfo {
        match kind {
            FileKind::Meta => &self.meta,
            FileKind::Data => &self.data,
        }
    }

    /// Returns the mutable file record for `kind`.
    pub fn file_info_mut(&mut self, kind: FileKind) -> &mut ReadFileInfo {
        match kind {
            FileKind::Meta => &mut self.meta,
            FileKind::Data => &mut self.data,
        }
    }
}

/// Shared handle to one reader's state.
pub type ReaderHandle = Arc<Mutex<ReaderInfo>>;

/// Snapshot of a reader's position used by eviction.
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderPosition {
    /// File being read.
    pub file_name: String,
    /// First message id of that file.
    pub file_start_id: u64,
    /// Block being read.
    pub block_index: u64,
    /// Read rate in bytes per second.
    pub rate: f64,
    /// Average message size in bytes.
    pub avg_msg_size: f64,
}

/// All readers of a worker.
#[derive(Debug)]
pub struct ReaderInfoMap {
    readers: RwLock<HashMap<ReaderKey, ReaderHandle>>,
    rate_samples: usize,
}

impl ReaderInfoMap {
    /// Creates an empty map; each reader averages `rate_samples` samples.
    pub fn new(rate_samples: usize) -> Self {
        Self {
            readers: RwLock::new(HashMap::new()),
            rate_samples,
        }
    }

    /// Returns the reader for `key`, creating it on first use.
    pub fn get_or_create(&self, key: &ReaderKey) -> ReaderHandle {
        if let Some(handle) = self.readers.read().get(key) {
            handle.lock().last_request = Instant::now();
            return Arc::clone(handle);
        }
        let mut readers = self.readers.write();
        let handle = readers
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(ReaderInfo::new(self.rate_samples))));
        Arc::clone(handle)
    }

    /// Returns the reader for `key` if known.
    pub fn get(&self, key: &ReaderKey) -> Option<ReaderHandle> {
        self.readers.read().get(key).cloned()
    }

    /// Forgets a reader.
    pub fn remove(&self, key: &ReaderKey) -> bool {
        self.readers.write().remove(key).is_some()
    }

    /// Forgets every reader of a partition. Returns how many were dropped.
    pub fn remove_partition(&self, partition: &PartitionId) -> usize {
        let mut readers = self.readers.write();
        let before = readers.len();
        readers.retain(|key, _| &key.partition != partition);
        before - readers.len()
    }

    /// Forgets readers of `partition` idle longer than `expire`.
    pub fn purge_idle(&self, partition: &PartitionId, expire: Duration) -> usize {
        let mut readers = self.readers.write();
        let before = readers.len();
        readers.retain(|key, handle| {
            &key.partition != partition || handle.lock().last_request.elapsed() <= expire
        });
        before - readers.len()
    }

    /// Returns the number of readers.
    pub fn len(&self) -> usize {
        self.readers.read().len()
    }

    /// Returns true if no reader is known.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of readers of `partition`.
    pub fn partition_len(&self, partition: &PartitionId) -> usize {
        self.readers
            .read()
            .keys()
            .filter(|key| &key.partition == partition)
            .count()
    }

    /// Returns the positions of every reader in files of `kind`.
    pub fn positions(&self, kind: FileKind) -> Vec<ReaderPosition> {
        self.readers
            .read()
            .values()
            .filter_map(|handle| {
                let reader = handle.lock();
                let info = reader.file_info(kind);
                info.is_positioned().then(|| ReaderPosition {
                    file_name: info.file_name.clone(),
                    file_start_id: info.file_start_id,
                    block_index: info.block_index,
                    rate: info.rate,
                    avg_msg_size: info.avg_msg_size,
                })
            })
            .collect()
    }

    /// Returns the slowest reader position of `partition`, or `None` if no
    /// reader of it has made a request.
    pub fn min_position(&self, partition: &PartitionId) -> Option<u64> {
        self.readers
            .read()
            .iter()
            .filter(|(key, _)| &key.partition == partition)
            .filter_map(|(_, handle)| handle.lock().position())
            .min()
    }
}

impl Default for ReaderInfoMap {
    fn default() -> Self {
        Self::new(8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(partition: u32, client: &str) -> ReaderKey {
        ReaderKey::new(PartitionId::new("t", partition), client, Filter::ALL)
    }

    #[test]
    fn test_rate_sampling_same_file() {
        let mut info = ReadFileInfo::new(4);
        let start = Instant::now();
        info.advance("a.data", 0, 0, 1000, start);
        assert_eq!(info.sample_count(), 0);

        info.advance("a.data", 0, 2, 1000, start + Duration::from_secs(1));
        assert_eq!(info.sample_count(), 1);
        assert!((info.rate - 2000.0).abs() < 1e-6);

        // Re-reading the same block records no sample.
        info.advance("a.data", 0, 2, 1000, start + Duration::from_secs(2));
        assert_eq!(info.sample_count(), 1);
    }

    #[test]
    fn test_rate_sampling_cross_file() {
        let mut info = ReadFileInfo::new(4);
        let start = Instant::now();
        info.advance("a.data", 0, 5, 100, start);
        info.advance("b.data", 50, 1, 100, start + Duration::from_secs(2));
        assert!((info.rate - 100.0).abs() < 1e-6);
        assert_eq!(info.file_name, "b.data");
        assert_eq!(info.file_start_id, 50);
    }

    #[test]
    fn test_samples_are_capped() {
        let mut info = ReadFileInfo::new(2);
        let start = Instant::now();
        info.advance("a.data", 0, 0, 10, start);
        for i in 1..=5u64 {
            info.advance("a.data", 0, i, 10, start + Duration::from_secs(i));
        }
        assert_eq!(info.sample_count(), 2);
        assert!((info.rate - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_map_get_or_create_and_purge() {
        let map = ReaderInfoMap::new(4);
        let a = map.get_or_create(&key(0, "a"));
        let again = map.get_or_create(&key(0, "a"));
        assert!(Arc::ptr_eq(&a, &again));
        map.get_or_create(&key(1, "b"));
        assert_eq!(map.len(), 2);

        a.lock().last_request = Instant::now() - Duration::from_secs(60);
        assert_eq!(map.purge_idle(&PartitionId::new("t", 0), Duration::from_secs(10)), 1);
        assert_eq!(map.len(), 1);
        assert_eq!(map.remove_partition(&PartitionId::new("t", 1)), 1);
        assert!(map.is_empty());
    }

    #[test]
    fn test_min_position_per_partition() {
        let map = ReaderInfoMap::new(4);
        map.get_or_create(&key(0, "a")).lock().record_served(40, 1);
        map.get_or_create(&key(0, "b")).lock().record_served(10, 1);
        map.get_or_create(&key(1, "c")).lock().record_served(2, 1);
        map.get_or_create(&key(0, "idle"));

        assert_eq!(map.min_position(&PartitionId::new("t", 0)), Some(11));
        assert_eq!(map.min_position(&PartitionId::new("t", 9)), None);

        // Not served yet: its requested start counts.
        map.get_or_create(&key(0, "new")).lock().record_request(4);
        assert_eq!(map.min_position(&PartitionId::new("t", 0)), Some(4));
    }

    #[test]
    fn test_positions_skip_unpositioned() {
        let map = ReaderInfoMap::new(4);
        let handle = map.get_or_create(&key(0, "a"));
        map.get_or_create(&key(0, "b"));
        handle
            .lock()
            .data
            .advance("t/0/x.data", 7, 3, 64, Instant::now());

        let positions = map.positions(FileKind::Data);
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].block_index, 3);
        assert!(map.positions(FileKind::Meta).is_empty());
    }
}
