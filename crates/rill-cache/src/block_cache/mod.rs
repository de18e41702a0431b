//! DFS block cache.
//!
//! Blocks of meta files and data files live in two independent maps, each
//! behind its own lock, so meta and data traffic never contend. Every block
//! is one buffer from the worker-wide file cache pool and goes back to it
//! when the last holder (cache entry or in-flight reader) drops it.
//!
//! Eviction runs in two phases:
//!
//! 1. **Obsolete**: blocks strictly before the slowest reader of their
//!    partition directory can never be served again.
//! 2. **Distance**: remaining blocks are ranked by the estimated time until
//!    the nearest trailing reader reaches them; the farthest go first. A
//!    block a reader currently sits on is never evicted by this phase.

mod distance;
mod files;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, warn};

use rill_buffer::{Block, BufferPool};
use rill_common::config::BlockCacheConfig;
use rill_common::naming::{is_data_file, parse_start_id, FileKind};
use rill_common::{RillError, TimeoutChecker, META_ENTRY_SIZE};

use crate::admission::{AdmissionCenter, PermissionKey};
use crate::reader::{ReaderHandle, ReaderInfoMap, ReaderPosition};
use crate::stats::CacheStats;

use files::FileTable;

/// Identifies one cached block.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileBlockKey {
    /// File name or path.
    pub file_name: String,
    /// Block index within the file.
    pub block_index: u64,
}

impl FileBlockKey {
    /// Creates a key.
    pub fn new(file_name: impl Into<String>, block_index: u64) -> Self {
        Self {
            file_name: file_name.into(),
            block_index,
        }
    }
}

/// One block read from a file. The buffer returns to its pool on drop.
pub struct CachedBlock {
    block: Option<Block>,
    len: usize,
    block_index: u64,
    pool: Arc<BufferPool>,
}

impl CachedBlock {
    fn new(block: Block, block_index: u64, pool: Arc<BufferPool>) -> Self {
        Self {
            block: Some(block),
            len: 0,
            block_index,
            pool,
        }
    }

    /// Returns the bytes read.
    pub fn data(&self) -> &[u8] {
        match &self.block {
            Some(block) => &block[..self.len],
            None => &[],
        }
    }

    /// Returns the number of bytes read.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if nothing was read.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true if the whole block was read.
    pub fn is_full(&self) -> bool {
        self.block.as_ref().is_some_and(|block| block.len() == self.len)
    }

    /// Returns the block index.
    pub fn block_index(&self) -> u64 {
        self.block_index
    }

    /// Returns the file offset of the first byte.
    pub fn offset(&self) -> u64 {
        self.block_index * self.pool.block_size() as u64
    }
}

impl Drop for CachedBlock {
    fn drop(&mut self) {
        if let Some(block) = self.block.take() {
            self.pool.free(block);
        }
    }
}

impl std::fmt::Debug for CachedBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedBlock")
            .field("block_index", &self.block_index)
            .field("len", &self.len)
            .finish()
    }
}

/// Errors from [`BlockCache::read_block`].
#[derive(Debug, Error)]
pub enum CacheError {
    /// No capacity right now; retry later.
    #[error(transparent)]
    Busy(RillError),

    /// The block cannot be read.
    #[error("block {block_index} of {file} lost: {reason}")]
    BlockLost {
        /// File name.
        file: String,
        /// Block index.
        block_index: u64,
        /// What failed.
        reason: String,
    },
}

impl CacheError {
    /// Returns true for capacity errors.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy(_))
    }

    /// Converts into a broker error; lost blocks become data loss resuming at
    /// `next_msg_id`.
    pub fn into_data_loss(self, next_msg_id: u64) -> RillError {
        match self {
            Self::Busy(err) => err,
            lost @ Self::BlockLost { .. } => RillError::data_loss(next_msg_id, lost.to_string()),
        }
    }

    fn lost(file: &str, block_index: u64, reason: impl Into<String>) -> Self {
        Self::BlockLost {
            file: file.to_string(),
            block_index,
            reason: reason.into(),
        }
    }
}

/// Result type for block cache reads.
pub type CacheResult<T> = Result<T, CacheError>;

/// What one recycle pass should achieve.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RecycleRequest {
    /// Blocks the caller wants freed.
    pub need_blocks: usize,
    /// Evict meta blocks at least this many seconds away.
    pub meta_threshold: Option<f64>,
    /// Evict data blocks at least this many seconds away.
    pub data_threshold: Option<f64>,
}

impl RecycleRequest {
    /// Requests `need_blocks` freed blocks.
    pub fn need(need_blocks: usize) -> Self {
        Self {
            need_blocks,
            ..Default::default()
        }
    }

    /// Sets explicit distance thresholds.
    #[must_use]
    pub fn with_thresholds(mut self, meta: Option<f64>, data: Option<f64>) -> Self {
        self.meta_threshold = meta;
        self.data_threshold = data;
        self
    }

    fn has_threshold(&self) -> bool {
        self.meta_threshold.is_some() || self.data_threshold.is_some()
    }
}

/// Blocks dropped by one recycle pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecycleOutcome {
    /// Dropped as obsolete.
    pub obsolete: usize,
    /// Dropped by distance.
    pub by_distance: usize,
}

impl RecycleOutcome {
    /// Returns all dropped blocks.
    pub fn total(&self) -> usize {
        self.obsolete + self.by_distance
    }
}

type BlockMap = RwLock<HashMap<FileBlockKey, Arc<CachedBlock>>>;

/// The worker-wide DFS block cache.
pub struct BlockCache {
    config: BlockCacheConfig,
    pool: Arc<BufferPool>,
    admission: Arc<AdmissionCenter>,
    files: FileTable,
    meta: BlockMap,
    data: BlockMap,
    stats: CacheStats,
}

impl BlockCache {
    /// Creates a cache reading through `dfs` into blocks of `pool`.
    pub fn new(
        config: BlockCacheConfig,
        pool: Arc<BufferPool>,
        admission: Arc<AdmissionCenter>,
        dfs: Arc<dyn rill_common::dfs::Dfs>,
    ) -> Self {
        let files = FileTable::new(dfs, config.one_file_fd_num);
        Self {
            config,
            pool,
            admission,
            files,
            meta: RwLock::new(HashMap::new()),
            data: RwLock::new(HashMap::new()),
            stats: CacheStats::new(),
        }
    }

    fn map(&self, kind: FileKind) -> &BlockMap {
        match kind {
            FileKind::Meta => &self.meta,
            FileKind::Data => &self.data,
        }
    }

    fn kind_of(file_name: &str) -> FileKind {
        if is_data_file(file_name) {
            FileKind::Data
        } else {
            FileKind::Meta
        }
    }

    /// Returns the block size.
    pub fn block_size(&self) -> usize {
        self.pool.block_size()
    }

    /// Reads the block containing `offset` of `file_name`.
    ///
    /// A block still being appended to is returned but not cached unless it
    /// was read in full. `reader`, if given, is moved to the block.
    pub fn read_block(
        &self,
        file_name: &str,
        offset: u64,
        is_appending: bool,
        checker: &TimeoutChecker,
        reader: Option<&ReaderHandle>,
    ) -> CacheResult<Arc<CachedBlock>> {
        let block_index = offset / self.block_size() as u64;
        let kind = Self::kind_of(file_name);
        let key = FileBlockKey::new(file_name, block_index);

        self.stats.record_access();
        if let Some(block) = self.lookup(kind, &key) {
            self.stats.record_hit();
            self.move_reader(kind, &key, reader);
            return Ok(block);
        }
        self.stats.record_miss();

        let _lease = self
            .admission
            .apply(PermissionKey::new(file_name, block_index), checker)
            .ok_or_else(|| {
                CacheError::Busy(RillError::LeaseTimeout {
                    file: file_name.to_string(),
                    block_index,
                })
            })?;
        if let Some(block) = self.lookup(kind, &key) {
            self.move_reader(kind, &key, reader);
            return Ok(block);
        }

        let _slot = self
            .admission
            .try_read_file_for(file_name)
            .map_err(CacheError::Busy)?;
        let block = self.load(kind, &key, offset, is_appending)?;
        self.move_reader(kind, &key, reader);
        Ok(block)
    }

    fn lookup(&self, kind: FileKind, key: &FileBlockKey) -> Option<Arc<CachedBlock>> {
        self.map(kind).read().get(key).cloned()
    }

    fn load(
        &self,
        kind: FileKind,
        key: &FileBlockKey,
        offset: u64,
        is_appending: bool,
    ) -> CacheResult<Arc<CachedBlock>> {
        let file_name = key.file_name.as_str();
        let block_size = self.block_size();
        let block_start = key.block_index * block_size as u64;

        let buffer = self.pool.allocate().ok_or_else(|| {
            CacheError::Busy(RillError::BufferExhausted {
                needed: 1,
                available: self.pool.available_block_count(),
            })
        })?;
        let mut cached = CachedBlock::new(buffer, key.block_index, Arc::clone(&self.pool));

        let mut retried = false;
        loop {
            let wrapper = self.files.wrapper(file_name).map_err(|err| {
                self.stats.record_read_failure();
                debug!(file = file_name, error = %err, "open failed");
                CacheError::lost(file_name, key.block_index, format!("open failed: {err}"))
            })?;

            self.stats.record_file_read();
            let Some(buf) = cached.block.as_mut() else {
                return Err(CacheError::lost(file_name, key.block_index, "buffer missing"));
            };
            let read = match wrapper.file().read_full_at(buf, block_start) {
                Ok(read) => read,
                Err(err) => {
                    wrapper.mark_bad();
                    self.stats.record_read_failure();
                    debug!(file = file_name, block = key.block_index, error = %err, "read failed");
                    return Err(CacheError::lost(
                        file_name,
                        key.block_index,
                        format!("read failed: {err}"),
                    ));
                }
            };

            let end = block_start + read as u64;
            if is_appending {
                if end <= offset {
                    // The handle may hold a stale length of a growing file.
                    wrapper.mark_bad();
                    if !retried {
                        retried = true;
                        continue;
                    }
                    self.stats.record_read_failure();
                    return Err(CacheError::lost(
                        file_name,
                        key.block_index,
                        format!("file ends at {end}, before offset {offset}"),
                    ));
                }
            } else if read < block_size {
                let file_len = wrapper.file().len().unwrap_or(0);
                if read == 0 || end != file_len {
                    self.stats.record_read_failure();
                    return Err(CacheError::lost(
                        file_name,
                        key.block_index,
                        format!("short read of {read} bytes, file length {file_len}"),
                    ));
                }
            }

            cached.len = read;
            break;
        }

        let cacheable = cached.is_full() || !is_appending;
        let cached = Arc::new(cached);
        if cacheable {
            self.map(kind)
                .write()
                .insert(key.clone(), Arc::clone(&cached));
            self.stats.record_insert();
        }
        Ok(cached)
    }

    fn move_reader(&self, kind: FileKind, key: &FileBlockKey, reader: Option<&ReaderHandle>) {
        if let Some(handle) = reader {
            let start_id = parse_start_id(&key.file_name).unwrap_or(0);
            handle.lock().file_info_mut(kind).advance(
                &key.file_name,
                start_id,
                key.block_index,
                self.block_size(),
                Instant::now(),
            );
        }
    }

    // -------------------------------------------------------------------------
    // Eviction
    // -------------------------------------------------------------------------

    /// Returns true once the file cache pool is used above the configured
    /// threshold.
    pub fn needs_recycle(&self) -> bool {
        self.pool.usage() >= self.config.recycle_threshold
    }

    /// Builds the request the periodic sweep uses: enough blocks to get back
    /// under the threshold, plus the configured distance thresholds.
    pub fn periodic_request(&self) -> RecycleRequest {
        let limit = (self.pool.max_block_count() as f64 * self.config.recycle_threshold) as usize;
        RecycleRequest::need(self.pool.used_block_count().saturating_sub(limit))
            .with_thresholds(self.config.meta_threshold, self.config.data_threshold)
    }

    /// Evicts obsolete blocks, then blocks far from every reader.
    pub fn recycle(&self, readers: &ReaderInfoMap, request: RecycleRequest) -> RecycleOutcome {
        let meta_readers = readers.positions(FileKind::Meta);
        let data_readers = readers.positions(FileKind::Data);

        let mut outcome = RecycleOutcome {
            obsolete: self.evict_obsolete(&self.meta, &meta_readers)
                + self.evict_obsolete(&self.data, &data_readers),
            by_distance: 0,
        };

        if outcome.obsolete < request.need_blocks || request.has_threshold() {
            let remaining = request.need_blocks.saturating_sub(outcome.obsolete);
            outcome.by_distance = self.evict_by_distance(
                &meta_readers,
                &data_readers,
                remaining,
                request,
            );
        }

        self.stats
            .record_evictions(outcome.obsolete, outcome.by_distance);
        if outcome.total() > 0 {
            debug!(
                obsolete = outcome.obsolete,
                by_distance = outcome.by_distance,
                need = request.need_blocks,
                "block cache recycled"
            );
        }
        outcome
    }

    fn evict_obsolete(&self, map: &BlockMap, readers: &[ReaderPosition]) -> usize {
        let slowest = distance::slowest_positions(readers);
        let mut map = map.write();
        let before = map.len();
        map.retain(|key, _| !distance::is_obsolete(key, &slowest));
        before - map.len()
    }

    fn distances(
        &self,
        map: &BlockMap,
        readers: &[ReaderPosition],
        fixed_msg_size: Option<f64>,
    ) -> (usize, Vec<(FileBlockKey, f64)>) {
        let keys: Vec<FileBlockKey> = map.read().keys().cloned().collect();
        let block_size = self.block_size();
        let candidates = keys
            .iter()
            .map(|key| {
                let d = distance::distance(key, readers, block_size, fixed_msg_size);
                (key.clone(), d)
            })
            .filter(|(_, d)| d.is_finite() && *d > 0.0)
            .collect();
        (keys.len(), candidates)
    }

    fn select(
        &self,
        pool_len: usize,
        mut candidates: Vec<(FileBlockKey, f64)>,
        threshold: Option<f64>,
    ) -> (Vec<FileBlockKey>, Vec<(FileBlockKey, f64)>) {
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
        let take = match threshold {
            Some(threshold) => candidates.iter().take_while(|(_, d)| *d >= threshold).count(),
            None => ((pool_len as f64 * self.config.recycle_percent).ceil() as usize)
                .min(candidates.len()),
        };
        let rest = candidates.split_off(take);
        (candidates.into_iter().map(|(key, _)| key).collect(), rest)
    }

    fn evict_by_distance(
        &self,
        meta_readers: &[ReaderPosition],
        data_readers: &[ReaderPosition],
        remaining: usize,
        request: RecycleRequest,
    ) -> usize {
        let (meta_len, meta_candidates) =
            self.distances(&self.meta, meta_readers, Some(META_ENTRY_SIZE as f64));
        let (data_len, data_candidates) = self.distances(&self.data, data_readers, None);

        let (mut meta_victims, meta_rest) =
            self.select(meta_len, meta_candidates, request.meta_threshold);
        let (mut data_victims, data_rest) =
            self.select(data_len, data_candidates, request.data_threshold);

        let chosen = meta_victims.len() + data_victims.len();
        if chosen < remaining {
            let mut rest: Vec<(FileKind, FileBlockKey, f64)> = meta_rest
                .into_iter()
                .map(|(key, d)| (FileKind::Meta, key, d))
                .chain(data_rest.into_iter().map(|(key, d)| (FileKind::Data, key, d)))
                .collect();
            rest.sort_by(|a, b| b.2.total_cmp(&a.2));
            for (kind, key, _) in rest.into_iter().take(remaining - chosen) {
                match kind {
                    FileKind::Meta => meta_victims.push(key),
                    FileKind::Data => data_victims.push(key),
                }
            }
        }

        let mut evicted = 0;
        for (map, victims) in [(&self.meta, meta_victims), (&self.data, data_victims)] {
            if victims.is_empty() {
                continue;
            }
            let mut map = map.write();
            evicted += victims
                .iter()
                .filter(|key| map.remove(*key).is_some())
                .count();
        }
        evicted
    }

    /// Closes files whose handles are all bad or idle past the reserve time.
    pub fn recycle_file(&self) -> usize {
        let dropped = self.files.recycle(self.config.file_reserve_time);
        if dropped > 0 {
            debug!(dropped, "closed idle or bad files");
        }
        dropped
    }

    /// Drops every cached block and handle of `file_name`.
    pub fn invalidate_file(&self, file_name: &str) -> usize {
        let mut map = self.map(Self::kind_of(file_name)).write();
        let before = map.len();
        map.retain(|key, _| key.file_name != file_name);
        let dropped = before - map.len();
        drop(map);
        self.files.remove(file_name);
        dropped
    }

    /// Drops everything.
    pub fn clear(&self) {
        let dropped = self.cached_block_count();
        self.meta.write().clear();
        self.data.write().clear();
        self.files.clear();
        if dropped > 0 {
            warn!(dropped, "block cache cleared");
        }
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    /// Returns true if the block is cached.
    pub fn contains(&self, file_name: &str, block_index: u64) -> bool {
        let key = FileBlockKey::new(file_name, block_index);
        self.map(Self::kind_of(file_name)).read().contains_key(&key)
    }

    /// Returns the number of cached blocks.
    pub fn cached_block_count(&self) -> usize {
        self.meta_block_count() + self.data_block_count()
    }

    /// Returns the number of cached meta blocks.
    pub fn meta_block_count(&self) -> usize {
        self.meta.read().len()
    }

    /// Returns the number of cached data blocks.
    pub fn data_block_count(&self) -> usize {
        self.data.read().len()
    }

    /// Returns the number of files with open handles.
    pub fn open_file_count(&self) -> usize {
        self.files.len()
    }

    /// Returns the file cache pool.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Returns the admission center.
    pub fn admission(&self) -> &Arc<AdmissionCenter> {
        &self.admission
    }

    /// Returns cache statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

impl std::fmt::Debug for BlockCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockCache")
            .field("meta_blocks", &self.meta_block_count())
            .field("data_blocks", &self.data_block_count())
            .field("open_files", &self.open_file_count())
            .field("pool", &self.pool)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::ReaderKey;
    use rill_common::config::AdmissionConfig;
    use rill_common::dfs::{Dfs, DfsFile, DfsWriter, LocalDfs};
    use rill_common::naming::{data_file_name, meta_file_name};
    use rill_common::{Filter, PartitionId};
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    const BS: usize = 512;

    /// Counts positional reads issued to the wrapped filesystem.
    struct CountingDfs {
        inner: LocalDfs,
        reads: Arc<AtomicUsize>,
    }

    struct CountingFile {
        inner: Arc<dyn DfsFile>,
        reads: Arc<AtomicUsize>,
    }

    impl DfsFile for CountingFile {
        fn path(&self) -> &str {
            self.inner.path()
        }

        fn len(&self) -> io::Result<u64> {
            self.inner.len()
        }

        fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.read_at(buf, offset)
        }
    }

    impl Dfs for CountingDfs {
        fn open_read(&self, path: &str) -> io::Result<Arc<dyn DfsFile>> {
            Ok(Arc::new(CountingFile {
                inner: self.inner.open_read(path)?,
                reads: Arc::clone(&self.reads),
            }))
        }

        fn create(&self, path: &str) -> io::Result<Box<dyn DfsWriter>> {
            self.inner.create(path)
        }

        fn remove(&self, path: &str) -> io::Result<()> {
            self.inner.remove(path)
        }

        fn list(&self, dir: &str) -> io::Result<Vec<String>> {
            self.inner.list(dir)
        }

        fn file_size(&self, path: &str) -> io::Result<u64> {
            self.inner.file_size(path)
        }

        fn create_dir_all(&self, dir: &str) -> io::Result<()> {
            self.inner.create_dir_all(dir)
        }

        fn exists(&self, path: &str) -> bool {
            self.inner.exists(path)
        }
    }

    struct Fixture {
        _dir: TempDir,
        dfs: Arc<CountingDfs>,
        cache: BlockCache,
    }

    fn fixture(pool_blocks: usize) -> Fixture {
        let dir = tempdir().unwrap();
        let dfs = Arc::new(CountingDfs {
            inner: LocalDfs::new(dir.path()).unwrap(),
            reads: Arc::new(AtomicUsize::new(0)),
        });
        dfs.create_dir_all("t/0").unwrap();
        let pool = Arc::new(BufferPool::new(BS, pool_blocks).unwrap());
        let admission = Arc::new(AdmissionCenter::new(AdmissionConfig::default()));
        let cache = BlockCache::new(
            BlockCacheConfig::default(),
            pool,
            admission,
            Arc::clone(&dfs) as Arc<dyn Dfs>,
        );
        Fixture {
            _dir: dir,
            dfs,
            cache,
        }
    }

    fn write_file(dfs: &CountingDfs, path: &str, len: usize) -> Vec<u8> {
        let bytes: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let mut writer = dfs.create(path).unwrap();
        writer.append(&bytes).unwrap();
        writer.sync().unwrap();
        bytes
    }

    fn checker() -> TimeoutChecker {
        TimeoutChecker::new(Duration::from_secs(5))
    }

    #[test]
    fn test_hit_does_not_reread() {
        let f = fixture(16);
        let path = format!("t/0/{}", data_file_name(0, 0));
        let bytes = write_file(&f.dfs, &path, BS * 2);

        let first = f.cache.read_block(&path, 10, false, &checker(), None).unwrap();
        let reads = f.dfs.reads.load(Ordering::SeqCst);
        let second = f.cache.read_block(&path, 20, false, &checker(), None).unwrap();

        assert_eq!(f.dfs.reads.load(Ordering::SeqCst), reads);
        assert_eq!(first.data(), &bytes[..BS]);
        assert_eq!(second.data(), first.data());
        assert_eq!(f.cache.stats().hits(), 1);
        assert_eq!(f.cache.stats().file_reads(), 1);
    }

    #[test]
    fn test_pool_selected_by_suffix() {
        let f = fixture(16);
        let meta = format!("t/0/{}", meta_file_name(0, 0));
        let data = format!("t/0/{}", data_file_name(0, 0));
        write_file(&f.dfs, &meta, BS);
        write_file(&f.dfs, &data, BS);

        f.cache.read_block(&meta, 0, false, &checker(), None).unwrap();
        f.cache.read_block(&data, 0, false, &checker(), None).unwrap();
        assert_eq!(f.cache.meta_block_count(), 1);
        assert_eq!(f.cache.data_block_count(), 1);
    }

    #[test]
    fn test_appending_tail_not_cached() {
        let f = fixture(16);
        let path = format!("t/0/{}", data_file_name(0, 0));
        write_file(&f.dfs, &path, BS + BS / 2);

        let tail = f
            .cache
            .read_block(&path, BS as u64, true, &checker(), None)
            .unwrap();
        assert_eq!(tail.len(), BS / 2);
        assert!(!f.cache.contains(&path, 1));

        f.cache.read_block(&path, 0, true, &checker(), None).unwrap();
        assert!(f.cache.contains(&path, 0), "full blocks are cached while appending");

        f.cache
            .read_block(&path, BS as u64, false, &checker(), None)
            .unwrap();
        assert!(f.cache.contains(&path, 1), "sealed tail is cached");
    }

    #[test]
    fn test_failures_are_block_lost() {
        let f = fixture(16);
        let path = format!("t/0/{}", data_file_name(0, 0));
        write_file(&f.dfs, &path, BS);

        let missing = format!("t/0/{}", data_file_name(99, 0));
        let err = f
            .cache
            .read_block(&missing, 0, false, &checker(), None)
            .unwrap_err();
        assert!(matches!(err, CacheError::BlockLost { .. }));

        let err = f
            .cache
            .read_block(&path, 5 * BS as u64, false, &checker(), None)
            .unwrap_err();
        let loss = err.into_data_loss(42);
        assert!(loss.is_data_loss());
        assert_eq!(loss.next_msg_id(), Some(42));
        assert_eq!(f.cache.pool().used_block_count(), 0, "failed reads return buffers");
    }

    #[test]
    fn test_exhausted_pool_is_busy() {
        let f = fixture(1);
        let path = format!("t/0/{}", data_file_name(0, 0));
        write_file(&f.dfs, &path, BS * 2);

        let _held = f.cache.read_block(&path, 0, false, &checker(), None).unwrap();
        let err = f
            .cache
            .read_block(&path, BS as u64, false, &checker(), None)
            .unwrap_err();
        assert!(err.is_busy());
    }

    #[test]
    fn test_concurrent_misses_read_once() {
        let f = Arc::new(fixture(16));
        let path = format!("t/0/{}", data_file_name(0, 0));
        write_file(&f.dfs, &path, BS);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let f = Arc::clone(&f);
                let path = path.clone();
                thread::spawn(move || {
                    f.cache.read_block(&path, 0, false, &checker(), None).unwrap().len()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), BS);
        }
        assert_eq!(f.cache.stats().file_reads(), 1);
    }

    #[test]
    fn test_reader_moves_with_reads() {
        let f = fixture(16);
        let path = format!("t/0/{}", data_file_name(7, 0));
        write_file(&f.dfs, &path, BS * 3);
        let readers = ReaderInfoMap::new(4);
        let handle = readers.get_or_create(&ReaderKey::new(PartitionId::new("t", 0), "c", Filter::ALL));

        f.cache
            .read_block(&path, 2 * BS as u64, false, &checker(), Some(&handle))
            .unwrap();
        let reader = handle.lock();
        assert_eq!(reader.data.file_name, path);
        assert_eq!(reader.data.file_start_id, 7);
        assert_eq!(reader.data.block_index, 2);
        assert!(!reader.meta.is_positioned());
    }

    #[test]
    fn test_eviction_ordering() {
        let f = fixture(16);
        let path = format!("t/0/{}", data_file_name(0, 0));
        write_file(&f.dfs, &path, BS * 4);
        for block in [0u64, 1, 3] {
            f.cache
                .read_block(&path, block * BS as u64, false, &checker(), None)
                .unwrap();
        }

        let readers = ReaderInfoMap::new(4);
        let handle = readers.get_or_create(&ReaderKey::new(PartitionId::new("t", 0), "c", Filter::ALL));
        {
            let mut reader = handle.lock();
            reader.data.advance(&path, 0, 1, BS, Instant::now());
            reader.data.set_rate(1000.0);
        }

        let outcome = f.cache.recycle(&readers, RecycleRequest::need(1));
        assert_eq!(outcome, RecycleOutcome { obsolete: 1, by_distance: 0 });
        assert!(!f.cache.contains(&path, 0));
        assert!(f.cache.contains(&path, 1));
        assert!(f.cache.contains(&path, 3));

        let outcome = f.cache.recycle(&readers, RecycleRequest::need(1));
        assert_eq!(outcome, RecycleOutcome { obsolete: 0, by_distance: 1 });
        assert!(!f.cache.contains(&path, 3));

        let outcome = f.cache.recycle(&readers, RecycleRequest::need(4));
        assert_eq!(outcome.total(), 0);
        assert!(f.cache.contains(&path, 1), "the block a reader sits on is kept");
        assert_eq!(f.cache.pool().used_block_count(), 1);
    }

    #[test]
    fn test_threshold_eviction() {
        let f = fixture(16);
        let path = format!("t/0/{}", data_file_name(0, 0));
        write_file(&f.dfs, &path, BS * 8);
        for block in 0..8u64 {
            f.cache
                .read_block(&path, block * BS as u64, false, &checker(), None)
                .unwrap();
        }

        let readers = ReaderInfoMap::new(4);
        let handle = readers.get_or_create(&ReaderKey::new(PartitionId::new("t", 0), "c", Filter::ALL));
        {
            let mut reader = handle.lock();
            reader.data.advance(&path, 0, 0, BS, Instant::now());
            reader.data.set_rate(BS as f64);
        }

        // Block b is b seconds away; evict everything at least 5 seconds out.
        let outcome = f
            .cache
            .recycle(&readers, RecycleRequest::default().with_thresholds(None, Some(5.0)));
        assert_eq!(outcome.by_distance, 3);
        assert_eq!(f.cache.data_block_count(), 5);
    }

    #[test]
    fn test_invalidate_and_recycle_file() {
        let f = fixture(16);
        let path = format!("t/0/{}", data_file_name(0, 0));
        write_file(&f.dfs, &path, BS * 2);
        f.cache.read_block(&path, 0, false, &checker(), None).unwrap();
        f.cache.read_block(&path, BS as u64, false, &checker(), None).unwrap();
        assert_eq!(f.cache.open_file_count(), 1);

        assert_eq!(f.cache.invalidate_file(&path), 2);
        assert_eq!(f.cache.open_file_count(), 0);
        assert_eq!(f.cache.pool().used_block_count(), 0);

        f.cache.read_block(&path, 0, false, &checker(), None).unwrap();
        assert_eq!(f.cache.recycle_file(), 0);
    }
}
