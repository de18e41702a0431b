//! Admission control.
//!
//! Five independent counters bound concurrent work: reads, writes, DFS
//! block reads, get-max-id and get-min-id. Reads and both id lookups share
//! `read_limit` because they compete for the same downstream resource.
//! Each counter has its own mutex so one saturated counter never blocks
//! another.
//!
//! `inc_*` returns false without side effect at the limit. The `try_*`
//! methods wrap the same counters in RAII permits that decrement on drop.

mod lease;

pub use lease::{Lease, LeaseRegistry, PermissionKey};

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use tracing::debug;

use rill_common::config::AdmissionConfig;
use rill_common::{RillError, RillResult, TimeoutChecker};

use crate::stats::AdmissionStats;

/// One bounded counter.
struct Counter {
    name: &'static str,
    limit: usize,
    count: Mutex<usize>,
}

impl Counter {
    fn new(name: &'static str, limit: usize) -> Self {
        Self {
            name,
            limit,
            count: Mutex::new(0),
        }
    }

    fn inc(&self) -> bool {
        let mut count = self.count.lock();
        if *count >= self.limit {
            return false;
        }
        *count += 1;
        true
    }

    fn dec(&self) {
        let mut count = self.count.lock();
        debug_assert!(*count > 0, "{} counter released below zero", self.name);
        *count = count.saturating_sub(1);
    }

    fn current(&self) -> usize {
        *self.count.lock()
    }
}

/// Admission counters plus the lease registry.
pub struct AdmissionCenter {
    read: Counter,
    write: Counter,
    read_file: Counter,
    get_max_id: Counter,
    get_min_id: Counter,
    one_file_read_limit: usize,
    file_reads: Mutex<HashMap<String, usize>>,
    leases: LeaseRegistry,
    stats: AdmissionStats,
}

impl AdmissionCenter {
    /// Creates a center from configuration.
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            read: Counter::new("read", config.read_limit),
            write: Counter::new("write", config.write_limit),
            read_file: Counter::new("read_file", config.read_file_limit),
            get_max_id: Counter::new("get_max_id", config.read_limit),
            get_min_id: Counter::new("get_min_id", config.read_limit),
            one_file_read_limit: config.one_file_read_limit,
            file_reads: Mutex::new(HashMap::new()),
            leases: LeaseRegistry::new(config.lease_poll_interval, config.lease_max_wait_time),
            stats: AdmissionStats::new(),
        }
    }

    fn inc(&self, counter: &Counter) -> bool {
        let granted = counter.inc();
        if !granted {
            self.stats.record_rejection();
            debug!(counter = counter.name, limit = counter.limit, "admission rejected");
        }
        granted
    }

    fn permit<'a>(&'a self, counter: &'a Counter) -> RillResult<AdmissionPermit<'a>> {
        if self.inc(counter) {
            Ok(AdmissionPermit { counter })
        } else {
            Err(RillError::rejected(counter.name, counter.limit))
        }
    }

    // -------------------------------------------------------------------------
    // Counters
    // -------------------------------------------------------------------------

    /// Claims a read slot.
    pub fn inc_read_count(&self) -> bool {
        self.inc(&self.read)
    }

    /// Releases a read slot.
    pub fn dec_read_count(&self) {
        self.read.dec();
    }

    /// Claims a write slot.
    pub fn inc_write_count(&self) -> bool {
        self.inc(&self.write)
    }

    /// Releases a write slot.
    pub fn dec_write_count(&self) {
        self.write.dec();
    }

    /// Claims a DFS read-file slot.
    pub fn inc_read_file_count(&self) -> bool {
        self.inc(&self.read_file)
    }

    /// Releases a DFS read-file slot.
    pub fn dec_read_file_count(&self) {
        self.read_file.dec();
    }

    /// Claims a get-max-id slot.
    pub fn inc_get_max_id_count(&self) -> bool {
        self.inc(&self.get_max_id)
    }

    /// Releases a get-max-id slot.
    pub fn dec_get_max_id_count(&self) {
        self.get_max_id.dec();
    }

    /// Claims a get-min-id slot.
    pub fn inc_get_min_id_count(&self) -> bool {
        self.inc(&self.get_min_id)
    }

    /// Releases a get-min-id slot.
    pub fn dec_get_min_id_count(&self) {
        self.get_min_id.dec();
    }

    /// Claims a per-file read slot. Independent of the global read-file
    /// counter.
    pub fn inc_read_file_count_for(&self, file_name: &str) -> bool {
        let mut files = self.file_reads.lock();
        let count = files.entry(file_name.to_string()).or_insert(0);
        if *count >= self.one_file_read_limit {
            drop(files);
            self.stats.record_rejection();
            debug!(file = file_name, limit = self.one_file_read_limit, "per-file admission rejected");
            return false;
        }
        *count += 1;
        true
    }

    /// Releases a per-file read slot.
    pub fn dec_read_file_count_for(&self, file_name: &str) {
        let mut files = self.file_reads.lock();
        if let Some(count) = files.get_mut(file_name) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                files.remove(file_name);
            }
        } else {
            debug_assert!(false, "per-file read slot for {file_name} was never claimed");
        }
    }

    // -------------------------------------------------------------------------
    // Permits
    // -------------------------------------------------------------------------

    /// Claims a read slot released when the permit drops.
    pub fn try_read(&self) -> RillResult<AdmissionPermit<'_>> {
        self.permit(&self.read)
    }

    /// Claims a write slot released when the permit drops.
    pub fn try_write(&self) -> RillResult<AdmissionPermit<'_>> {
        self.permit(&self.write)
    }

    /// Claims a get-max-id slot released when the permit drops.
    pub fn try_get_max_id(&self) -> RillResult<AdmissionPermit<'_>> {
        self.permit(&self.get_max_id)
    }

    /// Claims a get-min-id slot released when the permit drops.
    pub fn try_get_min_id(&self) -> RillResult<AdmissionPermit<'_>> {
        self.permit(&self.get_min_id)
    }

    /// Claims a global read-file slot released when the permit drops.
    pub fn try_read_file(&self) -> RillResult<AdmissionPermit<'_>> {
        self.permit(&self.read_file)
    }

    /// Claims a per-file read slot released when the permit drops.
    pub fn try_read_file_for(&self, file_name: &str) -> RillResult<FileReadPermit<'_>> {
        if !self.inc_read_file_count_for(file_name) {
            return Err(RillError::rejected("one_file_read", self.one_file_read_limit));
        }
        Ok(FileReadPermit {
            center: self,
            file_name: file_name.to_string(),
        })
    }

    // -------------------------------------------------------------------------
    // Leases
    // -------------------------------------------------------------------------

    /// Applies for the lease on `key`; see [`LeaseRegistry::apply`].
    pub fn apply(&self, key: PermissionKey, checker: &TimeoutChecker) -> Option<Lease<'_>> {
        self.leases.apply(key, checker, &self.stats)
    }

    /// Returns the lease registry.
    pub fn leases(&self) -> &LeaseRegistry {
        &self.leases
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    /// Returns the current read count.
    pub fn read_count(&self) -> usize {
        self.read.current()
    }

    /// Returns the current write count.
    pub fn write_count(&self) -> usize {
        self.write.current()
    }

    /// Returns the current global read-file count.
    pub fn read_file_count(&self) -> usize {
        self.read_file.current()
    }

    /// Returns the current get-max-id count.
    pub fn get_max_id_count(&self) -> usize {
        self.get_max_id.current()
    }

    /// Returns the current get-min-id count.
    pub fn get_min_id_count(&self) -> usize {
        self.get_min_id.current()
    }

    /// Returns the current per-file read count.
    pub fn read_file_count_for(&self, file_name: &str) -> usize {
        self.file_reads.lock().get(file_name).copied().unwrap_or(0)
    }

    /// Returns admission statistics.
    pub fn stats(&self) -> &AdmissionStats {
        &self.stats
    }
}

impl Default for AdmissionCenter {
    fn default() -> Self {
        Self::new(AdmissionConfig::default())
    }
}

impl fmt::Debug for AdmissionCenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionCenter")
            .field("read", &self.read_count())
            .field("write", &self.write_count())
            .field("read_file", &self.read_file_count())
            .field("get_max_id", &self.get_max_id_count())
            .field("get_min_id", &self.get_min_id_count())
            .field("leases", &self.leases.len())
            .finish()
    }
}

/// A claimed counter slot, released on drop.
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct AdmissionPermit<'a> {
    counter: &'a Counter,
}

impl Drop for AdmissionPermit<'_> {
    fn drop(&mut self) {
        self.counter.dec();
    }
}

impl fmt::Debug for AdmissionPermit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AdmissionPermit").field(&self.counter.name).finish()
    }
}

/// A per-file read slot, released on drop.
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct FileReadPermit<'a> {
    center: &'a AdmissionCenter,
    file_name: String,
}

impl Drop for FileReadPermit<'_> {
    fn drop(&mut self) {
        self.center.dec_read_file_count_for(&self.file_name);
    }
}

impl fmt::Debug for FileReadPermit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FileReadPermit").field(&self.file_name).finish()
    }
}
