//! Per-block leases.
//!
//! A lease de-duplicates concurrent DFS fetches of one `(file, block)` pair.
//! It is advisory: a holder that keeps a key longer than `max_wait_time` is
//! superseded by the next applicant, and its eventual release is ignored.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use rill_common::TimeoutChecker;

use crate::stats::AdmissionStats;

/// Identifies one block of one file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PermissionKey {
    /// File name or path.
    pub file_name: String,
    /// Block index within the file.
    pub block_index: u64,
}

impl PermissionKey {
    /// Creates a key.
    pub fn new(file_name: impl Into<String>, block_index: u64) -> Self {
        Self {
            file_name: file_name.into(),
            block_index,
        }
    }
}

impl fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.file_name, self.block_index)
    }
}

struct LeaseEntry {
    generation: u64,
    started: Instant,
    superseded: Arc<AtomicBool>,
}

/// The lease table.
pub struct LeaseRegistry {
    table: Mutex<HashMap<PermissionKey, LeaseEntry>>,
    released: Condvar,
    next_generation: AtomicU64,
    poll_interval: Duration,
    max_wait_time: Duration,
}

impl LeaseRegistry {
    /// Creates an empty registry.
    pub fn new(poll_interval: Duration, max_wait_time: Duration) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            released: Condvar::new(),
            next_generation: AtomicU64::new(1),
            poll_interval,
            max_wait_time,
        }
    }

    /// Applies for the lease on `key`.
    ///
    /// Waits for the current holder to release, bounded by `checker`. Returns
    /// `None` when the checker expires first. A holder older than
    /// `max_wait_time` is taken over instead of waited for.
    pub(crate) fn apply(
        &self,
        key: PermissionKey,
        checker: &TimeoutChecker,
        stats: &AdmissionStats,
    ) -> Option<Lease<'_>> {
        let mut table = self.table.lock();
        let mut waited = false;
        loop {
            match table.get(&key) {
                None => break,
                Some(holder) if holder.started.elapsed() >= self.max_wait_time => {
                    holder.superseded.store(true, Ordering::Release);
                    stats.record_takeover();
                    warn!(key = %key, held_ms = holder.started.elapsed().as_millis() as u64, "taking over stale lease");
                    break;
                }
                Some(_) => {}
            }
            if checker.is_timeout() {
                stats.record_timeout();
                debug!(key = %key, "lease wait timed out");
                return None;
            }
            if !waited {
                stats.record_wait();
                waited = true;
            }
            let wait = self.poll_interval.min(checker.remaining());
            self.released.wait_for(&mut table, wait);
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let superseded = Arc::new(AtomicBool::new(false));
        table.insert(
            key.clone(),
            LeaseEntry {
                generation,
                started: Instant::now(),
                superseded: Arc::clone(&superseded),
            },
        );
        stats.record_grant();
        Some(Lease {
            registry: self,
            key,
            generation,
            superseded,
        })
    }

    fn release(&self, key: &PermissionKey, generation: u64) {
        let mut table = self.table.lock();
        match table.get(key) {
            Some(entry) if entry.generation == generation => {
                table.remove(key);
            }
            _ => {
                debug_assert!(false, "released lease {key} is not registered");
                return;
            }
        }
        drop(table);
        self.released.notify_all();
    }

    /// Returns true if `key` is currently leased.
    pub fn is_held(&self, key: &PermissionKey) -> bool {
        self.table.lock().contains_key(key)
    }

    /// Returns the number of outstanding leases.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// Returns true if no lease is outstanding.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for LeaseRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseRegistry")
            .field("leases", &self.len())
            .field("poll_interval", &self.poll_interval)
            .field("max_wait_time", &self.max_wait_time)
            .finish()
    }
}

/// A granted lease, released on drop.
#[must_use = "the lease is released as soon as it is dropped"]
pub struct Lease<'a> {
    registry: &'a LeaseRegistry,
    key: PermissionKey,
    generation: u64,
    superseded: Arc<AtomicBool>,
}

impl Lease<'_> {
    /// Returns the leased key.
    pub fn key(&self) -> &PermissionKey {
        &self.key
    }

    /// Returns true once another applicant took the lease over.
    pub fn is_superseded(&self) -> bool {
        self.superseded.load(Ordering::Acquire)
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if self.is_superseded() {
            return;
        }
        self.registry.release(&self.key, self.generation);
    }
}

impl fmt::Debug for Lease<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("key", &self.key)
            .field("generation", &self.generation)
            .field("superseded", &self.is_superseded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn registry(max_wait: Duration) -> LeaseRegistry {
        LeaseRegistry::new(Duration::from_millis(5), max_wait)
    }

    #[test]
    fn test_grant_and_release() {
        let registry = registry(Duration::from_secs(10));
        let stats = AdmissionStats::new();
        let key = PermissionKey::new("a.data", 3);

        let lease = registry
            .apply(key.clone(), &TimeoutChecker::new(Duration::from_secs(1)), &stats)
            .unwrap();
        assert!(registry.is_held(&key));
        assert!(!lease.is_superseded());
        drop(lease);
        assert!(registry.is_empty());
        assert_eq!(stats.lease_grants(), 1);
    }

    #[test]
    fn test_second_apply_times_out_while_held() {
        let registry = registry(Duration::from_secs(10));
        let stats = AdmissionStats::new();
        let key = PermissionKey::new("a.data", 0);

        let _held = registry
            .apply(key.clone(), &TimeoutChecker::new(Duration::from_secs(1)), &stats)
            .unwrap();
        let second = registry.apply(key, &TimeoutChecker::new(Duration::from_millis(30)), &stats);
        assert!(second.is_none());
        assert_eq!(stats.lease_timeouts(), 1);
    }

    #[test]
    fn test_waiter_woken_by_release() {
        let registry = Arc::new(registry(Duration::from_secs(10)));
        let stats = Arc::new(AdmissionStats::new());
        let key = PermissionKey::new("a.meta", 1);

        let lease = registry
            .apply(key.clone(), &TimeoutChecker::new(Duration::from_secs(1)), &stats)
            .unwrap();

        let waiter = {
            let registry = Arc::clone(&registry);
            let stats = Arc::clone(&stats);
            let key = key.clone();
            thread::spawn(move || {
                registry
                    .apply(key, &TimeoutChecker::new(Duration::from_secs(5)), &stats)
                    .is_some()
            })
        };
        thread::sleep(Duration::from_millis(20));
        drop(lease);
        assert!(waiter.join().unwrap());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_takeover_ignores_stale_release() {
        let registry = registry(Duration::from_millis(20));
        let stats = AdmissionStats::new();
        let key = PermissionKey::new("a.data", 7);
        let checker = TimeoutChecker::new(Duration::from_secs(1));

        let stale = registry.apply(key.clone(), &checker, &stats).unwrap();
        thread::sleep(Duration::from_millis(30));

        let fresh = registry.apply(key.clone(), &checker, &stats).unwrap();
        assert!(stale.is_superseded());
        assert_eq!(stats.lease_takeovers(), 1);

        drop(stale);
        assert!(registry.is_held(&key), "stale release must not drop the new holder");
        drop(fresh);
        assert!(!registry.is_held(&key));
    }

    #[test]
    fn test_mutual_exclusion_under_contention() {
        let registry = Arc::new(registry(Duration::from_secs(10)));
        let stats = Arc::new(AdmissionStats::new());
        let inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let stats = Arc::clone(&stats);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    for _ in 0..20 {
                        let checker = TimeoutChecker::new(Duration::from_secs(5));
                        let lease = registry.apply(PermissionKey::new("hot", 0), &checker, &stats);
                        assert!(lease.is_some());
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        thread::yield_now();
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(registry.is_empty());
    }
}
