//! Cache and admission statistics for monitoring and debugging.

use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics for block cache operations.
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Total number of block lookups.
    accesses: AtomicU64,
    /// Number of cache hits.
    hits: AtomicU64,
    /// Number of cache misses.
    misses: AtomicU64,
    /// Number of blocks inserted.
    inserts: AtomicU64,
    /// Number of blocks dropped as obsolete.
    obsolete_evictions: AtomicU64,
    /// Number of blocks dropped by distance.
    distance_evictions: AtomicU64,
    /// Number of positional reads issued to the DFS.
    file_reads: AtomicU64,
    /// Number of failed opens or reads.
    read_failures: AtomicU64,
}

impl CacheStats {
    /// Creates new statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an access.
    #[inline]
    pub fn record_access(&self) {
        self.accesses.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a cache hit.
    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a cache miss.
    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an insertion.
    #[inline]
    pub fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records evictions by either phase.
    #[inline]
    pub fn record_evictions(&self, obsolete: usize, by_distance: usize) {
        self.obsolete_evictions
            .fetch_add(obsolete as u64, Ordering::Relaxed);
        self.distance_evictions
            .fetch_add(by_distance as u64, Ordering::Relaxed);
    }

    /// Records a DFS read.
    #[inline]
    pub fn record_file_read(&self) {
        self.file_reads.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed DFS open or read.
    #[inline]
    pub fn record_read_failure(&self) {
        self.read_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns total accesses.
    pub fn accesses(&self) -> u64 {
        self.accesses.load(Ordering::Relaxed)
    }

    /// Returns cache hits.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Returns cache misses.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Returns insertions.
    pub fn inserts(&self) -> u64 {
        self.inserts.load(Ordering::Relaxed)
    }

    /// Returns obsolete evictions.
    pub fn obsolete_evictions(&self) -> u64 {
        self.obsolete_evictions.load(Ordering::Relaxed)
    }

    /// Returns distance evictions.
    pub fn distance_evictions(&self) -> u64 {
        self.distance_evictions.load(Ordering::Relaxed)
    }

    /// Returns DFS reads issued.
    pub fn file_reads(&self) -> u64 {
        self.file_reads.load(Ordering::Relaxed)
    }

    /// Returns failed DFS opens or reads.
    pub fn read_failures(&self) -> u64 {
        self.read_failures.load(Ordering::Relaxed)
    }

    /// Returns the hit ratio (0.0 to 1.0).
    pub fn hit_ratio(&self) -> f64 {
        let accesses = self.accesses();
        if accesses == 0 {
            0.0
        } else {
            self.hits() as f64 / accesses as f64
        }
    }
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CacheStats {{ accesses: {}, hits: {}, misses: {}, hit_ratio: {:.2}%, file_reads: {}, evictions: {}/{} }}",
            self.accesses(),
            self.hits(),
            self.misses(),
            self.hit_ratio() * 100.0,
            self.file_reads(),
            self.obsolete_evictions(),
            self.distance_evictions()
        )
    }
}

/// Statistics for admission control.
#[derive(Debug, Default)]
pub struct AdmissionStats {
    rejections: AtomicU64,
    lease_grants: AtomicU64,
    lease_waits: AtomicU64,
    lease_takeovers: AtomicU64,
    lease_timeouts: AtomicU64,
}

impl AdmissionStats {
    /// Creates new statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a counter rejection.
    #[inline]
    pub fn record_rejection(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a lease grant.
    #[inline]
    pub fn record_grant(&self) {
        self.lease_grants.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a wait on a held lease.
    #[inline]
    pub fn record_wait(&self) {
        self.lease_waits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a takeover of a stale lease.
    #[inline]
    pub fn record_takeover(&self) {
        self.lease_takeovers.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a lease request that timed out.
    #[inline]
    pub fn record_timeout(&self) {
        self.lease_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns counter rejections.
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    /// Returns lease grants, takeovers included.
    pub fn lease_grants(&self) -> u64 {
        self.lease_grants.load(Ordering::Relaxed)
    }

    /// Returns lease waits.
    pub fn lease_waits(&self) -> u64 {
        self.lease_waits.load(Ordering::Relaxed)
    }

    /// Returns lease takeovers.
    pub fn lease_takeovers(&self) -> u64 {
        self.lease_takeovers.load(Ordering::Relaxed)
    }

    /// Returns lease timeouts.
    pub fn lease_timeouts(&self) -> u64 {
        self.lease_timeouts.load(Ordering::Relaxed)
    }
}
