//! Draining in-flight requests before a partition stops.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use rill_common::{PartitionId, RillResult};

/// Counts requests running against one engine.
///
/// Admission checks and the transition out of `Running` happen under the
/// same lock, so once [`Inflight::close`] returns no new request can enter.
#[derive(Debug, Default)]
pub(crate) struct Inflight {
    count: Mutex<usize>,
    drained: Condvar,
}

impl Inflight {
    /// Registers a request if `admit` accepts it.
    pub(crate) fn enter(&self, admit: impl FnOnce() -> RillResult<()>) -> RillResult<InflightGuard<'_>> {
        let mut count = self.count.lock();
        admit()?;
        *count += 1;
        Ok(InflightGuard { inflight: self })
    }

    /// Runs `close` with admissions blocked.
    pub(crate) fn close<T>(&self, close: impl FnOnce() -> T) -> T {
        let _count = self.count.lock();
        close()
    }

    /// Waits until no request is running. Warns once after `grace`; gives up
    /// after `timeout` and returns false.
    pub(crate) fn wait_quiesced(&self, partition: &PartitionId, grace: Duration, timeout: Duration) -> bool {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut warned = false;
        let mut count = self.count.lock();
        while *count > 0 {
            let now = Instant::now();
            if now >= deadline {
                warn!(partition = %partition, inflight = *count, "gave up waiting for in-flight requests");
                return false;
            }
            if !warned && now >= started + grace {
                warn!(partition = %partition, inflight = *count, "still waiting for in-flight requests");
                warned = true;
            }
            let next = if warned { deadline } else { deadline.min(started + grace) };
            self.drained.wait_until(&mut count, next);
        }
        true
    }

    /// Returns the number of running requests.
    pub(crate) fn count(&self) -> usize {
        *self.count.lock()
    }
}

/// Marks one running request; dropping it signals drain waiters.
pub(crate) struct InflightGuard<'a> {
    inflight: &'a Inflight,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        let mut count = self.inflight.count.lock();
        *count -= 1;
        if *count == 0 {
            self.inflight.drained.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_common::RillError;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_enter_respects_admit() {
        let inflight = Inflight::default();
        let guard = inflight.enter(|| Ok(())).unwrap();
        assert_eq!(inflight.count(), 1);
        assert!(inflight.enter(|| Err(RillError::EmptyRequest)).is_err());
        assert_eq!(inflight.count(), 1);
        drop(guard);
        assert_eq!(inflight.count(), 0);
    }

    #[test]
    fn test_wait_quiesced_wakes_on_drain() {
        let inflight = Arc::new(Inflight::default());
        let partition = PartitionId::new("t", 0);
        let holder = {
            let inflight = Arc::clone(&inflight);
            thread::spawn(move || {
                let _guard = inflight.enter(|| Ok(())).unwrap();
                thread::sleep(Duration::from_millis(30));
            })
        };
        while inflight.count() == 0 {
            thread::yield_now();
        }
        assert!(inflight.wait_quiesced(&partition, Duration::from_millis(5), Duration::from_secs(5)));
        holder.join().unwrap();
    }

    #[test]
    fn test_wait_quiesced_times_out() {
        let inflight = Inflight::default();
        let _guard = inflight.enter(|| Ok(())).unwrap();
        let partition = PartitionId::new("t", 0);
        assert!(!inflight.wait_quiesced(&partition, Duration::from_millis(1), Duration::from_millis(20)));
    }
}
