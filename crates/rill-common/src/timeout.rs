//! Request deadlines.

use std::time::{Duration, Instant};

/// Tracks the deadline of one request.
///
/// Every blocking admission or lease call takes a checker so that waits are
/// bounded by the caller's budget rather than by the callee.
///
/// # Example
///
/// ```rust
/// use rill_common::TimeoutChecker;
/// use std::time::Duration;
///
/// let checker = TimeoutChecker::new(Duration::from_secs(60));
/// assert!(!checker.is_timeout());
/// assert!(checker.remaining() <= Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct TimeoutChecker {
    start: Instant,
    timeout: Duration,
}

impl TimeoutChecker {
    /// Starts a new deadline `timeout` from now.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            start: Instant::now(),
            timeout,
        }
    }

    /// Returns a checker that has already expired.
    #[must_use]
    pub fn expired() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Returns true once the deadline has passed.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.start.elapsed() >= self.timeout
    }

    /// Returns the time left before the deadline.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.start.elapsed())
    }

    /// Returns the time since the checker was created.
    #[inline]
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Returns the configured budget.
    #[inline]
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}
