//! Per-partition read flow control.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

const WINDOW: Duration = Duration::from_secs(1);

struct Window {
    started: Instant,
    bytes: usize,
}

/// A bytes-per-second budget for reads, reset every second.
///
/// A request is admitted while the current window has budget left; the
/// bytes it actually returned are charged afterwards, so one large response
/// may overdraw a window.
pub struct FlowControl {
    limit: usize,
    window: Mutex<Window>,
}

impl FlowControl {
    /// Creates a budget of `bytes_per_sec`; zero disables flow control.
    pub fn new(bytes_per_sec: usize) -> Self {
        Self {
            limit: bytes_per_sec,
            window: Mutex::new(Window {
                started: Instant::now(),
                bytes: 0,
            }),
        }
    }

    /// Returns true if the limit is active.
    pub fn is_enabled(&self) -> bool {
        self.limit > 0
    }

    /// Returns true if a read may proceed now.
    pub fn try_admit(&self) -> bool {
        if !self.is_enabled() {
            return true;
        }
        let mut window = self.window.lock();
        Self::roll(&mut window);
        window.bytes < self.limit
    }

    /// Charges `bytes` against the current window.
    pub fn charge(&self, bytes: usize) {
        if !self.is_enabled() {
            return;
        }
        let mut window = self.window.lock();
        Self::roll(&mut window);
        window.bytes = window.bytes.saturating_add(bytes);
    }

    fn roll(window: &mut Window) {
        if window.started.elapsed() >= WINDOW {
            window.started = Instant::now();
            window.bytes = 0;
        }
    }
}

impl std::fmt::Debug for FlowControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowControl")
            .field("limit", &self.limit)
            .field("used", &self.window.lock().bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_always_admits() {
        let flow = FlowControl::new(0);
        flow.charge(usize::MAX);
        assert!(flow.try_admit());
    }

    #[test]
    fn test_window_exhaustion_and_reset() {
        let flow = FlowControl::new(100);
        assert!(flow.try_admit());
        flow.charge(150);
        assert!(!flow.try_admit());
        {
            let mut window = flow.window.lock();
            window.started -= WINDOW;
        }
        assert!(flow.try_admit());
    }
}
