//! Periodic maintenance threads.
//!
//! Every loop sleeps on a shared [`LoopSignal`] so `stop` wakes all of them
//! at once instead of waiting out their periods.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rand::Rng;
use tracing::debug;

/// Stop flag the maintenance loops sleep on.
#[derive(Debug, Default)]
pub struct LoopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl LoopSignal {
    /// Creates a signal in the running state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops every loop sleeping on this signal.
    pub fn stop(&self) {
        *self.stopped.lock() = true;
        self.wake.notify_all();
    }

    /// Returns true once stopped.
    pub fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }

    /// Sleeps for `period` unless stopped first. Returns false once stopped.
    pub fn sleep(&self, period: Duration) -> bool {
        let deadline = Instant::now() + period;
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.wake.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        !*stopped
    }
}

/// Returns `period` scaled by a random factor in `[1 - jitter, 1 + jitter]`.
pub fn jittered(period: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return period;
    }
    let factor = rand::thread_rng().gen_range(1.0 - jitter..=1.0 + jitter);
    period.mul_f64(factor.max(0.0))
}

/// Spawns a named thread that runs `tick` after every `period()` until
/// `signal` stops or `tick` returns false.
pub fn spawn_loop(
    name: &str,
    signal: Arc<LoopSignal>,
    mut period: impl FnMut() -> Duration + Send + 'static,
    mut tick: impl FnMut() -> bool + Send + 'static,
) -> io::Result<JoinHandle<()>> {
    let label = name.to_owned();
    thread::Builder::new()
        .name(format!("rill-{name}"))
        .spawn(move || {
            debug!(task = %label, "maintenance loop started");
            while signal.sleep(period()) {
                if !tick() {
                    break;
                }
            }
            debug!(task = %label, "maintenance loop exited");
        })
}
