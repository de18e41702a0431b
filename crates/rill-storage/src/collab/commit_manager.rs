//! In-process consumer progress.

use parking_lot::Mutex;

use super::{CommitManager, ConsumerCommit};
use crate::message::now_micros;

/// Commit manager fed directly by consumer reports.
#[derive(Debug, Default)]
pub struct MemoryCommitManager {
    state: Mutex<ConsumerCommit>,
}

impl MemoryCommitManager {
    /// Creates a manager with no reported progress.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that consumers committed up to `committed_id` (exclusive),
    /// whose last message carried `committed_time`.
    ///
    /// Progress never moves backwards; the access time always refreshes.
    pub fn report(&self, committed_id: u64, committed_time: i64) {
        let mut state = self.state.lock();
        if committed_id >= state.committed_id {
            state.committed_id = committed_id;
            state.committed_time = committed_time;
        }
        state.last_access_time = now_micros();
    }
}

impl CommitManager for MemoryCommitManager {
    fn commit_id_and_access_time(&self) -> ConsumerCommit {
        *self.state.lock()
    }
}
