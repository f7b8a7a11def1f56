//! [`PoseQueue`] – FIFO hand-off of pose-map snapshots.
//!
//! The listener's I/O thread pushes one snapshot per accepted pose batch; the
//! design-agent loop pops them.  The queue is the one container both sides
//! mutate, so every operation goes through a single mutex.  A condition
//! variable lets the consumer block for the next snapshot with a deadline.
//!
//! The caller creates the queue and hands the same `Arc` to the listener:
//!
//! ```rust
//! use std::sync::Arc;
//! use gazelink_middleware::PoseQueue;
//!
//! let queue = Arc::new(PoseQueue::new());
//! let for_listener = Arc::clone(&queue);
//! for_listener.push(Default::default());
//! assert_eq!(queue.len(), 1);
//! ```

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use gazelink_types::PoseMap;

/// Unbounded, thread-safe FIFO of [`PoseMap`] snapshots.
#[derive(Debug, Default)]
pub struct PoseQueue {
    snapshots: Mutex<VecDeque<PoseMap>>,
    available: Condvar,
}

impl PoseQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a snapshot and wake one waiting consumer.
    pub fn push(&self, snapshot: PoseMap) {
        self.lock().push_back(snapshot);
        self.available.notify_one();
    }

    /// Pop the oldest snapshot without blocking.
    pub fn pop(&self) -> Option<PoseMap> {
        self.lock().pop_front()
    }

    /// Pop the oldest snapshot, waiting up to `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<PoseMap> {
        let guard = self.lock();
        let (mut guard, _) = self
            .available
            .wait_timeout_while(guard, timeout, |q| q.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        guard.pop_front()
    }

    /// Remove and return every pending snapshot, oldest first.
    pub fn drain(&self) -> Vec<PoseMap> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<PoseMap>> {
        self.snapshots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
