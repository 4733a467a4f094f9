//! The work queue: a bounded-wait, single/multi-producer multi-consumer FIFO
//! of ready behaviors.
//!
//! A `Mutex` guards the queue itself, paired with a `Condvar` so a blocked
//! `dequeue()` wakes as soon as a behavior is ready or the queue is
//! stopped — `stop()` needs dequeues past that point to observe "closed"
//! rather than just hang.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use log::trace;

use crate::behavior::Behavior;

struct QueueState {
    items: VecDeque<Box<Behavior>>,
    stopped: bool,
}

/// FIFO queue of ready behaviors feeding the worker pool.
pub(crate) struct WorkQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
}

impl WorkQueue {
    pub(crate) fn new() -> Self {
        WorkQueue {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                stopped: false,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Pushes a ready behavior and wakes one waiting worker.
    pub(crate) fn enqueue(&self, behavior: Box<Behavior>) {
        let mut state = self.state.lock().unwrap();
        state.items.push_back(behavior);
        self.not_empty.notify_one();
    }

    /// Blocks until a behavior is available or the queue is stopped.
    /// Returns `None` once stopped and drained.
    pub(crate) fn dequeue(&self) -> Option<Box<Behavior>> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(b) = state.items.pop_front() {
                return Some(b);
            }
            if state.stopped {
                return None;
            }
            state = self.not_empty.wait(state).unwrap();
        }
    }

    /// Marks the queue inactive and wakes every waiter; subsequent
    /// `dequeue()` calls drain remaining items, then return `None`.
    pub(crate) fn stop(&self) {
        trace!("work queue stopping");
        let mut state = self.state.lock().unwrap();
        state.stopped = true;
        self.not_empty.notify_all();
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.state.lock().unwrap().items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_wakes_waiting_dequeue() {
        let q = std::sync::Arc::new(WorkQueue::new());
        let q2 = q.clone();
        let handle = std::thread::spawn(move || q2.dequeue());
        std::thread::sleep(std::time::Duration::from_millis(20));
        q.stop();
        assert!(handle.join().unwrap().is_none());
    }
}
