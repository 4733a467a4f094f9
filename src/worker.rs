//! The worker pool and the termination latch.
//!
//! A fixed set of OS threads, each pulling ready behaviors off a shared
//! queue until it is stopped; a reference-counted `Terminator` latch tracks
//! how many scheduled behaviors are still in flight so `wait()` knows when
//! a round has fully drained.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error, trace, warn};

use crate::error::InternalError;
use crate::queue::WorkQueue;

/// The reference-counted latch awaited by [`crate::runtime::Runtime::wait`].
///
/// `count` starts at 1 (the main thread's own hold, released by the first
/// `wait()`); every scheduled behavior increments it, every completed
/// behavior decrements it. Once it reaches zero, `set` becomes true
/// permanently.
pub(crate) struct Terminator {
    count: AtomicUsize,
    set: AtomicBool,
}

impl Terminator {
    pub(crate) fn new() -> Self {
        Terminator {
            count: AtomicUsize::new(1),
            set: AtomicBool::new(false),
        }
    }

    pub(crate) fn increment(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn decrement(&self) {
        match self.count.fetch_sub(1, Ordering::SeqCst) {
            0 => {
                // Restore the count we just (erroneously) took below zero and
                // surface the bug rather than silently wrapping `usize`.
                self.count.fetch_add(1, Ordering::SeqCst);
                error!("terminator count underflowed");
            }
            1 => {
                self.set.store(true, Ordering::SeqCst);
                trace!("terminator reached zero");
            }
            _ => {}
        }
    }

    /// Releases the main thread's initial hold, then polls until `set`
    /// becomes true, yielding between polls rather than blocking on a
    /// condvar that every single decrement would have to notify.
    pub(crate) fn wait(&self) {
        self.decrement();
        while !self.set.load(Ordering::SeqCst) {
            thread::yield_now();
        }
    }

    pub(crate) fn is_drained(&self) -> bool {
        self.set.load(Ordering::SeqCst)
    }
}

/// `N` workers pulling ready behaviors off a shared [`WorkQueue`].
pub(crate) struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `worker_count` worker threads, each looping
    /// dequeue -> run -> release -> decrement until the queue is stopped.
    pub(crate) fn start(worker_count: usize, queue: Arc<WorkQueue>, terminator: Arc<Terminator>) -> Self {
        debug!("starting {worker_count} worker(s)");
        let handles = (0..worker_count)
            .map(|id| {
                let queue = queue.clone();
                let terminator = terminator.clone();
                thread::Builder::new()
                    .name(format!("boc-worker-{id}"))
                    .spawn(move || {
                        trace!("worker {id} started");
                        while let Some(behavior) = queue.dequeue() {
                            behavior.run(&terminator);
                        }
                        trace!("worker {id} stopped");
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();
        WorkerPool { handles }
    }

    /// Joins every worker thread. Panics if a worker panicked, so a bug in
    /// a worker loop surfaces loudly instead of silently dropping work.
    pub(crate) fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.join() {
                warn!("worker thread panicked: {e:?}");
                std::panic::resume_unwind(e);
            }
        }
    }
}

/// Reads and validates the `WORKER_COUNT` environment override.
pub(crate) fn worker_count_from_env() -> Result<Option<usize>, InternalError> {
    match std::env::var("WORKER_COUNT") {
        Err(_) => Ok(None),
        Ok(raw) => {
            let n: i64 = raw
                .trim()
                .parse()
                .map_err(|_| InternalError::InvalidWorkerCount(raw.clone()))?;
            if n > 0 {
                Ok(Some(n as usize))
            } else {
                Err(InternalError::InvalidWorkerCount(raw))
            }
        }
    }
}
