//! Ties the region-id counter, the work queue, the worker pool, and the
//! terminator together into the runtime a user actually starts and waits on.

use std::sync::{Arc, Mutex};

use log::{debug, info};
use once_cell::sync::OnceCell;

use crate::behavior::Behavior;
use crate::error::{IsolationError, RuntimeError, WhenError};
use crate::queue::WorkQueue;
use crate::region::Region;
use crate::when::When;
use crate::worker::{self, Terminator, WorkerPool};

/// Process-wide configuration, read once at `Runtime` construction.
///
/// `WORKER_COUNT` is the only environment knob read today; `queue_capacity_hint`
/// is carried for API symmetry with a bounded-queue implementation but is not
/// currently enforced — the work queue itself is unbounded; waiting happens
/// only on the consumer side.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub worker_count: Option<usize>,
    pub queue_capacity_hint: Option<usize>,
}

impl RuntimeConfig {
    /// Reads `WORKER_COUNT` from the environment; see
    /// [`worker::worker_count_from_env`] for the validation rule.
    pub fn from_env() -> Result<Self, RuntimeError> {
        let worker_count = worker::worker_count_from_env()?;
        Ok(RuntimeConfig {
            worker_count,
            queue_capacity_hint: None,
        })
    }

    fn resolved_worker_count(&self) -> usize {
        self.worker_count.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

enum Workers {
    NotStarted,
    Running(WorkerPool),
}

/// Everything a drain cycle tears down and rebuilds: the queue, the
/// terminator, and the live worker pool (if any). Bundled behind one mutex so
/// `wait()` can swap all three out atomically when a cycle finishes, letting
/// a later `when(...)`/`wait()` pair start a fresh cycle instead of finding a
/// permanently-stopped queue and a permanently-set terminator.
struct Cycle {
    queue: Arc<WorkQueue>,
    terminator: Arc<Terminator>,
    workers: Workers,
    started: bool,
}

impl Cycle {
    fn fresh() -> Self {
        Cycle {
            queue: Arc::new(WorkQueue::new()),
            terminator: Arc::new(Terminator::new()),
            workers: Workers::NotStarted,
            started: false,
        }
    }
}

/// The running BoC scheduler: a work queue, a worker pool, a termination
/// latch, and the error sink `wait()` drains.
pub struct Runtime {
    config: RuntimeConfig,
    cycle: Mutex<Cycle>,
    errors: Mutex<Vec<Box<dyn std::error::Error + Send + Sync>>>,
}

static GLOBAL: OnceCell<Arc<Runtime>> = OnceCell::new();

impl Runtime {
    /// Builds a standalone runtime from `config`. Does not start workers;
    /// call [`Runtime::run`] for that, or just call [`Runtime::wait`], which
    /// starts them lazily.
    ///
    /// Unlike [`Runtime::global`], this instance is not shared with anything
    /// else in the process: schedule behaviors onto it with
    /// [`Runtime::when`] rather than the free [`crate::when`] function, which
    /// always targets the global singleton.
    pub fn new(config: RuntimeConfig) -> Arc<Self> {
        Arc::new(Runtime {
            config,
            cycle: Mutex::new(Cycle::fresh()),
            errors: Mutex::new(Vec::new()),
        })
    }

    /// The process-wide runtime singleton, lazily initialized from
    /// `RuntimeConfig::from_env()` on first access. The free `when(...)`
    /// function always schedules against this instance.
    pub fn global() -> Arc<Runtime> {
        GLOBAL
            .get_or_init(|| {
                Runtime::new(RuntimeConfig::from_env().unwrap_or_else(|e| {
                    log::warn!("WORKER_COUNT invalid ({e}); falling back to CPU count");
                    RuntimeConfig::default()
                }))
            })
            .clone()
    }

    /// Validates and schedules against this specific runtime instance rather
    /// than the process-wide singleton — the counterpart to the free
    /// [`crate::when`] function for a [`Runtime`] built with [`Runtime::new`].
    pub fn when(self: &Arc<Self>, regions: &[Region]) -> Result<When, IsolationError> {
        crate::when::when_on(self.clone(), regions)
    }

    pub(crate) fn terminator(&self) -> Arc<Terminator> {
        self.cycle.lock().unwrap().terminator.clone()
    }

    /// Starts the worker pool for the current cycle. Idempotent within a
    /// cycle: a second call before the next `wait()` drain is a no-op.
    pub fn run(&self) {
        let mut cycle = self.cycle.lock().unwrap();
        if cycle.started {
            return;
        }
        cycle.started = true;
        let n = self.config.resolved_worker_count();
        info!("starting runtime with {n} worker(s)");
        let pool = WorkerPool::start(n, cycle.queue.clone(), cycle.terminator.clone());
        cycle.workers = Workers::Running(pool);
    }

    /// Blocks until every behavior scheduled in the current cycle has
    /// completed, then re-raises any aggregated thunk errors as a
    /// [`WhenError`]. A cycle that never started any work returns
    /// immediately. After a full drain the queue, terminator, and worker pool
    /// are torn down and replaced, so a `when(...)` call made after this
    /// returns starts a fresh cycle rather than finding an already-stopped
    /// queue.
    ///
    /// Not safe to race against a concurrent `when(...)` scheduling into the
    /// *same* cycle this call is draining — the usual pattern is to schedule
    /// all of a round's behaviors, then call `wait()` once, exactly as a
    /// single thread coordinating a batch of work would.
    pub fn wait(&self) -> Result<(), RuntimeError> {
        self.run();
        let (terminator, queue) = {
            let cycle = self.cycle.lock().unwrap();
            (cycle.terminator.clone(), cycle.queue.clone())
        };
        terminator.wait();
        queue.stop();

        let mut cycle = self.cycle.lock().unwrap();
        if let Workers::Running(pool) = std::mem::replace(&mut cycle.workers, Workers::NotStarted) {
            pool.join();
        }
        *cycle = Cycle::fresh();
        drop(cycle);

        let errors = std::mem::take(&mut *self.errors.lock().unwrap());
        if errors.is_empty() {
            Ok(())
        } else {
            debug!("wait() re-raising {} aggregated error(s)", errors.len());
            Err(RuntimeError::When(WhenError { errors }))
        }
    }

    pub(crate) fn enqueue_ready(&self, behavior: Box<Behavior>) {
        self.cycle.lock().unwrap().queue.enqueue(behavior);
    }

    pub(crate) fn record_error(&self, e: Box<dyn std::error::Error + Send + Sync>) {
        self.errors.lock().unwrap().push(e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolved_worker_count_falls_back_to_cpu_count_when_unset() {
        let cfg = RuntimeConfig::default();
        assert!(cfg.resolved_worker_count() >= 1);
    }

    #[test]
    fn a_fresh_runtime_drains_with_no_scheduled_work() {
        let rt = Runtime::new(RuntimeConfig {
            worker_count: Some(1),
            queue_capacity_hint: None,
        });
        rt.wait().unwrap();
    }
}
