//! Requests and Behaviors: the non-blocking multi-region acquisition
//! protocol.
//!
//! Each region holds one lock-free waiter chain; a `Behavior` enqueues a
//! `Request` on every region it targets, in sorted region-id order, and
//! becomes ready only once it reaches the head of every one of those
//! chains. A ready behavior is pushed onto this crate's own
//! [`crate::queue::WorkQueue`] for a worker to pick up.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::Ordering::{Relaxed, SeqCst};
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize};
use std::{hint, ptr};

use log::{error, trace};

use crate::error::InternalError;
use crate::region::{Region, RegionInner};
use crate::runtime::Runtime;
use crate::worker::Terminator;

/// One region-slot of a [`Behavior`], linked into that region's wait chain.
pub(crate) struct Request {
    next: AtomicPtr<Behavior>,
    scheduled: AtomicBool,
    target: Arc<RegionInner>,
}

// SAFETY: a `Request` is only ever dereferenced through the atomics below,
// never aliased as `&mut`, so `Send` is safe without `Sync`.
unsafe impl Send for Request {}

impl Request {
    fn new(target: Arc<RegionInner>) -> Self {
        Request {
            next: AtomicPtr::new(ptr::null_mut()),
            scheduled: AtomicBool::new(false),
            target,
        }
    }

    /// Phase one of the two-phase enqueue. Returns once every predecessor
    /// request on this region has finished its own `start_enqueue`, which is
    /// what makes acquiring requests in sorted region-id order deadlock-free.
    ///
    /// # Safety
    ///
    /// `behavior` must point at the (still-live) `Behavior` this request
    /// belongs to, and this must be the only `start_enqueue` call for this
    /// request.
    unsafe fn start_enqueue(&self, behavior: *const Behavior) {
        let prev = unsafe {
            self.target
                .last
                .swap(self as *const Self as *mut Self, SeqCst)
                .as_mut()
        };
        let Some(prev) = prev else {
            // No predecessor: this request is already at the head of its
            // region's chain.
            unsafe { Behavior::resolve_one(behavior) };
            return;
        };
        while !prev.scheduled.load(SeqCst) {
            hint::spin_loop();
        }
        prev.next.store(behavior as *mut Behavior, SeqCst);
    }

    /// Phase two: marks this request as fully linked, so a successor's
    /// `start_enqueue` spin-wait can proceed.
    unsafe fn finish_enqueue(&self) {
        self.scheduled.store(true, SeqCst);
    }

    /// Hands the region off to the next waiting behavior, or clears the
    /// region's tail pointer if there is none.
    ///
    /// # Safety
    ///
    /// The behavior owning this request must have actually finished running.
    unsafe fn release(&self) {
        if self.next.load(SeqCst).is_null()
            && self
                .target
                .last
                .compare_exchange(self as *const Self as *mut Self, ptr::null_mut(), SeqCst, Relaxed)
                .is_ok()
        {
            return;
        }
        while self.next.load(SeqCst).is_null() {
            hint::spin_loop();
        }
        unsafe { Behavior::resolve_one(self.next.load(SeqCst)) };
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("target", &self.target.id)
            .field("scheduled", &self.scheduled)
            .finish()
    }
}

/// The callable body of a behavior: accepts the regions it targets, in
/// sorted-by-id order, and returns any error raised during execution.
pub type Thunk =
    Box<dyn FnOnce(Vec<Region>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send>;

/// A scheduled unit of work: a thunk plus the sorted set of regions it holds
/// for the duration of its execution.
pub(crate) struct Behavior {
    thunk: Thunk,
    regions: Vec<Region>,
    /// Number of not-yet-resolved request slots, plus one for the
    /// scheduling thread's own hold (released once all `start_enqueue` calls
    /// have gone out).
    count: AtomicUsize,
    requests: Vec<Request>,
    /// The runtime this behavior was scheduled against — consulted on
    /// completion (readying the next behavior, recording an error) so a
    /// behavior scheduled onto a user-constructed `Runtime` never reaches
    /// back into the global singleton.
    runtime: Arc<Runtime>,
}

impl Behavior {
    fn new(runtime: Arc<Runtime>, regions: Vec<Region>, thunk: Thunk) -> Self {
        let mut requests: Vec<Request> = regions
            .iter()
            .map(|r| Request::new(crate::region::resolve(&r.inner)))
            .collect();
        requests.sort_by_key(|r| r.target.id);
        Behavior {
            thunk,
            count: AtomicUsize::new(requests.len() + 1),
            requests,
            regions,
            runtime,
        }
    }

    /// Schedules `self` onto `runtime`, performing the two-phase-locked
    /// enqueue across all of its requests in sorted region-id order, then
    /// releasing the scheduling thread's own hold.
    ///
    /// The terminator is incremented *before* enqueueing, not after: a
    /// single-region behavior with no predecessor can become ready and run
    /// to completion before the scheduling thread would otherwise get
    /// around to incrementing, which would undercount in-flight behaviors.
    pub(crate) fn schedule(runtime: Arc<Runtime>, regions: Vec<Region>, thunk: Thunk) {
        runtime.terminator().increment();
        let b = Box::leak(Box::new(Behavior::new(runtime, regions, thunk)));
        trace!(
            "scheduling behavior over regions {:?}",
            b.requests.iter().map(|r| r.target.id).collect::<Vec<_>>()
        );
        unsafe {
            for r in &b.requests {
                r.start_enqueue(b as *const Self);
            }
            for r in &b.requests {
                r.finish_enqueue();
            }
            Behavior::resolve_one(b as *const Self);
        }
        // `b` must not be dropped here: `resolve_one` either handed it back
        // to a pending predecessor (no drop yet) or, if it just became
        // ready, already reconstructed and queued the `Box` itself.
    }

    /// Resolves one outstanding slot. When the last of `k` requests plus the
    /// scheduling thread's own hold clears, the behavior is fully enqueued on
    /// every target region and is pushed onto the work queue.
    ///
    /// # Safety
    ///
    /// `this` must point at a live, `Box::leak`-ed `Behavior`.
    unsafe fn resolve_one(this: *const Self) {
        let behavior_ref = unsafe { &*this };
        if behavior_ref.count.fetch_sub(1, SeqCst) != 1 {
            return;
        }
        // Every slot resolved: reclaim ownership and hand it to a worker.
        let behavior = unsafe { Box::from_raw(this.cast_mut()) };
        let runtime = behavior.runtime.clone();
        runtime.enqueue_ready(behavior);
    }

    /// Runs this behavior to completion: opens every target region, invokes
    /// the thunk, closes the regions, releases every request (handing each
    /// region to its next waiter), and reports the terminator.
    ///
    /// The thunk call is wrapped in `catch_unwind`: a panicking thunk must
    /// not skip closing the regions or releasing the chain, or every
    /// subsequent behavior on those regions would deadlock and `wait()`
    /// would spin forever.
    ///
    /// Called only by a worker thread that just dequeued `self`.
    pub(crate) fn run(self: Box<Self>, terminator: &Terminator) {
        let Behavior {
            thunk,
            regions,
            requests,
            runtime,
            ..
        } = *self;

        for r in &regions {
            r.open();
        }
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            thunk(regions.clone())
        }));
        for r in &regions {
            r.close();
        }
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("behavior thunk failed: {e}");
                runtime.record_error(e);
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("behavior thunk panicked: {message}");
                runtime.record_error(Box::new(InternalError::ThunkPanicked(message)));
            }
        }
        for r in &requests {
            unsafe { r.release() };
        }
        terminator.decrement();
    }
}

/// Extracts a human-readable message from a `catch_unwind` payload, which is
/// almost always a `&str` or `String` (what `panic!`/`unwrap`/`expect`
/// produce) but is typed `Box<dyn Any>` since Rust lets a panic carry any
/// payload.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl fmt::Debug for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Behavior")
            .field("count", &self.count)
            .field("requests", &self.requests)
            .finish()
    }
}
