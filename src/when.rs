//! The `when(...)` factory: validates, dedups, and sorts a region list into
//! a builder that schedules a behavior once invoked with a thunk. Every
//! target is a uniform [`Region`], so the thunk just receives `Vec<Region>`
//! directly rather than a per-slot typed tuple.

use std::sync::Arc;

use crate::behavior::{Behavior, Thunk};
use crate::error::IsolationError;
use crate::region::Region;
use crate::runtime::Runtime;

thread_local! {
    /// Regions currently open on this worker, consulted to forbid a thunk
    /// from calling `when(...)` naming a region it already holds — that
    /// would deadlock waiting on its own chain.
    static CURRENTLY_HELD: std::cell::RefCell<Vec<crate::region_id::RegionId>> =
        const { std::cell::RefCell::new(Vec::new()) };
}

pub(crate) fn mark_open(id: crate::region_id::RegionId) {
    CURRENTLY_HELD.with(|h| h.borrow_mut().push(id));
}

pub(crate) fn mark_closed(id: crate::region_id::RegionId) {
    CURRENTLY_HELD.with(|h| {
        let mut h = h.borrow_mut();
        if let Some(pos) = h.iter().position(|x| *x == id) {
            h.remove(pos);
        }
    });
}

fn is_currently_held(id: crate::region_id::RegionId) -> bool {
    CURRENTLY_HELD.with(|h| h.borrow().contains(&id))
}

/// A builder bound to a fixed set of regions and a target runtime, produced
/// by [`when`] or [`crate::Runtime::when`]. Calling it with a thunk schedules
/// a behavior onto that runtime.
pub struct When {
    runtime: Arc<Runtime>,
    regions: Vec<Region>,
}

impl When {
    /// Schedules `thunk` to run once every target region is available.
    /// Returns immediately.
    pub fn run<F>(self, thunk: F)
    where
        F: FnOnce(Vec<Region>) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
            + Send
            + 'static,
    {
        let boxed: Thunk = Box::new(thunk);
        Behavior::schedule(self.runtime, self.regions, boxed);
    }
}

/// Validates that every argument is a shareable region, deduplicates and
/// sorts them by id, and returns a [`When`] builder scheduling against the
/// process-wide [`Runtime::global`]. Fails with `IsolationError::NotShared`
/// if any region has not called `make_shareable()`, and
/// `IsolationError::Reentrant` if any region is already open on the calling
/// thread (nested `when` is forbidden — it would deadlock on the outer
/// call's own held chain).
pub fn when(regions: &[Region]) -> Result<When, IsolationError> {
    when_on(Runtime::global(), regions)
}

/// Same validation as [`when`], but binds the resulting builder to a
/// specific runtime instance instead of the global singleton. The public
/// entry point for this is [`crate::Runtime::when`].
pub(crate) fn when_on(runtime: Arc<Runtime>, regions: &[Region]) -> Result<When, IsolationError> {
    let mut resolved: Vec<Region> = Vec::with_capacity(regions.len());
    for r in regions {
        if !r.is_shared() {
            return Err(IsolationError::NotShared {
                region: r.id(),
                name: r.name(),
            });
        }
        if is_currently_held(r.id()) {
            return Err(IsolationError::Reentrant {
                region: r.id(),
                name: r.name(),
            });
        }
        if !resolved.iter().any(|existing| existing.id() == r.id()) {
            resolved.push(r.clone());
        }
    }
    resolved.sort_by_key(|r| r.id());
    Ok(When { runtime, regions: resolved })
}
