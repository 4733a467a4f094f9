//! Error taxonomy for the region runtime.
//!
//! Three kinds are distinguished, matching the surface described for the
//! runtime: structural violations of the region discipline
//! (`IsolationError`), aggregated thunk failures (`WhenError`), and fatal
//! scheduler/queue failures (`InternalError`). `RuntimeError` unifies the
//! three for call sites that can observe either.

use std::fmt;

use crate::region_id::RegionId;

/// A structural violation of the region discipline.
///
/// These are first-class, not panics: every isolation rule has a named
/// variant here rather than a single stringly-typed catch-all, so callers
/// can match on the reason.
#[derive(thiserror::Error, Debug, Clone)]
pub enum IsolationError {
    /// An operation on a region-owned object was attempted while its owning
    /// region was not open on the calling worker.
    #[error("region {region} ({name:?}) is not open")]
    NotOpen { region: RegionId, name: String },

    /// A value passed to a gated operation already belongs to a different,
    /// still-live region.
    #[error("value belongs to region {owner} ({owner_name:?}), not the open region {region} ({name:?})")]
    ForeignRegion {
        region: RegionId,
        name: String,
        owner: RegionId,
        owner_name: String,
    },

    /// `capture` observed a concurrent capture into a different region that
    /// won the publish race.
    #[error("object already captured by region {owner} ({owner_name:?})")]
    AlreadyCaptured { owner: RegionId, owner_name: String },

    /// `merge` was attempted on a region that is not free (already has a
    /// parent, or is itself an alias).
    #[error("region {region} ({name:?}) is not free and cannot be merged into")]
    NotFree { region: RegionId, name: String },

    /// `merge` was attempted while `self` was not open.
    #[error("region {region} ({name:?}) must be open to merge another region into it")]
    MergeTargetNotOpen { region: RegionId, name: String },

    /// Capturing a region `child` that already belongs to a disjoint region
    /// graph (neither free nor owned by the capturing region).
    #[error("region {child} ({child_name:?}) belongs to a foreign region graph rooted at {root}")]
    ForeignRegionGraph {
        child: RegionId,
        child_name: String,
        root: RegionId,
    },

    /// `when(...)` named a region that has never called `make_shareable()`.
    #[error("region {region} ({name:?}) is not shareable; call make_shareable() first")]
    NotShared { region: RegionId, name: String },

    /// `detach_all` was attempted on a region that is not open, or not yet
    /// shared.
    #[error("region {region} ({name:?}) must be open and shared to detach_all")]
    DetachNotAllowed { region: RegionId, name: String },

    /// A thunk attempted to call `when(...)` naming a region it currently
    /// holds open.
    #[error("region {region} ({name:?}) is already open on this worker; nested when() on it is forbidden")]
    Reentrant { region: RegionId, name: String },

    /// A named root was not found on `get`.
    #[error("region {region} ({name:?}) has no root named {key:?}")]
    NoSuchRoot { region: RegionId, name: String, key: String },

    /// An operation the host type does not implement was requested (e.g.
    /// hashing a type with no `hash_code`, indexing a non-sequence).
    #[error("type {type_name:?} does not support operation {op:?}")]
    UnsupportedOp { type_name: String, op: String },
}

/// Aggregate surface for errors raised inside behavior thunks, re-raised by
/// [`crate::Runtime::wait`].
///
/// The inner order reflects completion order of the behaviors that failed.
/// That order is deterministic within a single run but depends on
/// scheduling, so callers should not depend on a specific ordering across
/// runs.
#[derive(Debug)]
pub struct WhenError {
    pub errors: Vec<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for WhenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} behavior(s) failed:", self.errors.len())?;
        for (i, e) in self.errors.iter().enumerate() {
            write!(f, "\n  [{i}] {e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for WhenError {}

/// Fatal failures of the scheduler itself: queue shutdown races, terminator
/// bookkeeping bugs. These are not expected in correct operation; surfacing
/// them to `wait()` is a last resort so the runtime degrades loudly rather
/// than hanging.
#[derive(thiserror::Error, Debug)]
pub enum InternalError {
    #[error("the work queue was stopped while a behavior was still being scheduled")]
    QueueStopped,

    #[error("WORKER_COUNT must be a positive integer, got {0:?}")]
    InvalidWorkerCount(String),

    #[error("the terminator count underflowed (more decrements than increments)")]
    TerminatorUnderflow,

    #[error("behavior thunk panicked: {0}")]
    ThunkPanicked(String),
}

/// Unifies every error kind a caller of the public API can observe.
#[derive(thiserror::Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Isolation(#[from] IsolationError),

    #[error(transparent)]
    When(#[from] WhenError),

    #[error(transparent)]
    Internal(#[from] InternalError),
}
